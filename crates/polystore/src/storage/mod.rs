//! In-memory backends.
//!
//! Each type implements one of the transport traits ([`DynamoDbApi`],
//! [`ObjectStoreApi`], [`KvApi`], [`MongoApi`]) with the semantics of the
//! real service that the drivers rely on: paging, conditions, error codes.
//! They back the test suite and let applications run without the cloud.
//!
//! [`DynamoDbApi`]: crate::dynamodb::DynamoDbApi
//! [`ObjectStoreApi`]: crate::s3::ObjectStoreApi
//! [`KvApi`]: crate::cloudflare::KvApi
//! [`MongoApi`]: crate::mongodb::MongoApi

pub mod dynamodb;
pub mod kv;
pub mod mongodb;
pub mod object;

pub use dynamodb::MemoryDynamoDb;
pub use kv::MemoryKv;
pub use mongodb::MemoryMongo;
pub use object::MemoryObjectStore;
