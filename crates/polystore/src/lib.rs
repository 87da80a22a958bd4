//! # Polystore
//!
//! One key-value API and one document API over several cloud stores:
//! - **Amazon S3** (objects as values, ranged reads, rename by copy)
//! - **Amazon DynamoDB** (typed attributes, query and scan listings)
//! - **Cloudflare Workers KV** (bulk writes, cursor listings)
//! - **MongoDB** (documents with managed timestamps)
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │          DriverRegistry  (scheme://... -> driver)            │
//! ├──────────────────────────────┬──────────────────────────────┤
//! │        KeyValueStore         │        DocumentStore         │
//! │   S3 │ DynamoDB │ Workers KV │           MongoDB            │
//! ├──────────────────────────────┴──────────────────────────────┤
//! │  Transport traits: ObjectStoreApi │ DynamoDbApi │ KvApi │    │
//! │  MongoApi  (HTTP / OP_MSG clients, in-memory backends)       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! [`KeyValueCache`] layers expiring cache entries over any key-value driver.

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod attribute;
pub mod aws;
pub mod cache;
pub mod cloudflare;
pub mod connection;
pub mod core;
pub mod document;
pub mod dynamodb;
pub mod filter;
pub mod mongodb;
pub mod options;
pub mod registry;
pub mod s3;
pub mod storage;

// Re-export core types
pub use crate::core::{
    Capabilities, DocumentStore, KeyValueEntry, KeyValueStore, Number, Record, RecordStream, Value,
};
pub use attribute::AttributeType;
pub use cache::KeyValueCache;
pub use connection::ConnectionString;
pub use document::Document;
pub use filter::{Conjunction, Filter, FilterClause, Relation};
pub use options::{ComparisonOperator, Condition, Conditions, KeyValueOptions};
pub use registry::{DocumentConnector, DriverRegistry, KeyValueConnector};

// Re-export drivers
pub use cloudflare::CloudflareKvDriver;
pub use dynamodb::DynamoDbDriver;
pub use mongodb::MongoDbDriver;
pub use s3::S3Driver;

pub use polystore_common::{BackendError, Config, Error, Result};
