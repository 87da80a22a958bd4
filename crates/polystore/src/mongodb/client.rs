//! MongoDB command transport over the wire protocol.

use async_trait::async_trait;
use bson::spec::BinarySubtype;
use bson::{doc, Binary, Bson, Document};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use polystore_common::{BackendError, Result};

use super::protocol::{parse_header, parse_op_msg, serialize_op_msg};
use super::scram::{ScramClient, MECHANISM};
use super::types::HEADER_LEN;
use super::SERVICE;

/// Upper bound on a reply frame (MongoDB's maxMessageSizeBytes)
const MAX_MESSAGE_LEN: usize = 48 * 1024 * 1024;

/// Runs database commands
#[async_trait]
pub trait MongoApi: Send + Sync {
    /// Run `command` against `database` and return the reply document.
    ///
    /// Replies with `ok != 1` are returned as [`BackendError::Command`].
    async fn run_command(&self, database: &str, command: Document) -> Result<Document>;
}

/// Credentials for SCRAM authentication
#[derive(Clone)]
pub struct MongoCredentials {
    pub username: String,
    pub password: String,
    pub auth_source: String,
}

impl std::fmt::Debug for MongoCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MongoCredentials")
            .field("username", &self.username)
            .field("auth_source", &self.auth_source)
            .finish_non_exhaustive()
    }
}

/// Single-connection wire protocol client; requests are serialized on the
/// connection.
///
/// A reply that cannot be read in full leaves the stream mid-frame; the
/// client then refuses further commands instead of misreading the stream.
pub struct MongoWireClient {
    stream: Mutex<TcpStream>,
    next_request_id: AtomicI32,
    out_of_sync: AtomicBool,
    address: String,
}

impl MongoWireClient {
    /// Connect to `host:port`, authenticating when credentials are given.
    pub async fn connect(
        host: &str,
        port: u16,
        credentials: Option<&MongoCredentials>,
        timeout: Duration,
    ) -> Result<Self> {
        let address = format!("{host}:{port}");
        let stream = tokio::time::timeout(timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| BackendError::transport(SERVICE, format!("timed out connecting to {address}")))?
            .map_err(|e| BackendError::transport(SERVICE, format!("{address}: {e}")))?;
        stream
            .set_nodelay(true)
            .map_err(|e| BackendError::transport(SERVICE, e.to_string()))?;
        info!(%address, "connected to MongoDB");

        let client = Self {
            stream: Mutex::new(stream),
            next_request_id: AtomicI32::new(1),
            out_of_sync: AtomicBool::new(false),
            address,
        };
        if let Some(credentials) = credentials {
            client.authenticate(credentials).await?;
        }
        Ok(client)
    }

    #[instrument(skip(self, credentials), fields(user = %credentials.username))]
    async fn authenticate(&self, credentials: &MongoCredentials) -> Result<()> {
        let mut scram = ScramClient::new(&credentials.username, &credentials.password);
        let db = credentials.auth_source.as_str();

        let reply = self
            .run_command(
                db,
                doc! {
                    "saslStart": 1,
                    "mechanism": MECHANISM,
                    "payload": payload(scram.client_first()),
                    "autoAuthorize": 1,
                    "options": {"skipEmptyExchange": true},
                },
            )
            .await?;
        let conversation_id = reply.get("conversationId").cloned().unwrap_or(Bson::Int32(1));
        let server_first = reply_payload(&reply)?;

        let client_final = scram.client_final(&server_first)?;
        let mut reply = self
            .run_command(
                db,
                doc! {
                    "saslContinue": 1,
                    "conversationId": conversation_id.clone(),
                    "payload": payload(client_final),
                },
            )
            .await?;
        scram.verify_server_final(&reply_payload(&reply)?)?;

        while !reply.get_bool("done").unwrap_or(false) {
            reply = self
                .run_command(
                    db,
                    doc! {
                        "saslContinue": 1,
                        "conversationId": conversation_id.clone(),
                        "payload": payload(String::new()),
                    },
                )
                .await?;
        }
        debug!("SCRAM authentication complete");
        Ok(())
    }

    async fn round_trip(&self, command: &Document) -> Result<Document> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let frame = serialize_op_msg(request_id, 0, command)?;

        let mut stream = self.stream.lock().await;
        if self.out_of_sync.load(Ordering::Acquire) {
            return Err(BackendError::transport(
                SERVICE,
                format!("connection to {} is out of sync, reconnect", self.address),
            )
            .into());
        }
        let (response_to, body) = match Self::exchange(&mut stream, &frame).await {
            Ok(reply) => reply,
            Err(e) => {
                self.out_of_sync.store(true, Ordering::Release);
                return Err(e);
            }
        };
        drop(stream);

        // The whole frame was consumed, so the stream stays usable.
        if response_to != request_id {
            return Err(BackendError::protocol(
                SERVICE,
                format!("reply to request {response_to} while waiting for {request_id}"),
            )
            .into());
        }
        parse_op_msg(&body)
    }

    /// Write one frame and read one complete reply frame
    async fn exchange(stream: &mut TcpStream, frame: &[u8]) -> Result<(i32, Vec<u8>)> {
        let io_error = |e: std::io::Error| BackendError::transport(SERVICE, e.to_string());
        stream.write_all(frame).await.map_err(io_error)?;

        let mut header_bytes = [0u8; HEADER_LEN];
        stream.read_exact(&mut header_bytes).await.map_err(io_error)?;
        let header = parse_header(&header_bytes)?;
        let length = usize::try_from(header.message_length).unwrap_or(0);
        if length > MAX_MESSAGE_LEN {
            return Err(BackendError::protocol(SERVICE, format!("reply of {length} bytes is too large")).into());
        }
        let mut body = vec![0u8; length - HEADER_LEN];
        stream.read_exact(&mut body).await.map_err(io_error)?;
        Ok((header.response_to, body))
    }
}

#[async_trait]
impl MongoApi for MongoWireClient {
    #[instrument(skip(self, command), fields(address = %self.address))]
    async fn run_command(&self, database: &str, mut command: Document) -> Result<Document> {
        let name = command.keys().next().cloned().unwrap_or_default();
        command.insert("$db", database);
        let reply = self.round_trip(&command).await?;
        debug!(command = %name, "MongoDB reply");
        check_reply(reply)
    }
}

/// Turn `ok: 0` replies into errors
pub fn check_reply(reply: Document) -> Result<Document> {
    let ok = match reply.get("ok") {
        Some(Bson::Double(v)) => *v == 1.0,
        Some(Bson::Int32(v)) => *v == 1,
        Some(Bson::Int64(v)) => *v == 1,
        Some(Bson::Boolean(v)) => *v,
        _ => false,
    };
    if ok {
        return Ok(reply);
    }
    let code = match reply.get("code") {
        Some(Bson::Int32(c)) => *c,
        Some(Bson::Int64(c)) => i32::try_from(*c).unwrap_or(-1),
        #[allow(clippy::cast_possible_truncation)]
        Some(Bson::Double(c)) => *c as i32,
        _ => -1,
    };
    let message = reply
        .get_str("errmsg")
        .map_or_else(|_| "command failed".to_string(), String::from);
    Err(BackendError::Command {
        service: SERVICE,
        code,
        message,
    }
    .into())
}

fn payload(text: String) -> Bson {
    Bson::Binary(Binary {
        subtype: BinarySubtype::Generic,
        bytes: text.into_bytes(),
    })
}

fn reply_payload(reply: &Document) -> Result<String> {
    match reply.get("payload") {
        Some(Bson::Binary(binary)) => Ok(String::from_utf8_lossy(&binary.bytes).into_owned()),
        Some(Bson::String(s)) => Ok(s.clone()),
        _ => Err(BackendError::protocol(SERVICE, "SASL reply without payload").into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_reply_ok() {
        assert!(check_reply(doc! {"ok": 1.0}).is_ok());
        assert!(check_reply(doc! {"ok": 1}).is_ok());
    }

    #[test]
    fn test_check_reply_error() {
        let err = check_reply(doc! {"ok": 0.0, "errmsg": "ns not found", "code": 26}).unwrap_err();
        match err {
            polystore_common::Error::Backend(BackendError::Command { code, message, .. }) => {
                assert_eq!(code, 26);
                assert_eq!(message, "ns not found");
            }
            _ => panic!("Expected command error"),
        }
    }

    /// Serve one connection: the first reply answers a request that was
    /// never sent, the second answers correctly.
    async fn serve_stale_then_good(listener: tokio::net::TcpListener) {
        let (mut socket, _) = listener.accept().await.unwrap();
        for stale in [true, false] {
            let mut header_bytes = [0u8; HEADER_LEN];
            socket.read_exact(&mut header_bytes).await.unwrap();
            let header = parse_header(&header_bytes).unwrap();
            let mut body = vec![0u8; usize::try_from(header.message_length).unwrap() - HEADER_LEN];
            socket.read_exact(&mut body).await.unwrap();

            let response_to = if stale { header.request_id + 100 } else { header.request_id };
            let reply = serialize_op_msg(500, response_to, &doc! {"ok": 1.0, "stale": stale}).unwrap();
            socket.write_all(&reply).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_mismatched_reply_keeps_stream_in_sync() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(serve_stale_then_good(listener));

        let client = MongoWireClient::connect("127.0.0.1", port, None, Duration::from_secs(5))
            .await
            .unwrap();
        let err = client.run_command("admin", doc! {"ping": 1}).await.unwrap_err();
        assert!(err.to_string().contains("while waiting for"));

        let reply = client.run_command("admin", doc! {"ping": 1}).await.unwrap();
        assert!(!reply.get_bool("stale").unwrap());
        server.await.unwrap();
    }

    #[test]
    fn test_reply_payload() {
        let reply = doc! {"payload": payload("r=abc".to_string())};
        assert_eq!(reply_payload(&reply).unwrap(), "r=abc");
        assert!(reply_payload(&doc! {}).is_err());
    }
}
