//! MongoDB wire protocol and command types

use bson::Document;
use serde::{Deserialize, Serialize};

// ============================================================================
// Wire Protocol Types
// ============================================================================

/// MongoDB wire protocol opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum OpCode {
    OpReply = 1,
    OpCompressed = 2012,
    OpMsg = 2013,
    Unknown = 0,
}

impl From<u32> for OpCode {
    fn from(value: u32) -> Self {
        match value {
            1 => OpCode::OpReply,
            2012 => OpCode::OpCompressed,
            2013 => OpCode::OpMsg,
            _ => OpCode::Unknown,
        }
    }
}

/// Message header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgHeader {
    pub message_length: i32,
    pub request_id: i32,
    pub response_to: i32,
    pub op_code: OpCode,
}

/// Header size in bytes
pub const HEADER_LEN: usize = 16;

/// OP_MSG flag bits
#[derive(Debug, Clone, Copy)]
pub struct MsgFlags(pub u32);

impl MsgFlags {
    pub const CHECKSUM_PRESENT: u32 = 1;
    pub const MORE_TO_COME: u32 = 2;
}

/// OP_MSG section types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SectionKind {
    Body = 0,
    DocumentSequence = 1,
}

// ============================================================================
// Command Types
// ============================================================================
//
// The command name must be the first field of each document, so field
// order in these structs matters.

/// Write concern attached to every write command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteConcern {
    /// `"majority"`, a tag set name, or a node count
    pub w: bson::Bson,
    pub wtimeout: i64,
}

impl WriteConcern {
    /// Parse `w`: numeric strings become node counts.
    pub fn new(w: &str, wtimeout: i64) -> Self {
        let w = w
            .parse::<i32>()
            .map_or_else(|_| bson::Bson::String(w.to_string()), bson::Bson::Int32);
        Self { w, wtimeout }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindCommand {
    pub find: String,
    pub filter: Document,
    #[serde(rename = "batchSize", skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetMoreCommand {
    #[serde(rename = "getMore")]
    pub get_more: i64,
    pub collection: String,
    #[serde(rename = "batchSize", skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsertCommand {
    pub insert: String,
    pub documents: Vec<Document>,
    pub ordered: bool,
    #[serde(rename = "writeConcern")]
    pub write_concern: WriteConcern,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateCommand {
    pub update: String,
    pub updates: Vec<UpdateStatement>,
    pub ordered: bool,
    #[serde(rename = "writeConcern")]
    pub write_concern: WriteConcern,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateStatement {
    pub q: Document,
    pub u: Document,
    #[serde(default)]
    pub upsert: bool,
    #[serde(default)]
    pub multi: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteCommand {
    pub delete: String,
    pub deletes: Vec<DeleteStatement>,
    pub ordered: bool,
    #[serde(rename = "writeConcern")]
    pub write_concern: WriteConcern,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteStatement {
    pub q: Document,
    /// 1 deletes the first match, 0 deletes all
    pub limit: i32,
}

// ============================================================================
// Response Types
// ============================================================================

/// `find` / `getMore` reply
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CursorReply {
    pub cursor: CursorBatch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorBatch {
    /// 0 once the cursor is exhausted
    pub id: i64,
    #[serde(default)]
    pub ns: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub first_batch: Vec<Document>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub next_batch: Vec<Document>,
}

/// Reply of `insert`, `update` and `delete`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteReply {
    #[serde(default)]
    pub n: i64,
    #[serde(default)]
    pub n_modified: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub upserted: Vec<Document>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub write_errors: Vec<WriteErrorEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_concern_error: Option<WriteErrorEntry>,
}

impl WriteReply {
    /// Documents matched by an update, upserts included
    pub fn matched(&self) -> i64 {
        self.n
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteErrorEntry {
    #[serde(default)]
    pub index: i32,
    #[serde(default)]
    pub code: i32,
    #[serde(default)]
    pub errmsg: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_command_name_first() {
        let command = FindCommand {
            find: "cars".to_string(),
            filter: doc! {"brand": "Toyota"},
            batch_size: None,
        };
        let document = bson::to_document(&command).unwrap();
        assert_eq!(document.keys().next().map(String::as_str), Some("find"));
        assert!(!document.contains_key("batchSize"));
    }

    #[test]
    fn test_write_concern() {
        assert_eq!(WriteConcern::new("majority", 100).w, bson::Bson::String("majority".into()));
        assert_eq!(WriteConcern::new("2", 100).w, bson::Bson::Int32(2));
    }

    #[test]
    fn test_write_reply_defaults() {
        let reply: WriteReply = bson::from_document(doc! {"n": 3_i32, "ok": 1.0}).unwrap();
        assert_eq!(reply.matched(), 3);
        assert!(reply.write_errors.is_empty());
        assert!(reply.write_concern_error.is_none());
    }

    #[test]
    fn test_cursor_reply() {
        let reply: CursorReply = bson::from_document(doc! {
            "cursor": {"id": 0_i64, "ns": "db.cars", "firstBatch": [{"a": 1}]},
            "ok": 1,
        })
        .unwrap();
        assert_eq!(reply.cursor.id, 0);
        assert_eq!(reply.cursor.first_batch.len(), 1);
    }
}
