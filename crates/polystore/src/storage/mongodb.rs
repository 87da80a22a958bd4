//! In-memory MongoDB command handler.
//!
//! Answers the `find`/`getMore`/`insert`/`update`/`delete` commands with the
//! reply documents a server would send, including cursors, `upserted` entries
//! and duplicate-key write errors.

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering as AtomicOrdering};
use std::sync::Arc;

use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::{doc, Bson, Document};
use dashmap::DashMap;
use parking_lot::RwLock;
use regex::Regex;
use tracing::debug;

use polystore_common::Result;

use crate::mongodb::client::check_reply;
use crate::mongodb::MongoApi;

/// Default number of documents in a first batch
pub const DEFAULT_BATCH_SIZE: usize = 101;

const BAD_VALUE: i32 = 2;
const CURSOR_NOT_FOUND: i32 = 43;
const COMMAND_NOT_FOUND: i32 = 59;
const DUPLICATE_KEY: i32 = 11000;

type Collection = RwLock<Vec<Document>>;

struct OpenCursor {
    ns: String,
    remaining: VecDeque<Document>,
}

/// MongoDB server emulation keyed by `database.collection`
pub struct MemoryMongo {
    collections: DashMap<String, Arc<Collection>>,
    cursors: DashMap<i64, OpenCursor>,
    next_cursor: AtomicI64,
    batch_size: usize,
}

impl Default for MemoryMongo {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryMongo {
    pub fn new() -> Self {
        Self {
            collections: DashMap::new(),
            cursors: DashMap::new(),
            next_cursor: AtomicI64::new(1),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Documents per batch when a `find` names no `batchSize`
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Number of documents in `database.collection`
    pub fn document_count(&self, database: &str, collection: &str) -> usize {
        self.collections
            .get(&namespace(database, collection))
            .map_or(0, |c| c.read().len())
    }

    /// Cursors not yet exhausted
    pub fn open_cursors(&self) -> usize {
        self.cursors.len()
    }

    fn collection(&self, ns: &str) -> Arc<Collection> {
        Arc::clone(self.collections.entry(ns.to_string()).or_default().value())
    }

    /// Handle a MongoDB command
    pub fn handle_command(&self, database: &str, cmd: &Document) -> Document {
        debug!("Handling MongoDB command: {:?}", cmd.keys().next());

        if cmd.contains_key("ping") || cmd.contains_key("hello") || cmd.contains_key("isMaster") {
            return doc! { "ok": 1.0 };
        }
        if cmd.contains_key("find") {
            return self.handle_find(database, cmd);
        }
        if cmd.contains_key("getMore") {
            return self.handle_get_more(cmd);
        }
        if cmd.contains_key("insert") {
            return self.handle_insert(database, cmd);
        }
        if cmd.contains_key("update") {
            return self.handle_update(database, cmd);
        }
        if cmd.contains_key("delete") {
            return self.handle_delete(database, cmd);
        }

        error_reply(
            COMMAND_NOT_FOUND,
            format!("no such command: '{}'", cmd.keys().next().map_or("", String::as_str)),
        )
    }

    fn handle_find(&self, database: &str, cmd: &Document) -> Document {
        let ns = namespace(database, cmd.get_str("find").unwrap_or_default());
        let filter = cmd.get_document("filter").cloned().unwrap_or_default();
        let batch_size = batch_size(cmd).unwrap_or(self.batch_size);

        let collection = self.collection(&ns);
        let mut found = VecDeque::new();
        for document in collection.read().iter() {
            match matches(document, &filter) {
                Ok(true) => found.push_back(document.clone()),
                Ok(false) => {}
                Err(message) => return error_reply(BAD_VALUE, message),
            }
        }

        let first_batch: Vec<Document> = found.drain(..batch_size.min(found.len())).collect();
        let id = self.park_cursor(&ns, found);
        doc! {
            "ok": 1.0,
            "cursor": {
                "id": id,
                "ns": ns,
                "firstBatch": first_batch
            }
        }
    }

    fn handle_get_more(&self, cmd: &Document) -> Document {
        let Ok(id) = cmd.get_i64("getMore") else {
            return error_reply(BAD_VALUE, "getMore needs a cursor id");
        };
        let Some((_, mut cursor)) = self.cursors.remove(&id) else {
            return error_reply(CURSOR_NOT_FOUND, format!("cursor id {id} not found"));
        };
        let batch_size = batch_size(cmd).unwrap_or(self.batch_size);
        let next_batch: Vec<Document> = cursor
            .remaining
            .drain(..batch_size.min(cursor.remaining.len()))
            .collect();
        let ns = cursor.ns.clone();
        let id = if cursor.remaining.is_empty() {
            0
        } else {
            self.cursors.insert(id, cursor);
            id
        };
        doc! {
            "ok": 1.0,
            "cursor": {
                "id": id,
                "ns": ns,
                "nextBatch": next_batch
            }
        }
    }

    /// Keep the rest of a result set for `getMore`; 0 when nothing is left
    fn park_cursor(&self, ns: &str, remaining: VecDeque<Document>) -> i64 {
        if remaining.is_empty() {
            return 0;
        }
        let id = self.next_cursor.fetch_add(1, AtomicOrdering::Relaxed);
        self.cursors.insert(
            id,
            OpenCursor {
                ns: ns.to_string(),
                remaining,
            },
        );
        id
    }

    fn handle_insert(&self, database: &str, cmd: &Document) -> Document {
        let ns = namespace(database, cmd.get_str("insert").unwrap_or_default());
        let Ok(documents) = cmd.get_array("documents") else {
            return error_reply(BAD_VALUE, "Missing documents field");
        };
        let collection = self.collection(&ns);
        let mut stored = collection.write();

        let mut inserted = 0i64;
        let mut write_errors = Vec::new();
        for (index, document) in documents.iter().enumerate() {
            let Bson::Document(document) = document else {
                write_errors.push(write_error(index, BAD_VALUE, "documents must be objects"));
                break;
            };
            let document = with_id(document.clone());
            let id = document.get("_id").cloned().unwrap_or(Bson::Null);
            if stored.iter().any(|d| d.get("_id").is_some_and(|existing| bson_eq(existing, &id))) {
                write_errors.push(write_error(
                    index,
                    DUPLICATE_KEY,
                    &format!("E11000 duplicate key error collection: {ns} index: _id_ dup key: {{ _id: {id} }}"),
                ));
                break;
            }
            stored.push(document);
            inserted += 1;
        }

        let mut reply = doc! { "ok": 1.0, "n": inserted };
        if !write_errors.is_empty() {
            reply.insert("writeErrors", write_errors);
        }
        reply
    }

    fn handle_update(&self, database: &str, cmd: &Document) -> Document {
        let ns = namespace(database, cmd.get_str("update").unwrap_or_default());
        let Ok(updates) = cmd.get_array("updates") else {
            return error_reply(BAD_VALUE, "Missing updates field");
        };
        let collection = self.collection(&ns);
        let mut stored = collection.write();

        let mut matched = 0i64;
        let mut modified = 0i64;
        let mut upserted = Vec::new();
        for (index, statement) in updates.iter().enumerate() {
            let Bson::Document(statement) = statement else {
                return error_reply(BAD_VALUE, "update statements must be objects");
            };
            let q = statement.get_document("q").cloned().unwrap_or_default();
            let u = statement.get_document("u").cloned().unwrap_or_default();
            let multi = statement.get_bool("multi").unwrap_or(false);
            let upsert = statement.get_bool("upsert").unwrap_or(false);

            let mut hit = false;
            for document in stored.iter_mut() {
                match matches(document, &q) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(message) => return error_reply(BAD_VALUE, message),
                }
                hit = true;
                matched += 1;
                match apply_update(document, &u, false) {
                    Ok(true) => modified += 1,
                    Ok(false) => {}
                    Err(message) => return error_reply(BAD_VALUE, message),
                }
                if !multi {
                    break;
                }
            }

            if !hit && upsert {
                let mut document = seed_from_query(&q);
                if let Err(message) = apply_update(&mut document, &u, true) {
                    return error_reply(BAD_VALUE, message);
                }
                let document = with_id(document);
                let id = document.get("_id").cloned().unwrap_or(Bson::Null);
                stored.push(document);
                matched += 1;
                upserted.push(doc! { "index": i32::try_from(index).unwrap_or(i32::MAX), "_id": id });
            }
        }

        let mut reply = doc! { "ok": 1.0, "n": matched, "nModified": modified };
        if !upserted.is_empty() {
            reply.insert("upserted", upserted);
        }
        reply
    }

    fn handle_delete(&self, database: &str, cmd: &Document) -> Document {
        let ns = namespace(database, cmd.get_str("delete").unwrap_or_default());
        let Ok(deletes) = cmd.get_array("deletes") else {
            return error_reply(BAD_VALUE, "Missing deletes field");
        };
        let collection = self.collection(&ns);
        let mut stored = collection.write();

        let mut removed = 0i64;
        for statement in deletes {
            let Bson::Document(statement) = statement else {
                return error_reply(BAD_VALUE, "delete statements must be objects");
            };
            let q = statement.get_document("q").cloned().unwrap_or_default();
            let single = matches!(statement.get("limit"), Some(Bson::Int32(1) | Bson::Int64(1)));

            let mut index = 0;
            while index < stored.len() {
                match matches(&stored[index], &q) {
                    Ok(true) => {
                        stored.remove(index);
                        removed += 1;
                        if single {
                            break;
                        }
                    }
                    Ok(false) => index += 1,
                    Err(message) => return error_reply(BAD_VALUE, message),
                }
            }
        }
        doc! { "ok": 1.0, "n": removed }
    }
}

#[async_trait]
impl MongoApi for MemoryMongo {
    async fn run_command(&self, database: &str, command: Document) -> Result<Document> {
        check_reply(self.handle_command(database, &command))
    }
}

fn namespace(database: &str, collection: &str) -> String {
    format!("{database}.{collection}")
}

fn batch_size(cmd: &Document) -> Option<usize> {
    let size = match cmd.get("batchSize") {
        Some(Bson::Int32(n)) => usize::try_from(*n).ok(),
        Some(Bson::Int64(n)) => usize::try_from(*n).ok(),
        _ => None,
    };
    size.filter(|n| *n > 0)
}

fn error_reply(code: i32, message: impl Into<String>) -> Document {
    doc! {
        "ok": 0.0,
        "errmsg": message.into(),
        "code": code
    }
}

fn write_error(index: usize, code: i32, message: &str) -> Document {
    doc! {
        "index": i32::try_from(index).unwrap_or(i32::MAX),
        "code": code,
        "errmsg": message
    }
}

/// Put a generated ObjectId first when the document has no `_id`
fn with_id(document: Document) -> Document {
    if document.contains_key("_id") {
        return document;
    }
    let mut with_id = doc! { "_id": ObjectId::new() };
    for (key, value) in document {
        with_id.insert(key, value);
    }
    with_id
}

/// Equality fields of an upsert query become fields of the new document
fn seed_from_query(q: &Document) -> Document {
    let mut seed = Document::new();
    for (field, condition) in q {
        if field.starts_with('$') || is_operator_document(condition) {
            continue;
        }
        set_path(&mut seed, field, condition.clone());
    }
    seed
}

fn is_operator_document(value: &Bson) -> bool {
    match value {
        Bson::Document(d) => d.keys().next().is_some_and(|k| k.starts_with('$')),
        _ => false,
    }
}

/// Apply an update document; returns whether the document changed
fn apply_update(document: &mut Document, update: &Document, inserting: bool) -> std::result::Result<bool, String> {
    let before = document.clone();
    if !update.keys().any(|k| k.starts_with('$')) {
        // Replacement keeps the existing id.
        let id = document.get("_id").cloned();
        *document = update.clone();
        if let Some(id) = id {
            document.insert("_id", id);
        }
        return Ok(*document != before);
    }

    for (operator, fields) in update {
        let Bson::Document(fields) = fields else {
            return Err(format!("Modifiers operate on fields but {operator} was given {fields}"));
        };
        match operator.as_str() {
            "$set" => {
                for (field, value) in fields {
                    set_path(document, field, value.clone());
                }
            }
            "$setOnInsert" => {
                if inserting {
                    for (field, value) in fields {
                        set_path(document, field, value.clone());
                    }
                }
            }
            "$unset" => {
                for field in fields.keys() {
                    remove_path(document, field);
                }
            }
            "$inc" => {
                for (field, delta) in fields {
                    let current = lookup(document, field).cloned().unwrap_or(Bson::Int32(0));
                    let sum = add_numbers(&current, delta)
                        .ok_or_else(|| format!("Cannot apply $inc to a value of non-numeric type for field {field}"))?;
                    set_path(document, field, sum);
                }
            }
            other => return Err(format!("Unknown modifier: {other}")),
        }
    }
    Ok(*document != before)
}

fn add_numbers(a: &Bson, b: &Bson) -> Option<Bson> {
    Some(match (a, b) {
        (Bson::Int32(x), Bson::Int32(y)) => x
            .checked_add(*y)
            .map_or_else(|| Bson::Int64(i64::from(*x) + i64::from(*y)), Bson::Int32),
        (Bson::Int32(_) | Bson::Int64(_), Bson::Int32(_) | Bson::Int64(_)) => {
            Bson::Int64(as_i64(a)?.checked_add(as_i64(b)?)?)
        }
        _ => Bson::Double(as_f64(a)? + as_f64(b)?),
    })
}

fn as_i64(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(n) => Some(i64::from(*n)),
        Bson::Int64(n) => Some(*n),
        _ => None,
    }
}

#[allow(clippy::cast_precision_loss)]
fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(f64::from(*n)),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(n) => Some(*n),
        _ => None,
    }
}

/// Value at a dotted path
fn lookup<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut parts = path.split('.');
    let mut current = document.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Bson::Document(inner) => inner.get(part)?,
            _ => return None,
        };
    }
    Some(current)
}

fn set_path(document: &mut Document, path: &str, value: Bson) {
    match path.split_once('.') {
        None => {
            document.insert(path, value);
        }
        Some((head, rest)) => {
            if !matches!(document.get(head), Some(Bson::Document(_))) {
                document.insert(head, Document::new());
            }
            if let Some(Bson::Document(inner)) = document.get_mut(head) {
                set_path(inner, rest, value);
            }
        }
    }
}

fn remove_path(document: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            document.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Bson::Document(inner)) = document.get_mut(head) {
                remove_path(inner, rest);
            }
        }
    }
}

/// Evaluate a query document against `document`
fn matches(document: &Document, filter: &Document) -> std::result::Result<bool, String> {
    for (field, condition) in filter {
        let ok = match field.as_str() {
            "$and" | "$or" => {
                let Bson::Array(clauses) = condition else {
                    return Err(format!("{field} must be an array"));
                };
                let mut results = Vec::with_capacity(clauses.len());
                for clause in clauses {
                    let Bson::Document(clause) = clause else {
                        return Err(format!("{field} entries must be objects"));
                    };
                    results.push(matches(document, clause)?);
                }
                if field == "$and" {
                    results.iter().all(|r| *r)
                } else {
                    results.iter().any(|r| *r)
                }
            }
            other if other.starts_with('$') => return Err(format!("unknown top level operator: {other}")),
            path => matches_condition(lookup(document, path), condition)?,
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn matches_condition(actual: Option<&Bson>, condition: &Bson) -> std::result::Result<bool, String> {
    let operators = match condition {
        Bson::Document(operators) if is_operator_document(condition) => operators,
        Bson::RegularExpression(re) => return regex_matches(actual, &re.pattern, &re.options),
        _ => return Ok(equals(actual, condition)),
    };
    let options = operators.get_str("$options").unwrap_or_default();

    for (operator, operand) in operators {
        let ok = match operator.as_str() {
            "$eq" => equals(actual, operand),
            "$ne" => !equals(actual, operand),
            "$gt" => ordered(actual, operand, |o| o == Ordering::Greater),
            "$gte" => ordered(actual, operand, |o| o != Ordering::Less),
            "$lt" => ordered(actual, operand, |o| o == Ordering::Less),
            "$lte" => ordered(actual, operand, |o| o != Ordering::Greater),
            "$in" | "$nin" => {
                let Bson::Array(candidates) = operand else {
                    return Err(format!("{operator} needs an array"));
                };
                let found = candidates.iter().any(|c| equals(actual, c));
                found == (operator == "$in")
            }
            "$exists" => actual.is_some() == truthy(operand),
            "$regex" => match operand {
                Bson::String(pattern) => regex_matches(actual, pattern, options)?,
                Bson::RegularExpression(re) => regex_matches(actual, &re.pattern, &re.options)?,
                _ => return Err("$regex has to be a string".to_string()),
            },
            "$options" => true,
            other => return Err(format!("unknown operator: {other}")),
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Equality with array membership: `{tags: "a"}` matches `tags: ["a", "b"]`
fn equals(actual: Option<&Bson>, expected: &Bson) -> bool {
    match actual {
        None => matches!(expected, Bson::Null),
        Some(Bson::Array(items)) if !matches!(expected, Bson::Array(_)) => {
            items.iter().any(|item| bson_eq(item, expected))
        }
        Some(value) => bson_eq(value, expected),
    }
}

fn ordered(actual: Option<&Bson>, operand: &Bson, accept: impl Fn(Ordering) -> bool) -> bool {
    match actual {
        Some(Bson::Array(items)) => items
            .iter()
            .any(|item| compare(item, operand).is_some_and(&accept)),
        Some(value) => compare(value, operand).is_some_and(accept),
        None => false,
    }
}

fn regex_matches(actual: Option<&Bson>, pattern: &str, options: &str) -> std::result::Result<bool, String> {
    let flags: String = options.chars().filter(|c| matches!(c, 'i' | 'm' | 's' | 'x')).collect();
    let source = if flags.is_empty() {
        pattern.to_string()
    } else {
        format!("(?{flags}){pattern}")
    };
    let re = Regex::new(&source).map_err(|e| format!("invalid regex: {e}"))?;
    Ok(match actual {
        Some(Bson::String(s)) => re.is_match(s),
        Some(Bson::Array(items)) => items
            .iter()
            .any(|item| matches!(item, Bson::String(s) if re.is_match(s))),
        _ => false,
    })
}

fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(b) => *b,
        Bson::Null => false,
        other => as_f64(other).map_or(true, |n| n != 0.0),
    }
}

fn bson_eq(a: &Bson, b: &Bson) -> bool {
    compare(a, b) == Some(Ordering::Equal)
}

/// Order values of comparable types; numbers compare across widths
fn compare(a: &Bson, b: &Bson) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (as_i64(a), as_i64(b)) {
        return Some(x.cmp(&y));
    }
    if let (Some(x), Some(y)) = (as_f64(a), as_f64(b)) {
        return x.partial_cmp(&y);
    }
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => Some(x.cmp(y)),
        (Bson::Boolean(x), Bson::Boolean(y)) => Some(x.cmp(y)),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => Some(x.bytes().cmp(&y.bytes())),
        (Bson::DateTime(x), Bson::DateTime(y)) => Some(x.timestamp_millis().cmp(&y.timestamp_millis())),
        (Bson::Null, Bson::Null) => Some(Ordering::Equal),
        _ if a == b => Some(Ordering::Equal),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(state: &MemoryMongo, cmd: Document) -> Document {
        state.handle_command("test", &cmd)
    }

    #[test]
    fn test_find_with_cursor() {
        let state = MemoryMongo::new().with_batch_size(2);
        let documents: Vec<Document> = (1..=5).map(|i| doc! {"n": i}).collect();
        run(&state, doc! {"insert": "items", "documents": documents});

        let reply = run(&state, doc! {"find": "items", "filter": {"n": {"$gte": 2}}});
        let cursor = reply.get_document("cursor").unwrap();
        assert_eq!(cursor.get_array("firstBatch").unwrap().len(), 2);
        let id = cursor.get_i64("id").unwrap();
        assert_ne!(id, 0);

        let reply = run(&state, doc! {"getMore": id, "collection": "items"});
        let cursor = reply.get_document("cursor").unwrap();
        assert_eq!(cursor.get_array("nextBatch").unwrap().len(), 2);
        assert_eq!(cursor.get_i64("id").unwrap(), 0);
        assert_eq!(state.open_cursors(), 0);
    }

    #[test]
    fn test_duplicate_id() {
        let state = MemoryMongo::new();
        run(&state, doc! {"insert": "items", "documents": [{"_id": "a"}]});
        let reply = run(&state, doc! {"insert": "items", "documents": [{"_id": "a"}]});
        let errors = reply.get_array("writeErrors").unwrap();
        match &errors[0] {
            Bson::Document(error) => assert_eq!(error.get_i32("code").unwrap(), DUPLICATE_KEY),
            _ => panic!("Expected write error document"),
        }
        assert_eq!(state.document_count("test", "items"), 1);
    }

    #[test]
    fn test_upsert_with_set_on_insert() {
        let state = MemoryMongo::new();
        let update = doc! {
            "update": "items",
            "updates": [{
                "q": {"_id": "x"},
                "u": {"$set": {"name": "first"}, "$setOnInsert": {"createdAt": 1}},
                "upsert": true,
                "multi": false
            }]
        };
        let reply = run(&state, update.clone());
        assert_eq!(reply.get_array("upserted").unwrap().len(), 1);

        let reply = run(&state, update);
        assert!(reply.get("upserted").is_none());
        assert_eq!(reply.get_i64("n").unwrap(), 1);
        assert_eq!(reply.get_i64("nModified").unwrap(), 0);
    }

    #[test]
    fn test_delete_limit() {
        let state = MemoryMongo::new();
        run(&state, doc! {"insert": "items", "documents": [{"k": 1}, {"k": 1}, {"k": 2}]});
        let reply = run(&state, doc! {"delete": "items", "deletes": [{"q": {"k": 1}, "limit": 1}]});
        assert_eq!(reply.get_i64("n").unwrap(), 1);
        let reply = run(&state, doc! {"delete": "items", "deletes": [{"q": {}, "limit": 0}]});
        assert_eq!(reply.get_i64("n").unwrap(), 2);
    }

    #[test]
    fn test_matcher_operators() {
        let document = doc! {
            "name": "Toyota Corolla",
            "price": 25000,
            "tags": ["a", "b"],
            "specs": {"doors": 4}
        };
        assert!(matches(&document, &doc! {"price": 25000.0}).unwrap());
        assert!(matches(&document, &doc! {"price": {"$gt": 20000i64, "$lte": 25000}}).unwrap());
        assert!(matches(&document, &doc! {"name": {"$regex": "^toyota", "$options": "i"}}).unwrap());
        assert!(matches(&document, &doc! {"tags": "b"}).unwrap());
        assert!(matches(&document, &doc! {"tags": {"$nin": ["c"]}}).unwrap());
        assert!(matches(&document, &doc! {"specs.doors": 4}).unwrap());
        assert!(matches(&document, &doc! {"missing": {"$exists": false}}).unwrap());
        assert!(!matches(&document, &doc! {"price": {"$in": [1, 2]}}).unwrap());
        assert!(matches(&document, &doc! {"$or": [{"price": 1}, {"tags": "a"}]}).unwrap());
        assert!(matches(&document, &doc! {"price": {"$near": 1}}).is_err());
    }

    #[test]
    fn test_unknown_command() {
        let reply = run(&MemoryMongo::new(), doc! {"explain": 1});
        assert_eq!(reply.get_i32("code").unwrap(), COMMAND_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_run_command_checks_reply() {
        let err = MemoryMongo::new()
            .run_command("test", doc! {"getMore": 99i64, "collection": "x"})
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cursor id 99 not found"));
    }
}
