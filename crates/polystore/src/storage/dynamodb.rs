//! In-memory DynamoDB JSON API

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::{json, Map, Value as JsonValue};
use tracing::debug;

use polystore_common::{BackendError, Result};

use crate::dynamodb::client::SERVICE;
use crate::dynamodb::{DynamoDbApi, MAX_BATCH_WRITE};

type Item = Map<String, JsonValue>;

/// Table data structure
struct TableData {
    hash_key: String,
    /// Items ordered by the canonical text of their key attribute
    items: RwLock<BTreeMap<String, Item>>,
}

/// DynamoDB emulation supporting the item, query, scan and batch-write
/// operations used by [`DynamoDbDriver`](crate::dynamodb::DynamoDbDriver).
///
/// Only hash keys are modelled; conditions use the legacy
/// `ComparisonOperator` / `AttributeValueList` form.
pub struct MemoryDynamoDb {
    tables: DashMap<String, Arc<TableData>>,
    page_size: usize,
}

impl Default for MemoryDynamoDb {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDynamoDb {
    pub fn new() -> Self {
        Self {
            tables: DashMap::new(),
            page_size: 100,
        }
    }

    /// Add a table keyed by `hash_key`
    #[must_use]
    pub fn with_table(self, name: &str, hash_key: &str) -> Self {
        self.create_table(name, hash_key);
        self
    }

    /// Maximum items evaluated per Query/Scan page
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn create_table(&self, name: &str, hash_key: &str) {
        self.tables.insert(
            name.to_string(),
            Arc::new(TableData {
                hash_key: hash_key.to_string(),
                items: RwLock::new(BTreeMap::new()),
            }),
        );
    }

    /// Number of items in `table`
    pub fn item_count(&self, table: &str) -> usize {
        self.tables
            .get(table)
            .map_or(0, |t| t.items.read().len())
    }

    fn table(&self, request: &JsonValue) -> Result<Arc<TableData>> {
        let name = request
            .get("TableName")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| validation("TableName is required"))?;
        self.table_named(name)
    }

    fn table_named(&self, name: &str) -> Result<Arc<TableData>> {
        self.tables
            .get(name)
            .map(|t| Arc::clone(t.value()))
            .ok_or_else(|| {
                client_error("ResourceNotFoundException", "Requested resource not found").into()
            })
    }

    fn create(&self, request: &JsonValue) -> Result<JsonValue> {
        let name = request
            .get("TableName")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| validation("TableName is required"))?;
        let hash_key = request
            .get("KeySchema")
            .and_then(JsonValue::as_array)
            .and_then(|schema| {
                schema
                    .iter()
                    .find(|k| k.get("KeyType").and_then(JsonValue::as_str) == Some("HASH"))
            })
            .and_then(|k| k.get("AttributeName"))
            .and_then(JsonValue::as_str)
            .ok_or_else(|| validation("KeySchema needs a HASH key"))?;
        if self.tables.contains_key(name) {
            return Err(client_error("ResourceInUseException", "Table already exists").into());
        }
        self.create_table(name, hash_key);
        Ok(json!({"TableDescription": {"TableName": name, "TableStatus": "ACTIVE"}}))
    }

    fn get_item(&self, request: &JsonValue) -> Result<JsonValue> {
        let table = self.table(request)?;
        let key = item_key(&table, request.get("Key"))?;
        let items = table.items.read();
        Ok(match items.get(&key) {
            Some(item) => json!({ "Item": item }),
            None => json!({}),
        })
    }

    fn put_item(&self, request: &JsonValue) -> Result<JsonValue> {
        let table = self.table(request)?;
        let item = request
            .get("Item")
            .and_then(JsonValue::as_object)
            .ok_or_else(|| validation("Item is required"))?;
        put(&table, item.clone())?;
        Ok(json!({}))
    }

    fn delete_item(&self, request: &JsonValue) -> Result<JsonValue> {
        let table = self.table(request)?;
        let key = item_key(&table, request.get("Key"))?;
        table.items.write().remove(&key);
        Ok(json!({}))
    }

    /// Query and Scan: conditions are ANDed; `Limit` caps evaluated items
    fn list(&self, request: &JsonValue, conditions_field: &str) -> Result<JsonValue> {
        let table = self.table(request)?;
        let conditions = request
            .get(conditions_field)
            .and_then(JsonValue::as_object)
            .cloned()
            .unwrap_or_default();
        if conditions_field == "KeyConditions" {
            let on_hash_key = conditions
                .get(&table.hash_key)
                .and_then(|c| c.get("ComparisonOperator"))
                .and_then(JsonValue::as_str);
            if on_hash_key != Some("EQ") {
                return Err(validation("Query condition missed key schema element").into());
            }
        }

        let limit = request
            .get("Limit")
            .and_then(JsonValue::as_u64)
            .and_then(|l| usize::try_from(l).ok())
            .map_or(self.page_size, |l| l.min(self.page_size))
            .max(1);
        let start_after = match request.get("ExclusiveStartKey") {
            Some(key) => Some(item_key(&table, Some(key))?),
            None => None,
        };

        let items = table.items.read();
        let mut candidates = items
            .iter()
            .filter(|(key, _)| start_after.as_ref().map_or(true, |start| *key > start))
            .peekable();

        let mut matched = Vec::new();
        let mut last_key = None;
        let mut scanned = 0;
        while scanned < limit {
            let Some((key, item)) = candidates.next() else {
                break;
            };
            scanned += 1;
            last_key = Some(key.clone());
            if matches_all(item, &conditions)? {
                matched.push(JsonValue::Object(item.clone()));
            }
        }

        let mut response = json!({
            "Items": matched,
            "Count": matched.len(),
            "ScannedCount": scanned,
        });
        if candidates.peek().is_some() {
            if let Some(item) = last_key.as_ref().and_then(|k| items.get(k)) {
                let mut key = Map::new();
                if let Some(attr) = item.get(&table.hash_key) {
                    key.insert(table.hash_key.clone(), attr.clone());
                }
                response["LastEvaluatedKey"] = JsonValue::Object(key);
            }
        }
        Ok(response)
    }

    fn batch_write(&self, request: &JsonValue) -> Result<JsonValue> {
        let request_items = request
            .get("RequestItems")
            .and_then(JsonValue::as_object)
            .ok_or_else(|| validation("RequestItems is required"))?;
        let total: usize = request_items
            .values()
            .filter_map(JsonValue::as_array)
            .map(Vec::len)
            .sum();
        if total == 0 || total > MAX_BATCH_WRITE {
            return Err(validation(format!(
                "Member must have length between 1 and {MAX_BATCH_WRITE}, got {total}"
            ))
            .into());
        }

        for (name, requests) in request_items {
            let table = self.table_named(name)?;
            for request in requests.as_array().into_iter().flatten() {
                if let Some(item) = request.pointer("/PutRequest/Item").and_then(JsonValue::as_object) {
                    put(&table, item.clone())?;
                } else if let Some(key) = request.pointer("/DeleteRequest/Key") {
                    let key = item_key(&table, Some(key))?;
                    table.items.write().remove(&key);
                } else {
                    return Err(validation("each request needs PutRequest or DeleteRequest").into());
                }
            }
        }
        Ok(json!({"UnprocessedItems": {}}))
    }
}

#[async_trait]
impl DynamoDbApi for MemoryDynamoDb {
    async fn call(&self, operation: &str, request: JsonValue) -> Result<JsonValue> {
        debug!(operation, "memory DynamoDB call");
        match operation {
            "CreateTable" => self.create(&request),
            "GetItem" => self.get_item(&request),
            "PutItem" => self.put_item(&request),
            "DeleteItem" => self.delete_item(&request),
            "Query" => self.list(&request, "KeyConditions"),
            "Scan" => self.list(&request, "ScanFilter"),
            "BatchWriteItem" => self.batch_write(&request),
            other => Err(client_error("UnknownOperationException", &format!("Unknown operation {other}")).into()),
        }
    }
}

fn client_error(code: &str, message: &str) -> BackendError {
    BackendError::Http {
        service: SERVICE,
        status: 400,
        code: Some(code.to_string()),
        message: message.to_string(),
    }
}

fn validation(message: impl Into<String>) -> BackendError {
    client_error("ValidationException", &message.into())
}

fn put(table: &TableData, item: Item) -> Result<()> {
    let key = item_key(table, Some(&JsonValue::Object(item.clone())))?;
    table.items.write().insert(key, item);
    Ok(())
}

/// Canonical key text of the hash key attribute in `key`
fn item_key(table: &TableData, key: Option<&JsonValue>) -> Result<String> {
    let attr = key
        .and_then(|k| k.get(&table.hash_key))
        .ok_or_else(|| validation(format!("missing key attribute {}", table.hash_key)))?;
    let (tag, value) = single_attr(attr).ok_or_else(|| validation("invalid key attribute"))?;
    let text = match (tag, value) {
        ("N", JsonValue::String(n)) => {
            let n: f64 = n.parse().map_err(|_| validation("invalid numeric key"))?;
            // Sortable text for numbers within the exactly representable range.
            format!("N{:+024.6}", n)
        }
        ("S" | "B", JsonValue::String(s)) => format!("{tag}{s}"),
        _ => return Err(validation("key attributes must be S, N or B").into()),
    };
    Ok(text)
}

fn single_attr(attr: &JsonValue) -> Option<(&str, &JsonValue)> {
    let map = attr.as_object()?;
    if map.len() != 1 {
        return None;
    }
    map.iter().next().map(|(k, v)| (k.as_str(), v))
}

fn matches_all(item: &Item, conditions: &Map<String, JsonValue>) -> Result<bool> {
    for (field, condition) in conditions {
        let operator = condition
            .get("ComparisonOperator")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| validation("ComparisonOperator is required"))?;
        let values: Vec<&JsonValue> = condition
            .get("AttributeValueList")
            .and_then(JsonValue::as_array)
            .map(|v| v.iter().collect())
            .unwrap_or_default();
        if !evaluate(item.get(field), operator, &values)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn evaluate(actual: Option<&JsonValue>, operator: &str, values: &[&JsonValue]) -> Result<bool> {
    let first = values.first().copied();
    let need = |n: usize| -> Result<()> {
        if values.len() == n {
            Ok(())
        } else {
            Err(validation(format!("{operator} expects {n} value(s), got {}", values.len())).into())
        }
    };
    Ok(match operator {
        "NOT_NULL" => actual.is_some(),
        "NULL" => actual.is_none(),
        "EQ" => {
            need(1)?;
            actual.zip(first).is_some_and(|(a, b)| compare(a, b) == Some(Ordering::Equal))
        }
        "NE" => {
            need(1)?;
            actual.zip(first).map_or(true, |(a, b)| compare(a, b) != Some(Ordering::Equal))
        }
        "LT" | "LE" | "GT" | "GE" => {
            need(1)?;
            let ordering = actual.zip(first).and_then(|(a, b)| compare(a, b));
            match (operator, ordering) {
                (_, None) => false,
                ("LT", Some(o)) => o == Ordering::Less,
                ("LE", Some(o)) => o != Ordering::Greater,
                ("GT", Some(o)) => o == Ordering::Greater,
                (_, Some(o)) => o != Ordering::Less,
            }
        }
        "BEGINS_WITH" => {
            need(1)?;
            match (actual.and_then(single_attr), first.and_then(single_attr)) {
                (Some(("S", JsonValue::String(a))), Some(("S", JsonValue::String(b)))) => a.starts_with(b.as_str()),
                _ => false,
            }
        }
        "CONTAINS" | "NOT_CONTAINS" => {
            need(1)?;
            let contained = actual.zip(first).is_some_and(|(a, b)| contains(a, b));
            if operator == "CONTAINS" {
                contained
            } else {
                actual.is_some() && !contained
            }
        }
        "IN" => actual.is_some_and(|a| values.iter().any(|b| compare(a, b) == Some(Ordering::Equal))),
        "BETWEEN" => {
            need(2)?;
            actual.is_some_and(|a| {
                compare(a, values[0]).is_some_and(|o| o != Ordering::Less)
                    && compare(a, values[1]).is_some_and(|o| o != Ordering::Greater)
            })
        }
        other => return Err(validation(format!("Unsupported ComparisonOperator {other}")).into()),
    })
}

/// Order two typed attributes of the same scalar type
fn compare(a: &JsonValue, b: &JsonValue) -> Option<Ordering> {
    match (single_attr(a)?, single_attr(b)?) {
        (("N", JsonValue::String(x)), ("N", JsonValue::String(y))) => {
            x.parse::<f64>().ok()?.partial_cmp(&y.parse::<f64>().ok()?)
        }
        (("S", JsonValue::String(x)), ("S", JsonValue::String(y)))
        | (("B", JsonValue::String(x)), ("B", JsonValue::String(y))) => Some(x.cmp(y)),
        (("BOOL", JsonValue::Bool(x)), ("BOOL", JsonValue::Bool(y))) => Some(x.cmp(y)),
        ((tx, x), (ty, y)) if tx == ty && x == y => Some(Ordering::Equal),
        _ => None,
    }
}

fn contains(haystack: &JsonValue, needle: &JsonValue) -> bool {
    let Some((tag, value)) = single_attr(haystack) else {
        return false;
    };
    match (tag, value) {
        ("S", JsonValue::String(s)) => single_attr(needle)
            .is_some_and(|(t, n)| t == "S" && n.as_str().is_some_and(|n| s.contains(n))),
        ("SS" | "NS" | "BS", JsonValue::Array(elements)) => {
            let element_tag = &tag[..1];
            elements.iter().any(|e| {
                let mut element = Map::new();
                element.insert(element_tag.to_string(), e.clone());
                compare(&JsonValue::Object(element), needle) == Some(Ordering::Equal)
            })
        }
        ("L", JsonValue::Array(elements)) => elements
            .iter()
            .any(|e| compare(e, needle) == Some(Ordering::Equal)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> MemoryDynamoDb {
        MemoryDynamoDb::new().with_table("users", "id")
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let db = db();
        let item = json!({"id": {"N": "1"}, "Name": {"S": "John"}});
        db.call("PutItem", json!({"TableName": "users", "Item": item.clone()}))
            .await
            .unwrap();
        let got = db
            .call("GetItem", json!({"TableName": "users", "Key": {"id": {"N": "1"}}}))
            .await
            .unwrap();
        assert_eq!(got["Item"], item);

        db.call("DeleteItem", json!({"TableName": "users", "Key": {"id": {"N": "1"}}}))
            .await
            .unwrap();
        let got = db
            .call("GetItem", json!({"TableName": "users", "Key": {"id": {"N": "1"}}}))
            .await
            .unwrap();
        assert!(got.get("Item").is_none());
    }

    #[tokio::test]
    async fn test_missing_table() {
        let err = db()
            .call("GetItem", json!({"TableName": "nope", "Key": {"id": {"N": "1"}}}))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Backend error: dynamodb returned HTTP 400 (ResourceNotFoundException): Requested resource not found");
    }

    #[tokio::test]
    async fn test_scan_paging_and_filter() {
        let db = db().with_page_size(2);
        for i in 1..=5 {
            db.call(
                "PutItem",
                json!({"TableName": "users", "Item": {"id": {"N": i.to_string()}, "age": {"N": (i * 10).to_string()}}}),
            )
            .await
            .unwrap();
        }
        let filter = json!({"age": {"ComparisonOperator": "GE", "AttributeValueList": [{"N": "20"}]}});

        let first = db
            .call("Scan", json!({"TableName": "users", "ScanFilter": filter}))
            .await
            .unwrap();
        assert_eq!(first["ScannedCount"], 2);
        assert_eq!(first["Items"].as_array().unwrap().len(), 1);
        assert_eq!(first["LastEvaluatedKey"], json!({"id": {"N": "2"}}));

        let second = db
            .call(
                "Scan",
                json!({"TableName": "users", "ScanFilter": filter, "ExclusiveStartKey": first["LastEvaluatedKey"]}),
            )
            .await
            .unwrap();
        assert_eq!(second["Items"][0]["id"], json!({"N": "3"}));
    }

    #[tokio::test]
    async fn test_query_requires_hash_key_equality() {
        let err = db()
            .call(
                "Query",
                json!({"TableName": "users", "KeyConditions": {"age": {"ComparisonOperator": "EQ", "AttributeValueList": [{"N": "1"}]}}}),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ValidationException"));
    }

    #[tokio::test]
    async fn test_batch_write_limit() {
        let requests: Vec<JsonValue> = (0..26)
            .map(|i| json!({"PutRequest": {"Item": {"id": {"N": i.to_string()}}}}))
            .collect();
        let err = db()
            .call("BatchWriteItem", json!({"RequestItems": {"users": requests}}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ValidationException"));
    }

    #[test]
    fn test_evaluate_operators() {
        let s = json!({"S": "hello world"});
        let ss = json!({"SS": ["a", "b"]});
        assert!(evaluate(Some(&s), "BEGINS_WITH", &[&json!({"S": "hello"})]).unwrap());
        assert!(evaluate(Some(&s), "CONTAINS", &[&json!({"S": "o w"})]).unwrap());
        assert!(evaluate(Some(&ss), "CONTAINS", &[&json!({"S": "b"})]).unwrap());
        assert!(evaluate(Some(&ss), "NOT_CONTAINS", &[&json!({"S": "c"})]).unwrap());
        assert!(evaluate(None, "NULL", &[]).unwrap());
        assert!(evaluate(
            Some(&json!({"N": "15"})),
            "BETWEEN",
            &[&json!({"N": "10"}), &json!({"N": "20"})]
        )
        .unwrap());
        assert!(evaluate(Some(&json!({"N": "2"})), "IN", &[&json!({"N": "1"}), &json!({"N": "2.0"})]).unwrap());
        assert!(evaluate(Some(&s), "EQ", &[]).is_err());
    }
}
