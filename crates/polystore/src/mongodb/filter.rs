//! Filter to MongoDB query document translation.

use bson::oid::ObjectId;
use bson::{doc, Bson, Document};

use polystore_common::Result;

use super::convert::value_to_bson;
use crate::core::Value;
use crate::filter::{Filter, Relation};

/// Primary key field
pub const ID_FIELD: &str = "_id";

/// Translate a conjunctive filter into a query document.
///
/// Disjunctions and repeated fields are rejected with `InvalidArgument`.
pub fn to_mongo_filter(filter: &Filter) -> Result<Document> {
    let mut query = Document::new();
    for clause in filter.conjunctive_clauses()? {
        let value = if clause.field == ID_FIELD {
            id_bson(&clause.value)
        } else {
            value_to_bson(&clause.value)
        };
        let condition = match clause.relation {
            Relation::Equal => value,
            Relation::NotEqual => Bson::Document(doc! {"$ne": value}),
            Relation::GreaterThan => Bson::Document(doc! {"$gt": value}),
            Relation::GreaterOrEqual => Bson::Document(doc! {"$gte": value}),
            Relation::LessThan => Bson::Document(doc! {"$lt": value}),
            Relation::LessOrEqual => Bson::Document(doc! {"$lte": value}),
            Relation::StartsWith => Bson::Document(doc! {
                "$regex": format!("^{}", regex::escape(&clause.value.to_plain_string()))
            }),
            Relation::Contains => Bson::Document(doc! {
                "$regex": regex::escape(&clause.value.to_plain_string())
            }),
            Relation::In => Bson::Document(doc! {"$in": as_array(value)}),
            Relation::NotIn => Bson::Document(doc! {"$nin": as_array(value)}),
        };
        query.insert(clause.field.clone(), condition);
    }
    Ok(query)
}

/// Ids that look like ObjectIds (24 hex digits) are matched as ObjectIds.
pub fn id_bson(value: &Value) -> Bson {
    match value {
        Value::String(s) => ObjectId::parse_str(s).map_or_else(|_| Bson::String(s.clone()), Bson::ObjectId),
        Value::Array(items) => Bson::Array(items.iter().map(id_bson).collect()),
        other => value_to_bson(other),
    }
}

fn as_array(value: Bson) -> Bson {
    match value {
        Bson::Array(_) => value,
        other => Bson::Array(vec![other]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_and_ranges() {
        let filter = Filter::equals("brand", "Toyota")
            .and("price", Relation::GreaterOrEqual, 100)
            .and("year", Relation::NotEqual, 2001);
        let query = to_mongo_filter(&filter).unwrap();
        assert_eq!(
            query,
            doc! {"brand": "Toyota", "price": {"$gte": 100}, "year": {"$ne": 2001}}
        );
    }

    #[test]
    fn test_regex_relations_escape_input() {
        let query = to_mongo_filter(
            &Filter::new()
                .and("model", Relation::StartsWith, "Hi.lux")
                .and("notes", Relation::Contains, "a+b"),
        )
        .unwrap();
        assert_eq!(query.get_document("model").unwrap().get_str("$regex").unwrap(), r"^Hi\.lux");
        assert_eq!(query.get_document("notes").unwrap().get_str("$regex").unwrap(), r"a\+b");
    }

    #[test]
    fn test_in_wraps_scalars() {
        let query = to_mongo_filter(
            &Filter::new()
                .and("brand", Relation::In, vec!["Toyota", "Ford"])
                .and("color", Relation::NotIn, "red"),
        )
        .unwrap();
        assert_eq!(
            query,
            doc! {"brand": {"$in": ["Toyota", "Ford"]}, "color": {"$nin": ["red"]}}
        );
    }

    #[test]
    fn test_object_id_detection() {
        let query = to_mongo_filter(&Filter::equals("_id", "65a1f0c2e4b0a1b2c3d4e5f6")).unwrap();
        assert!(matches!(query.get("_id"), Some(Bson::ObjectId(_))));

        let query = to_mongo_filter(&Filter::equals("_id", "plain-id")).unwrap();
        assert_eq!(query.get_str("_id").unwrap(), "plain-id");
    }

    #[test]
    fn test_rejects_disjunction_and_duplicates() {
        let or = Filter::equals("a", 1).or("b", Relation::Equal, 2);
        assert!(to_mongo_filter(&or).unwrap_err().is_invalid_argument());

        let dup = Filter::equals("a", 1).and("a", Relation::LessThan, 5);
        assert!(to_mongo_filter(&dup).unwrap_err().is_invalid_argument());
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        assert!(to_mongo_filter(&Filter::new()).unwrap().is_empty());
    }
}
