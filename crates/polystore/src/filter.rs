//! Relational filter model consumed by the filter translators.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use polystore_common::{Error, Result};

use crate::core::Value;

/// Comparison operator of a filter clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Relation {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
    StartsWith,
    Contains,
    In,
    NotIn,
}

impl Relation {
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Relation::Equal => "=",
            Relation::NotEqual => "!=",
            Relation::GreaterThan => ">",
            Relation::GreaterOrEqual => ">=",
            Relation::LessThan => "<",
            Relation::LessOrEqual => "<=",
            Relation::StartsWith => "starts_with",
            Relation::Contains => "contains",
            Relation::In => "in",
            Relation::NotIn => "not_in",
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for Relation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let relation = match s.trim().to_ascii_lowercase().as_str() {
            "=" | "==" | "eq" | "equal" => Relation::Equal,
            "!=" | "<>" | "ne" | "not_equal" => Relation::NotEqual,
            ">" | "gt" | "greater_than" => Relation::GreaterThan,
            ">=" | "gte" | "greater_or_equal" => Relation::GreaterOrEqual,
            "<" | "lt" | "less_than" => Relation::LessThan,
            "<=" | "lte" | "less_or_equal" => Relation::LessOrEqual,
            "starts_with" | "prefix" => Relation::StartsWith,
            "contains" | "like" => Relation::Contains,
            "in" => Relation::In,
            "not_in" | "nin" => Relation::NotIn,
            _ => return Err(Error::invalid(format!("Unknown filter operator: {s}"))),
        };
        Ok(relation)
    }
}

/// How a clause joins the clauses before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Conjunction {
    #[default]
    And,
    Or,
}

/// One `(conjunction, field, relation, value)` tuple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterClause {
    #[serde(default)]
    pub conjunction: Conjunction,
    pub field: String,
    pub relation: Relation,
    pub value: Value,
}

/// Ordered list of filter clauses.
///
/// Translators only accept conjunctive filters that name each field once;
/// see [`Filter::conjunctive_clauses`].
///
/// # Example
///
/// ```rust
/// use polystore::{Filter, Relation};
///
/// let filter = Filter::new()
///     .and("brand", Relation::Equal, "Toyota")
///     .and("price", Relation::GreaterThan, 100_000);
/// assert_eq!(filter.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filter {
    clauses: Vec<FilterClause>,
}

impl Filter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Single equality clause
    pub fn equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new().and(field, Relation::Equal, value)
    }

    #[must_use]
    pub fn and(self, field: impl Into<String>, relation: Relation, value: impl Into<Value>) -> Self {
        self.push(Conjunction::And, field, relation, value)
    }

    #[must_use]
    pub fn or(self, field: impl Into<String>, relation: Relation, value: impl Into<Value>) -> Self {
        self.push(Conjunction::Or, field, relation, value)
    }

    fn push(
        mut self,
        conjunction: Conjunction,
        field: impl Into<String>,
        relation: Relation,
        value: impl Into<Value>,
    ) -> Self {
        self.clauses.push(FilterClause {
            conjunction,
            field: field.into(),
            relation,
            value: value.into(),
        });
        self
    }

    #[must_use]
    pub fn clauses(&self) -> &[FilterClause] {
        &self.clauses
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.clauses.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Clauses in order, after checking that every clause is joined with
    /// `and` and that no field appears twice.
    pub fn conjunctive_clauses(&self) -> Result<&[FilterClause]> {
        let mut seen = HashSet::with_capacity(self.clauses.len());
        for clause in &self.clauses {
            if clause.conjunction != Conjunction::And {
                return Err(Error::invalid(format!(
                    "disjunctive filters are not supported (field {})",
                    clause.field
                )));
            }
            if !seen.insert(clause.field.as_str()) {
                return Err(Error::invalid(format!(
                    "field {} appears more than once in the filter",
                    clause.field
                )));
            }
        }
        Ok(&self.clauses)
    }
}

impl FromIterator<FilterClause> for Filter {
    fn from_iter<T: IntoIterator<Item = FilterClause>>(iter: T) -> Self {
        Self {
            clauses: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conjunctive_filter_accepted() {
        let filter = Filter::new()
            .and("age", Relation::GreaterThan, 3)
            .and("name", Relation::StartsWith, "Jo");
        assert_eq!(filter.conjunctive_clauses().unwrap().len(), 2);
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let filter = Filter::new()
            .and("age", Relation::Equal, 5)
            .and("age", Relation::GreaterThan, 3);
        assert!(filter.conjunctive_clauses().unwrap_err().is_invalid_argument());
    }

    #[test]
    fn test_disjunction_rejected() {
        let filter = Filter::new().or("age", Relation::Equal, 5);
        assert!(filter.conjunctive_clauses().unwrap_err().is_invalid_argument());
    }

    #[test]
    fn test_relation_parsing() {
        assert_eq!(">=".parse::<Relation>().unwrap(), Relation::GreaterOrEqual);
        assert_eq!("NIN".parse::<Relation>().unwrap(), Relation::NotIn);
        assert_eq!("starts_with".parse::<Relation>().unwrap(), Relation::StartsWith);
        assert!("~".parse::<Relation>().is_err());
    }

    #[test]
    fn test_filter_deserializes_from_tuples() {
        let filter: Filter = serde_json::from_str(
            r#"[{"field": "price", "relation": "LESS_THAN", "value": 5}]"#,
        )
        .unwrap();
        let clause = &filter.clauses()[0];
        assert_eq!(clause.conjunction, Conjunction::And);
        assert_eq!(clause.relation, Relation::LessThan);
        assert_eq!(clause.value, Value::Integer(5));
    }
}
