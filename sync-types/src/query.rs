//! Query shapes against the remote document store.
//!
//! A [`Query`] describes `collection.where(..).orderBy(..)`; the page size
//! and `start_after` cursor are supplied separately at fetch time so that
//! one query shape maps to exactly one cached page chain.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

use crate::Document;

/// Comparison operator of a field filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl FilterOp {
    fn symbol(self) -> &'static str {
        match self {
            FilterOp::Eq => "==",
            FilterOp::Ne => "!=",
            FilterOp::Lt => "<",
            FilterOp::Le => "<=",
            FilterOp::Gt => ">",
            FilterOp::Ge => ">=",
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Oldest / smallest first.
    Ascending,
    /// Newest / largest first.
    Descending,
}

/// `where(field, op, value)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldFilter {
    /// Top-level field name.
    pub field: String,
    /// Operator.
    pub op: FilterOp,
    /// Right-hand side.
    pub value: Value,
}

impl FieldFilter {
    /// Evaluate the filter against a document body.
    ///
    /// A missing field never matches. Values of different JSON types only
    /// match `Ne`.
    pub fn matches(&self, doc: &Document) -> bool {
        let Some(actual) = doc.field(&self.field) else {
            return false;
        };
        match compare_values(actual, &self.value) {
            Some(ordering) => match self.op {
                FilterOp::Eq => ordering == Ordering::Equal,
                FilterOp::Ne => ordering != Ordering::Equal,
                FilterOp::Lt => ordering == Ordering::Less,
                FilterOp::Le => ordering != Ordering::Greater,
                FilterOp::Gt => ordering == Ordering::Greater,
                FilterOp::Ge => ordering != Ordering::Less,
            },
            None => self.op == FilterOp::Ne,
        }
    }
}

/// `orderBy(field, direction)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    /// Top-level field name.
    pub field: String,
    /// Sort direction.
    pub direction: Direction,
}

/// A query shape against one collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    /// Collection name.
    pub collection: String,
    /// Conjunction of field filters.
    pub filters: Vec<FieldFilter>,
    /// Sort order; `None` means server default (most recent first).
    pub order_by: Option<OrderBy>,
}

impl Query {
    /// Start a query over a collection.
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            collection: name.into(),
            filters: Vec::new(),
            order_by: None,
        }
    }

    /// Add a field filter.
    pub fn filter(
        mut self,
        field: impl Into<String>,
        op: FilterOp,
        value: impl Into<Value>,
    ) -> Self {
        self.filters.push(FieldFilter {
            field: field.into(),
            op,
            value: value.into(),
        });
        self
    }

    /// Shorthand for an equality filter.
    pub fn where_eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, FilterOp::Eq, value)
    }

    /// Set the sort order.
    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    /// Effective sort direction (most recent first unless stated otherwise).
    pub fn direction(&self) -> Direction {
        self.order_by
            .as_ref()
            .map(|o| o.direction)
            .unwrap_or(Direction::Descending)
    }

    /// Whether a document satisfies every filter.
    pub fn matches(&self, doc: &Document) -> bool {
        self.filters.iter().all(|f| f.matches(doc))
    }

    /// Stable key identifying this (collection, query shape) pair.
    ///
    /// Used to name the cached page chain. Filter order is significant.
    pub fn cache_key(&self) -> String {
        let mut key = self.collection.clone();
        for f in &self.filters {
            key.push_str(&format!("|{}{}{}", f.field, f.op.symbol(), f.value));
        }
        if let Some(order) = &self.order_by {
            let dir = match order.direction {
                Direction::Ascending => "asc",
                Direction::Descending => "desc",
            };
            key.push_str(&format!("|order:{}:{}", order.field, dir));
        }
        key
    }
}

/// Compare two JSON values of the same kind.
///
/// Numbers compare numerically, strings lexicographically, booleans with
/// `false < true`. Anything else (or mixed kinds) is incomparable, except
/// that equal values always compare equal.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_u64(), y.as_u64()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
        },
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ if a == b => Some(Ordering::Equal),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(data: Value) -> Document {
        Document::new("d", data)
    }

    #[test]
    fn equality_filter() {
        let q = Query::collection("posts").where_eq("ownerId", "alice");
        assert!(q.matches(&doc(json!({"ownerId": "alice"}))));
        assert!(!q.matches(&doc(json!({"ownerId": "bob"}))));
        assert!(!q.matches(&doc(json!({}))));
    }

    #[test]
    fn range_filters_on_numbers() {
        let q = Query::collection("posts")
            .filter("timestamp", FilterOp::Ge, 10)
            .filter("timestamp", FilterOp::Lt, 20);
        assert!(q.matches(&doc(json!({"timestamp": 10}))));
        assert!(q.matches(&doc(json!({"timestamp": 19}))));
        assert!(!q.matches(&doc(json!({"timestamp": 20}))));
        assert!(!q.matches(&doc(json!({"timestamp": 9}))));
    }

    #[test]
    fn mixed_types_only_match_not_equal() {
        let eq = Query::collection("c").where_eq("n", 1);
        let ne = Query::collection("c").filter("n", FilterOp::Ne, 1);
        let d = doc(json!({"n": "1"}));
        assert!(!eq.matches(&d));
        assert!(ne.matches(&d));
    }

    #[test]
    fn default_direction_is_most_recent_first() {
        assert_eq!(Query::collection("c").direction(), Direction::Descending);
        assert_eq!(
            Query::collection("c")
                .order_by("timestamp", Direction::Ascending)
                .direction(),
            Direction::Ascending
        );
    }

    #[test]
    fn cache_key_distinguishes_shapes() {
        let a = Query::collection("posts").where_eq("ownerId", "alice");
        let b = Query::collection("posts").where_eq("ownerId", "bob");
        let c = Query::collection("posts")
            .where_eq("ownerId", "alice")
            .order_by("timestamp", Direction::Descending);
        assert_ne!(a.cache_key(), b.cache_key());
        assert_ne!(a.cache_key(), c.cache_key());
        assert_eq!(a.cache_key(), a.clone().cache_key());
        assert_eq!(a.cache_key(), "posts|ownerId==\"alice\"");
    }

    #[test]
    fn large_integers_compare_exactly() {
        let a = json!(u64::MAX);
        let b = json!(u64::MAX - 1);
        assert_eq!(compare_values(&a, &b), Some(Ordering::Greater));
    }
}
