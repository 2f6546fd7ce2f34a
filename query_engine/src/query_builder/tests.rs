//! Recording relation and state tests
//!
//! Shared test doubles plus tests of the state's rendering and lifecycle.

use crate::query_builder::state::QueryState;
use crate::relation::Relation;
use async_trait::async_trait;
use config::{DialectKind, EngineConfig};
use serde_json::Value;
use std::sync::{Arc, Mutex};

/// Returned by the recording relation when `fetch_one` finds nothing
#[derive(Debug, thiserror::Error)]
#[error("no row returned for `{0}`")]
pub(crate) struct RowNotFound(pub String);

/// Relation that records every statement it receives and answers with
/// canned rows, counts and numbers
#[derive(Debug)]
pub(crate) struct RecordingRelation {
    table: String,
    count: i64,
    rows: Vec<Value>,
    number: Option<f64>,
    calls: Mutex<Vec<(String, Vec<Value>)>>,
}

impl RecordingRelation {
    pub(crate) fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            count: 0,
            rows: Vec::new(),
            number: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_count(mut self, count: i64) -> Self {
        self.count = count;
        self
    }

    pub(crate) fn with_rows(mut self, rows: Vec<Value>) -> Self {
        self.rows = rows;
        self
    }

    pub(crate) fn with_number(mut self, number: f64) -> Self {
        self.number = Some(number);
        self
    }

    /// Statements received so far, oldest first
    pub(crate) fn calls(&self) -> Vec<(String, Vec<Value>)> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, sql: &str, params: &[Value]) {
        self.calls.lock().unwrap().push((sql.to_string(), params.to_vec()));
    }
}

#[async_trait]
impl Relation for RecordingRelation {
    type Row = Value;
    type Error = RowNotFound;

    fn table_name(&self) -> &str {
        &self.table
    }

    async fn fetch_all(&self, sql: &str, params: &[Value]) -> Result<Vec<Value>, RowNotFound> {
        self.record(sql, params);
        Ok(self.rows.clone())
    }

    async fn fetch_optional(&self, sql: &str, params: &[Value]) -> Result<Option<Value>, RowNotFound> {
        self.record(sql, params);
        Ok(self.rows.first().cloned())
    }

    async fn fetch_one(&self, sql: &str, params: &[Value]) -> Result<Value, RowNotFound> {
        self.record(sql, params);
        self.rows
            .first()
            .cloned()
            .ok_or_else(|| RowNotFound(sql.to_string()))
    }

    async fn fetch_count(&self, sql: &str, params: &[Value]) -> Result<i64, RowNotFound> {
        self.record(sql, params);
        Ok(self.count)
    }

    async fn fetch_number(&self, sql: &str, params: &[Value]) -> Result<Option<f64>, RowNotFound> {
        self.record(sql, params);
        Ok(self.number)
    }

    async fn explain(&self, sql: &str, params: &[Value]) -> Result<String, RowNotFound> {
        self.record(sql, params);
        Ok(format!("Seq Scan on {}", self.table))
    }
}

pub(crate) fn state_with(relation: RecordingRelation, dialect: DialectKind) -> QueryState<RecordingRelation> {
    QueryState::with_config(Arc::new(relation), EngineConfig::default().with_dialect(dialect))
}

pub(crate) fn state_for(table: &str, dialect: DialectKind) -> QueryState<RecordingRelation> {
    state_with(RecordingRelation::new(table), dialect)
}

pub(crate) fn products() -> QueryState<RecordingRelation> {
    state_for("products", DialectKind::Postgres)
}

pub(crate) fn orders() -> QueryState<RecordingRelation> {
    state_for("orders", DialectKind::Postgres)
}

/// Postgres state whose count queries answer `count`
pub(crate) fn counted(table: &str, count: i64) -> QueryState<RecordingRelation> {
    state_with(RecordingRelation::new(table).with_count(count), DialectKind::Postgres)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::QueryError;
    use crate::query_builder::join::JoinType;
    use crate::query_builder::ordering::{NullsOrder, SortDirection};
    use crate::validation::ValidationError;
    use serde_json::json;

    // ========================================
    // Clause ordering
    // ========================================

    #[test]
    fn test_clause_order_is_independent_of_call_order() {
        let mut state = products();
        state
            .offset(20)
            .limit(10)
            .order_by("price", SortDirection::Desc, None)
            .having("COUNT(*) > ?", vec![json!(1)])
            .group_by("category_id")
            .and_where("status = ?", vec![json!("active")])
            .join(JoinType::Left, "categories", None, Some("categories.id = products.category_id"))
            .select(&["category_id"]);

        let (sql, params) = state.to_sql();
        assert_eq!(
            sql,
            "SELECT category_id FROM products LEFT JOIN categories ON categories.id = products.category_id \
             WHERE status = $1 GROUP BY category_id HAVING COUNT(*) > $2 ORDER BY price DESC LIMIT 10 OFFSET 20"
        );
        assert_eq!(params, vec![json!("active"), json!(1)]);
    }

    #[test]
    fn test_placeholders_per_dialect() {
        for (dialect, expected) in [
            (DialectKind::Postgres, "SELECT * FROM products WHERE status = $1 AND price >= $2"),
            (DialectKind::Mysql, "SELECT * FROM products WHERE status = ? AND price >= ?"),
            (DialectKind::Sqlite, "SELECT * FROM products WHERE status = ? AND price >= ?"),
        ] {
            let mut state = state_for("products", dialect);
            state
                .and_where("status = ?", vec![json!("active")])
                .and_where("price >= ?", vec![json!(100)]);
            assert_eq!(state.to_sql(), (expected.to_string(), vec![json!("active"), json!(100)]));
        }
    }

    #[test]
    fn test_or_and_not_where() {
        let mut state = products();
        state
            .and_where("status = ?", vec![json!("active")])
            .and_where("stock > ?", vec![json!(0)])
            .or_where("featured = ?", vec![json!(true)])
            .not_where("category_id IN (?, ?)", vec![json!(3), json!(4)]);

        let (sql, params) = state.to_sql();
        assert_eq!(
            sql,
            "SELECT * FROM products WHERE ((status = $1 AND stock > $2) OR (featured = $3)) \
             AND NOT (category_id IN ($4, $5))"
        );
        assert_eq!(params.len(), 5);
    }

    #[test]
    fn test_marker_mismatch_is_recorded() {
        let mut state = products();
        state.and_where("price BETWEEN ? AND ?", vec![json!(1)]);

        assert!(state.predicates().is_empty());
        assert!(matches!(state.errors()[0], QueryError::InvalidArgument(_)));
    }

    #[test]
    fn test_order_by_same_field_replaces() {
        let mut state = products();
        state
            .order_by("price", SortDirection::Asc, None)
            .order_by("name", SortDirection::Asc, None)
            .order_by("price", SortDirection::Desc, Some(NullsOrder::Last));

        assert_eq!(
            state.to_sql().0,
            "SELECT * FROM products ORDER BY price DESC NULLS LAST, name ASC"
        );

        state.reverse_order();
        assert_eq!(
            state.to_sql().0,
            "SELECT * FROM products ORDER BY price ASC NULLS LAST, name DESC"
        );

        state.unscope_order().reverse_order();
        assert_eq!(state.to_sql().0, "SELECT * FROM products ORDER BY products.id DESC");
    }

    #[test]
    fn test_select_and_identifier_checks() {
        let mut state = products();
        state
            .select(&["products.*", "name", "name"])
            .select(&["price; DELETE FROM products"])
            .distinct()
            .order_by("1=1; --", SortDirection::Asc, None);

        assert_eq!(state.to_sql().0, "SELECT DISTINCT products.*, name FROM products");
        assert_eq!(state.errors().len(), 2);
        assert!(matches!(
            state.errors()[0],
            QueryError::InvalidIdentifier(ValidationError::InvalidCharacters(_))
        ));
    }

    #[test]
    fn test_join_without_condition_is_rejected() {
        let mut state = products();
        state
            .join(JoinType::Inner, "categories", None, None)
            .join(JoinType::Cross, "regions", None, Some("ignored"))
            .join(JoinType::Left, "brands", Some("b"), Some("b.id = products.brand_id"))
            .join(JoinType::Left, "brands", Some("b"), Some("b.id = products.brand_id"));

        assert_eq!(
            state.to_sql().0,
            "SELECT * FROM products CROSS JOIN regions LEFT JOIN brands AS b ON b.id = products.brand_id"
        );
        assert_eq!(state.errors().len(), 1);
    }

    // ========================================
    // Lifecycle
    // ========================================

    #[test]
    fn test_reset_matches_fresh_state() {
        let mut state = products();
        state
            .and_where("status = ?", vec![json!("active")])
            .join(JoinType::Inner, "categories", None, Some("categories.id = products.category_id"))
            .group_by("category_id")
            .having("COUNT(*) > ?", vec![json!(2)])
            .order_by("name", SortDirection::Asc, None)
            .select(&["name"])
            .distinct()
            .limit(5)
            .offset(5)
            .and_where("broken = ?", vec![]);

        state.reset();
        assert_eq!(state.to_sql(), products().to_sql());
        assert!(!state.has_errors());
        assert!(state.operations().is_empty());
    }

    #[test]
    fn test_copy_is_independent() {
        let mut original = products();
        original.and_where("status = ?", vec![json!("active")]);
        let before = original.to_sql();

        let mut branch = original.copy();
        branch
            .and_where("price < ?", vec![json!(10)])
            .order_by("price", SortDirection::Asc, None)
            .limit(3);
        let mut cloned = original.clone();
        cloned.reset();

        assert_eq!(original.to_sql(), before);
        assert_ne!(branch.to_sql(), before);
        assert!(Arc::ptr_eq(original.relation(), branch.relation()));
    }

    // ========================================
    // Terminals
    // ========================================

    #[tokio::test]
    async fn test_first_last_and_find_statements() {
        let relation = Arc::new(RecordingRelation::new("products").with_rows(vec![json!({"id": 1})]));
        let mut state = QueryState::new(Arc::clone(&relation));
        state.and_where("status = ?", vec![json!("active")]);

        state.first().await.unwrap();
        state.last().await.unwrap();
        state.find(42).await.unwrap();
        state.find_by("sku", "AB-1").await.unwrap();

        let calls = relation.calls();
        assert_eq!(
            calls[0].0,
            "SELECT * FROM products WHERE status = $1 ORDER BY products.id ASC LIMIT 1"
        );
        assert_eq!(
            calls[1].0,
            "SELECT * FROM products WHERE status = $1 ORDER BY products.id DESC LIMIT 1"
        );
        assert_eq!(
            calls[2],
            (
                "SELECT * FROM products WHERE status = $1 AND products.id = $2 LIMIT 1".to_string(),
                vec![json!("active"), json!(42)]
            )
        );
        assert_eq!(
            calls[3].0,
            "SELECT * FROM products WHERE status = $1 AND sku = $2 LIMIT 1"
        );
        assert!(state.order_terms().is_empty());
        assert_eq!(state.limit_value(), None);
    }

    #[tokio::test]
    async fn test_collaborator_errors_pass_through() {
        let state = products();
        let err = state.find(7).await.unwrap_err();
        assert!(err.to_string().starts_with("no row returned for"));
    }

    #[tokio::test]
    async fn test_count_exists_and_aggregates() {
        let relation = Arc::new(RecordingRelation::new("orders").with_count(3).with_number(12.5));
        let mut state = QueryState::new(Arc::clone(&relation));
        state
            .and_where("status = ?", vec![json!("paid")])
            .group_by("customer_id")
            .order_by("total", SortDirection::Desc, None)
            .limit(2);

        assert_eq!(state.count().await.unwrap(), 3);
        assert!(state.exists().await.unwrap());
        assert_eq!(state.avg("total").await.unwrap(), Some(12.5));
        assert_eq!(state.sum("total; --").await.unwrap(), None);
        assert_eq!(state.explain().await.unwrap(), "Seq Scan on orders");

        let calls = relation.calls();
        assert_eq!(calls.len(), 4);
        assert_eq!(
            calls[0].0,
            "SELECT COUNT(*) FROM (SELECT * FROM orders WHERE status = $1 GROUP BY customer_id LIMIT 2) AS count_subquery"
        );
        assert_eq!(
            calls[1].0,
            "SELECT COUNT(*) FROM (SELECT 1 FROM orders WHERE status = $1 GROUP BY customer_id LIMIT 1) AS exists_subquery"
        );
        assert_eq!(
            calls[2].0,
            "SELECT CAST(AVG(total) AS DOUBLE PRECISION) FROM orders WHERE status = $1"
        );
        assert_eq!(state.errors().len(), 1);
    }

    #[tokio::test]
    async fn test_all_binds_in_text_order() {
        let relation = Arc::new(RecordingRelation::new("products"));
        let mut state = QueryState::with_config(
            Arc::clone(&relation),
            EngineConfig::default().with_dialect(DialectKind::Sqlite),
        );
        state
            .having("COUNT(*) > ?", vec![json!(1)])
            .and_where("price > ?", vec![json!(5)])
            .group_by("category_id");

        state.all().await.unwrap();
        assert_eq!(relation.calls()[0].1, vec![json!(5), json!(1)]);
    }
}
