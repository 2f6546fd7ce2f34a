//! UNION / UNION ALL over finished query states
//!
//! Members are only read: each is rendered to its unnumbered fragment and the
//! combined statement is numbered once, so member parameters line up with the
//! concatenated text. Any outer operator wraps the union as a derived table.

use crate::dialect::{dialect_for, DialectStrategy};
use crate::errors::QueryError;
use crate::query_builder::fragment::{SqlFragment, Subquery};
use crate::query_builder::ordering::{OrderTerm, SortDirection};
use crate::query_builder::sql_generation::SqlGenerator;
use crate::query_builder::state::QueryState;
use crate::relation::Relation;
use crate::validation::{ValidatedFieldName, ValidatedTableName};
use config::{EngineConfig, UnionType};
use serde_json::Value;
use std::sync::Arc;

const UNION_ALIAS: &str = "subquery";

/// Operators applied on top of the combined rows
#[derive(Debug, Clone, Default)]
struct OuterQuery {
    projections: Vec<String>,
    distinct: bool,
    distinct_on: Vec<String>,
    group_by: Vec<String>,
    having: Vec<SqlFragment>,
    order_by: Vec<OrderTerm>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl OuterQuery {
    fn is_empty(&self) -> bool {
        self.projections.is_empty()
            && !self.distinct
            && self.distinct_on.is_empty()
            && self.group_by.is_empty()
            && self.having.is_empty()
            && self.order_by.is_empty()
            && self.limit.is_none()
            && self.offset.is_none()
    }

    fn render(&self, union: SqlFragment, dialect: &dyn DialectStrategy) -> SqlFragment {
        let mut sql = SqlFragment::raw("SELECT ");
        if !self.distinct_on.is_empty() {
            sql.push_str(&format!("DISTINCT ON ({}) ", self.distinct_on.join(", ")));
        } else if self.distinct {
            sql.push_str("DISTINCT ");
        }
        if self.projections.is_empty() {
            sql.push_str("*");
        } else {
            sql.push_str(&self.projections.join(", "));
        }
        sql.push_str(" FROM (");
        sql.append(union);
        sql.push_str(&format!(") AS {}", UNION_ALIAS));

        if let Some(group_clause) = SqlGenerator::build_group_by_clause(&self.group_by) {
            sql.push_str(" ");
            sql.push_str(&group_clause);
        }
        if let Some(having_clause) = SqlGenerator::build_having_clause(&self.having) {
            sql.push_str(" ");
            sql.append(having_clause);
        }
        if !self.order_by.is_empty() {
            let terms = self.order_by.iter().map(|term| term.render(dialect)).collect();
            sql.push_str(" ORDER BY ");
            sql.append(SqlFragment::join(terms, ", "));
        }
        if let Some(limit_clause) = SqlGenerator::build_limit_clause(self.limit, self.offset, dialect) {
            sql.push_str(" ");
            sql.push_str(&limit_clause);
        }
        sql
    }

    fn push_order(&mut self, term: OrderTerm) {
        match self.order_by.iter_mut().find(|existing| existing.key == term.key) {
            Some(existing) => *existing = term,
            None => self.order_by.push(term),
        }
    }
}

/// Combines independent [`QueryState`]s with UNION or UNION ALL
pub struct UnionEngine<R: Relation> {
    queries: Vec<QueryState<R>>,
    config: EngineConfig,
    dialect: Arc<dyn DialectStrategy>,
    union_type: UnionType,
    outer: OuterQuery,
    errors: Vec<QueryError>,
}

impl<R: Relation> UnionEngine<R> {
    /// Union type starts from `config.union_type` (UNION ALL by default)
    pub fn new(config: EngineConfig) -> Self {
        Self {
            queries: Vec::new(),
            dialect: dialect_for(config.dialect),
            union_type: config.union_type,
            config,
            outer: OuterQuery::default(),
            errors: Vec::new(),
        }
    }

    pub fn add_query(&mut self, query: QueryState<R>) -> &mut Self {
        self.queries.push(query);
        self
    }

    /// `union` or `union_all`; anything else is recorded and ignored
    pub fn set_union_type(&mut self, union_type: &str) -> &mut Self {
        match UnionType::parse(union_type) {
            Some(union_type) => self.union_type = union_type,
            None => self.record_error(QueryError::InvalidUnionType(union_type.to_string())),
        }
        self
    }

    pub fn union_type(&self) -> UnionType {
        self.union_type
    }

    pub fn queries(&self) -> &[QueryState<R>] {
        &self.queries
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn errors(&self) -> &[QueryError] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    // ------------------------------------------------------------------
    // Outer operators
    // ------------------------------------------------------------------

    pub fn select(&mut self, columns: &[&str]) -> &mut Self {
        for column in columns {
            if let Some(column) = self.checked_column(column) {
                self.outer.projections.push(column);
            }
        }
        self
    }

    pub fn distinct(&mut self) -> &mut Self {
        self.outer.distinct = true;
        self
    }

    /// `DISTINCT ON (fields)`; only for dialects that support it
    pub fn distinct_on(&mut self, fields: &[&str]) -> &mut Self {
        if !self.dialect.supports_distinct_on() {
            let dialect = self.dialect.name();
            self.record_error(QueryError::UnsupportedByDialect {
                feature: "DISTINCT ON",
                dialect,
            });
            return self;
        }
        for field in fields {
            if let Some(field) = self.checked_column(field) {
                self.outer.distinct_on.push(field);
            }
        }
        self
    }

    /// Order the combined rows; `direction` must be `asc` or `desc`
    pub fn order(&mut self, field: &str, direction: &str) -> &mut Self {
        let direction = match direction.parse::<SortDirection>() {
            Ok(direction) => direction,
            Err(err) => {
                self.record_error(err);
                return self;
            }
        };
        if let Some(field) = self.checked_column(field) {
            self.outer
                .push_order(OrderTerm::new(field.clone(), SqlFragment::raw(field), direction, None));
        }
        self
    }

    pub fn limit(&mut self, limit: u64) -> &mut Self {
        self.outer.limit = Some(limit);
        self
    }

    pub fn offset(&mut self, offset: u64) -> &mut Self {
        self.outer.offset = Some(offset);
        self
    }

    pub fn group(&mut self, field: &str) -> &mut Self {
        if let Some(field) = self.checked_column(field) {
            if !self.outer.group_by.contains(&field) {
                self.outer.group_by.push(field);
            }
        }
        self
    }

    pub fn having(&mut self, condition: &str, params: Vec<Value>) -> &mut Self {
        match SqlFragment::new(condition, params) {
            Ok(fragment) => self.outer.having.push(fragment),
            Err(err) => self.record_error(err),
        }
        self
    }

    // ------------------------------------------------------------------
    // Rendering
    // ------------------------------------------------------------------

    /// The bare compound statement with `?` markers
    pub fn build(&self) -> Result<SqlFragment, QueryError> {
        if self.queries.is_empty() {
            return Err(QueryError::EmptyUnion);
        }
        let members = self
            .queries
            .iter()
            .map(|query| {
                let (sql, params) = query.to_fragment().into_parts();
                SqlFragment {
                    sql: self.dialect.union_member(&sql),
                    params,
                }
            })
            .collect();
        let separator = format!(" {} ", self.union_type.to_sql());
        Ok(SqlFragment::join(members, &separator))
    }

    /// Full statement including outer operators, with `?` markers
    pub fn to_fragment(&self) -> Result<SqlFragment, QueryError> {
        self.render(&self.outer)
    }

    /// Final SQL with dialect placeholders and the values to bind, in text order
    pub fn to_sql(&self) -> Result<(String, Vec<Value>), QueryError> {
        let fragment = self.to_fragment()?;
        Ok(SqlGenerator::number_placeholders(fragment, self.dialect.as_ref()))
    }

    /// The union as a derived table for another query's `join`/`where`
    pub fn as_subquery(&self, alias: &str) -> Result<Subquery, QueryError> {
        let alias = ValidatedTableName::new(alias)?.into_string();
        Ok(Subquery {
            body: self.to_fragment()?,
            alias,
        })
    }

    fn render(&self, outer: &OuterQuery) -> Result<SqlFragment, QueryError> {
        let union = self.build()?;
        if outer.is_empty() {
            return Ok(union);
        }
        Ok(outer.render(union, self.dialect.as_ref()))
    }

    fn numbered(&self, fragment: SqlFragment) -> (String, Vec<Value>) {
        SqlGenerator::number_placeholders(fragment, self.dialect.as_ref())
    }

    // ------------------------------------------------------------------
    // Terminals, run through the first member's relation. An empty union
    // records EmptyUnion and yields an empty result.
    // ------------------------------------------------------------------

    pub async fn execute(&mut self) -> Result<Vec<R::Row>, R::Error> {
        let Some((relation, fragment)) = self.prepare(&self.outer.clone()) else {
            return Ok(Vec::new());
        };
        let (sql, params) = self.numbered(fragment);
        crate::debug_log!("[UNION] {} ({} params)", sql, params.len());
        relation.fetch_all(&sql, &params).await
    }

    pub async fn all(&mut self) -> Result<Vec<R::Row>, R::Error> {
        self.execute().await
    }

    pub async fn count(&mut self) -> Result<i64, R::Error> {
        let Some((relation, fragment)) = self.prepare(&self.outer.clone()) else {
            return Ok(0);
        };
        let (sql, params) = self.numbered(count_wrapper(fragment, "count_subquery"));
        relation.fetch_count(&sql, &params).await
    }

    pub async fn exists(&mut self) -> Result<bool, R::Error> {
        let mut outer = self.outer.clone();
        outer.limit = Some(1);
        let Some((relation, fragment)) = self.prepare(&outer) else {
            return Ok(false);
        };
        let (sql, params) = self.numbered(count_wrapper(fragment, "exists_subquery"));
        Ok(relation.fetch_count(&sql, &params).await? > 0)
    }

    pub async fn first(&mut self) -> Result<Option<R::Row>, R::Error> {
        let mut outer = self.outer.clone();
        outer.limit = Some(1);
        let Some((relation, fragment)) = self.prepare(&outer) else {
            return Ok(None);
        };
        let (sql, params) = self.numbered(fragment);
        relation.fetch_optional(&sql, &params).await
    }

    /// Last row by the reversed outer order, or by primary key DESC when unordered
    pub async fn last(&mut self) -> Result<Option<R::Row>, R::Error> {
        let mut outer = self.outer.clone();
        if outer.order_by.is_empty() {
            if let Some(query) = self.queries.first() {
                let pk = query.relation().primary_key().to_string();
                outer.push_order(OrderTerm::new(pk.clone(), SqlFragment::raw(pk), SortDirection::Desc, None));
            }
        } else {
            for term in &mut outer.order_by {
                term.direction = term.direction.reverse();
            }
        }
        outer.limit = Some(1);
        let Some((relation, fragment)) = self.prepare(&outer) else {
            return Ok(None);
        };
        let (sql, params) = self.numbered(fragment);
        relation.fetch_optional(&sql, &params).await
    }

    fn prepare(&mut self, outer: &OuterQuery) -> Option<(Arc<R>, SqlFragment)> {
        match self.render(outer) {
            Ok(fragment) => {
                let relation = Arc::clone(self.queries.first()?.relation());
                Some((relation, fragment))
            }
            Err(err) => {
                self.record_error(err);
                None
            }
        }
    }

    fn checked_column(&mut self, column: &str) -> Option<String> {
        if column == "*" {
            return Some(column.to_string());
        }
        match ValidatedFieldName::new(column) {
            Ok(column) => Some(column.into_string()),
            Err(err) => {
                self.record_error(err.into());
                None
            }
        }
    }

    fn record_error(&mut self, error: QueryError) {
        tracing::warn!(members = self.queries.len(), error = %error, "union operation skipped");
        self.errors.push(error);
    }
}

fn count_wrapper(inner: SqlFragment, alias: &str) -> SqlFragment {
    let mut sql = SqlFragment::raw("SELECT COUNT(*) FROM (");
    sql.append(inner);
    sql.push_str(&format!(") AS {}", alias));
    sql
}
