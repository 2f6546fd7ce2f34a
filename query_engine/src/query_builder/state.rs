//! Accumulated query state
//!
//! `QueryState` owns every clause a query is made of and renders them in a
//! fixed order (WHERE, GROUP BY, HAVING, ORDER BY, LIMIT, OFFSET), whatever
//! order the builder methods were called in.

use crate::dialect::{dialect_for, DialectStrategy};
use crate::errors::QueryError;
use crate::query_builder::fragment::{count_markers, SqlFragment, Subquery};
use crate::query_builder::join::{JoinClause, JoinType};
use crate::query_builder::operation_log::{AppliedOperation, OperationKind};
use crate::query_builder::ordering::{NullsOrder, OrderTerm, SortDirection};
use crate::query_builder::sql_generation::SqlGenerator;
use crate::relation::Relation;
use crate::validation::{ValidatedFieldName, ValidatedTableName};
use config::EngineConfig;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Which parts of the state a rendering includes
#[derive(Debug, Clone)]
struct RenderOptions {
    projection: Option<String>,
    grouping: bool,
    ordering: bool,
    paging: bool,
}

impl RenderOptions {
    fn full() -> Self {
        Self {
            projection: None,
            grouping: true,
            ordering: true,
            paging: true,
        }
    }
}

/// Clause lists of one logical query over an injected [`Relation`]
pub struct QueryState<R: Relation> {
    relation: Arc<R>,
    config: EngineConfig,
    dialect: Arc<dyn DialectStrategy>,
    projections: Vec<SqlFragment>,
    distinct: bool,
    joins: Vec<JoinClause>,
    predicates: Vec<SqlFragment>,
    group_by: Vec<String>,
    having: Vec<SqlFragment>,
    order_by: Vec<OrderTerm>,
    limit: Option<u64>,
    offset: Option<u64>,
    errors: Vec<QueryError>,
    warnings: Vec<String>,
    operations: Vec<AppliedOperation>,
}

impl<R: Relation> QueryState<R> {
    /// New state with the default engine configuration
    pub fn new(relation: Arc<R>) -> Self {
        Self::with_config(relation, EngineConfig::default())
    }

    pub fn with_config(relation: Arc<R>, config: EngineConfig) -> Self {
        let dialect = dialect_for(config.dialect);
        Self {
            relation,
            config,
            dialect,
            projections: Vec::new(),
            distinct: false,
            joins: Vec::new(),
            predicates: Vec::new(),
            group_by: Vec::new(),
            having: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
            errors: Vec::new(),
            warnings: Vec::new(),
            operations: Vec::new(),
        }
    }

    pub fn relation(&self) -> &Arc<R> {
        &self.relation
    }

    pub fn table_name(&self) -> &str {
        self.relation.table_name()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn dialect(&self) -> &dyn DialectStrategy {
        self.dialect.as_ref()
    }

    /// `table.primary_key` of the base relation
    pub fn qualified_primary_key(&self) -> String {
        format!("{}.{}", self.relation.table_name(), self.relation.primary_key())
    }

    // ------------------------------------------------------------------
    // WHERE
    // ------------------------------------------------------------------

    /// AND a condition. The text must come from code; values only through `params`.
    pub fn and_where(&mut self, condition: &str, params: Vec<Value>) -> &mut Self {
        match SqlFragment::new(condition, params) {
            Ok(fragment) => self.predicates.push(fragment),
            Err(err) => self.record_error(err),
        }
        self
    }

    /// OR a condition with everything accumulated so far
    pub fn or_where(&mut self, condition: &str, params: Vec<Value>) -> &mut Self {
        match SqlFragment::new(condition, params) {
            Ok(fragment) => self.or_where_fragment(fragment),
            Err(err) => self.record_error(err),
        }
        self
    }

    /// AND the negation of a condition
    pub fn not_where(&mut self, condition: &str, params: Vec<Value>) -> &mut Self {
        match SqlFragment::new(condition, params) {
            Ok(fragment) => {
                let mut negated = SqlFragment::raw("NOT ");
                negated.append(fragment.grouped());
                self.predicates.push(negated);
            }
            Err(err) => self.record_error(err),
        }
        self
    }

    pub fn and_where_fragment(&mut self, fragment: SqlFragment) -> &mut Self {
        self.predicates.push(fragment);
        self
    }

    pub(crate) fn or_where_fragment(&mut self, fragment: SqlFragment) {
        if self.predicates.is_empty() {
            self.predicates.push(fragment);
            return;
        }
        let existing = SqlFragment::join(std::mem::take(&mut self.predicates), " AND ");
        let combined = SqlFragment::join(vec![existing.grouped(), fragment.grouped()], " OR ");
        self.predicates.push(combined.grouped());
    }

    /// `field IN (SELECT column FROM (<subquery>) AS alias)`
    pub fn where_in_subquery(&mut self, field: &str, subquery: &Subquery, column: &str) -> &mut Self {
        let field = match ValidatedFieldName::new(field) {
            Ok(field) => field,
            Err(err) => {
                self.record_error(err.into());
                return self;
            }
        };
        let column = match ValidatedFieldName::new(column) {
            Ok(column) => column,
            Err(err) => {
                self.record_error(err.into());
                return self;
            }
        };
        let mut fragment = SqlFragment::raw(format!("{} IN (SELECT {} FROM ", field, column));
        fragment.append(subquery.to_fragment());
        fragment.push_str(")");
        self.predicates.push(fragment);
        self
    }

    // ------------------------------------------------------------------
    // JOIN
    // ------------------------------------------------------------------

    /// Join `table`; `on` is trusted SQL text (ignored for CROSS joins)
    pub fn join(
        &mut self,
        join_type: JoinType,
        table: &str,
        alias: Option<&str>,
        on: Option<&str>,
    ) -> &mut Self {
        if let Err(err) = ValidatedTableName::new(table) {
            self.record_error(err.into());
            return self;
        }
        if let Some(alias) = alias {
            if let Err(err) = ValidatedTableName::new(alias) {
                self.record_error(err.into());
                return self;
            }
        }

        let mut clause = match (join_type, on) {
            (JoinType::Cross, _) => JoinClause::cross(table),
            (_, Some(on)) => JoinClause::new_on(join_type, table, SqlFragment::raw(on)),
            (_, None) => {
                self.record_error(QueryError::InvalidArgument(format!(
                    "{} on '{}' needs an ON condition",
                    join_type.to_sql(),
                    table
                )));
                return self;
            }
        };
        if let Some(alias) = alias {
            clause = clause.with_alias(alias);
        }
        self.push_join(clause);
        self
    }

    /// Join a derived table such as a rendered union
    pub fn join_subquery(&mut self, join_type: JoinType, subquery: Subquery, on: &str) -> &mut Self {
        self.push_join(JoinClause::subquery(join_type, subquery, SqlFragment::raw(on)));
        self
    }

    /// Add a join unless one with the same table reference is already present
    pub(crate) fn push_join(&mut self, clause: JoinClause) -> bool {
        if self.has_join(clause.table_ref()) {
            return false;
        }
        self.joins.push(clause);
        true
    }

    pub fn has_join(&self, table_ref: &str) -> bool {
        self.joins.iter().any(|join| join.table_ref() == table_ref)
    }

    // ------------------------------------------------------------------
    // GROUP BY / HAVING
    // ------------------------------------------------------------------

    /// Group by a trusted expression; repeated expressions are kept once
    pub fn group_by(&mut self, expression: &str) -> &mut Self {
        if !self.group_by.iter().any(|existing| existing == expression) {
            self.group_by.push(expression.to_string());
        }
        self
    }

    pub fn having(&mut self, condition: &str, params: Vec<Value>) -> &mut Self {
        match SqlFragment::new(condition, params) {
            Ok(fragment) => self.having.push(fragment),
            Err(err) => self.record_error(err),
        }
        self
    }

    pub(crate) fn push_having(&mut self, fragment: SqlFragment) {
        self.having.push(fragment);
    }

    // ------------------------------------------------------------------
    // ORDER BY
    // ------------------------------------------------------------------

    /// Order by a column. Ordering the same column again replaces the earlier entry.
    pub fn order_by(
        &mut self,
        field: &str,
        direction: SortDirection,
        nulls: Option<NullsOrder>,
    ) -> &mut Self {
        match ValidatedFieldName::new(field) {
            Ok(field) => {
                let field = field.into_string();
                self.push_order(OrderTerm::new(field.clone(), SqlFragment::raw(field), direction, nulls));
            }
            Err(err) => self.record_error(err.into()),
        }
        self
    }

    /// Insert or replace (by key) an ORDER BY term, keeping its position
    pub(crate) fn push_order(&mut self, term: OrderTerm) {
        match self.order_by.iter_mut().find(|existing| existing.key == term.key) {
            Some(existing) => *existing = term,
            None => self.order_by.push(term),
        }
    }

    /// Make `term` the leading ORDER BY term, dropping any earlier term with its key
    pub(crate) fn lead_order(&mut self, term: OrderTerm) {
        self.order_by.retain(|existing| existing.key != term.key);
        self.order_by.insert(0, term);
    }

    pub fn unscope_order(&mut self) -> &mut Self {
        self.order_by.clear();
        self
    }

    /// Flip every ORDER BY direction; orders by primary key DESC when unordered
    pub fn reverse_order(&mut self) -> &mut Self {
        if self.order_by.is_empty() {
            let pk = self.qualified_primary_key();
            self.push_order(OrderTerm::new(pk.clone(), SqlFragment::raw(pk), SortDirection::Desc, None));
        } else {
            for term in &mut self.order_by {
                term.direction = term.direction.reverse();
            }
        }
        self
    }

    // ------------------------------------------------------------------
    // SELECT / DISTINCT / LIMIT / OFFSET
    // ------------------------------------------------------------------

    /// Add projected columns (`col`, `table.col`, `*` or `table.*`)
    pub fn select(&mut self, columns: &[&str]) -> &mut Self {
        for column in columns {
            let checked = match column.strip_suffix(".*") {
                _ if *column == "*" => Ok(()),
                Some(table) => ValidatedTableName::new(table).map(|_| ()),
                None => ValidatedFieldName::new(column).map(|_| ()),
            };
            match checked {
                Ok(()) => self.push_projection(SqlFragment::raw(*column)),
                Err(err) => self.record_error(err.into()),
            }
        }
        self
    }

    /// Add a trusted projection expression such as `COUNT(*) AS total`
    pub fn select_raw(&mut self, expression: &str) -> &mut Self {
        self.push_projection(SqlFragment::raw(expression));
        self
    }

    pub(crate) fn push_projection(&mut self, projection: SqlFragment) {
        if !self.projections.contains(&projection) {
            self.projections.push(projection);
        }
    }

    pub fn distinct(&mut self) -> &mut Self {
        self.distinct = true;
        self
    }

    pub fn limit(&mut self, limit: u64) -> &mut Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(&mut self, offset: u64) -> &mut Self {
        self.offset = Some(offset);
        self
    }

    pub(crate) fn clear_paging(&mut self) {
        self.limit = None;
        self.offset = None;
    }

    // ------------------------------------------------------------------
    // Rendering
    // ------------------------------------------------------------------

    /// Unnumbered SQL (`?` markers) with its values in text order
    pub fn to_fragment(&self) -> SqlFragment {
        self.render(&RenderOptions::full())
    }

    /// Final SQL with dialect placeholders and the values to bind
    pub fn to_sql(&self) -> (String, Vec<Value>) {
        SqlGenerator::number_placeholders(self.to_fragment(), self.dialect.as_ref())
    }

    fn render(&self, options: &RenderOptions) -> SqlFragment {
        let mut sql = SqlFragment::raw("SELECT ");

        match &options.projection {
            Some(projection) => sql.push_str(projection),
            None => {
                if self.distinct {
                    sql.push_str("DISTINCT ");
                }
                if self.projections.is_empty() {
                    sql.push_str("*");
                } else {
                    sql.append(SqlFragment::join(self.projections.clone(), ", "));
                }
            }
        }

        sql.push_str(" FROM ");
        sql.push_str(self.relation.table_name());

        for join in &self.joins {
            sql.push_str(" ");
            sql.append(join.to_fragment());
        }

        if let Some(where_clause) = SqlGenerator::build_where_clause(&self.predicates) {
            sql.push_str(" ");
            sql.append(where_clause);
        }

        if options.grouping {
            if let Some(group_clause) = SqlGenerator::build_group_by_clause(&self.group_by) {
                sql.push_str(" ");
                sql.push_str(&group_clause);
            }
            if let Some(having_clause) = SqlGenerator::build_having_clause(&self.having) {
                sql.push_str(" ");
                sql.append(having_clause);
            }
        }

        if options.ordering && !self.order_by.is_empty() {
            let terms = self
                .order_by
                .iter()
                .map(|term| term.render(self.dialect.as_ref()))
                .collect();
            sql.push_str(" ORDER BY ");
            sql.append(SqlFragment::join(terms, ", "));
        }

        if options.paging {
            let limit_clause =
                SqlGenerator::build_limit_clause(self.limit, self.offset, self.dialect.as_ref());
            if let Some(limit_clause) = limit_clause {
                sql.push_str(" ");
                sql.push_str(&limit_clause);
            }
        }

        debug_assert_eq!(count_markers(sql.sql()), sql.params().len());
        sql
    }

    fn number(&self, fragment: SqlFragment) -> (String, Vec<Value>) {
        SqlGenerator::number_placeholders(fragment, self.dialect.as_ref())
    }

    /// `SELECT COUNT(*) FROM (<inner>) AS alias`
    fn count_sql(&self, inner: SqlFragment, alias: &str) -> (String, Vec<Value>) {
        let mut sql = SqlFragment::raw("SELECT COUNT(*) FROM (");
        sql.append(inner);
        sql.push_str(&format!(") AS {}", alias));
        self.number(sql)
    }

    // ------------------------------------------------------------------
    // Terminals (delegate to the relation; its errors pass through untouched)
    // ------------------------------------------------------------------

    pub async fn all(&self) -> Result<Vec<R::Row>, R::Error> {
        let (sql, params) = self.to_sql();
        crate::debug_log!("[QUERY] {} ({} params)", sql, params.len());
        self.relation.fetch_all(&sql, &params).await
    }

    pub async fn execute(&self) -> Result<Vec<R::Row>, R::Error> {
        self.all().await
    }

    /// First row by the current order, or by primary key when unordered
    pub async fn first(&self) -> Result<Option<R::Row>, R::Error> {
        let mut query = self.copy();
        if query.order_by.is_empty() {
            let pk = query.qualified_primary_key();
            query.push_order(OrderTerm::new(pk.clone(), SqlFragment::raw(pk), SortDirection::Asc, None));
        }
        query.limit(1);
        let (sql, params) = query.to_sql();
        self.relation.fetch_optional(&sql, &params).await
    }

    /// Last row: the current order reversed, or primary key DESC when unordered
    pub async fn last(&self) -> Result<Option<R::Row>, R::Error> {
        let mut query = self.copy();
        query.reverse_order().limit(1);
        let (sql, params) = query.to_sql();
        self.relation.fetch_optional(&sql, &params).await
    }

    /// Row with the given primary key; a missing row is the relation's error
    pub async fn find(&self, id: impl Into<Value>) -> Result<R::Row, R::Error> {
        let mut query = self.copy();
        let condition = format!("{} = ?", query.qualified_primary_key());
        query.predicates.push(SqlFragment::bound(condition, id.into()));
        query.clear_paging();
        query.limit(1);
        let (sql, params) = query.to_sql();
        self.relation.fetch_one(&sql, &params).await
    }

    /// First row where `field = value`. An invalid field name is recorded and yields `None`.
    pub async fn find_by(&mut self, field: &str, value: impl Into<Value>) -> Result<Option<R::Row>, R::Error> {
        let field = match ValidatedFieldName::new(field) {
            Ok(field) => field,
            Err(err) => {
                self.record_error(err.into());
                return Ok(None);
            }
        };
        let mut query = self.copy();
        query
            .predicates
            .push(SqlFragment::bound(format!("{} = ?", field), value.into()));
        query.clear_paging();
        query.limit(1);
        let (sql, params) = query.to_sql();
        self.relation.fetch_optional(&sql, &params).await
    }

    /// Number of rows the query returns (LIMIT/OFFSET respected)
    pub async fn count(&self) -> Result<i64, R::Error> {
        let inner = self.render(&RenderOptions {
            ordering: false,
            ..RenderOptions::full()
        });
        let (sql, params) = self.count_sql(inner, "count_subquery");
        self.relation.fetch_count(&sql, &params).await
    }

    /// Number of rows ignoring LIMIT/OFFSET, used for page totals
    pub(crate) async fn count_unpaginated(&self) -> Result<i64, R::Error> {
        let inner = self.render(&RenderOptions {
            ordering: false,
            paging: false,
            ..RenderOptions::full()
        });
        let (sql, params) = self.count_sql(inner, "count_subquery");
        self.relation.fetch_count(&sql, &params).await
    }

    pub async fn exists(&self) -> Result<bool, R::Error> {
        let mut probe = self.copy();
        probe.limit(1);
        let inner = probe.render(&RenderOptions {
            projection: Some("1".to_string()),
            ordering: false,
            ..RenderOptions::full()
        });
        let (sql, params) = self.count_sql(inner, "exists_subquery");
        Ok(self.relation.fetch_count(&sql, &params).await? > 0)
    }

    pub async fn sum(&mut self, field: &str) -> Result<Option<f64>, R::Error> {
        self.aggregate("SUM", field).await
    }

    pub async fn avg(&mut self, field: &str) -> Result<Option<f64>, R::Error> {
        self.aggregate("AVG", field).await
    }

    pub async fn min(&mut self, field: &str) -> Result<Option<f64>, R::Error> {
        self.aggregate("MIN", field).await
    }

    pub async fn max(&mut self, field: &str) -> Result<Option<f64>, R::Error> {
        self.aggregate("MAX", field).await
    }

    /// Aggregate over the filtered, joined rows (grouping, ordering and paging ignored)
    async fn aggregate(&mut self, function: &str, field: &str) -> Result<Option<f64>, R::Error> {
        let field = match ValidatedFieldName::new(field) {
            Ok(field) => field,
            Err(err) => {
                self.record_error(err.into());
                return Ok(None);
            }
        };
        let projection = self
            .dialect
            .numeric_cast(&format!("{}({})", function, field));
        let fragment = self.render(&RenderOptions {
            projection: Some(projection),
            grouping: false,
            ordering: false,
            paging: false,
        });
        let (sql, params) = self.number(fragment);
        self.relation.fetch_number(&sql, &params).await
    }

    pub async fn explain(&self) -> Result<String, R::Error> {
        let (sql, params) = self.to_sql();
        self.relation.explain(&sql, &params).await
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Drop every clause, error and log entry; relation and configuration stay
    pub fn reset(&mut self) -> &mut Self {
        self.projections.clear();
        self.distinct = false;
        self.joins.clear();
        self.predicates.clear();
        self.group_by.clear();
        self.having.clear();
        self.order_by.clear();
        self.limit = None;
        self.offset = None;
        self.errors.clear();
        self.warnings.clear();
        self.operations.clear();
        self
    }

    /// Independent copy; only the immutable relation handle is shared
    pub fn copy(&self) -> Self {
        Self {
            relation: Arc::clone(&self.relation),
            config: self.config.clone(),
            dialect: Arc::clone(&self.dialect),
            projections: self.projections.clone(),
            distinct: self.distinct,
            joins: self.joins.clone(),
            predicates: self.predicates.clone(),
            group_by: self.group_by.clone(),
            having: self.having.clone(),
            order_by: self.order_by.clone(),
            limit: self.limit,
            offset: self.offset,
            errors: self.errors.clone(),
            warnings: self.warnings.clone(),
            operations: self.operations.clone(),
        }
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Recoverable errors in the order they occurred
    pub fn errors(&self) -> &[QueryError] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Every filter/sort/join/group/having applied, in order
    pub fn operations(&self) -> &[AppliedOperation] {
        &self.operations
    }

    pub fn operations_of(&self, kind: OperationKind) -> Vec<&AppliedOperation> {
        self.operations.iter().filter(|op| op.kind == kind).collect()
    }

    pub fn predicates(&self) -> &[SqlFragment] {
        &self.predicates
    }

    pub fn joins(&self) -> &[JoinClause] {
        &self.joins
    }

    pub fn group_by_expressions(&self) -> &[String] {
        &self.group_by
    }

    pub fn having_predicates(&self) -> &[SqlFragment] {
        &self.having
    }

    pub fn order_terms(&self) -> &[OrderTerm] {
        &self.order_by
    }

    pub fn projections(&self) -> &[SqlFragment] {
        &self.projections
    }

    pub fn is_distinct(&self) -> bool {
        self.distinct
    }

    pub fn limit_value(&self) -> Option<u64> {
        self.limit
    }

    pub fn offset_value(&self) -> Option<u64> {
        self.offset
    }

    pub(crate) fn record_error(&mut self, error: QueryError) {
        tracing::warn!(table = self.relation.table_name(), error = %error, "query operation skipped");
        self.errors.push(error);
    }

    pub(crate) fn record_warning(&mut self, warning: String) {
        tracing::warn!(table = self.relation.table_name(), "{}", warning);
        self.warnings.push(warning);
    }

    pub(crate) fn log_operation(&mut self, operation: AppliedOperation) {
        crate::debug_log!(
            "[{}] {} -> {} ({} values)",
            operation.kind,
            operation.name,
            operation.sql,
            operation.values.len()
        );
        self.operations.push(operation);
    }
}

impl<R: Relation> Clone for QueryState<R> {
    fn clone(&self) -> Self {
        self.copy()
    }
}

impl<R: Relation> fmt::Debug for QueryState<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (sql, params) = self.to_sql();
        f.debug_struct("QueryState")
            .field("table", &self.relation.table_name())
            .field("dialect", &self.dialect.name())
            .field("sql", &sql)
            .field("params", &params)
            .field("errors", &self.errors)
            .finish()
    }
}
