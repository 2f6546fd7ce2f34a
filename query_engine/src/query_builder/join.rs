use crate::errors::QueryError;
use crate::query_builder::engine::{impl_query_engine, Registry};
use crate::query_builder::fragment::{SqlFragment, Subquery};
use crate::query_builder::operation_log::{AppliedOperation, OperationKind};
use crate::query_builder::state::QueryState;
use crate::relation::Relation;
use crate::validation::ValidatedTableName;

/// Represents the type of SQL JOIN operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinType {
    /// INNER JOIN - returns records that have matching values in both tables
    Inner,
    /// LEFT JOIN - returns all records from the left table and matched records from the right table
    Left,
    /// RIGHT JOIN - returns all records from the right table and matched records from the left table
    Right,
    /// FULL OUTER JOIN - returns all records when there is a match in either left or right table
    Full,
    /// CROSS JOIN - returns Cartesian product of both tables
    Cross,
}

impl JoinType {
    /// Convert JoinType to SQL string
    pub fn to_sql(&self) -> &'static str {
        match self {
            JoinType::Inner => "INNER JOIN",
            JoinType::Left => "LEFT JOIN",
            JoinType::Right => "RIGHT JOIN",
            JoinType::Full => "FULL OUTER JOIN",
            JoinType::Cross => "CROSS JOIN",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "inner" => Some(JoinType::Inner),
            "left" | "left_outer" => Some(JoinType::Left),
            "right" | "right_outer" => Some(JoinType::Right),
            "full" | "full_outer" => Some(JoinType::Full),
            "cross" => Some(JoinType::Cross),
            _ => None,
        }
    }
}

/// What is being joined
#[derive(Debug, Clone, PartialEq)]
pub enum JoinSource {
    Table(String),
    Subquery(Subquery),
}

/// Represents a condition for joining tables
#[derive(Debug, Clone, PartialEq)]
pub enum JoinCondition {
    /// ON <condition>
    On(SqlFragment),
    /// No condition (CROSS JOIN)
    None,
}

/// Represents a complete JOIN clause
#[derive(Debug, Clone, PartialEq)]
pub struct JoinClause {
    pub join_type: JoinType,
    pub source: JoinSource,
    pub alias: Option<String>,
    pub condition: JoinCondition,
}

impl JoinClause {
    /// Create a new JOIN clause with ON condition
    pub fn new_on(join_type: JoinType, table: impl Into<String>, condition: SqlFragment) -> Self {
        Self {
            join_type,
            source: JoinSource::Table(table.into()),
            alias: None,
            condition: JoinCondition::On(condition),
        }
    }

    pub fn cross(table: impl Into<String>) -> Self {
        Self {
            join_type: JoinType::Cross,
            source: JoinSource::Table(table.into()),
            alias: None,
            condition: JoinCondition::None,
        }
    }

    pub fn subquery(join_type: JoinType, subquery: Subquery, condition: SqlFragment) -> Self {
        Self {
            join_type,
            alias: Some(subquery.alias.clone()),
            source: JoinSource::Subquery(subquery),
            condition: JoinCondition::On(condition),
        }
    }

    /// Add an alias for the joined table
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Get the table reference (alias if present, otherwise table name)
    pub fn table_ref(&self) -> &str {
        match (&self.alias, &self.source) {
            (Some(alias), _) => alias,
            (None, JoinSource::Table(table)) => table,
            (None, JoinSource::Subquery(subquery)) => &subquery.alias,
        }
    }

    pub fn to_fragment(&self) -> SqlFragment {
        let mut sql = SqlFragment::raw(format!("{} ", self.join_type.to_sql()));
        match &self.source {
            JoinSource::Table(table) => {
                sql.push_str(table);
                if let Some(alias) = &self.alias {
                    sql.push_str(&format!(" AS {}", alias));
                }
            }
            JoinSource::Subquery(subquery) => sql.append(subquery.to_fragment()),
        }
        match &self.condition {
            JoinCondition::On(condition) => {
                sql.push_str(" ON ");
                sql.append(condition.clone());
            }
            JoinCondition::None => {}
        }
        sql
    }
}

/// How a named join finds its ON condition
#[derive(Debug, Clone, PartialEq)]
pub enum JoinStrategy {
    /// Explicit condition text
    On(String),
    /// `joined.foreign_key = base.primary_key`
    Keys {
        foreign_key: String,
        primary_key: String,
    },
    /// Base row points at the joined row: `joined.id = base.foreign_key`
    BelongsTo { foreign_key: String },
    /// Joined rows point at the base row: `joined.foreign_key = base.<pk>`
    HasMany { foreign_key: String },
}

/// Reusable join registered under a name
#[derive(Debug, Clone, PartialEq)]
pub struct JoinDefinition {
    pub table: String,
    pub alias: Option<String>,
    pub join_type: JoinType,
    pub strategy: JoinStrategy,
    requested_type: Option<String>,
}

impl JoinDefinition {
    fn new(table: &str, strategy: JoinStrategy) -> Self {
        Self {
            table: table.to_string(),
            alias: None,
            join_type: JoinType::Inner,
            strategy,
            requested_type: None,
        }
    }

    pub fn on(table: &str, condition: &str) -> Self {
        Self::new(table, JoinStrategy::On(condition.to_string()))
    }

    pub fn keys(table: &str, foreign_key: &str, primary_key: &str) -> Self {
        Self::new(
            table,
            JoinStrategy::Keys {
                foreign_key: foreign_key.to_string(),
                primary_key: primary_key.to_string(),
            },
        )
    }

    pub fn belongs_to(table: &str, foreign_key: &str) -> Self {
        Self::new(
            table,
            JoinStrategy::BelongsTo {
                foreign_key: foreign_key.to_string(),
            },
        )
    }

    pub fn has_many(table: &str, foreign_key: &str) -> Self {
        Self::new(
            table,
            JoinStrategy::HasMany {
                foreign_key: foreign_key.to_string(),
            },
        )
    }

    pub fn alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.to_string());
        self
    }

    pub fn with_type(mut self, join_type: JoinType) -> Self {
        self.join_type = join_type;
        self.requested_type = None;
        self
    }

    /// Join type by name (`inner`, `left`, `right`, `full`, `cross`);
    /// unknown names fall back to INNER when the join is defined
    pub fn join_type(mut self, name: &str) -> Self {
        self.requested_type = Some(name.to_string());
        self
    }

    fn table_ref(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.table)
    }

    fn condition<R: Relation>(&self, state: &QueryState<R>) -> String {
        let joined = self.table_ref();
        let base = state.table_name();
        match &self.strategy {
            JoinStrategy::On(condition) => condition.clone(),
            JoinStrategy::Keys {
                foreign_key,
                primary_key,
            } => format!("{}.{} = {}.{}", joined, foreign_key, base, primary_key),
            JoinStrategy::BelongsTo { foreign_key } => {
                format!("{}.id = {}.{}", joined, base, foreign_key)
            }
            JoinStrategy::HasMany { foreign_key } => format!(
                "{}.{} = {}",
                joined,
                foreign_key,
                state.qualified_primary_key()
            ),
        }
    }
}

/// Named and ad-hoc join construction over a [`QueryState`]
pub struct JoinEngine<R: Relation> {
    state: QueryState<R>,
    definitions: Registry<JoinDefinition>,
}

impl_query_engine!(JoinEngine);

impl<R: Relation> JoinEngine<R> {
    pub fn new(state: QueryState<R>) -> Self {
        Self {
            state,
            definitions: Registry::new("join"),
        }
    }

    /// Register a reusable join
    pub fn define_join(&mut self, name: &str, mut definition: JoinDefinition) -> &mut Self {
        let mut names = vec![definition.table.as_str()];
        names.extend(definition.alias.as_deref());
        if let JoinStrategy::Keys { foreign_key, primary_key } = &definition.strategy {
            names.push(foreign_key);
            names.push(primary_key);
        }
        if let JoinStrategy::BelongsTo { foreign_key } | JoinStrategy::HasMany { foreign_key } =
            &definition.strategy
        {
            names.push(foreign_key);
        }
        if let Some(err) = names.iter().find_map(|n| ValidatedTableName::new(n).err()) {
            self.state.record_error(err.into());
            return self;
        }

        if let Some(requested) = definition.requested_type.take() {
            definition.join_type = match JoinType::parse(&requested) {
                Some(join_type) => join_type,
                None => {
                    self.state.record_warning(format!(
                        "join '{}' has unknown type '{}', using INNER JOIN",
                        name, requested
                    ));
                    JoinType::Inner
                }
            };
        }

        if let Err(err) = self.definitions.register(name, definition) {
            self.state.record_error(err);
        }
        self
    }

    /// Apply a named join, AND-ing `extra_condition` onto its ON clause
    pub fn apply_join(&mut self, name: &str, extra_condition: Option<SqlFragment>) -> &mut Self {
        let definition = match self.definitions.get(name) {
            Ok(definition) => definition.clone(),
            Err(err) => {
                self.state.record_error(err);
                return self;
            }
        };

        let clause = if definition.join_type == JoinType::Cross {
            JoinClause::cross(&definition.table)
        } else {
            let mut condition = SqlFragment::raw(definition.condition(&self.state));
            if let Some(extra) = extra_condition {
                condition = SqlFragment::join(vec![condition.grouped(), extra.grouped()], " AND ");
            }
            JoinClause::new_on(definition.join_type, &definition.table, condition)
        };
        let clause = match &definition.alias {
            Some(alias) => clause.with_alias(alias),
            None => clause,
        };

        self.push(name, clause);
        self
    }

    pub fn inner_join(&mut self, table: &str, on: &str) -> &mut Self {
        self.direct(JoinType::Inner, table, None, Some(on))
    }

    pub fn left_join(&mut self, table: &str, on: &str) -> &mut Self {
        self.direct(JoinType::Left, table, None, Some(on))
    }

    pub fn right_join(&mut self, table: &str, on: &str) -> &mut Self {
        self.direct(JoinType::Right, table, None, Some(on))
    }

    pub fn full_join(&mut self, table: &str, on: &str) -> &mut Self {
        if !self.state.dialect().supports_full_join() {
            let dialect = self.state.dialect().name();
            self.state.record_error(QueryError::UnsupportedByDialect {
                feature: "FULL OUTER JOIN",
                dialect,
            });
            return self;
        }
        self.direct(JoinType::Full, table, None, Some(on))
    }

    pub fn cross_join(&mut self, table: &str) -> &mut Self {
        self.direct(JoinType::Cross, table, None, None)
    }

    /// Join the base table to itself under `alias`
    pub fn self_join(&mut self, alias: &str, on: &str, join_type: JoinType) -> &mut Self {
        let table = self.state.table_name().to_string();
        self.direct(join_type, &table, Some(alias), Some(on))
    }

    /// Join every table whose `foreign_key` column references the base primary key
    pub fn join_tables(&mut self, tables: &[&str], foreign_key: &str, join_type: JoinType) -> &mut Self {
        if let Err(err) = ValidatedTableName::new(foreign_key) {
            self.state.record_error(err.into());
            return self;
        }
        let base_key = self.state.qualified_primary_key();
        for table in tables {
            let on = format!("{}.{} = {}", table, foreign_key, base_key);
            self.direct(join_type, table, None, Some(&on));
        }
        self
    }

    /// Two-hop join through a junction table:
    /// base → junction (`junction.source_key = base.pk`) → target (`target.id = junction.target_key`)
    pub fn many_to_many(
        &mut self,
        junction: &str,
        target: &str,
        source_key: &str,
        target_key: &str,
    ) -> &mut Self {
        for name in [junction, target, source_key, target_key] {
            if let Err(err) = ValidatedTableName::new(name) {
                self.state.record_error(err.into());
                return self;
            }
        }
        let base_key = self.state.qualified_primary_key();
        let first = format!("{}.{} = {}", junction, source_key, base_key);
        let second = format!("{}.id = {}.{}", target, junction, target_key);
        self.direct(JoinType::Inner, junction, None, Some(&first));
        self.direct(JoinType::Inner, target, None, Some(&second))
    }

    fn direct(&mut self, join_type: JoinType, table: &str, alias: Option<&str>, on: Option<&str>) -> &mut Self {
        let before = self.state.joins().len();
        let errors_before = self.state.errors().len();
        self.state.join(join_type, table, alias, on);
        if self.state.joins().len() > before && self.state.errors().len() == errors_before {
            if let Some(clause) = self.state.joins().last().cloned() {
                self.log(table, &clause);
            }
        }
        self
    }

    fn push(&mut self, name: &str, clause: JoinClause) {
        if self.state.push_join(clause.clone()) {
            self.log(name, &clause);
        }
    }

    fn log(&mut self, name: &str, clause: &JoinClause) {
        let fragment = clause.to_fragment();
        let (sql, values) = fragment.into_parts();
        self.state
            .log_operation(AppliedOperation::new(OperationKind::Join, name, sql, values));
    }

    pub fn available_joins(&self) -> Vec<&str> {
        self.definitions.names()
    }

    pub fn current_joins(&self) -> Vec<&AppliedOperation> {
        self.state.operations_of(OperationKind::Join)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_builder::engine::QueryEngine;
    use crate::query_builder::tests::{products, state_for};
    use config::DialectKind;
    use serde_json::json;

    #[test]
    fn test_join_type_to_sql() {
        assert_eq!(JoinType::Inner.to_sql(), "INNER JOIN");
        assert_eq!(JoinType::Left.to_sql(), "LEFT JOIN");
        assert_eq!(JoinType::Right.to_sql(), "RIGHT JOIN");
        assert_eq!(JoinType::Full.to_sql(), "FULL OUTER JOIN");
        assert_eq!(JoinType::Cross.to_sql(), "CROSS JOIN");
    }

    #[test]
    fn test_join_clause_rendering() {
        let join = JoinClause::new_on(JoinType::Left, "orders", SqlFragment::raw("o.user_id = users.id"))
            .with_alias("o");
        assert_eq!(join.table_ref(), "o");
        assert_eq!(join.to_fragment().sql(), "LEFT JOIN orders AS o ON o.user_id = users.id");

        let cross = JoinClause::cross("regions");
        assert_eq!(cross.table_ref(), "regions");
        assert_eq!(cross.to_fragment().sql(), "CROSS JOIN regions");
    }

    #[test]
    fn test_named_join_strategies() {
        let mut engine = JoinEngine::new(products());
        engine
            .define_join("category", JoinDefinition::belongs_to("categories", "category_id").join_type("left"))
            .define_join("reviews", JoinDefinition::has_many("reviews", "product_id"))
            .define_join("stock", JoinDefinition::keys("inventory", "product_sku", "sku").alias("inv"))
            .apply_join("category", None)
            .apply_join("reviews", None)
            .apply_join("stock", None);

        let (sql, _) = engine.to_sql();
        assert_eq!(
            sql,
            "SELECT * FROM products \
             LEFT JOIN categories ON categories.id = products.category_id \
             INNER JOIN reviews ON reviews.product_id = products.id \
             INNER JOIN inventory AS inv ON inv.product_sku = products.sku"
        );
        assert_eq!(engine.current_joins().len(), 3);
        assert_eq!(engine.available_joins(), vec!["category", "reviews", "stock"]);
    }

    #[test]
    fn test_extra_condition_is_bound() {
        let mut engine = JoinEngine::new(products());
        let extra = SqlFragment::new("reviews.rating >= ?", vec![json!(4)]).unwrap();
        engine
            .define_join("reviews", JoinDefinition::on("reviews", "reviews.product_id = products.id"))
            .apply_join("reviews", Some(extra));

        let (sql, params) = engine.to_sql();
        assert_eq!(
            sql,
            "SELECT * FROM products INNER JOIN reviews ON (reviews.product_id = products.id) AND (reviews.rating >= $1)"
        );
        assert_eq!(params, vec![json!(4)]);
    }

    #[test]
    fn test_unknown_join_type_falls_back_to_inner() {
        let mut engine = JoinEngine::new(products());
        engine
            .define_join("category", JoinDefinition::belongs_to("categories", "category_id").join_type("sideways"))
            .apply_join("category", None);

        assert!(engine.to_sql().0.contains("INNER JOIN categories"));
        assert_eq!(engine.state().warnings().len(), 1);
        assert!(engine.errors().is_empty());
    }

    #[test]
    fn test_apply_join_is_idempotent_and_records_missing() {
        let mut engine = JoinEngine::new(products());
        engine
            .define_join("reviews", JoinDefinition::has_many("reviews", "product_id"))
            .apply_join("reviews", None)
            .apply_join("reviews", None)
            .apply_join("suppliers", None);

        assert_eq!(engine.state().joins().len(), 1);
        assert_eq!(engine.errors(), &[QueryError::not_found("join", "suppliers")]);
    }

    #[test]
    fn test_direct_constructors() {
        let mut engine = JoinEngine::new(products());
        engine
            .inner_join("categories", "categories.id = products.category_id")
            .cross_join("regions")
            .self_join("parent", "parent.id = products.parent_id", JoinType::Left);

        let (sql, _) = engine.to_sql();
        assert_eq!(
            sql,
            "SELECT * FROM products \
             INNER JOIN categories ON categories.id = products.category_id \
             CROSS JOIN regions \
             LEFT JOIN products AS parent ON parent.id = products.parent_id"
        );
        assert_eq!(engine.current_joins().len(), 3);
    }

    #[test]
    fn test_many_to_many_and_join_tables() {
        let mut engine = JoinEngine::new(products());
        engine.many_to_many("product_tags", "tags", "product_id", "tag_id");
        engine.join_tables(&["images", "prices"], "product_id", JoinType::Left);

        let (sql, _) = engine.to_sql();
        assert_eq!(
            sql,
            "SELECT * FROM products \
             INNER JOIN product_tags ON product_tags.product_id = products.id \
             INNER JOIN tags ON tags.id = product_tags.tag_id \
             LEFT JOIN images ON images.product_id = products.id \
             LEFT JOIN prices ON prices.product_id = products.id"
        );
    }

    #[test]
    fn test_full_join_unsupported_on_mysql() {
        let mut engine = JoinEngine::new(state_for("products", DialectKind::Mysql));
        engine.full_join("archive", "archive.id = products.id");

        assert!(engine.state().joins().is_empty());
        assert!(matches!(
            engine.errors()[0],
            QueryError::UnsupportedByDialect { dialect: "mysql", .. }
        ));
    }

    #[test]
    fn test_invalid_table_names_rejected() {
        let mut engine = JoinEngine::new(products());
        engine.inner_join("orders; DROP TABLE users", "1=1");

        assert!(engine.state().joins().is_empty());
        assert!(matches!(engine.errors()[0], QueryError::InvalidIdentifier(_)));
    }
}
