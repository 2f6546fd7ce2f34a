use crate::dialect::DialectStrategy;
use crate::errors::QueryError;
use crate::query_builder::aggregation::AggregateFunction;
use crate::query_builder::engine::{impl_query_engine, Registry};
use crate::query_builder::fragment::{count_markers, SqlFragment};
use crate::query_builder::join::{JoinClause, JoinType};
use crate::query_builder::operation_log::{AppliedOperation, OperationKind};
use crate::query_builder::state::QueryState;
use crate::relation::Relation;
use crate::validation::{ValidatedFieldName, ValidatedTableName};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Sort direction for ORDER BY clauses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    /// Convert SortDirection to SQL string
    pub fn to_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }

    pub fn reverse(&self) -> Self {
        match self {
            SortDirection::Asc => SortDirection::Desc,
            SortDirection::Desc => SortDirection::Asc,
        }
    }
}

impl FromStr for SortDirection {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" => Ok(SortDirection::Asc),
            "desc" => Ok(SortDirection::Desc),
            _ => Err(QueryError::InvalidDirection(s.to_string())),
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_sql())
    }
}

/// Placement of NULLs within an ordered column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NullsOrder {
    First,
    Last,
}

impl NullsOrder {
    pub fn to_sql(&self) -> &'static str {
        match self {
            NullsOrder::First => "NULLS FIRST",
            NullsOrder::Last => "NULLS LAST",
        }
    }
}

/// One ORDER BY entry. `key` identifies the entry for replacement.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderTerm {
    pub key: String,
    pub expression: SqlFragment,
    pub direction: SortDirection,
    pub nulls: Option<NullsOrder>,
}

impl OrderTerm {
    pub fn new(
        key: impl Into<String>,
        expression: SqlFragment,
        direction: SortDirection,
        nulls: Option<NullsOrder>,
    ) -> Self {
        Self {
            key: key.into(),
            expression,
            direction,
            nulls,
        }
    }

    pub fn render(&self, dialect: &dyn DialectStrategy) -> SqlFragment {
        let sql = dialect.order_term(self.expression.sql(), self.direction, self.nulls);
        // NULLS emulation repeats the expression, and its values with it
        let markers = count_markers(&sql);
        let params = self
            .expression
            .params()
            .iter()
            .cycle()
            .take(markers)
            .cloned()
            .collect();
        SqlFragment { sql, params }
    }
}

/// What a named sort orders by
#[derive(Debug, Clone, PartialEq)]
pub enum SortTarget {
    Field { field: String, table: Option<String> },
    /// Trusted expression emitted verbatim
    Expression(String),
}

/// Reusable sort registered under a name
#[derive(Debug, Clone, PartialEq)]
pub struct SortDefinition {
    pub target: SortTarget,
    pub direction: SortDirection,
    pub nulls: Option<NullsOrder>,
    pub required_join: Option<JoinClause>,
}

impl SortDefinition {
    pub fn field(field: &str) -> Self {
        Self {
            target: SortTarget::Field {
                field: field.to_string(),
                table: None,
            },
            direction: SortDirection::Asc,
            nulls: None,
            required_join: None,
        }
    }

    pub fn expression(expression: &str) -> Self {
        Self {
            target: SortTarget::Expression(expression.to_string()),
            ..Self::field("")
        }
    }

    pub fn table(mut self, table: &str) -> Self {
        if let SortTarget::Field { table: slot, .. } = &mut self.target {
            *slot = Some(table.to_string());
        }
        self
    }

    pub fn direction(mut self, direction: SortDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn nulls(mut self, nulls: NullsOrder) -> Self {
        self.nulls = Some(nulls);
        self
    }

    /// Join applied before the sort whenever it is used
    pub fn requires_join(mut self, join: JoinClause) -> Self {
        self.required_join = Some(join);
        self
    }

    fn resolve(&self) -> Result<String, QueryError> {
        match &self.target {
            SortTarget::Field { field, table } => {
                Ok(ValidatedFieldName::qualified(table.as_deref(), field)?.into_string())
            }
            SortTarget::Expression(expression) => Ok(expression.clone()),
        }
    }
}

/// Named and ad-hoc ORDER BY construction
pub struct SortEngine<R: Relation> {
    state: QueryState<R>,
    definitions: Registry<SortDefinition>,
    default_sort: Option<(String, Option<SortDirection>)>,
}

impl_query_engine!(SortEngine);

impl<R: Relation> SortEngine<R> {
    pub fn new(state: QueryState<R>) -> Self {
        Self {
            state,
            definitions: Registry::new("sort"),
            default_sort: None,
        }
    }

    pub fn define_sort(&mut self, name: &str, definition: SortDefinition) -> &mut Self {
        if let Err(err) = definition.resolve() {
            self.state.record_error(err);
            return self;
        }
        if let Err(err) = self.definitions.register(name, definition) {
            self.state.record_error(err);
        }
        self
    }

    /// Sort used when the caller asks for none
    pub fn set_default_sort(&mut self, name: &str, direction: Option<&str>) -> &mut Self {
        let direction = match direction {
            Some(direction) => match self.parse_direction(name, direction) {
                Some(direction) => Some(direction),
                None => return self,
            },
            None => None,
        };
        self.default_sort = Some((name.to_string(), direction));
        self
    }

    pub fn apply_default_sort(&mut self) -> &mut Self {
        if let Some((name, direction)) = self.default_sort.clone() {
            self.apply(&name, direction);
        }
        self
    }

    /// Apply a named sort; without `direction` the definition's own direction is used
    pub fn apply_sort(&mut self, name: &str, direction: Option<&str>) -> &mut Self {
        let direction = match direction {
            Some(direction) => match self.parse_direction(name, direction) {
                Some(direction) => Some(direction),
                None => return self,
            },
            None => None,
        };
        self.apply(name, direction)
    }

    /// Apply several sorts in order; a bad entry does not stop the rest
    pub fn apply_sorts(&mut self, sorts: &[(&str, Option<&str>)]) -> &mut Self {
        for (name, direction) in sorts {
            self.apply_sort(name, *direction);
        }
        self
    }

    /// Apply a parameter such as `-price,name` (leading `-` means descending).
    /// A blank parameter applies the default sort.
    pub fn apply_sort_param(&mut self, param: &str) -> &mut Self {
        let names: Vec<&str> = param
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect();
        if names.is_empty() {
            return self.apply_default_sort();
        }
        for name in names {
            match name.strip_prefix('-') {
                Some(name) => self.apply(name, Some(SortDirection::Desc)),
                None => self.apply(name.strip_prefix('+').unwrap_or(name), Some(SortDirection::Asc)),
            };
        }
        self
    }

    /// Ad-hoc sort on a column of the base or a joined table
    pub fn sort_by(&mut self, field: &str, direction: SortDirection, nulls: Option<NullsOrder>) -> &mut Self {
        match ValidatedFieldName::new(field) {
            Ok(field) => {
                let field = field.into_string();
                let term = OrderTerm::new(field.clone(), SqlFragment::raw(field.clone()), direction, nulls);
                self.push(&field, term);
            }
            Err(err) => self.state.record_error(err.into()),
        }
        self
    }

    /// Order by a column of a belongs-to association, LEFT JOINed on `table.id = base.foreign_key`
    pub fn sort_by_association(
        &mut self,
        table: &str,
        foreign_key: &str,
        field: &str,
        direction: SortDirection,
    ) -> &mut Self {
        let checked = ValidatedTableName::new(table)
            .and_then(|_| ValidatedTableName::new(foreign_key))
            .and_then(|_| ValidatedFieldName::qualified(Some(table), field));
        let column = match checked {
            Ok(column) => column.into_string(),
            Err(err) => {
                self.state.record_error(err.into());
                return self;
            }
        };
        let on = format!("{}.id = {}.{}", table, self.state.table_name(), foreign_key);
        self.state
            .push_join(JoinClause::new_on(JoinType::Left, table, SqlFragment::raw(on)));
        let term = OrderTerm::new(column.clone(), SqlFragment::raw(column.clone()), direction, None);
        self.push(&column, term);
        self
    }

    /// Order by an aggregate (`count|sum|avg|min|max`) of `field`. Groups by the
    /// base primary key when the query is not grouped yet.
    pub fn sort_by_aggregate(&mut self, function: &str, field: &str, direction: SortDirection) -> &mut Self {
        let function = match function.parse::<AggregateFunction>() {
            Ok(AggregateFunction::CountDistinct) => {
                self.state
                    .record_error(QueryError::InvalidFunction(function.to_string()));
                return self;
            }
            Ok(function) => function,
            Err(err) => {
                self.state.record_error(err);
                return self;
            }
        };
        let field = if field == "*" {
            field.to_string()
        } else {
            match ValidatedFieldName::new(field) {
                Ok(field) => field.into_string(),
                Err(err) => {
                    self.state.record_error(err.into());
                    return self;
                }
            }
        };
        if self.state.group_by_expressions().is_empty() {
            let pk = self.state.qualified_primary_key();
            self.state.group_by(&pk);
        }
        let expression = function.apply(&field);
        let term = OrderTerm::new(expression.clone(), SqlFragment::raw(expression.clone()), direction, None);
        self.push(&expression, term);
        self
    }

    /// `CASE WHEN c1 THEN v1 ... ELSE e END`, conditions and values bound in order
    pub fn sort_by_case(
        &mut self,
        branches: Vec<(SqlFragment, Value)>,
        else_value: Value,
        direction: SortDirection,
    ) -> &mut Self {
        if branches.is_empty() {
            self.state.record_error(QueryError::InvalidArgument(
                "CASE sort needs at least one branch".to_string(),
            ));
            return self;
        }
        let mut expression = SqlFragment::raw("CASE");
        for (condition, value) in branches {
            expression.push_str(" WHEN ");
            expression.append(condition);
            expression.append(SqlFragment::bound(" THEN ?", value));
        }
        expression.append(SqlFragment::bound(" ELSE ? END", else_value));
        let key = expression.sql().to_string();
        let term = OrderTerm::new(key.clone(), expression, direction, None);
        self.push(&key, term);
        self
    }

    /// Rows whose `field` equals `values[0]` first, then `values[1]`, and so on;
    /// anything else after them
    pub fn sort_by_priority(&mut self, field: &str, values: Vec<Value>, direction: SortDirection) -> &mut Self {
        let field = match ValidatedFieldName::new(field) {
            Ok(field) => field.into_string(),
            Err(err) => {
                self.state.record_error(err.into());
                return self;
            }
        };
        if values.is_empty() {
            self.state.record_error(QueryError::InvalidArgument(format!(
                "priority sort on '{}' needs at least one value",
                field
            )));
            return self;
        }
        let rank_of_rest = values.len();
        let mut expression = SqlFragment::raw("CASE");
        for (rank, value) in values.into_iter().enumerate() {
            expression.append(SqlFragment::bound(format!(" WHEN {} = ? THEN {}", field, rank), value));
        }
        expression.push_str(&format!(" ELSE {} END", rank_of_rest));
        let key = format!("priority:{}", field);
        let term = OrderTerm::new(key.clone(), expression, direction, None);
        self.push(&key, term);
        self
    }

    pub fn random(&mut self) -> &mut Self {
        let function = self.state.dialect().random_function();
        let term = OrderTerm::new("random", SqlFragment::raw(function), SortDirection::Asc, None);
        self.push("random", term);
        self
    }

    pub fn available_sorts(&self) -> Vec<&str> {
        self.definitions.names()
    }

    pub fn current_sorts(&self) -> Vec<&AppliedOperation> {
        self.state.operations_of(OperationKind::Sort)
    }

    fn apply(&mut self, name: &str, direction: Option<SortDirection>) -> &mut Self {
        let definition = match self.definitions.get(name) {
            Ok(definition) => definition.clone(),
            Err(err) => {
                self.state.record_error(err);
                return self;
            }
        };
        let expression = match definition.resolve() {
            Ok(expression) => expression,
            Err(err) => {
                self.state.record_error(err);
                return self;
            }
        };
        if let Some(join) = definition.required_join {
            self.state.push_join(join);
        }
        let term = OrderTerm::new(
            expression.clone(),
            SqlFragment::raw(expression),
            direction.unwrap_or(definition.direction),
            definition.nulls,
        );
        self.push(name, term);
        self
    }

    fn parse_direction(&mut self, name: &str, direction: &str) -> Option<SortDirection> {
        match direction.parse::<SortDirection>() {
            Ok(direction) => Some(direction),
            Err(err) => {
                tracing::debug!(sort = name, "rejected sort direction");
                self.state.record_error(err);
                None
            }
        }
    }

    fn push(&mut self, name: &str, term: OrderTerm) {
        let (sql, values) = term.render(self.state.dialect()).into_parts();
        self.state.push_order(term);
        self.state
            .log_operation(AppliedOperation::new(OperationKind::Sort, name, sql, values));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_builder::engine::QueryEngine;
    use crate::query_builder::tests::{products, state_for, RecordingRelation};
    use config::DialectKind;
    use serde_json::json;

    fn catalog(state: QueryState<RecordingRelation>) -> SortEngine<RecordingRelation> {
        let mut engine = SortEngine::new(state);
        engine
            .define_sort("price", SortDefinition::field("price"))
            .define_sort("name", SortDefinition::field("name").direction(SortDirection::Asc))
            .define_sort("newest", SortDefinition::field("created_at").direction(SortDirection::Desc))
            .define_sort(
                "rating",
                SortDefinition::field("rating")
                    .table("reviews")
                    .nulls(NullsOrder::Last)
                    .requires_join(JoinClause::new_on(
                        JoinType::Left,
                        "reviews",
                        SqlFragment::raw("reviews.product_id = products.id"),
                    )),
            );
        engine
    }

    #[test]
    fn test_sort_direction() {
        assert_eq!(SortDirection::Asc.to_sql(), "ASC");
        assert_eq!(SortDirection::Desc.reverse(), SortDirection::Asc);
        assert_eq!("DESC".parse::<SortDirection>().unwrap(), SortDirection::Desc);
        assert_eq!(
            "sideways".parse::<SortDirection>().unwrap_err(),
            QueryError::InvalidDirection("sideways".to_string())
        );
    }

    #[test]
    fn test_named_sorts_and_defaults() {
        let mut engine = catalog(products());
        engine.apply_sort("newest", None).apply_sort("price", Some("desc"));

        assert_eq!(
            engine.to_sql().0,
            "SELECT * FROM products ORDER BY created_at DESC, price DESC"
        );
        assert_eq!(engine.current_sorts().len(), 2);
        assert_eq!(engine.available_sorts(), vec!["name", "newest", "price", "rating"]);
    }

    #[test]
    fn test_invalid_direction_is_recorded() {
        let mut engine = catalog(products());
        engine.apply_sort("price", Some("upward")).apply_sort("name", None);

        assert_eq!(engine.to_sql().0, "SELECT * FROM products ORDER BY name ASC");
        assert_eq!(engine.errors(), &[QueryError::InvalidDirection("upward".to_string())]);
    }

    #[test]
    fn test_required_join_and_nulls() {
        let mut engine = catalog(products());
        engine.apply_sort("rating", Some("desc"));

        assert_eq!(
            engine.to_sql().0,
            "SELECT * FROM products LEFT JOIN reviews ON reviews.product_id = products.id \
             ORDER BY reviews.rating DESC NULLS LAST"
        );
    }

    #[test]
    fn test_nulls_emulated_on_mysql() {
        let mut engine = catalog(state_for("products", DialectKind::Mysql));
        engine.apply_sort("rating", Some("asc"));

        assert!(engine
            .to_sql()
            .0
            .ends_with("ORDER BY reviews.rating IS NULL ASC, reviews.rating ASC"));
    }

    #[test]
    fn test_sort_param() {
        let mut engine = catalog(products());
        engine.apply_sort_param("-price, name");
        assert_eq!(engine.to_sql().0, "SELECT * FROM products ORDER BY price DESC, name ASC");

        let mut engine = catalog(products());
        engine.set_default_sort("newest", Some("desc")).apply_sort_param("  ");
        assert_eq!(engine.to_sql().0, "SELECT * FROM products ORDER BY created_at DESC");
    }

    #[test]
    fn test_resorting_same_field_replaces() {
        let mut engine = catalog(products());
        engine
            .apply_sort("price", Some("asc"))
            .apply_sort("name", None)
            .apply_sort("price", Some("desc"));

        assert_eq!(engine.to_sql().0, "SELECT * FROM products ORDER BY price DESC, name ASC");
    }

    #[test]
    fn test_case_and_priority_sorts_bind_values() {
        let mut engine = SortEngine::new(products());
        engine.sort_by_case(
            vec![(SqlFragment::new("stock = ?", vec![json!(0)]).unwrap(), json!(2))],
            json!(1),
            SortDirection::Asc,
        );
        engine.sort_by_priority("status", vec![json!("featured"), json!("active")], SortDirection::Asc);

        let (sql, params) = engine.to_sql();
        assert_eq!(
            sql,
            "SELECT * FROM products ORDER BY CASE WHEN stock = $1 THEN $2 ELSE $3 END ASC, \
             CASE WHEN status = $4 THEN 0 WHEN status = $5 THEN 1 ELSE 2 END ASC"
        );
        assert_eq!(params, vec![json!(0), json!(2), json!(1), json!("featured"), json!("active")]);
    }

    #[test]
    fn test_aggregate_and_association_sorts() {
        let mut engine = SortEngine::new(products());
        engine
            .state_mut()
            .join(JoinType::Left, "reviews", None, Some("reviews.product_id = products.id"));
        engine
            .sort_by_aggregate("count", "reviews.id", SortDirection::Desc)
            .sort_by_association("categories", "category_id", "name", SortDirection::Asc)
            .sort_by_aggregate("median", "price", SortDirection::Asc);

        assert_eq!(
            engine.to_sql().0,
            "SELECT * FROM products LEFT JOIN reviews ON reviews.product_id = products.id \
             LEFT JOIN categories ON categories.id = products.category_id \
             GROUP BY products.id ORDER BY COUNT(reviews.id) DESC, categories.name ASC"
        );
        assert_eq!(engine.errors(), &[QueryError::InvalidFunction("median".to_string())]);
    }

    #[test]
    fn test_random_is_dialect_specific() {
        let mut engine = SortEngine::new(state_for("products", DialectKind::Mysql));
        engine.random();
        assert_eq!(engine.to_sql().0, "SELECT * FROM products ORDER BY RAND() ASC");
    }

    #[test]
    fn test_unknown_sort_recorded() {
        let mut engine = catalog(products());
        engine.apply_sort("popularity", None);
        assert_eq!(engine.errors(), &[QueryError::not_found("sort", "popularity")]);
        assert!(engine.state().order_terms().is_empty());
    }
}
