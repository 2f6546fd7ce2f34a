use crate::errors::QueryError;
use crate::query_builder::aggregation::AggregateFunction;
use crate::query_builder::engine::{impl_query_engine, Registry};
use crate::query_builder::fragment::{count_markers, SqlFragment};
use crate::query_builder::operation_log::{AppliedOperation, OperationKind};
use crate::query_builder::operator::FilterOperator;
use crate::query_builder::state::QueryState;
use crate::relation::Relation;
use crate::validation::ValidatedFieldName;
use serde_json::Value;

/// Left-hand side of a HAVING predicate
#[derive(Debug, Clone, PartialEq)]
pub enum HavingTarget {
    Aggregate {
        function: AggregateFunction,
        field: String,
        table: Option<String>,
    },
    /// Trusted expression; any `?` markers in it receive the applied value
    Expression(String),
}

/// Reusable aggregate predicate registered under a name
#[derive(Debug, Clone, PartialEq)]
pub struct HavingDefinition {
    pub target: HavingTarget,
    pub operator: FilterOperator,
}

impl HavingDefinition {
    pub fn aggregate(function: AggregateFunction, field: &str) -> Self {
        Self {
            target: HavingTarget::Aggregate {
                function,
                field: field.to_string(),
                table: None,
            },
            operator: FilterOperator::Eq,
        }
    }

    pub fn expression(expression: &str) -> Self {
        Self {
            target: HavingTarget::Expression(expression.to_string()),
            operator: FilterOperator::Eq,
        }
    }

    pub fn table(mut self, table: &str) -> Self {
        if let HavingTarget::Aggregate { table: slot, .. } = &mut self.target {
            *slot = Some(table.to_string());
        }
        self
    }

    pub fn operator(mut self, operator: FilterOperator) -> Self {
        self.operator = operator;
        self
    }
}

/// One entry of a compound HAVING predicate
#[derive(Debug, Clone, PartialEq)]
pub struct HavingCondition {
    pub field: String,
    pub function: Option<AggregateFunction>,
    pub operator: FilterOperator,
    pub value: Value,
    pub table: Option<String>,
}

impl HavingCondition {
    pub fn new(function: Option<AggregateFunction>, field: &str, operator: FilterOperator, value: Value) -> Self {
        Self {
            field: field.to_string(),
            function,
            operator,
            value,
            table: None,
        }
    }

    pub fn table(mut self, table: &str) -> Self {
        self.table = Some(table.to_string());
        self
    }
}

/// `FUNC(field)`, with `*` accepted for COUNT
fn aggregate_expression(
    function: AggregateFunction,
    field: &str,
    table: Option<&str>,
) -> Result<String, QueryError> {
    if field == "*" && function == AggregateFunction::Count {
        return Ok(function.apply("*"));
    }
    let field = ValidatedFieldName::qualified(table, field)?;
    Ok(function.apply(field.as_str()))
}

/// Bind `value` into an expression's markers: an array supplies one value per
/// marker, anything else is repeated for every marker
fn bind_expression(expression: &str, value: Value) -> Result<SqlFragment, QueryError> {
    let markers = count_markers(expression);
    let params = match value {
        Value::Array(values) if values.len() == markers => values,
        Value::Array(values) if markers > 1 => {
            return Err(QueryError::InvalidArgument(format!(
                "'{}' expects {} values, got {}",
                expression,
                markers,
                values.len()
            )))
        }
        value => vec![value; markers],
    };
    SqlFragment::new(expression, params)
}

/// Aggregate predicates over a grouped [`QueryState`]
pub struct HavingEngine<R: Relation> {
    state: QueryState<R>,
    definitions: Registry<HavingDefinition>,
}

impl_query_engine!(HavingEngine);

impl<R: Relation> HavingEngine<R> {
    pub fn new(state: QueryState<R>) -> Self {
        Self {
            state,
            definitions: Registry::new("having"),
        }
    }

    pub fn define_having(&mut self, name: &str, definition: HavingDefinition) -> &mut Self {
        if let HavingTarget::Aggregate { function, field, table } = &definition.target {
            if let Err(err) = aggregate_expression(*function, field, table.as_deref()) {
                self.state.record_error(err);
                return self;
            }
        }
        if let Err(err) = self.definitions.register(name, definition) {
            self.state.record_error(err);
        }
        self
    }

    /// Apply a named predicate. Expression definitions with `?` markers bind
    /// `value` into them; otherwise the operator compares the left-hand side
    /// with `value`.
    pub fn apply_having(&mut self, name: &str, value: impl Into<Value>) -> &mut Self {
        let value = value.into();
        let definition = match self.definitions.get(name) {
            Ok(definition) => definition.clone(),
            Err(err) => {
                self.state.record_error(err);
                return self;
            }
        };
        let predicate = match &definition.target {
            HavingTarget::Aggregate { function, field, table } => {
                aggregate_expression(*function, field, table.as_deref()).and_then(|lhs| {
                    definition
                        .operator
                        .build_predicate(&lhs, value, self.state.dialect())
                })
            }
            HavingTarget::Expression(expression) if count_markers(expression) > 0 => {
                bind_expression(expression, value)
            }
            HavingTarget::Expression(expression) => {
                definition
                    .operator
                    .build_predicate(expression, value, self.state.dialect())
            }
        };
        self.push(name, predicate);
        self
    }

    pub fn having_count(&mut self, field: &str, operator: FilterOperator, value: impl Into<Value>) -> &mut Self {
        self.having_aggregate(AggregateFunction::Count, field, operator, value.into(), None)
    }

    pub fn having_sum(&mut self, field: &str, operator: FilterOperator, value: impl Into<Value>) -> &mut Self {
        self.having_aggregate(AggregateFunction::Sum, field, operator, value.into(), None)
    }

    pub fn having_avg(&mut self, field: &str, operator: FilterOperator, value: impl Into<Value>) -> &mut Self {
        self.having_aggregate(AggregateFunction::Avg, field, operator, value.into(), None)
    }

    pub fn having_min(&mut self, field: &str, operator: FilterOperator, value: impl Into<Value>) -> &mut Self {
        self.having_aggregate(AggregateFunction::Min, field, operator, value.into(), None)
    }

    pub fn having_max(&mut self, field: &str, operator: FilterOperator, value: impl Into<Value>) -> &mut Self {
        self.having_aggregate(AggregateFunction::Max, field, operator, value.into(), None)
    }

    /// Predicate over an aggregate chosen by name (`count`, `sum`, ...)
    pub fn having_function(
        &mut self,
        function: &str,
        field: &str,
        operator: FilterOperator,
        value: impl Into<Value>,
        table: Option<&str>,
    ) -> &mut Self {
        match function.parse::<AggregateFunction>() {
            Ok(function) => self.having_aggregate(function, field, operator, value.into(), table),
            Err(err) => {
                self.state.record_error(err);
                self
            }
        }
    }

    /// `(c1 AND c2 ...)`
    pub fn having_and(&mut self, conditions: Vec<HavingCondition>) -> &mut Self {
        self.compound(conditions, " AND ")
    }

    /// `(c1 OR c2 ...)`
    pub fn having_or(&mut self, conditions: Vec<HavingCondition>) -> &mut Self {
        self.compound(conditions, " OR ")
    }

    /// Trusted predicate text; values only through `params`
    pub fn having_raw(&mut self, sql: &str, params: Vec<Value>) -> &mut Self {
        let predicate = SqlFragment::new(sql, params);
        self.push("raw", predicate);
        self
    }

    pub fn available_havings(&self) -> Vec<&str> {
        self.definitions.names()
    }

    pub fn current_havings(&self) -> Vec<&AppliedOperation> {
        self.state.operations_of(OperationKind::Having)
    }

    fn having_aggregate(
        &mut self,
        function: AggregateFunction,
        field: &str,
        operator: FilterOperator,
        value: Value,
        table: Option<&str>,
    ) -> &mut Self {
        let predicate = aggregate_expression(function, field, table)
            .and_then(|lhs| operator.build_predicate(&lhs, value, self.state.dialect()));
        let name = format!("{}_{}", function.alias_prefix(), field.replace('*', "all"));
        self.push(&name, predicate);
        self
    }

    fn compound(&mut self, conditions: Vec<HavingCondition>, separator: &str) -> &mut Self {
        let mut predicates = Vec::with_capacity(conditions.len());
        for condition in conditions {
            let lhs = match condition.function {
                Some(function) => aggregate_expression(function, &condition.field, condition.table.as_deref()),
                None => ValidatedFieldName::qualified(condition.table.as_deref(), &condition.field)
                    .map(|field| field.into_string())
                    .map_err(QueryError::from),
            };
            let predicate = lhs.and_then(|lhs| {
                condition
                    .operator
                    .build_predicate(&lhs, condition.value, self.state.dialect())
            });
            match predicate {
                Ok(predicate) => predicates.push(predicate),
                Err(err) => self.state.record_error(err),
            }
        }
        if !predicates.is_empty() {
            let name = separator.trim().to_ascii_lowercase();
            self.push(&name, Ok(SqlFragment::join(predicates, separator).grouped()));
        }
        self
    }

    fn push(&mut self, name: &str, predicate: Result<SqlFragment, QueryError>) {
        let predicate = match predicate {
            Ok(predicate) => predicate,
            Err(err) => {
                self.state.record_error(err);
                return;
            }
        };
        if self.state.group_by_expressions().is_empty() {
            self.state
                .record_warning(format!("HAVING '{}' applied to an ungrouped query", name));
        }
        let (sql, values) = predicate.clone().into_parts();
        self.state.push_having(predicate);
        self.state
            .log_operation(AppliedOperation::new(OperationKind::Having, name, sql, values));
    }
}
