//! Named and ad-hoc WHERE predicates

use crate::errors::QueryError;
use crate::query_builder::engine::{impl_query_engine, Registry};
use crate::query_builder::fragment::SqlFragment;
use crate::query_builder::join::{JoinClause, JoinType};
use crate::query_builder::operation_log::{AppliedOperation, OperationKind};
use crate::query_builder::operator::FilterOperator;
use crate::query_builder::state::QueryState;
use crate::relation::Relation;
use crate::validation::{ValidatedFieldName, ValidatedTableName, ValidationError};
use chrono::{DateTime, NaiveDate};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

pub type Validator = Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;
pub type Transform = Arc<dyn Fn(Value) -> Value + Send + Sync>;
pub type CustomFilter<R> = Arc<dyn Fn(&mut QueryState<R>, &Value) + Send + Sync>;

/// How a definition turns a value into SQL
pub enum FilterBuilder<R: Relation> {
    Operator(FilterOperator),
    /// Full control over the state; nothing else is added
    Custom(CustomFilter<R>),
}

impl<R: Relation> Clone for FilterBuilder<R> {
    fn clone(&self) -> Self {
        match self {
            FilterBuilder::Operator(operator) => FilterBuilder::Operator(*operator),
            FilterBuilder::Custom(custom) => FilterBuilder::Custom(Arc::clone(custom)),
        }
    }
}

/// Reusable filter registered under a name
pub struct FilterDefinition<R: Relation> {
    pub field: String,
    pub table: Option<String>,
    pub builder: FilterBuilder<R>,
    pub validator: Option<Validator>,
    pub transform: Option<Transform>,
    operator_name: Option<String>,
}

impl<R: Relation> FilterDefinition<R> {
    /// Equality filter on `field`
    pub fn new(field: &str) -> Self {
        Self {
            field: field.to_string(),
            table: None,
            builder: FilterBuilder::Operator(FilterOperator::Eq),
            validator: None,
            transform: None,
            operator_name: None,
        }
    }

    pub fn custom<F>(builder: F) -> Self
    where
        F: Fn(&mut QueryState<R>, &Value) + Send + Sync + 'static,
    {
        Self {
            builder: FilterBuilder::Custom(Arc::new(builder)),
            ..Self::new("")
        }
    }

    pub fn table(mut self, table: &str) -> Self {
        self.table = Some(table.to_string());
        self
    }

    pub fn operator(mut self, operator: FilterOperator) -> Self {
        self.builder = FilterBuilder::Operator(operator);
        self.operator_name = None;
        self
    }

    /// Operator by name or symbol (`gte`, `>=`); checked when the filter is defined
    pub fn operator_name(mut self, name: &str) -> Self {
        self.operator_name = Some(name.to_string());
        self
    }

    pub fn validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.transform = Some(Arc::new(transform));
        self
    }

    fn is_custom(&self) -> bool {
        matches!(self.builder, FilterBuilder::Custom(_))
    }
}

impl<R: Relation> Clone for FilterDefinition<R> {
    fn clone(&self) -> Self {
        Self {
            field: self.field.clone(),
            table: self.table.clone(),
            builder: self.builder.clone(),
            validator: self.validator.clone(),
            transform: self.transform.clone(),
            operator_name: self.operator_name.clone(),
        }
    }
}

impl<R: Relation> fmt::Debug for FilterDefinition<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let builder = match &self.builder {
            FilterBuilder::Operator(operator) => operator.as_str(),
            FilterBuilder::Custom(_) => "custom",
        };
        f.debug_struct("FilterDefinition")
            .field("field", &self.field)
            .field("table", &self.table)
            .field("builder", &builder)
            .field("validator", &self.validator.is_some())
            .field("transform", &self.transform.is_some())
            .finish()
    }
}

/// One entry of a compound AND/OR condition
#[derive(Debug, Clone, PartialEq)]
pub struct FilterCondition {
    pub field: String,
    pub operator: FilterOperator,
    pub value: Value,
    pub table: Option<String>,
}

impl FilterCondition {
    pub fn new(field: &str, operator: FilterOperator, value: Value) -> Self {
        Self {
            field: field.to_string(),
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

/// Nothing to filter on: null, blank text, empty list or empty object
fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Filter construction over a [`QueryState`]
pub struct FilterEngine<R: Relation> {
    state: QueryState<R>,
    definitions: Registry<FilterDefinition<R>>,
    allowed_fields: Option<Vec<String>>,
}

impl_query_engine!(FilterEngine);

impl<R: Relation> FilterEngine<R> {
    pub fn new(state: QueryState<R>) -> Self {
        Self {
            state,
            definitions: Registry::new("filter"),
            allowed_fields: None,
        }
    }

    /// Restrict ad-hoc filtering to `fields`. Each allowed field also becomes an
    /// equality filter of the same name.
    pub fn with_allowed_fields(mut self, fields: &[&str]) -> Self {
        let mut allowed = Vec::with_capacity(fields.len());
        for field in fields {
            match ValidatedFieldName::new(field) {
                Ok(field) => allowed.push(field.into_string()),
                Err(err) => self.state.record_error(err.into()),
            }
        }
        for field in &allowed {
            if !self.definitions.contains(field) {
                let _ = self.definitions.register(field, FilterDefinition::new(field));
            }
        }
        self.allowed_fields = Some(allowed);
        self
    }

    pub fn define_filter(&mut self, name: &str, mut definition: FilterDefinition<R>) -> &mut Self {
        if !definition.is_custom() {
            if let Err(err) = ValidatedFieldName::qualified(definition.table.as_deref(), &definition.field) {
                self.state.record_error(err.into());
                return self;
            }
        }
        if let Some(operator) = definition.operator_name.take() {
            match operator.parse::<FilterOperator>() {
                Ok(operator) => definition.builder = FilterBuilder::Operator(operator),
                Err(err) => {
                    self.state.record_error(err);
                    return self;
                }
            }
        }
        if let Err(err) = self.definitions.register(name, definition) {
            self.state.record_error(err);
        }
        self
    }

    /// Apply a named filter. Blank values are ignored. An object value such as
    /// `{"gte": 100}` overrides the definition's operator.
    pub fn apply_filter(&mut self, name: &str, value: impl Into<Value>) -> &mut Self {
        let value = value.into();
        if is_blank(&value) {
            return self;
        }
        let definition = match self.definitions.get(name) {
            Ok(definition) => definition.clone(),
            Err(err) => {
                self.state.record_error(err);
                return self;
            }
        };

        if let Some(validator) = &definition.validator {
            if let Err(reason) = validator(&value) {
                self.state.record_error(QueryError::ValidationFailed {
                    name: name.to_string(),
                    reason,
                });
                return self;
            }
        }
        let value = match &definition.transform {
            Some(transform) => transform(value),
            None => value,
        };

        let operator = match &definition.builder {
            FilterBuilder::Custom(custom) => {
                let before = self.state.predicates().len();
                custom(&mut self.state, &value);
                let added = self.state.predicates()[before.min(self.state.predicates().len())..].to_vec();
                let (sql, values) = SqlFragment::join(added, " AND ").into_parts();
                self.state
                    .log_operation(AppliedOperation::new(OperationKind::Filter, name, sql, values));
                return self;
            }
            FilterBuilder::Operator(operator) => *operator,
        };

        let field = match ValidatedFieldName::qualified(definition.table.as_deref(), &definition.field) {
            Ok(field) => field.into_string(),
            Err(err) => {
                self.state.record_error(err.into());
                return self;
            }
        };

        match value {
            Value::Object(map) if operator != FilterOperator::Between => {
                for (operator, value) in map {
                    match operator.parse::<FilterOperator>() {
                        Ok(operator) => self.push_predicate(name, &field, operator, value),
                        Err(err) => self.state.record_error(err),
                    }
                }
            }
            value => self.push_predicate(name, &field, operator, value),
        }
        self
    }

    /// Apply each `(name, value)` pair on its own; failures are recorded and skipped
    pub fn apply_filters<I, K>(&mut self, filters: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: AsRef<str>,
    {
        for (name, value) in filters {
            self.apply_filter(name.as_ref(), value);
        }
        self
    }

    /// Ad-hoc predicate on a base-table field, subject to the allow-list
    pub fn filter_by(&mut self, field: &str, operator: FilterOperator, value: impl Into<Value>) -> &mut Self {
        let value = value.into();
        if is_blank(&value) && !matches!(operator, FilterOperator::Null | FilterOperator::NotNull) {
            return self;
        }
        match self.allowed_field(None, field) {
            Ok(field) => self.push_predicate(&field, &field, operator, value),
            Err(err) => self.state.record_error(err),
        }
        self
    }

    /// `field >= from AND field <= to`; either bound may be omitted.
    /// Bounds must be `YYYY-MM-DD` dates or RFC3339 timestamps.
    pub fn filter_date_range(
        &mut self,
        field: &str,
        from: Option<&str>,
        to: Option<&str>,
        table: Option<&str>,
    ) -> &mut Self {
        let field = match self.allowed_field(table, field) {
            Ok(field) => field,
            Err(err) => {
                self.state.record_error(err);
                return self;
            }
        };
        let bounds = [(from, FilterOperator::Gte), (to, FilterOperator::Lte)];
        for (bound, operator) in bounds {
            let Some(bound) = bound.map(str::trim).filter(|b| !b.is_empty()) else {
                continue;
            };
            let is_date = NaiveDate::parse_from_str(bound, "%Y-%m-%d").is_ok()
                || DateTime::parse_from_rfc3339(bound).is_ok();
            if !is_date {
                self.state.record_error(QueryError::InvalidArgument(format!(
                    "'{}' is not a date for range on '{}'",
                    bound, field
                )));
                continue;
            }
            self.push_predicate(&field, &field, operator, Value::String(bound.to_string()));
        }
        self
    }

    /// `field >= min AND field <= max`; bounds must be numbers
    pub fn filter_numeric_range(
        &mut self,
        field: &str,
        min: Option<Value>,
        max: Option<Value>,
        table: Option<&str>,
    ) -> &mut Self {
        let field = match self.allowed_field(table, field) {
            Ok(field) => field,
            Err(err) => {
                self.state.record_error(err);
                return self;
            }
        };
        for (bound, operator) in [(min, FilterOperator::Gte), (max, FilterOperator::Lte)] {
            match bound {
                None | Some(Value::Null) => {}
                Some(bound @ Value::Number(_)) => self.push_predicate(&field, &field, operator, bound),
                Some(other) => self.state.record_error(QueryError::InvalidArgument(format!(
                    "numeric range on '{}' got non-numeric bound {}",
                    field, other
                ))),
            }
        }
        self
    }

    /// `(f1 LIKE '%term%' OR f2 LIKE '%term%' ...)`
    pub fn search(&mut self, term: &str, fields: &[&str], case_insensitive: bool) -> &mut Self {
        let term = term.trim();
        if term.is_empty() || fields.is_empty() {
            return self;
        }
        let operator = if case_insensitive {
            FilterOperator::ILike
        } else {
            FilterOperator::Like
        };
        let pattern = Value::String(format!("%{}%", term));
        let mut predicates = Vec::with_capacity(fields.len());
        for field in fields {
            let field = match self.allowed_field(None, field) {
                Ok(field) => field,
                Err(err) => {
                    self.state.record_error(err);
                    return self;
                }
            };
            match operator.build_predicate(&field, pattern.clone(), self.state.dialect()) {
                Ok(predicate) => predicates.push(predicate),
                Err(err) => {
                    self.state.record_error(err);
                    return self;
                }
            }
        }
        let combined = SqlFragment::join(predicates, " OR ").grouped();
        self.push_fragment("search", combined);
        self
    }

    /// INNER JOIN a belongs-to association (`table.id = base.foreign_key`) and
    /// filter on one of its columns
    pub fn filter_association(
        &mut self,
        table: &str,
        foreign_key: &str,
        field: &str,
        operator: FilterOperator,
        value: impl Into<Value>,
    ) -> &mut Self {
        let value = value.into();
        if is_blank(&value) {
            return self;
        }
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
            .push_join(JoinClause::new_on(JoinType::Inner, table, SqlFragment::raw(on)));
        self.push_predicate(&column, &column, operator, value);
        self
    }

    /// All conditions must hold: `(c1 AND c2 ...)`
    pub fn and_conditions(&mut self, conditions: Vec<FilterCondition>) -> &mut Self {
        self.compound(conditions, " AND ")
    }

    /// Any condition may hold: `(c1 OR c2 ...)`
    pub fn or_conditions(&mut self, conditions: Vec<FilterCondition>) -> &mut Self {
        self.compound(conditions, " OR ")
    }

    fn compound(&mut self, conditions: Vec<FilterCondition>, separator: &str) -> &mut Self {
        let mut predicates = Vec::with_capacity(conditions.len());
        for condition in conditions {
            let built = self
                .allowed_field(condition.table.as_deref(), &condition.field)
                .and_then(|field| {
                    condition
                        .operator
                        .build_predicate(&field, condition.value, self.state.dialect())
                });
            match built {
                Ok(predicate) => predicates.push(predicate),
                Err(err) => self.state.record_error(err),
            }
        }
        if predicates.is_empty() {
            return self;
        }
        let name = separator.trim().to_ascii_lowercase();
        self.push_fragment(&name, SqlFragment::join(predicates, separator).grouped());
        self
    }

    pub fn available_filters(&self) -> Vec<&str> {
        self.definitions.names()
    }

    pub fn current_filters(&self) -> Vec<&AppliedOperation> {
        self.state.operations_of(OperationKind::Filter)
    }

    fn allowed_field(&self, table: Option<&str>, field: &str) -> Result<String, QueryError> {
        let qualified = ValidatedFieldName::qualified(table, field)?.into_string();
        if let Some(allowed) = &self.allowed_fields {
            let base_field = table.is_none() || table == Some(self.state.table_name());
            if base_field && !allowed.iter().any(|a| a == field || *a == qualified) {
                return Err(ValidationError::NotAllowed(qualified).into());
            }
        }
        Ok(qualified)
    }

    fn push_predicate(&mut self, name: &str, field: &str, operator: FilterOperator, value: Value) {
        match operator.build_predicate(field, value, self.state.dialect()) {
            Ok(predicate) => self.push_fragment(name, predicate),
            Err(err) => self.state.record_error(err),
        }
    }

    fn push_fragment(&mut self, name: &str, predicate: SqlFragment) {
        let (sql, values) = predicate.clone().into_parts();
        self.state.and_where_fragment(predicate);
        self.state
            .log_operation(AppliedOperation::new(OperationKind::Filter, name, sql, values));
    }
}
