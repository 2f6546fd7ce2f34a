//! GROUP BY construction, date and range bucketing, aggregate projections

use crate::dialect::DateBucket;
use crate::errors::QueryError;
use crate::query_builder::aggregation::AggregateFunction;
use crate::query_builder::engine::{impl_query_engine, Registry};
use crate::query_builder::fragment::SqlFragment;
use crate::query_builder::operation_log::{AppliedOperation, OperationKind};
use crate::query_builder::state::QueryState;
use crate::relation::Relation;
use crate::validation::{ValidatedFieldName, ValidatedTableName};
use serde_json::Value;

/// What a named group is computed from
#[derive(Debug, Clone, PartialEq)]
pub enum GroupTarget {
    Field(String),
    /// Trusted expression emitted verbatim
    Expression(String),
}

/// Reusable grouping registered under a name
#[derive(Debug, Clone, PartialEq)]
pub struct GroupDefinition {
    pub target: GroupTarget,
    pub table: Option<String>,
    pub alias: Option<String>,
    pub format: Option<DateBucket>,
}

impl GroupDefinition {
    pub fn field(field: &str) -> Self {
        Self {
            target: GroupTarget::Field(field.to_string()),
            table: None,
            alias: None,
            format: None,
        }
    }

    pub fn expression(expression: &str) -> Self {
        Self {
            target: GroupTarget::Expression(expression.to_string()),
            ..Self::field("")
        }
    }

    pub fn table(mut self, table: &str) -> Self {
        self.table = Some(table.to_string());
        self
    }

    pub fn alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.to_string());
        self
    }

    /// Truncate the field to a date bucket before grouping
    pub fn format(mut self, format: DateBucket) -> Self {
        self.format = Some(format);
        self
    }

    /// Grouped through a `SELECT expr AS alias` projection rather than a plain column
    fn is_projected(&self) -> bool {
        self.alias.is_some()
            || self.format.is_some()
            || matches!(self.target, GroupTarget::Expression(_))
    }
}

/// One bucket of a range grouping. Missing bounds are open-ended; `max` is exclusive.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeBucket {
    pub min: Option<Value>,
    pub max: Option<Value>,
    pub label: String,
}

impl RangeBucket {
    pub fn new(min: Option<Value>, max: Option<Value>, label: &str) -> Self {
        Self {
            min,
            max,
            label: label.to_string(),
        }
    }
}

/// GROUP BY and aggregate projections over a [`QueryState`]
pub struct GroupingEngine<R: Relation> {
    state: QueryState<R>,
    definitions: Registry<GroupDefinition>,
}

impl_query_engine!(GroupingEngine);

impl<R: Relation> GroupingEngine<R> {
    pub fn new(state: QueryState<R>) -> Self {
        Self {
            state,
            definitions: Registry::new("group"),
        }
    }

    pub fn define_group(&mut self, name: &str, definition: GroupDefinition) -> &mut Self {
        let checked = match &definition.target {
            GroupTarget::Field(field) => {
                ValidatedFieldName::qualified(definition.table.as_deref(), field).map(|_| ())
            }
            GroupTarget::Expression(_) => Ok(()),
        }
        .and_then(|_| match &definition.alias {
            Some(alias) => ValidatedTableName::new(alias).map(|_| ()),
            None => Ok(()),
        });
        if let Err(err) = checked {
            self.state.record_error(err.into());
            return self;
        }
        if let Err(err) = self.definitions.register(name, definition) {
            self.state.record_error(err);
        }
        self
    }

    /// Apply a named group: a `SELECT expr AS alias` + `GROUP BY alias` pair
    /// (alias defaults to `<name>_group`), or a direct `GROUP BY` on the column
    pub fn apply_group(&mut self, name: &str) -> &mut Self {
        let definition = match self.definitions.get(name) {
            Ok(definition) => definition.clone(),
            Err(err) => {
                self.state.record_error(err);
                return self;
            }
        };
        let base = match &definition.target {
            GroupTarget::Field(field) => {
                match ValidatedFieldName::qualified(definition.table.as_deref(), field) {
                    Ok(field) => field.into_string(),
                    Err(err) => {
                        self.state.record_error(err.into());
                        return self;
                    }
                }
            }
            GroupTarget::Expression(expression) => expression.clone(),
        };

        if !definition.is_projected() {
            self.push_group(name, &base, None);
            return self;
        }

        let expression = match definition.format {
            Some(format) => self.state.dialect().date_bucket(format, &base),
            None => base,
        };
        let alias = definition
            .alias
            .clone()
            .unwrap_or_else(|| format!("{}_group", name));
        self.push_group(name, &alias, Some(SqlFragment::raw(format!("{} AS {}", expression, alias))));
        self
    }

    /// Plain `GROUP BY column`
    pub fn group_by_field(&mut self, field: &str, table: Option<&str>) -> &mut Self {
        match ValidatedFieldName::qualified(table, field) {
            Ok(field) => {
                let field = field.into_string();
                self.push_group(&field, &field, None);
            }
            Err(err) => self.state.record_error(err.into()),
        }
        self
    }

    /// Group by `field` truncated to `format` (`hour`, `day`, `week`, `month`,
    /// `year`, `day_of_week`); alias defaults to `<field>_<format>`
    pub fn group_by_date(
        &mut self,
        field: &str,
        format: &str,
        alias: Option<&str>,
        table: Option<&str>,
    ) -> &mut Self {
        let format = match format.parse::<DateBucket>() {
            Ok(format) => format,
            Err(reason) => {
                self.state.record_error(QueryError::InvalidArgument(reason));
                return self;
            }
        };
        let column = match ValidatedFieldName::qualified(table, field) {
            Ok(column) => column.into_string(),
            Err(err) => {
                self.state.record_error(err.into());
                return self;
            }
        };
        let alias = match alias {
            Some(alias) => match ValidatedTableName::new(alias) {
                Ok(alias) => alias.into_string(),
                Err(err) => {
                    self.state.record_error(err.into());
                    return self;
                }
            },
            None => format!("{}_{}", column_name(field), format.as_str()),
        };
        let expression = self.state.dialect().date_bucket(format, &column);
        self.push_group(&column, &alias, Some(SqlFragment::raw(format!("{} AS {}", expression, alias))));
        self
    }

    /// Bucket `field` into labelled ranges (`min <= field < max`), grouping
    /// unmatched rows under `'Other'`. Bounds and labels are bound values.
    pub fn group_by_range(&mut self, field: &str, ranges: &[RangeBucket], table: Option<&str>) -> &mut Self {
        if ranges.is_empty() {
            self.state.record_error(QueryError::InvalidArgument(format!(
                "range grouping on '{}' needs at least one range",
                field
            )));
            return self;
        }
        let column = match ValidatedFieldName::qualified(table, field) {
            Ok(column) => column.into_string(),
            Err(err) => {
                self.state.record_error(err.into());
                return self;
            }
        };

        let mut case = SqlFragment::raw("CASE");
        for range in ranges {
            let mut bounds = Vec::new();
            if let Some(min) = &range.min {
                bounds.push(SqlFragment::bound(format!("{} >= ?", column), min.clone()));
            }
            if let Some(max) = &range.max {
                bounds.push(SqlFragment::bound(format!("{} < ?", column), max.clone()));
            }
            if bounds.is_empty() {
                bounds.push(SqlFragment::raw("1=1"));
            }
            case.push_str(" WHEN ");
            case.append(SqlFragment::join(bounds, " AND "));
            case.append(SqlFragment::bound(" THEN ?", Value::String(range.label.clone())));
        }
        let alias = format!("{}_range", column_name(field));
        case.push_str(&format!(" ELSE 'Other' END AS {}", alias));

        self.push_group(&column, &alias, Some(case));
        self
    }

    pub fn add_count(&mut self, field: &str, alias: Option<&str>, table: Option<&str>) -> &mut Self {
        self.add_aggregate(AggregateFunction::Count, field, alias, table)
    }

    pub fn add_count_distinct(&mut self, field: &str, alias: Option<&str>, table: Option<&str>) -> &mut Self {
        self.add_aggregate(AggregateFunction::CountDistinct, field, alias, table)
    }

    pub fn add_sum(&mut self, field: &str, alias: Option<&str>, table: Option<&str>) -> &mut Self {
        self.add_aggregate(AggregateFunction::Sum, field, alias, table)
    }

    pub fn add_avg(&mut self, field: &str, alias: Option<&str>, table: Option<&str>) -> &mut Self {
        self.add_aggregate(AggregateFunction::Avg, field, alias, table)
    }

    pub fn add_min(&mut self, field: &str, alias: Option<&str>, table: Option<&str>) -> &mut Self {
        self.add_aggregate(AggregateFunction::Min, field, alias, table)
    }

    pub fn add_max(&mut self, field: &str, alias: Option<&str>, table: Option<&str>) -> &mut Self {
        self.add_aggregate(AggregateFunction::Max, field, alias, table)
    }

    /// `FUNC(field) [AS alias]` by function name; unknown names are recorded
    pub fn aggregate(
        &mut self,
        function: &str,
        field: &str,
        alias: Option<&str>,
        table: Option<&str>,
    ) -> &mut Self {
        match function.parse::<AggregateFunction>() {
            Ok(function) => self.add_aggregate(function, field, alias, table),
            Err(err) => {
                self.state.record_error(err);
                self
            }
        }
    }

    fn add_aggregate(
        &mut self,
        function: AggregateFunction,
        field: &str,
        alias: Option<&str>,
        table: Option<&str>,
    ) -> &mut Self {
        let column = if field == "*" && function == AggregateFunction::Count {
            Ok("*".to_string())
        } else {
            ValidatedFieldName::qualified(table, field).map(|f| f.into_string())
        };
        let checked = column.and_then(|column| match alias {
            Some(alias) => ValidatedTableName::new(alias).map(|alias| (column, Some(alias.into_string()))),
            None => Ok((column, None)),
        });
        let (column, alias) = match checked {
            Ok(checked) => checked,
            Err(err) => {
                self.state.record_error(err.into());
                return self;
            }
        };
        let mut projection = function.apply(&column);
        if let Some(alias) = alias {
            projection = format!("{} AS {}", projection, alias);
        }
        self.state.push_projection(SqlFragment::raw(projection));
        self
    }

    pub fn available_groups(&self) -> Vec<&str> {
        self.definitions.names()
    }

    pub fn current_groups(&self) -> Vec<&AppliedOperation> {
        self.state.operations_of(OperationKind::Group)
    }

    fn push_group(&mut self, name: &str, group_expression: &str, projection: Option<SqlFragment>) {
        let logged = match &projection {
            Some(projection) => {
                let mut logged = projection.clone();
                logged.push_str(&format!(" GROUP BY {}", group_expression));
                logged
            }
            None => SqlFragment::raw(format!("GROUP BY {}", group_expression)),
        };
        if let Some(projection) = projection {
            self.state.push_projection(projection);
        }
        self.state.group_by(group_expression);
        let (sql, values) = logged.into_parts();
        self.state
            .log_operation(AppliedOperation::new(OperationKind::Group, name, sql, values));
    }
}

/// Column part of a possibly qualified field, for default aliases
fn column_name(field: &str) -> &str {
    field.rsplit_once('.').map_or(field, |(_, column)| column)
}
