//! Comparison operators shared by WHERE and HAVING predicates

use crate::dialect::DialectStrategy;
use crate::errors::QueryError;
use crate::query_builder::fragment::SqlFragment;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Query condition operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FilterOperator {
    #[default]
    Eq, // =
    NotEq,      // !=
    Lt,         // <
    Lte,        // <=
    Gt,         // >
    Gte,        // >=
    Like,       // LIKE
    NotLike,    // NOT LIKE
    ILike,      // ILIKE or LOWER() LIKE LOWER()
    In,         // IN
    NotIn,      // NOT IN
    Between,    // BETWEEN ? AND ?
    Null,       // IS NULL
    NotNull,    // IS NOT NULL
    StartsWith, // LIKE 'v%'
    EndsWith,   // LIKE '%v'
    Contains,   // LIKE '%v%'
}

impl FilterOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOperator::Eq => "eq",
            FilterOperator::NotEq => "not_eq",
            FilterOperator::Lt => "lt",
            FilterOperator::Lte => "lte",
            FilterOperator::Gt => "gt",
            FilterOperator::Gte => "gte",
            FilterOperator::Like => "like",
            FilterOperator::NotLike => "not_like",
            FilterOperator::ILike => "ilike",
            FilterOperator::In => "in",
            FilterOperator::NotIn => "not_in",
            FilterOperator::Between => "between",
            FilterOperator::Null => "null",
            FilterOperator::NotNull => "not_null",
            FilterOperator::StartsWith => "starts_with",
            FilterOperator::EndsWith => "ends_with",
            FilterOperator::Contains => "contains",
        }
    }

    /// Build a parameter-bound predicate comparing `field` with `value`.
    ///
    /// `field` is interpolated verbatim and must already be trusted.
    pub fn build_predicate(
        &self,
        field: &str,
        value: Value,
        dialect: &dyn DialectStrategy,
    ) -> Result<SqlFragment, QueryError> {
        let fragment = match self {
            FilterOperator::Eq if value.is_null() => SqlFragment::raw(format!("{} IS NULL", field)),
            FilterOperator::NotEq if value.is_null() => {
                SqlFragment::raw(format!("{} IS NOT NULL", field))
            }
            FilterOperator::Eq => SqlFragment::bound(format!("{} = ?", field), value),
            FilterOperator::NotEq => SqlFragment::bound(format!("{} != ?", field), value),
            FilterOperator::Lt => SqlFragment::bound(format!("{} < ?", field), value),
            FilterOperator::Lte => SqlFragment::bound(format!("{} <= ?", field), value),
            FilterOperator::Gt => SqlFragment::bound(format!("{} > ?", field), value),
            FilterOperator::Gte => SqlFragment::bound(format!("{} >= ?", field), value),
            FilterOperator::Like => SqlFragment::bound(format!("{} LIKE ?", field), value),
            FilterOperator::NotLike => SqlFragment::bound(format!("{} NOT LIKE ?", field), value),
            FilterOperator::ILike => SqlFragment::bound(dialect.case_insensitive_like(field), value),
            FilterOperator::StartsWith => SqlFragment::bound(
                format!("{} LIKE ?", field),
                Value::String(format!("{}%", text_of(&value))),
            ),
            FilterOperator::EndsWith => SqlFragment::bound(
                format!("{} LIKE ?", field),
                Value::String(format!("%{}", text_of(&value))),
            ),
            FilterOperator::Contains => SqlFragment::bound(
                format!("{} LIKE ?", field),
                Value::String(format!("%{}%", text_of(&value))),
            ),
            FilterOperator::In => Self::list_predicate(field, "IN", "1=0", value),
            FilterOperator::NotIn => Self::list_predicate(field, "NOT IN", "1=1", value),
            FilterOperator::Between => match value {
                Value::Array(bounds) if bounds.len() == 2 => SqlFragment {
                    sql: format!("{} BETWEEN ? AND ?", field),
                    params: bounds,
                },
                other => {
                    return Err(QueryError::InvalidArgument(format!(
                        "between on '{}' expects exactly two values, got {}",
                        field, other
                    )))
                }
            },
            FilterOperator::Null => SqlFragment::raw(format!("{} IS NULL", field)),
            FilterOperator::NotNull => SqlFragment::raw(format!("{} IS NOT NULL", field)),
        };
        Ok(fragment)
    }

    fn list_predicate(field: &str, keyword: &str, when_empty: &str, value: Value) -> SqlFragment {
        let values = match value {
            Value::Array(values) => values,
            single => vec![single],
        };
        if values.is_empty() {
            return SqlFragment::raw(when_empty);
        }
        let placeholders = vec!["?"; values.len()].join(", ");
        SqlFragment {
            sql: format!("{} {} ({})", field, keyword, placeholders),
            params: values,
        }
    }
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl FromStr for FilterOperator {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let operator = match s.trim().to_ascii_lowercase().as_str() {
            "eq" | "=" | "==" => FilterOperator::Eq,
            "not_eq" | "ne" | "!=" | "<>" => FilterOperator::NotEq,
            "lt" | "<" => FilterOperator::Lt,
            "lte" | "<=" => FilterOperator::Lte,
            "gt" | ">" => FilterOperator::Gt,
            "gte" | ">=" => FilterOperator::Gte,
            "like" => FilterOperator::Like,
            "not_like" => FilterOperator::NotLike,
            "ilike" => FilterOperator::ILike,
            "in" => FilterOperator::In,
            "not_in" => FilterOperator::NotIn,
            "between" => FilterOperator::Between,
            "null" | "is_null" => FilterOperator::Null,
            "not_null" | "is_not_null" => FilterOperator::NotNull,
            "starts_with" => FilterOperator::StartsWith,
            "ends_with" => FilterOperator::EndsWith,
            "contains" => FilterOperator::Contains,
            _ => return Err(QueryError::InvalidOperator(s.to_string())),
        };
        Ok(operator)
    }
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{PostgresDialect, SqliteDialect};
    use serde_json::json;

    fn build(op: FilterOperator, value: Value) -> SqlFragment {
        op.build_predicate("price", value, &PostgresDialect).unwrap()
    }

    #[test]
    fn test_comparison_operators_bind_values() {
        let fragment = build(FilterOperator::Gte, json!(100));
        assert_eq!(fragment.sql(), "price >= ?");
        assert_eq!(fragment.params(), &[json!(100)]);

        assert_eq!(build(FilterOperator::NotEq, json!(1)).sql(), "price != ?");
        assert_eq!(build(FilterOperator::Lt, json!(1)).sql(), "price < ?");
    }

    #[test]
    fn test_eq_null_becomes_is_null() {
        assert_eq!(build(FilterOperator::Eq, Value::Null).sql(), "price IS NULL");
        assert_eq!(build(FilterOperator::NotEq, Value::Null).sql(), "price IS NOT NULL");
        assert!(build(FilterOperator::Null, json!(true)).params().is_empty());
    }

    #[test]
    fn test_in_and_empty_lists() {
        let fragment = build(FilterOperator::In, json!([1, 2, 3]));
        assert_eq!(fragment.sql(), "price IN (?, ?, ?)");
        assert_eq!(fragment.params().len(), 3);

        assert_eq!(build(FilterOperator::In, json!([])).sql(), "1=0");
        assert_eq!(build(FilterOperator::NotIn, json!([])).sql(), "1=1");
        assert_eq!(build(FilterOperator::In, json!(5)).sql(), "price IN (?)");
    }

    #[test]
    fn test_between_requires_two_values() {
        let fragment = build(FilterOperator::Between, json!([10, 20]));
        assert_eq!(fragment.sql(), "price BETWEEN ? AND ?");

        for bad in [json!([1]), json!([1, 2, 3]), json!(5)] {
            let err = FilterOperator::Between
                .build_predicate("price", bad, &PostgresDialect)
                .unwrap_err();
            assert!(matches!(err, QueryError::InvalidArgument(_)));
        }
    }

    #[test]
    fn test_pattern_operators() {
        let fragment = build(FilterOperator::Contains, json!("phone"));
        assert_eq!(fragment.sql(), "price LIKE ?");
        assert_eq!(fragment.params(), &[json!("%phone%")]);
        assert_eq!(build(FilterOperator::StartsWith, json!("a")).params(), &[json!("a%")]);

        assert_eq!(build(FilterOperator::ILike, json!("%a%")).sql(), "price ILIKE ?");
        let sqlite = FilterOperator::ILike
            .build_predicate("name", json!("%a%"), &SqliteDialect)
            .unwrap();
        assert_eq!(sqlite.sql(), "LOWER(name) LIKE LOWER(?)");
    }

    #[test]
    fn test_parse_operator_names() {
        assert_eq!("gte".parse::<FilterOperator>().unwrap(), FilterOperator::Gte);
        assert_eq!(">=".parse::<FilterOperator>().unwrap(), FilterOperator::Gte);
        assert_eq!("NOT_IN".parse::<FilterOperator>().unwrap(), FilterOperator::NotIn);
        assert_eq!(
            "approximately".parse::<FilterOperator>().unwrap_err(),
            QueryError::InvalidOperator("approximately".to_string())
        );
    }
}
