//! SQL dialect strategies
//!
//! Everything that differs between database engines is answered here so the
//! builders never branch on the backend themselves.

use crate::query_builder::ordering::{NullsOrder, SortDirection};
use config::DialectKind;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Time bucket used by date grouping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DateBucket {
    Hour,
    Day,
    Week,
    Month,
    Year,
    DayOfWeek,
}

impl DateBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            DateBucket::Hour => "hour",
            DateBucket::Day => "day",
            DateBucket::Week => "week",
            DateBucket::Month => "month",
            DateBucket::Year => "year",
            DateBucket::DayOfWeek => "day_of_week",
        }
    }
}

impl FromStr for DateBucket {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hour" => Ok(DateBucket::Hour),
            "day" => Ok(DateBucket::Day),
            "week" => Ok(DateBucket::Week),
            "month" => Ok(DateBucket::Month),
            "year" => Ok(DateBucket::Year),
            "day_of_week" | "dow" => Ok(DateBucket::DayOfWeek),
            other => Err(format!("unknown date format '{}'", other)),
        }
    }
}

impl fmt::Display for DateBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend-specific SQL syntax
pub trait DialectStrategy: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    /// Placeholder for the 1-based parameter `index`
    fn placeholder(&self, index: usize) -> String;

    /// Expression truncating `expr` to the start of its `bucket`
    fn date_bucket(&self, bucket: DateBucket, expr: &str) -> String;

    fn random_function(&self) -> &'static str;

    /// Cast applied to aggregate results so they decode as floating point
    fn numeric_cast(&self, expr: &str) -> String;

    fn supports_nulls_ordering(&self) -> bool {
        true
    }

    fn supports_full_join(&self) -> bool {
        true
    }

    fn supports_distinct_on(&self) -> bool {
        false
    }

    /// LIMIT value meaning "no limit", for backends that reject a bare OFFSET
    fn unbounded_limit(&self) -> Option<&'static str> {
        None
    }

    /// Case-insensitive LIKE predicate for `field` against the next placeholder
    fn case_insensitive_like(&self, field: &str) -> String {
        format!("LOWER({}) LIKE LOWER(?)", field)
    }

    /// Wrap one member of a compound (UNION) statement
    fn union_member(&self, sql: &str) -> String {
        format!("({})", sql)
    }

    /// Render one ORDER BY term
    fn order_term(&self, expr: &str, direction: SortDirection, nulls: Option<NullsOrder>) -> String {
        match nulls {
            Some(nulls) if self.supports_nulls_ordering() => {
                format!("{} {} {}", expr, direction.to_sql(), nulls.to_sql())
            }
            Some(NullsOrder::First) => {
                format!("{} IS NULL DESC, {} {}", expr, expr, direction.to_sql())
            }
            Some(NullsOrder::Last) => {
                format!("{} IS NULL ASC, {} {}", expr, expr, direction.to_sql())
            }
            None => format!("{} {}", expr, direction.to_sql()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl DialectStrategy for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn date_bucket(&self, bucket: DateBucket, expr: &str) -> String {
        match bucket {
            DateBucket::DayOfWeek => format!("EXTRACT(DOW FROM {})", expr),
            other => format!("DATE_TRUNC('{}', {})", other.as_str(), expr),
        }
    }

    fn random_function(&self) -> &'static str {
        "RANDOM()"
    }

    fn numeric_cast(&self, expr: &str) -> String {
        format!("CAST({} AS DOUBLE PRECISION)", expr)
    }

    fn supports_distinct_on(&self) -> bool {
        true
    }

    fn case_insensitive_like(&self, field: &str) -> String {
        format!("{} ILIKE ?", field)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDialect;

impl DialectStrategy for MySqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn date_bucket(&self, bucket: DateBucket, expr: &str) -> String {
        match bucket {
            DateBucket::Hour => format!("DATE_FORMAT({}, '%Y-%m-%d %H:00:00')", expr),
            DateBucket::Day => format!("DATE({})", expr),
            DateBucket::Week => format!("DATE_SUB(DATE({}), INTERVAL WEEKDAY({}) DAY)", expr, expr),
            DateBucket::Month => format!("DATE_FORMAT({}, '%Y-%m-01')", expr),
            DateBucket::Year => format!("DATE_FORMAT({}, '%Y-01-01')", expr),
            DateBucket::DayOfWeek => format!("DAYOFWEEK({})", expr),
        }
    }

    fn random_function(&self) -> &'static str {
        "RAND()"
    }

    fn numeric_cast(&self, expr: &str) -> String {
        format!("CAST({} AS DOUBLE)", expr)
    }

    fn supports_nulls_ordering(&self) -> bool {
        false
    }

    fn supports_full_join(&self) -> bool {
        false
    }

    fn unbounded_limit(&self) -> Option<&'static str> {
        Some("18446744073709551615")
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl DialectStrategy for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn date_bucket(&self, bucket: DateBucket, expr: &str) -> String {
        match bucket {
            DateBucket::Hour => format!("STRFTIME('%Y-%m-%d %H:00:00', {})", expr),
            DateBucket::Day => format!("DATE({})", expr),
            DateBucket::Week => format!("DATE({}, 'weekday 0', '-6 days')", expr),
            DateBucket::Month => format!("STRFTIME('%Y-%m-01', {})", expr),
            DateBucket::Year => format!("STRFTIME('%Y-01-01', {})", expr),
            DateBucket::DayOfWeek => format!("CAST(STRFTIME('%w', {}) AS INTEGER)", expr),
        }
    }

    fn random_function(&self) -> &'static str {
        "RANDOM()"
    }

    fn numeric_cast(&self, expr: &str) -> String {
        format!("CAST({} AS REAL)", expr)
    }

    fn unbounded_limit(&self) -> Option<&'static str> {
        Some("-1")
    }

    // Compound members cannot be parenthesised in SQLite
    fn union_member(&self, sql: &str) -> String {
        format!("SELECT * FROM ({})", sql)
    }
}

/// Strategy for the configured backend
pub fn dialect_for(kind: DialectKind) -> Arc<dyn DialectStrategy> {
    match kind {
        DialectKind::Postgres => Arc::new(PostgresDialect),
        DialectKind::Mysql => Arc::new(MySqlDialect),
        DialectKind::Sqlite => Arc::new(SqliteDialect),
    }
}
