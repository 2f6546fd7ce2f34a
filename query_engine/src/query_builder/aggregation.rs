use crate::errors::QueryError;
use std::str::FromStr;

/// Represents SQL aggregate functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateFunction {
    /// COUNT(*) or COUNT(field)
    Count,
    /// SUM(field)
    Sum,
    /// AVG(field)
    Avg,
    /// MIN(field)
    Min,
    /// MAX(field)
    Max,
    /// COUNT(DISTINCT field)
    CountDistinct,
}

impl AggregateFunction {
    /// Convert aggregate function to SQL string
    pub fn to_sql(&self) -> &'static str {
        match self {
            AggregateFunction::Count => "COUNT",
            AggregateFunction::Sum => "SUM",
            AggregateFunction::Avg => "AVG",
            AggregateFunction::Min => "MIN",
            AggregateFunction::Max => "MAX",
            AggregateFunction::CountDistinct => "COUNT",
        }
    }

    /// Check if this is a DISTINCT aggregate
    pub fn is_distinct(&self) -> bool {
        matches!(self, AggregateFunction::CountDistinct)
    }

    /// Lower-case name used for default aliases (`count_id`, `sum_total`)
    pub fn alias_prefix(&self) -> &'static str {
        match self {
            AggregateFunction::Count => "count",
            AggregateFunction::Sum => "sum",
            AggregateFunction::Avg => "avg",
            AggregateFunction::Min => "min",
            AggregateFunction::Max => "max",
            AggregateFunction::CountDistinct => "count_distinct",
        }
    }

    /// Render the call over an already validated `field` (`*` allowed for COUNT)
    pub fn apply(&self, field: &str) -> String {
        if self.is_distinct() {
            format!("{}(DISTINCT {})", self.to_sql(), field)
        } else {
            format!("{}({})", self.to_sql(), field)
        }
    }
}

impl FromStr for AggregateFunction {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "count" => Ok(AggregateFunction::Count),
            "sum" => Ok(AggregateFunction::Sum),
            "avg" | "average" => Ok(AggregateFunction::Avg),
            "min" | "minimum" => Ok(AggregateFunction::Min),
            "max" | "maximum" => Ok(AggregateFunction::Max),
            "count_distinct" => Ok(AggregateFunction::CountDistinct),
            _ => Err(QueryError::InvalidFunction(s.to_string())),
        }
    }
}
