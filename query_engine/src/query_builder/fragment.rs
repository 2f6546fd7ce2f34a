use crate::errors::QueryError;
use serde_json::Value;

/// SQL text with `?` markers and the values bound to them, in order.
///
/// Markers inside single-quoted literals or double-quoted identifiers are
/// ignored; values never appear in the text itself.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlFragment {
    pub(crate) sql: String,
    pub(crate) params: Vec<Value>,
}

impl SqlFragment {
    /// Create a fragment, rejecting a marker/value count mismatch
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Result<Self, QueryError> {
        let sql = sql.into();
        let markers = count_markers(&sql);
        if markers != params.len() {
            return Err(QueryError::InvalidArgument(format!(
                "'{}' has {} placeholder(s) but {} value(s) were bound",
                sql,
                markers,
                params.len()
            )));
        }
        Ok(Self { sql, params })
    }

    /// Fragment without bound values
    pub fn raw(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Fragment with a single bound value, e.g. `price >= ?`
    pub(crate) fn bound(sql: impl Into<String>, value: Value) -> Self {
        Self {
            sql: sql.into(),
            params: vec![value],
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    pub fn into_parts(self) -> (String, Vec<Value>) {
        (self.sql, self.params)
    }

    /// Join fragments with `separator`, keeping parameter order
    pub fn join(fragments: Vec<SqlFragment>, separator: &str) -> SqlFragment {
        let mut sql = Vec::with_capacity(fragments.len());
        let mut params = Vec::new();
        for fragment in fragments {
            sql.push(fragment.sql);
            params.extend(fragment.params);
        }
        SqlFragment {
            sql: sql.join(separator),
            params,
        }
    }

    /// Wrap in parentheses
    pub fn grouped(self) -> SqlFragment {
        SqlFragment {
            sql: format!("({})", self.sql),
            params: self.params,
        }
    }

    pub(crate) fn push_str(&mut self, sql: &str) {
        self.sql.push_str(sql);
    }

    pub(crate) fn append(&mut self, other: SqlFragment) {
        self.sql.push_str(&other.sql);
        self.params.extend(other.params);
    }
}

/// A rendered statement usable as a derived table: `(<sql>) AS alias`
#[derive(Debug, Clone, PartialEq)]
pub struct Subquery {
    pub(crate) body: SqlFragment,
    pub(crate) alias: String,
}

impl Subquery {
    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn to_fragment(&self) -> SqlFragment {
        let mut fragment = SqlFragment::raw("(");
        fragment.append(self.body.clone());
        fragment.push_str(&format!(") AS {}", self.alias));
        fragment
    }
}

/// Count `?` markers outside quoted sections
pub(crate) fn count_markers(sql: &str) -> usize {
    let mut count = 0;
    scan_markers(sql, |_| count += 1);
    count
}

/// Visit the byte offset of every `?` marker outside quoted sections
pub(crate) fn scan_markers(sql: &str, mut on_marker: impl FnMut(usize)) {
    let mut in_single = false;
    let mut in_double = false;
    for (offset, c) in sql.char_indices() {
        match c {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            '?' if !in_single && !in_double => on_marker(offset),
            _ => {}
        }
    }
}
