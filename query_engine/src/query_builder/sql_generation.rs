//! Final SQL rendering
//!
//! Builders accumulate `?`-marked fragments; the dialect only gets involved
//! once, when the complete statement is numbered here.

use crate::dialect::DialectStrategy;
use crate::query_builder::fragment::{scan_markers, SqlFragment};
use serde_json::Value;

pub struct SqlGenerator;

impl SqlGenerator {
    /// Replace every marker with the dialect placeholder, numbering from 1
    pub fn number_placeholders(
        fragment: SqlFragment,
        dialect: &dyn DialectStrategy,
    ) -> (String, Vec<Value>) {
        let (sql, params) = fragment.into_parts();

        let mut offsets = Vec::with_capacity(params.len());
        scan_markers(&sql, |offset| offsets.push(offset));

        let mut numbered = String::with_capacity(sql.len() + offsets.len() * 2);
        let mut cursor = 0;
        for (index, offset) in offsets.into_iter().enumerate() {
            numbered.push_str(&sql[cursor..offset]);
            numbered.push_str(&dialect.placeholder(index + 1));
            cursor = offset + 1;
        }
        numbered.push_str(&sql[cursor..]);

        (numbered, params)
    }

    /// Build WHERE clause from AND-ed predicates
    pub fn build_where_clause(predicates: &[SqlFragment]) -> Option<SqlFragment> {
        Self::build_predicate_clause("WHERE", predicates)
    }

    /// Build HAVING clause from AND-ed predicates
    pub fn build_having_clause(predicates: &[SqlFragment]) -> Option<SqlFragment> {
        Self::build_predicate_clause("HAVING", predicates)
    }

    fn build_predicate_clause(keyword: &str, predicates: &[SqlFragment]) -> Option<SqlFragment> {
        if predicates.is_empty() {
            return None;
        }
        let mut clause = SqlFragment::raw(format!("{} ", keyword));
        clause.append(SqlFragment::join(predicates.to_vec(), " AND "));
        Some(clause)
    }

    /// Build GROUP BY clause
    pub fn build_group_by_clause(expressions: &[String]) -> Option<String> {
        if expressions.is_empty() {
            return None;
        }
        Some(format!("GROUP BY {}", expressions.join(", ")))
    }

    /// Build LIMIT/OFFSET clause
    pub fn build_limit_clause(
        limit: Option<u64>,
        offset: Option<u64>,
        dialect: &dyn DialectStrategy,
    ) -> Option<String> {
        let mut clauses = Vec::new();

        match (limit, offset, dialect.unbounded_limit()) {
            (Some(limit), _, _) => clauses.push(format!("LIMIT {}", limit)),
            (None, Some(_), Some(unbounded)) => clauses.push(format!("LIMIT {}", unbounded)),
            _ => {}
        }

        if let Some(offset) = offset {
            clauses.push(format!("OFFSET {}", offset));
        }

        if clauses.is_empty() {
            None
        } else {
            Some(clauses.join(" "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{MySqlDialect, PostgresDialect, SqliteDialect};
    use serde_json::json;

    #[test]
    fn test_number_placeholders_postgres() {
        let fragment = SqlFragment::new(
            "SELECT * FROM products WHERE status = ? AND price >= ?",
            vec![json!("active"), json!(100)],
        )
        .unwrap();

        let (sql, params) = SqlGenerator::number_placeholders(fragment, &PostgresDialect);
        assert_eq!(sql, "SELECT * FROM products WHERE status = $1 AND price >= $2");
        assert_eq!(params, vec![json!("active"), json!(100)]);
    }

    #[test]
    fn test_number_placeholders_keeps_question_marks_for_sqlite() {
        let fragment = SqlFragment::bound("name = ? OR note = 'why?'", json!("x"));
        let (sql, _) = SqlGenerator::number_placeholders(fragment, &SqliteDialect);
        assert_eq!(sql, "name = ? OR note = 'why?'");
    }

    #[test]
    fn test_literal_question_mark_is_not_numbered() {
        let fragment = SqlFragment::bound("note = 'why?' AND id = ?", json!(7));
        let (sql, _) = SqlGenerator::number_placeholders(fragment, &PostgresDialect);
        assert_eq!(sql, "note = 'why?' AND id = $1");
    }

    #[test]
    fn test_empty_clauses() {
        assert!(SqlGenerator::build_where_clause(&[]).is_none());
        assert!(SqlGenerator::build_group_by_clause(&[]).is_none());
        assert!(SqlGenerator::build_limit_clause(None, None, &PostgresDialect).is_none());
        assert_eq!(
            SqlGenerator::build_limit_clause(Some(10), Some(20), &SqliteDialect).unwrap(),
            "LIMIT 10 OFFSET 20"
        );
    }

    #[test]
    fn test_offset_without_limit() {
        assert_eq!(
            SqlGenerator::build_limit_clause(None, Some(5), &PostgresDialect).unwrap(),
            "OFFSET 5"
        );
        assert_eq!(
            SqlGenerator::build_limit_clause(None, Some(5), &SqliteDialect).unwrap(),
            "LIMIT -1 OFFSET 5"
        );
        assert_eq!(
            SqlGenerator::build_limit_clause(None, Some(5), &MySqlDialect).unwrap(),
            "LIMIT 18446744073709551615 OFFSET 5"
        );
    }
}
