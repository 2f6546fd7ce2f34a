//! Identifier validation
//!
//! Field, table and alias names are interpolated into SQL text, so every name
//! that does not come from a registered definition passes through here first.

use std::fmt;

/// Validation errors for SQL identifiers
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Name contains invalid characters (only alphanumeric and underscore allowed)
    InvalidCharacters(String),
    /// Name is too long (PostgreSQL limit is 63 characters)
    TooLong {
        name: String,
        length: usize,
        max_length: usize,
    },
    /// Name is empty
    Empty,
    /// Name starts with invalid character (must start with letter or underscore)
    InvalidStartCharacter(String),
    /// Name is a reserved SQL keyword
    ReservedKeyword(String),
    /// Identifier is not in the caller's allow-list
    NotAllowed(String),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::InvalidCharacters(name) => {
                write!(f, "Invalid characters in name '{}': only alphanumeric characters and underscores are allowed", name)
            }
            ValidationError::TooLong {
                name,
                length,
                max_length,
            } => {
                write!(
                    f,
                    "Name '{}' is too long: {} characters (max {})",
                    name, length, max_length
                )
            }
            ValidationError::Empty => {
                write!(f, "Name cannot be empty")
            }
            ValidationError::InvalidStartCharacter(name) => {
                write!(f, "Name '{}' must start with a letter or underscore", name)
            }
            ValidationError::ReservedKeyword(name) => {
                write!(f, "Name '{}' is a reserved SQL keyword", name)
            }
            ValidationError::NotAllowed(name) => {
                write!(f, "Name '{}' is not in the list of allowed fields", name)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// A validated table name (or alias) that is safe to use in SQL queries
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ValidatedTableName(String);

impl ValidatedTableName {
    /// PostgreSQL identifier length limit
    const MAX_LENGTH: usize = 63;

    /// Create a new validated table name
    pub fn new(name: &str) -> Result<Self, ValidationError> {
        Self::validate_identifier(name)?;
        Ok(Self(name.to_string()))
    }

    /// Get the validated name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Get the validated name as a String
    pub fn into_string(self) -> String {
        self.0
    }

    /// Common validation logic for SQL identifiers
    fn validate_identifier(name: &str) -> Result<(), ValidationError> {
        if name.is_empty() {
            return Err(ValidationError::Empty);
        }

        if name.len() > Self::MAX_LENGTH {
            return Err(ValidationError::TooLong {
                name: name.to_string(),
                length: name.len(),
                max_length: Self::MAX_LENGTH,
            });
        }

        let first_char = name.chars().next().ok_or(ValidationError::Empty)?;
        if !first_char.is_ascii_alphabetic() && first_char != '_' {
            return Err(ValidationError::InvalidStartCharacter(name.to_string()));
        }

        if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(ValidationError::InvalidCharacters(name.to_string()));
        }

        if Self::is_reserved_keyword(name) {
            return Err(ValidationError::ReservedKeyword(name.to_string()));
        }

        Ok(())
    }

    /// Check if a name is a reserved SQL keyword
    fn is_reserved_keyword(name: &str) -> bool {
        const RESERVED_KEYWORDS: &[&str] = &[
            "SELECT",
            "INSERT",
            "UPDATE",
            "DELETE",
            "FROM",
            "WHERE",
            "JOIN",
            "INNER",
            "LEFT",
            "RIGHT",
            "FULL",
            "OUTER",
            "CROSS",
            "ON",
            "USING",
            "AS",
            "AND",
            "OR",
            "NOT",
            "NULL",
            "TRUE",
            "FALSE",
            "CASE",
            "WHEN",
            "THEN",
            "ELSE",
            "END",
            "EXISTS",
            "IN",
            "IS",
            "LIKE",
            "ILIKE",
            "BETWEEN",
            "ORDER",
            "BY",
            "GROUP",
            "HAVING",
            "LIMIT",
            "OFFSET",
            "UNION",
            "INTERSECT",
            "EXCEPT",
            "ALL",
            "DISTINCT",
            "CREATE",
            "DROP",
            "ALTER",
            "TABLE",
            "INDEX",
            "VIEW",
            "DATABASE",
            "SCHEMA",
            "PRIMARY",
            "FOREIGN",
            "REFERENCES",
            "UNIQUE",
            "CHECK",
            "DEFAULT",
            "CONSTRAINT",
            "GRANT",
            "REVOKE",
            "TRUNCATE",
            "RETURNING",
            "WITH",
            "RECURSIVE",
            "LATERAL",
            "WINDOW",
            "OVER",
            "PARTITION",
            "FETCH",
        ];

        RESERVED_KEYWORDS.contains(&name.to_ascii_uppercase().as_str())
    }
}

impl fmt::Display for ValidatedTableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A validated column reference, optionally qualified as `table.column`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ValidatedFieldName(String);

impl ValidatedFieldName {
    /// Create a new validated field name
    pub fn new(name: &str) -> Result<Self, ValidationError> {
        match name.split_once('.') {
            Some((table, column)) => {
                ValidatedTableName::validate_identifier(table)?;
                ValidatedTableName::validate_identifier(column)?;
            }
            None => ValidatedTableName::validate_identifier(name)?,
        }
        Ok(Self(name.to_string()))
    }

    /// Validate `field` and qualify it with `table` when one is given
    pub fn qualified(table: Option<&str>, field: &str) -> Result<Self, ValidationError> {
        match table {
            Some(table) => {
                ValidatedTableName::validate_identifier(table)?;
                ValidatedTableName::validate_identifier(field)?;
                Ok(Self(format!("{}.{}", table, field)))
            }
            None => Self::new(field),
        }
    }

    /// Get the validated name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Get the validated name as a String
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ValidatedFieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Utility functions for validation
pub mod utils {
    use super::*;

    /// Check if a string is a valid table name without creating a ValidatedTableName
    pub fn is_valid_table_name(name: &str) -> bool {
        ValidatedTableName::new(name).is_ok()
    }

    /// Check if a string is a valid field name without creating a ValidatedFieldName
    pub fn is_valid_field_name(name: &str) -> bool {
        ValidatedFieldName::new(name).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_table_names() {
        let valid_names = [
            "users",
            "user_profiles",
            "UserProfiles",
            "_private_table",
            "table123",
            "a",
            &"a".repeat(63), // Max length
        ];

        for name in valid_names {
            assert!(
                ValidatedTableName::new(name).is_ok(),
                "Should accept valid name: {}",
                name
            );
        }
    }

    #[test]
    fn test_invalid_table_names() {
        let test_cases = [
            ("", ValidationError::Empty),
            (
                "123table",
                ValidationError::InvalidStartCharacter("123table".to_string()),
            ),
            (
                "user-name",
                ValidationError::InvalidCharacters("user-name".to_string()),
            ),
            (
                "users; DROP TABLE users",
                ValidationError::InvalidCharacters("users; DROP TABLE users".to_string()),
            ),
            (
                "select",
                ValidationError::ReservedKeyword("select".to_string()),
            ),
        ];

        for (name, expected_error) in test_cases {
            let result = ValidatedTableName::new(name);
            assert_eq!(result.unwrap_err(), expected_error, "name: {}", name);
        }
    }

    #[test]
    fn test_too_long_name() {
        let long_name = "a".repeat(64);
        match ValidatedTableName::new(&long_name).unwrap_err() {
            ValidationError::TooLong {
                length, max_length, ..
            } => {
                assert_eq!(length, 64);
                assert_eq!(max_length, 63);
            }
            other => panic!("Expected TooLong error, got {:?}", other),
        }
    }

    #[test]
    fn test_qualified_field_names() {
        assert_eq!(
            ValidatedFieldName::new("orders.total").unwrap().as_str(),
            "orders.total"
        );
        assert!(ValidatedFieldName::new("orders.").is_err());
        assert!(ValidatedFieldName::new("orders.total.cents").is_err());
        assert!(ValidatedFieldName::new("price)--").is_err());

        let qualified = ValidatedFieldName::qualified(Some("products"), "price").unwrap();
        assert_eq!(qualified.to_string(), "products.price");
        assert!(ValidatedFieldName::qualified(Some("products"), "where").is_err());
    }

    #[test]
    fn test_utility_functions() {
        assert!(utils::is_valid_table_name("users"));
        assert!(!utils::is_valid_table_name("SELECT"));
        assert!(utils::is_valid_field_name("created_at"));
        assert!(!utils::is_valid_field_name("123field"));
    }
}
