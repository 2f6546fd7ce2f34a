use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// Which builder applied an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Filter,
    Sort,
    Join,
    Group,
    Having,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::Filter => "filter",
            OperationKind::Sort => "sort",
            OperationKind::Join => "join",
            OperationKind::Group => "group",
            OperationKind::Having => "having",
        };
        f.write_str(name)
    }
}

/// One filter/sort/join/group/having that actually reached the query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppliedOperation {
    pub kind: OperationKind,
    /// Definition name, or the field/table for ad-hoc operations
    pub name: String,
    /// SQL that was added, with `?` markers
    pub sql: String,
    pub values: Vec<Value>,
}

impl AppliedOperation {
    pub fn new(kind: OperationKind, name: impl Into<String>, sql: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            kind,
            name: name.into(),
            sql: sql.into(),
            values,
        }
    }
}
