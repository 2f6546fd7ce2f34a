//! Pieces shared by every builder: access to the wrapped state and the
//! registry of named definitions.

use crate::errors::QueryError;
use crate::query_builder::state::QueryState;
use crate::relation::Relation;
use serde_json::Value;
use std::collections::BTreeMap;

/// A builder that wraps and mutates one [`QueryState`]
pub trait QueryEngine<R: Relation> {
    fn state(&self) -> &QueryState<R>;

    fn state_mut(&mut self) -> &mut QueryState<R>;

    /// Hand the state on to the next builder
    fn into_state(self) -> QueryState<R>;

    fn to_sql(&self) -> (String, Vec<Value>) {
        self.state().to_sql()
    }

    fn errors(&self) -> &[QueryError] {
        self.state().errors()
    }
}

macro_rules! impl_query_engine {
    ($engine:ident) => {
        impl<R: $crate::relation::Relation> $crate::query_builder::engine::QueryEngine<R> for $engine<R> {
            fn state(&self) -> &$crate::query_builder::state::QueryState<R> {
                &self.state
            }

            fn state_mut(&mut self) -> &mut $crate::query_builder::state::QueryState<R> {
                &mut self.state
            }

            fn into_state(self) -> $crate::query_builder::state::QueryState<R> {
                self.state
            }
        }
    };
}

pub(crate) use impl_query_engine;

/// Named definitions of one kind. A name can be registered only once.
#[derive(Debug, Clone)]
pub struct Registry<D> {
    kind: &'static str,
    entries: BTreeMap<String, D>,
}

impl<D> Registry<D> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, name: &str, definition: D) -> Result<(), QueryError> {
        if self.entries.contains_key(name) {
            return Err(QueryError::duplicate(self.kind, name));
        }
        self.entries.insert(name.to_string(), definition);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&D, QueryError> {
        self.entries
            .get(name)
            .ok_or_else(|| QueryError::not_found(self.kind, name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_rejects_redefinition() {
        let mut registry = Registry::new("filter");
        registry.register("status", 1).unwrap();

        let err = registry.register("status", 2).unwrap_err();
        assert_eq!(err, QueryError::duplicate("filter", "status"));
        assert_eq!(*registry.get("status").unwrap(), 1);
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = Registry::new("sort");
        registry.register("price", ()).unwrap();
        registry.register("name", ()).unwrap();

        assert_eq!(registry.names(), vec!["name", "price"]);
        assert!(registry.contains("price"));
        assert_eq!(
            registry.get("missing").unwrap_err(),
            QueryError::not_found("sort", "missing")
        );
    }
}
