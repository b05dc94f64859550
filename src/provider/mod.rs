//! Local filesystem providers
//!
//! Each provider is a [`Handler`] registered under the type tag used in the
//! stack file. The [`Schema`] table tells the stack loader which fields hold
//! paths (expanded at load time) and which fields name another declaration
//! (turned into dependencies).

pub mod directory;
pub mod file;
pub mod symlink;

use anyhow::{Context, Result};
use reconcile::{Entry, HandlerRegistry, RegistryError, StepContext};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::PathBuf;

use crate::stack;

pub use directory::DirectoryProvider;
pub use file::FileProvider;
pub use symlink::SymlinkProvider;

/// A field that names another declaration by `name`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reference {
    pub field: &'static str,
    pub entry_type: &'static str,
}

/// Stack-level description of one provider's parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schema {
    pub entry_type: &'static str,
    /// Fields expanded as paths
    pub paths: &'static [&'static str],
    /// Fields that imply a dependency
    pub references: &'static [Reference],
}

pub const SCHEMAS: &[Schema] = &[
    Schema {
        entry_type: directory::TYPE,
        paths: &["path"],
        references: &[],
    },
    Schema {
        entry_type: file::TYPE,
        paths: &[],
        references: &[Reference {
            field: "directory",
            entry_type: directory::TYPE,
        }],
    },
    Schema {
        entry_type: symlink::TYPE,
        paths: &["link"],
        references: &[Reference {
            field: "file",
            entry_type: file::TYPE,
        }],
    },
];

/// Schema for a type tag, `None` for types no local provider handles
pub fn schema(entry_type: &str) -> Option<&'static Schema> {
    SCHEMAS.iter().find(|s| s.entry_type == entry_type)
}

/// Register every local provider
pub fn register_all(registry: &mut HandlerRegistry) -> Result<(), RegistryError> {
    registry.register(directory::TYPE, DirectoryProvider)?;
    registry.register(file::TYPE, FileProvider)?;
    registry.register(symlink::TYPE, SymlinkProvider)?;
    Ok(())
}

/// Deserialize an entry's parameters
pub(crate) fn params<T: DeserializeOwned>(entry: &Entry) -> Result<T> {
    serde_json::from_value(entry.parameters.clone()).with_context(|| {
        format!(
            "Invalid parameters for {} {}",
            entry.entry_type, entry.entry_id
        )
    })
}

/// A string field of a result value, read as a path
pub(crate) fn result_field(result: Option<&Value>, field: &str) -> Option<PathBuf> {
    result?.get(field)?.as_str().map(PathBuf::from)
}

/// `path` from the applied result of the dependency `<entry_type>.<name>`
pub(crate) fn dependency_path(ctx: &StepContext, entry_type: &str, name: &str) -> Result<PathBuf> {
    let id = stack::entry_id(entry_type, name);
    let result = ctx
        .dependency_result(&id)
        .with_context(|| format!("{entry_type} '{name}' has not been applied"))?;
    result_field(Some(result), "path")
        .with_context(|| format!("{entry_type} '{name}' result has no path"))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_all() {
        let mut registry = HandlerRegistry::new();
        register_all(&mut registry).unwrap();
        assert_eq!(registry.types(), ["directory", "file", "symlink"]);

        assert!(matches!(
            register_all(&mut registry),
            Err(RegistryError::DuplicateProvider { .. })
        ));
    }

    #[test]
    fn test_every_provider_has_a_schema() {
        let mut registry = HandlerRegistry::new();
        register_all(&mut registry).unwrap();
        for entry_type in registry.types() {
            assert!(schema(entry_type).is_some(), "{entry_type}");
        }
        assert!(schema("bucket").is_none());
    }

    #[test]
    fn test_schema_references_point_at_known_types() {
        for schema in SCHEMAS {
            for reference in schema.references {
                assert!(super::schema(reference.entry_type).is_some());
            }
        }
    }
}
