//! Stack files
//!
//! A stack is a TOML file with one array of tables per resource type. Every
//! declaration has a `name` unique within its type and may list extra
//! dependencies as `depends_on = ["type.name", ...]`. All other keys become the
//! entry's parameters.
//!
//! ```toml
//! [[directory]]
//! name = "site"
//! path = "~/www/site"
//!
//! [[file]]
//! name = "index"
//! directory = "site"
//! filename = "index.html"
//! content = "<h1>hi</h1>"
//! ```
//!
//! Fields the provider schema marks as paths are expanded (`~`, `$VAR`) and
//! resolved against the stack file's directory. Fields marked as references
//! (`file.directory`, `symlink.file`) add a dependency on the named
//! declaration.

use anyhow::{Context, Result};
use reconcile::{Entry, Graph, GraphError};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::{paths, provider};

/// Stable entry id for a declaration: first 16 hex chars of `blake3("<type>:<name>")`
pub fn entry_id(entry_type: &str, name: &str) -> String {
    let hash = blake3::hash(format!("{entry_type}:{name}").as_bytes());
    hash.to_hex()[..16].to_string()
}

/// Split `type.name`
pub fn split_reference(reference: &str) -> Option<(&str, &str)> {
    reference
        .split_once('.')
        .filter(|(t, n)| !t.is_empty() && !n.is_empty())
}

/// Id for `type.name`, or the input unchanged when it is not a reference
pub fn resolve_id(reference: &str) -> String {
    match split_reference(reference) {
        Some((entry_type, name)) => entry_id(entry_type, name),
        None => reference.to_string(),
    }
}

#[derive(Debug, Error)]
pub enum StackError {
    #[error("'{entry_type}' must be an array of tables ([[{entry_type}]])")]
    NotATableArray { entry_type: String },

    #[error("{entry_type} #{index} has no string 'name'")]
    MissingName { entry_type: String, index: usize },

    #[error("{entry_type}.{name} is declared more than once")]
    DuplicateName { entry_type: String, name: String },

    #[error("{entry_type}.{name}: '{field}' must be {expected}")]
    InvalidField {
        entry_type: String,
        name: String,
        field: String,
        expected: &'static str,
    },

    #[error("{entry_type}.{name}: invalid reference '{reference}', expected type.name")]
    InvalidReference {
        entry_type: String,
        name: String,
        reference: String,
    },

    #[error("{entry_type}.{name} depends on {reference}, which is not declared")]
    UnknownReference {
        entry_type: String,
        name: String,
        reference: String,
    },

    #[error("{entry_type}.{name}: parameters are not representable as JSON")]
    Parameters {
        entry_type: String,
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

/// One declared resource
#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    pub entry_type: String,
    pub name: String,
    /// Referenced declarations as `type.name`, implicit ones first
    pub depends_on: Vec<String>,
    pub parameters: serde_json::Map<String, Value>,
}

impl Declaration {
    pub fn entry_id(&self) -> String {
        entry_id(&self.entry_type, &self.name)
    }

    /// `type.name`
    pub fn label(&self) -> String {
        format!("{}.{}", self.entry_type, self.name)
    }

    fn invalid_field(&self, field: &str, expected: &'static str) -> StackError {
        StackError::InvalidField {
            entry_type: self.entry_type.clone(),
            name: self.name.clone(),
            field: field.to_string(),
            expected,
        }
    }
}

/// Parsed stack file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stack {
    declarations: Vec<Declaration>,
}

impl Stack {
    /// Load a stack file; relative paths resolve against its directory
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read stack file: {}", path.display()))?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let stack = Self::parse(&content, base_dir)
            .with_context(|| format!("Invalid stack file: {}", path.display()))?;
        log::debug!(
            "Loaded {} declarations from {}",
            stack.len(),
            path.display()
        );
        Ok(stack)
    }

    pub fn parse(content: &str, base_dir: &Path) -> Result<Self> {
        let table: toml::Table = toml::from_str(content).context("Failed to parse TOML")?;
        Ok(Self::from_table(table, base_dir)?)
    }

    fn from_table(table: toml::Table, base_dir: &Path) -> Result<Self, StackError> {
        let mut declarations = Vec::new();
        let mut seen = BTreeSet::new();

        for (entry_type, value) in table {
            let toml::Value::Array(items) = value else {
                return Err(StackError::NotATableArray { entry_type });
            };
            for (index, item) in items.into_iter().enumerate() {
                let toml::Value::Table(fields) = item else {
                    return Err(StackError::NotATableArray { entry_type });
                };
                let declaration = declaration(&entry_type, index, fields, base_dir)?;
                if !seen.insert(declaration.label()) {
                    return Err(StackError::DuplicateName {
                        entry_type: declaration.entry_type,
                        name: declaration.name,
                    });
                }
                declarations.push(declaration);
            }
        }

        for declaration in &declarations {
            if let Some(reference) = declaration.depends_on.iter().find(|r| !seen.contains(*r)) {
                return Err(StackError::UnknownReference {
                    entry_type: declaration.entry_type.clone(),
                    name: declaration.name.clone(),
                    reference: reference.clone(),
                });
            }
        }

        Ok(Self { declarations })
    }

    pub fn declarations(&self) -> &[Declaration] {
        &self.declarations
    }

    /// Find a declaration by `type.name`
    #[cfg(test)]
    pub fn find(&self, reference: &str) -> Option<&Declaration> {
        self.declarations().iter().find(|d| d.label() == reference)
    }

    pub fn len(&self) -> usize {
        self.declarations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }

    /// Target graph for this stack
    pub fn to_graph(&self) -> Result<Graph, GraphError> {
        let mut graph = Graph::new();
        for declaration in &self.declarations {
            graph.attach(Entry::new(
                declaration.entry_type.as_str(),
                declaration.entry_id(),
                Value::Object(declaration.parameters.clone()),
            ));
        }
        for declaration in &self.declarations {
            let from = declaration.entry_id();
            for reference in &declaration.depends_on {
                graph.link_dependency(&from, &resolve_id(reference))?;
            }
        }
        Ok(graph)
    }
}

fn declaration(
    entry_type: &str,
    index: usize,
    mut fields: toml::Table,
    base_dir: &Path,
) -> Result<Declaration, StackError> {
    let Some(name) = fields.get("name").and_then(toml::Value::as_str) else {
        return Err(StackError::MissingName {
            entry_type: entry_type.to_string(),
            index,
        });
    };
    let mut declaration = Declaration {
        entry_type: entry_type.to_string(),
        name: name.to_string(),
        depends_on: Vec::new(),
        parameters: serde_json::Map::new(),
    };

    let explicit = match fields.remove("depends_on") {
        None => Vec::new(),
        Some(toml::Value::Array(items)) => items
            .iter()
            .map(|item| item.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| declaration.invalid_field("depends_on", "an array of strings"))?,
        Some(_) => return Err(declaration.invalid_field("depends_on", "an array of strings")),
    };

    if let Some(schema) = provider::schema(entry_type) {
        for field in schema.paths {
            let Some(value) = fields.get_mut(*field) else {
                continue;
            };
            let Some(raw) = value.as_str() else {
                return Err(declaration.invalid_field(field, "a string path"));
            };
            *value = toml::Value::String(resolve_path(raw, base_dir).to_string_lossy().into_owned());
        }
        for reference in schema.references {
            let Some(value) = fields.get(reference.field) else {
                continue;
            };
            let Some(target) = value.as_str() else {
                return Err(declaration.invalid_field(reference.field, "the name of a declaration"));
            };
            declaration
                .depends_on
                .push(format!("{}.{}", reference.entry_type, target));
        }
    }

    for reference in explicit {
        if split_reference(&reference).is_none() {
            return Err(StackError::InvalidReference {
                entry_type: declaration.entry_type,
                name: declaration.name,
                reference,
            });
        }
        if !declaration.depends_on.contains(&reference) {
            declaration.depends_on.push(reference);
        }
    }

    declaration.parameters = match serde_json::to_value(&fields) {
        Ok(Value::Object(map)) => map,
        Ok(_) => serde_json::Map::new(),
        Err(source) => {
            return Err(StackError::Parameters {
                entry_type: declaration.entry_type,
                name: declaration.name,
                source,
            });
        }
    };
    Ok(declaration)
}

fn resolve_path(raw: &str, base_dir: &Path) -> PathBuf {
    let expanded = paths::expand(raw);
    if expanded.is_absolute() {
        expanded
    } else {
        base_dir.join(expanded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SITE: &str = r#"
[[directory]]
name = "site"
path = "www/site"

[[file]]
name = "index"
directory = "site"
filename = "index.html"
content = "<h1>hi</h1>"

[[symlink]]
name = "current"
file = "index"
link = "/srv/current.html"
depends_on = ["directory.site"]
"#;

    fn parse(content: &str) -> Result<Stack> {
        Stack::parse(content, Path::new("/stacks"))
    }

    #[test]
    fn test_entry_id_is_stable() {
        let id = entry_id("file", "index");
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(id, entry_id("file", "index"));
        assert_ne!(id, entry_id("directory", "index"));
        assert_eq!(resolve_id("file.index"), id);
        assert_eq!(resolve_id(&id), id);
    }

    #[test]
    fn test_parse_site() {
        let stack = parse(SITE).unwrap();
        assert_eq!(stack.len(), 3);

        let dir = stack.find("directory.site").unwrap();
        assert_eq!(dir.parameters["path"], json!("/stacks/www/site"));
        assert_eq!(dir.parameters["name"], json!("site"));

        let file = stack.find("file.index").unwrap();
        assert_eq!(file.depends_on, ["directory.site"]);

        let link = stack.find("symlink.current").unwrap();
        assert_eq!(link.depends_on, ["file.index", "directory.site"]);
        assert!(!link.parameters.contains_key("depends_on"));
    }

    #[test]
    fn test_to_graph() {
        let graph = parse(SITE).unwrap().to_graph().unwrap();
        assert_eq!(graph.len(), 3);

        let link = graph.get(&entry_id("symlink", "current")).unwrap();
        assert_eq!(link.entry_type, "symlink");
        assert_eq!(
            link.dependencies,
            [entry_id("file", "index"), entry_id("directory", "site")]
        );
        assert!(reconcile::hydrate(&graph).is_ok());
    }

    #[test]
    fn test_duplicate_name() {
        let err = parse("[[directory]]\nname = \"a\"\npath = \"/a\"\n[[directory]]\nname = \"a\"\npath = \"/b\"\n")
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StackError>(),
            Some(StackError::DuplicateName { .. })
        ));
    }

    #[test]
    fn test_unknown_reference() {
        let err = parse("[[file]]\nname = \"f\"\ndirectory = \"missing\"\nfilename = \"a\"\n").unwrap_err();
        assert_eq!(
            err.to_string(),
            "file.f depends on directory.missing, which is not declared"
        );
    }

    #[test]
    fn test_invalid_depends_on() {
        let err = parse("[[directory]]\nname = \"a\"\npath = \"/a\"\ndepends_on = [\"nodot\"]\n").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StackError>(),
            Some(StackError::InvalidReference { .. })
        ));

        let err = parse("[[directory]]\nname = \"a\"\npath = \"/a\"\ndepends_on = \"directory.b\"\n").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StackError>(),
            Some(StackError::InvalidField { .. })
        ));
    }

    #[test]
    fn test_missing_name_and_bad_shape() {
        let err = parse("[[directory]]\npath = \"/a\"\n").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StackError>(),
            Some(StackError::MissingName { index: 0, .. })
        ));

        let err = parse("version = 2\n").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StackError>(),
            Some(StackError::NotATableArray { .. })
        ));
    }

    #[test]
    fn test_unknown_type_passes_through() {
        let stack = parse("[[bucket]]\nname = \"assets\"\nregion = \"eu\"\n").unwrap();
        let graph = stack.to_graph().unwrap();
        let entry = graph.get(&entry_id("bucket", "assets")).unwrap();
        assert_eq!(entry.parameters, json!({"name": "assets", "region": "eu"}));
    }

    #[test]
    fn test_load_resolves_relative_to_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("keel.toml");
        fs::write(&path, "[[directory]]\nname = \"out\"\npath = \"out\"\n").unwrap();

        let stack = Stack::load(&path).unwrap();
        assert_eq!(
            stack.find("directory.out").unwrap().parameters["path"],
            json!(tmp.path().join("out"))
        );

        let missing = Stack::load(&tmp.path().join("nope.toml")).unwrap_err();
        assert!(missing.to_string().contains("Failed to read stack file"));
    }
}
