//! Static tool catalog loading.
//!
//! The catalog is a JSON document listing the tools a model may call. It is
//! attached verbatim to turns that carry no tools of their own, so the raw
//! document is kept alongside the typed entries.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{LabError, Result};

/// Where the catalog lives unless configured otherwise.
pub const DEFAULT_CATALOG_PATH: &str = "data/tool_catalogue.json";

/// One callable tool definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCatalogEntry {
    /// Tool name, as used in `tool_use` blocks.
    pub name: String,
    /// What the tool does.
    pub description: String,
    /// JSON schema of the tool's `input`.
    pub input_schema: Value,
}

/// Catalog document wrapping the entries under a `tools` key.
#[derive(Deserialize)]
struct WrappedCatalog {
    tools: Vec<ToolCatalogEntry>,
}

/// Loaded tool catalog. Read-only once loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCatalog {
    path: PathBuf,
    document: Value,
    entries: Vec<ToolCatalogEntry>,
}

impl ToolCatalog {
    /// Load the catalog from `path`.
    ///
    /// Accepts either a bare array of entries or an object with a `tools`
    /// array.
    ///
    /// # Errors
    ///
    /// Returns [`LabError::CatalogUnavailable`] if the file is missing, is not
    /// JSON, or does not hold catalog entries.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let unavailable = |reason: String| LabError::CatalogUnavailable {
            path: path.to_path_buf(),
            reason,
        };

        let content = std::fs::read_to_string(path).map_err(|e| unavailable(e.to_string()))?;
        let document: Value =
            serde_json::from_str(&content).map_err(|e| unavailable(format!("invalid JSON: {e}")))?;
        let entries = Self::parse_entries(&document).map_err(unavailable)?;

        tracing::debug!(
            "Loaded tool catalog from {} ({} tools)",
            path.display(),
            entries.len()
        );

        Ok(Self {
            path: path.to_path_buf(),
            document,
            entries,
        })
    }

    /// Load the catalog from [`DEFAULT_CATALOG_PATH`].
    ///
    /// # Errors
    ///
    /// See [`ToolCatalog::load`].
    pub fn load_default() -> Result<Self> {
        Self::load(DEFAULT_CATALOG_PATH)
    }

    fn parse_entries(document: &Value) -> std::result::Result<Vec<ToolCatalogEntry>, String> {
        match document {
            Value::Array(_) => Vec::<ToolCatalogEntry>::deserialize(document)
                .map_err(|e| format!("invalid tool entry: {e}")),
            Value::Object(map) if map.contains_key("tools") => WrappedCatalog::deserialize(document)
                .map(|wrapped| wrapped.tools)
                .map_err(|e| format!("invalid tool entry: {e}")),
            _ => Err("expected an array of tools or an object with a `tools` array".into()),
        }
    }

    /// Path the catalog was read from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The document exactly as read, for injection into prompts.
    #[must_use]
    pub fn document(&self) -> &Value {
        &self.document
    }

    /// Typed catalog entries, in document order.
    #[must_use]
    pub fn entries(&self) -> &[ToolCatalogEntry] {
        &self.entries
    }

    /// Tool names, in document order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.name.as_str())
    }

    /// Look up a tool by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ToolCatalogEntry> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    /// Number of tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the catalog lists no tools.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn shipped_catalog() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join(DEFAULT_CATALOG_PATH)
    }

    #[test]
    fn test_load_shipped_catalog() {
        let catalog = ToolCatalog::load(shipped_catalog()).unwrap();
        assert!(!catalog.is_empty());
        assert!(catalog.get("github_find_repositories").is_some());
        assert!(catalog.document().is_array());
        assert_eq!(catalog.names().count(), catalog.len());
    }

    #[test]
    fn test_load_is_idempotent() {
        let first = ToolCatalog::load(shipped_catalog()).unwrap();
        let second = ToolCatalog::load(shipped_catalog()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_load_wrapped_document() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(
            &path,
            r#"{"tools": [{"name": "search", "description": "Search", "input_schema": {"type": "object"}}]}"#,
        )
        .unwrap();

        let catalog = ToolCatalog::load(&path).unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.entries()[0].name, "search");
        assert!(catalog.document().get("tools").is_some());
    }

    #[test]
    fn test_document_keeps_key_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(
            &path,
            r#"[{"name": "z", "input_schema": {}, "description": "last key first"}]"#,
        )
        .unwrap();

        let catalog = ToolCatalog::load(&path).unwrap();
        let rendered = serde_json::to_string(catalog.document()).unwrap();
        assert!(rendered.find("input_schema").unwrap() < rendered.find("description").unwrap());
    }

    #[test]
    fn test_missing_catalog() {
        let result = ToolCatalog::load("/nonexistent/tool_catalogue.json");
        match result {
            Err(LabError::CatalogUnavailable { path, .. }) => {
                assert_eq!(path, PathBuf::from("/nonexistent/tool_catalogue.json"));
            }
            other => panic!("Expected CatalogUnavailable, got {other:?}"),
        }
    }

    #[test]
    fn test_unparseable_catalog() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(&path, "[{\"name\": ").unwrap();

        let result = ToolCatalog::load(&path);
        assert!(matches!(result, Err(LabError::CatalogUnavailable { .. })));
    }

    #[test]
    fn test_wrong_shape_catalog() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(&path, r#"{"name": "search"}"#).unwrap();
        assert!(matches!(
            ToolCatalog::load(&path),
            Err(LabError::CatalogUnavailable { .. })
        ));

        std::fs::write(&path, r#"[{"name": "search"}]"#).unwrap();
        assert!(matches!(
            ToolCatalog::load(&path),
            Err(LabError::CatalogUnavailable { .. })
        ));
    }
}
