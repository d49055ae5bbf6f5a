//! Import map parsing and resolution.
//!
//! Only the `imports` table is supported. Keys ending in `/` are prefix
//! rules, every other key is an exact rule. Resolution is a single pass:
//! the value a rule produces is never fed back through the map.

use crate::error::ConfigError;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A parsed import map.
///
/// Rule order is the order of the JSON document, which decides between
/// overlapping prefix rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportMap {
    #[serde(default)]
    pub imports: IndexMap<String, String>,
}

impl ImportMap {
    /// Build a map from `(key, value)` pairs, keeping their order.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            imports: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Parse an import map document.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Read and parse an import map file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| {
            ConfigError::ImportMapRead {
                path: path.to_path_buf(),
                source,
            }
        })?;
        Self::from_json(&contents).map_err(|source| ConfigError::ImportMapParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Whether the map has no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.imports.is_empty()
    }

    /// Rewrite a specifier through the map.
    ///
    /// An exact rule wins over any prefix rule. Otherwise the first prefix
    /// rule (in document order) that the specifier starts with replaces that
    /// prefix. `None` means no rule applies.
    #[must_use]
    pub fn resolve(&self, specifier: &str) -> Option<String> {
        if let Some(value) = self.imports.get(specifier) {
            if !specifier.ends_with('/') {
                return Some(value.clone());
            }
        }

        self.imports
            .iter()
            .filter(|(key, _)| key.ends_with('/'))
            .find(|(key, _)| specifier.starts_with(key.as_str()))
            .map(|(key, value)| format!("{value}{}", &specifier[key.len()..]))
    }
}
