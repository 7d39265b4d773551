//! Source map: bidirectional record between original expression text and
//! the CEL emitted for it.
//!
//! When CEL evaluation fails later in a cluster, the runtime error mapper
//! uses this map to point back at the author's original expression and
//! span. Append-only within one analysis.

use crate::context::CelDialect;
use crate::error::SourceSpan;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Freeform metadata carried per mapping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryMetadata {
    /// What kind of expression was converted: "reference", "template",
    /// "expression", "composite".
    pub expression_type: String,
    /// CEL paths of the references the conversion reads.
    pub kubernetes_refs: Vec<String>,
    /// Resource ids this conversion depends on.
    pub dependencies: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversion_notes: Option<String>,
}

/// One original→CEL mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMapEntry {
    pub original_expression: String,
    pub cel_expression: String,
    pub source_location: SourceSpan,
    pub context: CelDialect,
    pub metadata: EntryMetadata,
}

/// Bidirectional map from emitted CEL back to original source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceMap {
    #[serde(rename = "mappings")]
    entries: Vec<SourceMapEntry>,
    version: u32,
    /// Fast lookup by emitted CEL (not serialized).
    #[serde(skip)]
    cel_index: HashMap<String, usize>,
    /// Fast lookup by original expression (not serialized).
    #[serde(skip)]
    original_index: HashMap<String, usize>,
}

impl SourceMap {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            version: 1,
            cel_index: HashMap::new(),
            original_index: HashMap::new(),
        }
    }

    /// Rebuild the lookup indexes from the entries vector.
    fn rebuild_index(&mut self) {
        self.cel_index.clear();
        self.original_index.clear();
        for (idx, entry) in self.entries.iter().enumerate() {
            self.cel_index.insert(entry.cel_expression.clone(), idx);
            self.original_index
                .insert(entry.original_expression.clone(), idx);
        }
    }

    /// Record a mapping. A later mapping for the same CEL string replaces
    /// the earlier one.
    pub fn record(
        &mut self,
        original: impl Into<String>,
        cel: impl Into<String>,
        location: SourceSpan,
        context: CelDialect,
        metadata: EntryMetadata,
    ) {
        let entry = SourceMapEntry {
            original_expression: original.into(),
            cel_expression: cel.into(),
            source_location: location,
            context,
            metadata,
        };
        if let Some(&idx) = self.cel_index.get(&entry.cel_expression) {
            self.original_index.remove(&self.entries[idx].original_expression);
            self.original_index
                .insert(entry.original_expression.clone(), idx);
            self.entries[idx] = entry;
        } else {
            let idx = self.entries.len();
            self.cel_index.insert(entry.cel_expression.clone(), idx);
            self.original_index
                .insert(entry.original_expression.clone(), idx);
            self.entries.push(entry);
        }
    }

    pub fn push(&mut self, entry: SourceMapEntry) {
        self.record(
            entry.original_expression,
            entry.cel_expression,
            entry.source_location,
            entry.context,
            entry.metadata,
        );
    }

    pub fn extend(&mut self, entries: impl IntoIterator<Item = SourceMapEntry>) {
        for entry in entries {
            self.push(entry);
        }
    }

    /// Look up the mapping for an emitted CEL string. Falls back to a
    /// whitespace-normalized comparison when the exact string is absent.
    pub fn lookup_by_cel(&self, cel: &str) -> Option<&SourceMapEntry> {
        if let Some(&idx) = self.cel_index.get(cel) {
            return self.entries.get(idx);
        }
        let normalized = normalize(cel);
        self.entries
            .iter()
            .find(|entry| normalize(&entry.cel_expression) == normalized)
    }

    pub fn lookup_by_original(&self, original: &str) -> Option<&SourceMapEntry> {
        self.original_index
            .get(original)
            .and_then(|&idx| self.entries.get(idx))
    }

    pub fn entries(&self) -> &[SourceMapEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All mappings emitted for a given dialect.
    pub fn entries_for_dialect(&self, dialect: CelDialect) -> Vec<&SourceMapEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.context == dialect)
            .collect()
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let mut map: Self = serde_json::from_str(&json)?;
        map.rebuild_index();
        Ok(map)
    }
}

impl Default for SourceMap {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
