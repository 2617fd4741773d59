//! Surface-name to canonical-name resolution.
//!
//! Three layers, first match wins: a curated static table (overrides for
//! known aliasing gaps in the graph), the graph's fulltext
//! `(name, aliases)` index, and finally the input itself. Resolution is
//! deterministic for a given table and store state.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::graph::GraphQuery;

/// Deterministic alias resolution over the static table and the graph
/// fulltext index.
pub struct AliasResolver {
    graph: Arc<dyn GraphQuery>,
    // Swapped wholesale on reload so readers never see a half-applied table.
    table: RwLock<Arc<HashMap<String, String>>>,
}

impl AliasResolver {
    pub fn new(graph: Arc<dyn GraphQuery>, table: HashMap<String, String>) -> Self {
        Self {
            graph,
            table: RwLock::new(Arc::new(table)),
        }
    }

    /// Load the static table from a JSON `{alias: canonical}` file. A
    /// missing path means an empty table.
    pub fn from_path(graph: Arc<dyn GraphQuery>, path: Option<&str>) -> Result<Self> {
        let table = match path {
            Some(p) => load_table(Path::new(p))?,
            None => HashMap::new(),
        };
        Ok(Self::new(graph, table))
    }

    /// Atomically replace the static table.
    pub async fn reload(&self, path: &str) -> Result<()> {
        let table = load_table(Path::new(path))?;
        *self.table.write().await = Arc::new(table);
        Ok(())
    }

    /// Map a surface name to its canonical name.
    ///
    /// Never fails: fulltext errors degrade to returning the input (or its
    /// static-table mapping) so that a flaky index cannot take down a tool
    /// call.
    pub async fn resolve(&self, name: &str) -> String {
        let table = self.table.read().await.clone();
        if let Some(canonical) = table.get(name) {
            tracing::debug!(alias = name, canonical = %canonical, "static alias mapping");
            return canonical.clone();
        }

        match self.graph.fulltext_lookup(name).await {
            Ok(hits) => {
                // Entries with populated aliases are curated seed entities;
                // prefer them over speculatively-extracted bare nodes at
                // the same Lucene rank.
                if let Some(hit) = hits.iter().find(|h| !h.aliases.is_empty()) {
                    return hit.name.clone();
                }
                if let Some(hit) = hits.first() {
                    return hit.name.clone();
                }
            }
            Err(e) => {
                tracing::warn!(alias = name, error = %e, "fulltext alias lookup failed");
            }
        }

        name.to_string()
    }

    /// Every name known to refer to the same entity as `name`: the input,
    /// its canonical, and all table aliases sharing that canonical. Used by
    /// the memory tool to build match-any filters, because chunks store
    /// surface names.
    pub async fn expand(&self, name: &str) -> Vec<String> {
        let mut names: Vec<String> = vec![name.to_string()];
        let push_unique = |names: &mut Vec<String>, candidate: String| {
            if !names.contains(&candidate) {
                names.push(candidate);
            }
        };

        let table = self.table.read().await.clone();
        if let Some(canonical) = table.get(name) {
            push_unique(&mut names, canonical.clone());
            for (alias, canon) in table.iter() {
                if canon == canonical {
                    push_unique(&mut names, alias.clone());
                }
            }
        } else {
            // `name` may itself be a canonical: collect aliases pointing at it.
            for (alias, canon) in table.iter() {
                if canon == name {
                    push_unique(&mut names, alias.clone());
                }
            }
        }

        if let Ok(hits) = self.graph.fulltext_lookup(name).await {
            if let Some(hit) = hits.iter().find(|h| !h.aliases.is_empty()).or(hits.first()) {
                push_unique(&mut names, hit.name.clone());
            }
        }

        // Stable output for a stable table: aliases from the map iterate in
        // arbitrary order, so sort everything after the original input.
        names[1..].sort();
        names
    }
}

fn load_table(path: &Path) -> Result<HashMap<String, String>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let raw = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read alias table {:?}: {}", path, e)))?;
    serde_json::from_str(&raw)
        .map_err(|e| Error::Config(format!("invalid alias table {:?}: {}", path, e)))
}
