//! Graph persistence: nodes, edges, and metadata under `graph_data/`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use mnemos_types::{Timestamp, now};

use crate::atomic::save_json_atomic;
use crate::error::Result;

const NODES_FILE: &str = "graph_nodes.json";
const EDGES_FILE: &str = "graph_edges.json";
const METADATA_FILE: &str = "graph_metadata.json";

/// Summary counts rewritten on every graph persist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphMetadata {
    pub node_count: usize,
    pub edge_count: usize,
    pub last_updated: Timestamp,
}

impl GraphMetadata {
    /// Fresh metadata stamped with the current time.
    pub fn new(node_count: usize, edge_count: usize) -> Self {
        Self {
            node_count,
            edge_count,
            last_updated: now(),
        }
    }
}

/// JSON persistence for the knowledge graph.
///
/// The store is generic over the node and edge representations; the graph
/// manager owns the concrete types and is the only writer.
pub struct GraphStore {
    dir: PathBuf,
}

impl GraphStore {
    /// Open (or create) the graph data directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    fn load_or<T: DeserializeOwned>(path: &Path, empty: T) -> Result<T> {
        if !path.exists() {
            return Ok(empty);
        }
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Load all nodes keyed by node ID.
    pub fn load_nodes<N: DeserializeOwned>(&self) -> Result<BTreeMap<String, N>> {
        Self::load_or(&self.path(NODES_FILE), BTreeMap::new())
    }

    /// Persist all nodes, rotating the previous file to a backup.
    pub fn save_nodes<N: Serialize>(&self, nodes: &BTreeMap<String, N>) -> Result<()> {
        save_json_atomic(&self.path(NODES_FILE), nodes)?;
        debug!(count = nodes.len(), "saved graph nodes");
        Ok(())
    }

    /// Load all edges.
    pub fn load_edges<E: DeserializeOwned>(&self) -> Result<Vec<E>> {
        Self::load_or(&self.path(EDGES_FILE), Vec::new())
    }

    /// Persist all edges, rotating the previous file to a backup.
    pub fn save_edges<E: Serialize>(&self, edges: &[E]) -> Result<()> {
        save_json_atomic(&self.path(EDGES_FILE), &edges)?;
        debug!(count = edges.len(), "saved graph edges");
        Ok(())
    }

    /// Load graph metadata, if present.
    pub fn load_meta(&self) -> Result<Option<GraphMetadata>> {
        let path = self.path(METADATA_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    /// Persist graph metadata.
    pub fn save_meta(&self, meta: &GraphMetadata) -> Result<()> {
        save_json_atomic(&self.path(METADATA_FILE), meta)
    }
}
