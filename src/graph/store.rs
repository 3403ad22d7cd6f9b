use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GraphError {
    /// The backend cannot be reached at all. Ends the sync cycle.
    #[error("Graph store unreachable: {0}")]
    Unavailable(String),
    /// One statement failed; the cycle logs it and continues.
    #[error("Graph statement failed: {0}")]
    Statement(String),
}

/// A node address: label plus domain key, e.g. `("Vehicle", "veh-12")`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeRef {
    pub label: String,
    pub key: String,
}

impl NodeRef {
    pub fn new(label: &str, key: &str) -> Self {
        Self {
            label: label.to_string(),
            key: key.to_string(),
        }
    }
}

/// The secondary graph store.
///
/// Every write is an idempotent merge keyed on `(label, key)` for nodes and
/// `(rel, from, to)` for edges, so replaying a sync cycle converges instead
/// of duplicating.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Cheap liveness probe.
    async fn probe(&self) -> Result<(), GraphError>;

    /// Create-or-update a node, replacing its properties.
    async fn merge_node(
        &self,
        node: &NodeRef,
        props: &serde_json::Value,
    ) -> Result<(), GraphError>;

    /// Create-or-keep a directed edge between two nodes.
    async fn merge_edge(&self, rel: &str, from: &NodeRef, to: &NodeRef) -> Result<(), GraphError>;

    async fn node_count(&self) -> Result<u64, GraphError>;
    async fn edge_count(&self) -> Result<u64, GraphError>;
}
