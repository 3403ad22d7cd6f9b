//! In-memory graph backend for tests, with fault injection.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use super::store::{GraphError, GraphStore, NodeRef};

#[derive(Default)]
pub struct MemoryGraphStore {
    nodes: DashMap<(String, String), serde_json::Value>,
    edges: Mutex<HashSet<(String, (String, String), (String, String))>>,
    /// When set, every call fails with `Unavailable`.
    unreachable: AtomicBool,
    /// Fail the next N statements with `Statement`, then recover.
    fail_next_statements: AtomicU64,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn fail_next_statements(&self, n: u64) {
        self.fail_next_statements.store(n, Ordering::SeqCst);
    }

    pub fn node_props(&self, label: &str, key: &str) -> Option<serde_json::Value> {
        self.nodes
            .get(&(label.to_string(), key.to_string()))
            .map(|v| v.clone())
    }

    pub fn has_edge(&self, rel: &str, from: &NodeRef, to: &NodeRef) -> bool {
        self.edges.lock().contains(&(
            rel.to_string(),
            (from.label.clone(), from.key.clone()),
            (to.label.clone(), to.key.clone()),
        ))
    }

    fn check(&self) -> Result<(), GraphError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(GraphError::Unavailable("injected outage".into()));
        }
        // Decrement the injected-failure count without going below zero.
        let mut remaining = self.fail_next_statements.load(Ordering::SeqCst);
        while remaining > 0 {
            match self.fail_next_statements.compare_exchange(
                remaining,
                remaining - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Err(GraphError::Statement("injected statement failure".into())),
                Err(actual) => remaining = actual,
            }
        }
        Ok(())
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn probe(&self) -> Result<(), GraphError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(GraphError::Unavailable("injected outage".into()));
        }
        Ok(())
    }

    async fn merge_node(
        &self,
        node: &NodeRef,
        props: &serde_json::Value,
    ) -> Result<(), GraphError> {
        self.check()?;
        self.nodes
            .insert((node.label.clone(), node.key.clone()), props.clone());
        Ok(())
    }

    async fn merge_edge(&self, rel: &str, from: &NodeRef, to: &NodeRef) -> Result<(), GraphError> {
        self.check()?;
        self.edges.lock().insert((
            rel.to_string(),
            (from.label.clone(), from.key.clone()),
            (to.label.clone(), to.key.clone()),
        ));
        Ok(())
    }

    async fn node_count(&self) -> Result<u64, GraphError> {
        self.check()?;
        Ok(self.nodes.len() as u64)
    }

    async fn edge_count(&self) -> Result<u64, GraphError> {
        self.check()?;
        Ok(self.edges.lock().len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn merge_is_idempotent() {
        let store = MemoryGraphStore::new();
        let v = NodeRef::new("Vehicle", "veh-1");
        let props = serde_json::json!({"status": "parked"});
        store.merge_node(&v, &props).await.unwrap();
        store.merge_node(&v, &props).await.unwrap();
        assert_eq!(store.node_count().await.unwrap(), 1);

        let a = NodeRef::new("Alert", "alert-1");
        store.merge_node(&a, &serde_json::json!({})).await.unwrap();
        store.merge_edge("RAISED_FOR", &a, &v).await.unwrap();
        store.merge_edge("RAISED_FOR", &a, &v).await.unwrap();
        assert_eq!(store.edge_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn injected_statement_failures_recover() {
        let store = MemoryGraphStore::new();
        store.fail_next_statements(1);
        let v = NodeRef::new("Vehicle", "veh-1");
        assert!(matches!(
            store.merge_node(&v, &serde_json::json!({})).await,
            Err(GraphError::Statement(_))
        ));
        assert!(store.merge_node(&v, &serde_json::json!({})).await.is_ok());
    }
}
