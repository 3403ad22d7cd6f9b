// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Redis-backed graph store.
//!
//! Redis is not a graph database, but a hash-per-node plus edge-set layout
//! gives us the two operations the sync engine needs (idempotent node and
//! edge merges) with O(1) writes:
//!
//! ```text
//! HSET fleetsync:node:Vehicle:veh-12 props '{"status":"parked",...}'
//! SADD fleetsync:nodes  "Vehicle:veh-12"
//! SADD fleetsync:edges  "RAISED_FOR|Alert:a1|Vehicle:veh-12"
//! ```
//!
//! Counts come from `SCARD` on the membership sets.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{cmd, Client};

use super::store::{GraphError, GraphStore, NodeRef};

pub struct RedisGraphStore {
    connection: ConnectionManager,
    prefix: String,
}

impl RedisGraphStore {
    pub async fn connect(connection_string: &str) -> Result<Self, GraphError> {
        let client =
            Client::open(connection_string).map_err(|e| GraphError::Unavailable(e.to_string()))?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| GraphError::Unavailable(e.to_string()))?;
        Ok(Self {
            connection,
            prefix: "fleetsync:".to_string(),
        })
    }

    fn node_key(&self, node: &NodeRef) -> String {
        format!("{}node:{}:{}", self.prefix, node.label, node.key)
    }

    fn node_member(node: &NodeRef) -> String {
        format!("{}:{}", node.label, node.key)
    }

    fn classify(e: redis::RedisError) -> GraphError {
        if e.is_connection_refusal() || e.is_io_error() || e.is_timeout() {
            GraphError::Unavailable(e.to_string())
        } else {
            GraphError::Statement(e.to_string())
        }
    }
}

#[async_trait]
impl GraphStore for RedisGraphStore {
    async fn probe(&self) -> Result<(), GraphError> {
        let mut conn = self.connection.clone();
        let pong: String = cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| GraphError::Unavailable(e.to_string()))?;
        if pong == "PONG" {
            Ok(())
        } else {
            Err(GraphError::Unavailable(format!("unexpected ping reply: {pong}")))
        }
    }

    async fn merge_node(
        &self,
        node: &NodeRef,
        props: &serde_json::Value,
    ) -> Result<(), GraphError> {
        let mut conn = self.connection.clone();
        let props_json =
            serde_json::to_string(props).map_err(|e| GraphError::Statement(e.to_string()))?;

        let mut pipeline = redis::pipe();
        pipeline
            .cmd("HSET")
            .arg(self.node_key(node))
            .arg("props")
            .arg(&props_json)
            .cmd("SADD")
            .arg(format!("{}nodes", self.prefix))
            .arg(Self::node_member(node));
        pipeline
            .query_async::<()>(&mut conn)
            .await
            .map_err(Self::classify)
    }

    async fn merge_edge(&self, rel: &str, from: &NodeRef, to: &NodeRef) -> Result<(), GraphError> {
        let mut conn = self.connection.clone();
        let member = format!(
            "{rel}|{}|{}",
            Self::node_member(from),
            Self::node_member(to)
        );
        cmd("SADD")
            .arg(format!("{}edges", self.prefix))
            .arg(member)
            .query_async::<()>(&mut conn)
            .await
            .map_err(Self::classify)
    }

    async fn node_count(&self) -> Result<u64, GraphError> {
        let mut conn = self.connection.clone();
        cmd("SCARD")
            .arg(format!("{}nodes", self.prefix))
            .query_async(&mut conn)
            .await
            .map_err(Self::classify)
    }

    async fn edge_count(&self) -> Result<u64, GraphError> {
        let mut conn = self.connection.clone();
        cmd("SCARD")
            .arg(format!("{}edges", self.prefix))
            .query_async(&mut conn)
            .await
            .map_err(Self::classify)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Requires a local Redis: `docker run -p 6379:6379 redis:7`.
    #[tokio::test]
    #[ignore]
    async fn redis_merge_roundtrip() {
        let store = RedisGraphStore::connect("redis://127.0.0.1:6379")
            .await
            .unwrap();
        store.probe().await.unwrap();

        let v = NodeRef::new("Vehicle", "it-veh-1");
        store
            .merge_node(&v, &serde_json::json!({"status": "parked"}))
            .await
            .unwrap();
        store
            .merge_node(&v, &serde_json::json!({"status": "on_trip"}))
            .await
            .unwrap();

        let a = NodeRef::new("Alert", "it-alert-1");
        store.merge_node(&a, &serde_json::json!({})).await.unwrap();
        store.merge_edge("RAISED_FOR", &a, &v).await.unwrap();
        store.merge_edge("RAISED_FOR", &a, &v).await.unwrap();

        assert!(store.node_count().await.unwrap() >= 2);
        assert!(store.edge_count().await.unwrap() >= 1);
    }
}
