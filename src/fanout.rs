//! Best-effort broadcast fan-out to connected clients.
//!
//! Every frame goes to every subscriber tagged with its kind; clients filter
//! on their side. Delivery is non-blocking: a full client queue drops that
//! frame for that client only, and a closed channel unsubscribes the client.
//! A slow consumer can never stall ingestion.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

use crate::model::{
    Alert, EmitterHeartbeat, FleetEvent, FleetRuntimeState, ScenarioRun, TelemetryPoint,
    VehicleLatestState,
};

/// One outbound frame. The serde tagging yields
/// `{"kind": "telemetry", "data": {...}}` on the wire.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "camelCase")]
pub enum Broadcast {
    Telemetry(TelemetryPoint),
    Event(FleetEvent),
    Alert(Alert),
    VehicleState(VehicleLatestState),
    FleetState(FleetRuntimeState),
    ReplayStatus(ScenarioRun),
    Heartbeat(EmitterHeartbeat),
}

pub struct ClientHandle {
    pub id: u64,
    pub rx: mpsc::Receiver<Arc<Broadcast>>,
}

pub struct FanoutGateway {
    clients: DashMap<u64, mpsc::Sender<Arc<Broadcast>>>,
    next_id: AtomicU64,
    queue_depth: usize,
}

impl FanoutGateway {
    #[must_use]
    pub fn new(queue_depth: usize) -> Self {
        Self {
            clients: DashMap::new(),
            next_id: AtomicU64::new(1),
            queue_depth: queue_depth.max(1),
        }
    }

    pub fn subscribe(&self) -> ClientHandle {
        let (tx, rx) = mpsc::channel(self.queue_depth);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.clients.insert(id, tx);
        crate::metrics::fanout_clients(self.clients.len());
        ClientHandle { id, rx }
    }

    pub fn unsubscribe(&self, id: u64) {
        self.clients.remove(&id);
        crate::metrics::fanout_clients(self.clients.len());
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Publish one frame to all clients. Returns how many queues accepted it.
    pub fn publish(&self, frame: Broadcast) -> usize {
        let frame = Arc::new(frame);
        let mut delivered = 0usize;
        let mut dropped = 0usize;
        let mut closed: Vec<u64> = Vec::new();

        for entry in self.clients.iter() {
            match entry.value().try_send(Arc::clone(&frame)) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => dropped += 1,
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*entry.key()),
            }
        }
        // Removal deferred to avoid mutating the map mid-iteration.
        for id in closed {
            self.clients.remove(&id);
        }

        if delivered > 0 {
            crate::metrics::fanout_delivered(delivered);
        }
        if dropped > 0 {
            debug!(dropped, "fanout queues full, frames dropped");
            crate::metrics::fanout_dropped(dropped);
        }
        crate::metrics::fanout_clients(self.clients.len());
        delivered
    }

    /// Drop every client sender; receivers observe channel close.
    pub fn close_all(&self) {
        self.clients.clear();
        crate::metrics::fanout_clients(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FleetMode;

    fn frame() -> Broadcast {
        Broadcast::FleetState(FleetRuntimeState {
            mode: FleetMode::Replay,
            active_run_id: None,
            updated_ts: 0,
        })
    }

    #[tokio::test]
    async fn delivers_to_all_subscribers() {
        let gateway = FanoutGateway::new(8);
        let mut a = gateway.subscribe();
        let mut b = gateway.subscribe();

        assert_eq!(gateway.publish(frame()), 2);
        assert!(a.rx.recv().await.is_some());
        assert!(b.rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn full_queue_drops_frame_without_blocking() {
        let gateway = FanoutGateway::new(1);
        let mut slow = gateway.subscribe();

        assert_eq!(gateway.publish(frame()), 1);
        // Queue depth 1 and nothing consumed: the second frame is dropped.
        assert_eq!(gateway.publish(frame()), 0);
        assert!(slow.rx.recv().await.is_some());
        // Client is still subscribed after a drop.
        assert_eq!(gateway.client_count(), 1);
    }

    #[tokio::test]
    async fn closed_client_is_removed_on_publish() {
        let gateway = FanoutGateway::new(8);
        let handle = gateway.subscribe();
        drop(handle.rx);

        gateway.publish(frame());
        assert_eq!(gateway.client_count(), 0);
    }

    #[tokio::test]
    async fn wire_format_is_kind_tagged() {
        let json = serde_json::to_value(frame()).unwrap();
        assert_eq!(json["kind"], "fleetState");
        assert!(json["data"].is_object());
    }
}
