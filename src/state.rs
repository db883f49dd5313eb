//! Shared mutable state for a running overlay client (§5): the waiter
//! tables, relay-path map, broadcaster-marker set, peer registry, and blob
//! store, plus the collaborators each handler needs. Every field guards its
//! own single-writer discipline internally (§9); this struct just groups
//! `Arc`-shared handles to them.

use std::sync::Arc;

use crate::{
    blob_store::BlobStore,
    fanout::FanoutQueue,
    marker::BroadcasterMarkerSet,
    peer_registry::PeerRegistry,
    protocol::{BroadcastPayload, Header},
    reachability::ReachabilityProbe,
    relay_path::RelayPathTable,
    signature::SignatureVerifier,
    transport::{NeighborHandle, Transport},
    waiter::WaiterTable,
};

/// A waiter-table entry: who it arrived from (`None` for locally originated
/// requests awaiting their own reply) and the decoded payload.
#[derive(Debug, Clone)]
pub struct WaiterItem {
    pub origin: Option<NeighborHandle>,
    pub payload: serde_json::Value,
}

/// An item published on the broadcast fan-out queue (§4.2, §4.6).
#[derive(Debug, Clone)]
pub struct BroadcastItem {
    pub origin: Option<NeighborHandle>,
    pub payload: serde_json::Value,
}

/// An item published on the direct-cmd fan-out queue (§4.4 DIRECT_CMD).
#[derive(Debug, Clone)]
pub struct DirectItem {
    pub uuid: u32,
    pub data: serde_json::Value,
}

pub struct OverlayState {
    pub header: Header,
    pub listen_cap: usize,
    pub need_connection: usize,

    pub transport: Arc<dyn Transport>,
    pub reachability: Arc<dyn ReachabilityProbe>,
    pub signature_verifier: Arc<dyn SignatureVerifier>,
    pub broadcast_check: Arc<dyn Fn(&BroadcastPayload) -> bool + Send + Sync>,

    pub waiter: WaiterTable<WaiterItem>,
    pub direct_waiter: WaiterTable<serde_json::Value>,
    pub relay_path: RelayPathTable,
    pub markers: BroadcasterMarkerSet,
    pub peer_registry: PeerRegistry,
    pub blob_store: BlobStore,

    pub broadcast_fanout: FanoutQueue<BroadcastItem>,
    pub direct_fanout: FanoutQueue<DirectItem>,
}

impl OverlayState {
    /// Prune the bookkeeping stores per §4.4: called after every dispatched
    /// request. The waiter table and relay-path table prune themselves on
    /// insert; only the marker set needs an explicit trim call.
    pub fn prune(&self) {
        self.markers.trim();
    }
}
