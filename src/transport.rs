//! The framed-socket transport collaborator contract.
//!
//! The transport owns connection accept/dial, per-connection read/write
//! loops, message framing, and traffic accounting. The overlay core only
//! ever sees a [`Transport`] trait object plus [`NeighborHandle`]s; it never
//! touches a socket directly.

use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{error::OverlayError, protocol::Header};

/// Maximum accepted message size in bytes, exclusive of the blob overhead the
/// wire format allows for `FILE_GET` responses (`MAX_RECEIVE_SIZE + 1000`).
pub const MAX_RECEIVE_SIZE: usize = 16 * 1024 * 1024;

static NEXT_LOCAL_ID: AtomicU64 = AtomicU64::new(1);

/// A stable local identifier for a neighbor, allocated once per connection
/// and never reused. Used for identity comparison in the relay-path origin
/// check even after the underlying connection has closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NeighborId(u64);

impl NeighborId {
    pub fn next() -> Self {
        NeighborId(NEXT_LOCAL_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for NeighborId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "neighbor#{}", self.0)
    }
}

/// A non-owning reference to a currently (or formerly) connected peer.
///
/// The transport owns the actual connection; this handle captures the stable
/// id, observed endpoint, and advertised header so that logging and the
/// relay-path origin check remain well-defined even after disconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborHandle {
    pub id: NeighborId,
    pub host: String,
    pub port: u16,
    pub header: Header,
}

impl NeighborHandle {
    pub fn new(host: impl Into<String>, port: u16, header: Header) -> Self {
        NeighborHandle {
            id: NeighborId::next(),
            host: host.into(),
            port,
            header,
        }
    }
}

impl fmt::Display for NeighborHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}:{})", self.header.name, self.host, self.port)
    }
}

/// The framed-socket transport contract (§6 of the design).
///
/// Implementations own the actual sockets; the overlay core is given an
/// `Arc<dyn Transport>` and an `mpsc::Receiver` of inbound `(NeighborHandle,
/// Vec<u8>)` pairs (see [`Transport::inbound`]).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Start listening / accepting connections.
    async fn start(&self) -> Result<(), OverlayError>;

    /// Stop the transport, closing every connection.
    async fn close(&self) -> Result<(), OverlayError>;

    /// Dial `host:port`. Returns `true` on success.
    async fn create_connection(&self, host: &str, port: u16) -> bool;

    /// Forcibly remove a connection (presumed dead or rejected).
    async fn remove_connection(&self, neighbor: &NeighborHandle);

    /// Send already-encoded envelope bytes to `neighbor`.
    async fn send_msg(&self, bytes: Vec<u8>, neighbor: &NeighborHandle) -> Result<(), OverlayError>;

    /// Snapshot of currently connected neighbors.
    async fn neighbors(&self) -> Vec<NeighborHandle>;

    /// Resolve a `(host, port)` endpoint to a currently connected neighbor, if any.
    async fn peer_format_to_neighbor(&self, host: &str, port: u16) -> Option<NeighborHandle>;

    /// This node's own advertised header.
    fn local_header(&self) -> Header;
}

/// Receiver half of the transport's inbound stream.
///
/// `None` neighbor paired with empty bytes is the shutdown sentinel (`(nil,
/// nil)` in the reference implementation); [`InboundItem::Shutdown`] models
/// it directly instead of relying on a sentinel value.
pub enum InboundItem {
    Message(NeighborHandle, Vec<u8>),
    Shutdown,
}

pub type InboundReceiver = mpsc::Receiver<InboundItem>;
pub type InboundSender = mpsc::Sender<InboundItem>;
