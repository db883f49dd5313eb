pub mod blob_store;
pub mod broadcast;
pub mod client;
pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod fanout;
pub mod file_fetch;
pub mod handlers;
pub mod log_layer;
pub mod marker;
pub mod peer_registry;
pub mod protocol;
pub mod reachability;
pub mod relay_path;
pub mod sender;
pub mod signature;
pub mod stabilizer;
pub mod state;
pub mod transport;
pub mod waiter;

pub use client::{FetchedFile, OverlayClient};
pub use config::OverlayConfig;
pub use error::OverlayError;
pub use file_fetch::FileGetOutcome;
pub use log_layer::{build_log_channel, LogCaptureLayer};
pub use protocol::{Cmd, Header, LogEntry, PeerKey};
pub use reachability::{ReachabilityProbe, TcpReachabilityProbe};
pub use signature::{RsaSignatureVerifier, SignatureVerifier};
pub use state::OverlayState;
pub use transport::{InboundItem, InboundReceiver, InboundSender, NeighborHandle, NeighborId, Transport};
