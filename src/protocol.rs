//! Wire envelope, message types, and the closed command set.
//!
//! All types derive `Serialize`/`Deserialize` and are encoded as CBOR on the
//! wire by [`crate::codec`]. `Envelope::data` is a free-form JSON value —
//! each command's handler knows the shape it expects and decodes it with
//! `serde_json::from_value`.

use serde::{Deserialize, Serialize};

// ── Envelope type ─────────────────────────────────────────────────────────────

pub const TYPE_REQUEST: &str = "type/client/request";
pub const TYPE_RESPONSE: &str = "type/client/response";
pub const TYPE_ACK: &str = "type/client/ack";

/// Top-level binary-encoded message exchanged between neighbors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub r#type: String,
    pub cmd: String,
    pub data: serde_json::Value,
    pub time: f64,
    pub uuid: u32,
}

impl Envelope {
    pub fn request(cmd: Cmd, data: serde_json::Value, uuid: u32) -> Self {
        Envelope {
            r#type: TYPE_REQUEST.to_string(),
            cmd: cmd.as_str().to_string(),
            data,
            time: now_secs(),
            uuid,
        }
    }

    pub fn response(cmd: Cmd, data: serde_json::Value, uuid: u32) -> Self {
        Envelope {
            r#type: TYPE_RESPONSE.to_string(),
            cmd: cmd.as_str().to_string(),
            data,
            time: now_secs(),
            uuid,
        }
    }

    pub fn ack(cmd: Cmd, data: serde_json::Value, uuid: u32) -> Self {
        Envelope {
            r#type: TYPE_ACK.to_string(),
            cmd: cmd.as_str().to_string(),
            data,
            time: now_secs(),
            uuid,
        }
    }

    pub fn cmd(&self) -> Option<Cmd> {
        Cmd::from_str(&self.cmd)
    }
}

pub fn now_secs() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// A fresh 9-digit decimal correlation id, uniform in `[10^8, 10^9)`.
pub fn new_uuid() -> u32 {
    use rand::Rng;
    rand::thread_rng().gen_range(100_000_000..1_000_000_000)
}

// ── Command set ────────────────────────────────────────────────────────────────

/// The closed set of commands a REQUEST envelope's `cmd` field may name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cmd {
    PingPong,
    GetPeerInfo,
    GetPeers,
    CheckReachable,
    FileCheck,
    FileGet,
    Broadcast,
    FileDelete,
    DirectCmd,
}

impl Cmd {
    pub fn as_str(self) -> &'static str {
        match self {
            Cmd::PingPong => "cmd/client/ping-pong",
            Cmd::GetPeerInfo => "cmd/client/get-peer-info",
            Cmd::GetPeers => "cmd/client/get-peers",
            Cmd::CheckReachable => "cmd/client/check-reachable",
            Cmd::FileCheck => "cmd/client/file-check",
            Cmd::FileGet => "cmd/client/file-get",
            Cmd::Broadcast => "cmd/client/broadcast",
            Cmd::FileDelete => "cmd/client/file-delete",
            Cmd::DirectCmd => "cmd/client/direct-cmd",
        }
    }

    pub fn from_str(s: &str) -> Option<Cmd> {
        Some(match s {
            "cmd/client/ping-pong" => Cmd::PingPong,
            "cmd/client/get-peer-info" => Cmd::GetPeerInfo,
            "cmd/client/get-peers" => Cmd::GetPeers,
            "cmd/client/check-reachable" => Cmd::CheckReachable,
            "cmd/client/file-check" => Cmd::FileCheck,
            "cmd/client/file-get" => Cmd::FileGet,
            "cmd/client/broadcast" => Cmd::Broadcast,
            "cmd/client/file-delete" => Cmd::FileDelete,
            "cmd/client/direct-cmd" => Cmd::DirectCmd,
            _ => return None,
        })
    }
}

// ── Header ─────────────────────────────────────────────────────────────────────

/// Metadata a node advertises about itself to its neighbors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub p2p_port: u16,
    pub p2p_accept: bool,
}

/// `(host, port)` endpoint key used throughout the peer registry and relay walk.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerKey {
    pub host: String,
    pub port: u16,
}

impl PeerKey {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        PeerKey {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for PeerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

// ── Per-command payload shapes ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingPongResponse {
    pub ping: serde_json::Value,
    pub pong: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPeersResponse {
    pub near: Vec<(PeerKey, Header)>,
    pub peer: Vec<(PeerKey, Header)>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CheckReachableRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileCheckRequest {
    pub hash: String,
    /// The fetch walk's own correlation id, carried here rather than relied
    /// on as this FILE_CHECK's own envelope uuid — that uuid is fresh per
    /// probe so the sender's waiter-table rendezvous isn't reused across
    /// probes, while `asked` still needs to test relay-path membership under
    /// the *fetch's* long-lived id (§4.5).
    pub uuid: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileCheckResponse {
    pub have: bool,
    pub asked: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileGetRequest {
    pub hash: String,
    pub asked: Vec<PeerKey>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastPayload {
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDeleteRequest {
    /// Serialized `(file_hash, time)` pair, the exact bytes that were signed.
    pub raw: Vec<u8>,
    pub sign: Vec<u8>,
    pub pem: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDeleteRaw {
    pub file_hash: String,
    pub time: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectCmdRequest {
    pub data: serde_json::Value,
}

// ── Logging ───────────────────────────────────────────────────────────────────

/// A captured tracing log record forwarded through the log channel so a host
/// application can display overlay internals without them going to stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: String,
    pub target: String,
    pub message: String,
}
