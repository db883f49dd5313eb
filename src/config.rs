use std::path::PathBuf;

use crate::protocol::Header;

/// Configuration for an overlay client node.
///
/// Built in-process by the embedding application; this crate does not parse
/// CLI flags or config files itself (§1).
pub struct OverlayConfig {
    /// Soft target for the number of simultaneous neighbors (§9 glossary).
    pub listen_cap: usize,

    /// Network/protocol version tag, used to derive the data directory name.
    pub net_ver: String,

    /// This node's own advertised p2p port (part of its header and of the
    /// derived data-directory name).
    pub port: u16,

    /// Directory holding `peer.dat`, `file.<hash>.dat` blobs, and the
    /// `pem/` signer-key directory. Defaults to a user-data-dir location
    /// derived from `net_ver`/`port` when unset.
    pub data_dir: Option<PathBuf>,

    /// This node's own advertised header.
    pub header: Header,

    /// Appends `.test` to the derived directory name — set by integration
    /// tests so they never touch a real node's persisted state.
    pub test_suffix: bool,

    /// Minimum neighbor count the steady-state stabilizer holds out for
    /// before it relaxes into the slower cadence (§4.9, `need_connection`).
    pub need_connection: usize,
}

impl OverlayConfig {
    pub fn new(listen_cap: usize, net_ver: impl Into<String>, header: Header) -> Self {
        OverlayConfig {
            listen_cap,
            net_ver: net_ver.into(),
            port: header.p2p_port,
            data_dir: None,
            header,
            test_suffix: false,
            need_connection: 3,
        }
    }

    /// Resolve the directory holding persisted state: `data_dir` if set,
    /// else `<user data dir>/p2p_<net_ver>_<port>[.test]` (§6).
    pub fn resolved_data_dir(&self) -> PathBuf {
        if let Some(dir) = &self.data_dir {
            return dir.clone();
        }
        let base = dirs::data_dir().unwrap_or_else(std::env::temp_dir);
        base.join(self.directory_name())
    }

    pub fn directory_name(&self) -> String {
        let mut name = format!("p2p_{}_{}", self.net_ver, self.port);
        if self.test_suffix {
            name.push_str(".test");
        }
        name
    }

    pub fn pem_dir(&self) -> PathBuf {
        self.resolved_data_dir().join("pem")
    }

    pub fn peer_registry_path(&self) -> PathBuf {
        self.resolved_data_dir().join("peer.dat")
    }
}
