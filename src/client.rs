//! Top-level client (§6 Local API): wires the dispatcher, stabilizer, and
//! sender together over a shared [`OverlayState`] and exposes the
//! programmatic surface an embedding application drives.

use std::{sync::Arc, time::Duration};

use rsa::{pkcs1v15::SigningKey, pkcs8::DecodePrivateKey, signature::Signer, RsaPrivateKey};
use serde::Serialize;
use sha2::Sha256;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::{
    blob_store::BlobStore,
    codec, dispatcher,
    error::OverlayError,
    fanout::FanoutQueue,
    file_fetch::{self, FileGetOutcome},
    marker::BroadcasterMarkerSet,
    peer_registry::PeerRegistry,
    protocol::{BroadcastPayload, Cmd, Envelope, FileDeleteRaw, FileDeleteRequest},
    reachability::{ReachabilityProbe, TcpReachabilityProbe},
    relay_path::RelayPathTable,
    sender,
    signature::{RsaSignatureVerifier, SignatureVerifier},
    stabilizer,
    state::OverlayState,
    transport::{InboundItem, InboundReceiver, InboundSender, Transport},
    waiter::WaiterTable,
};
use crate::config::OverlayConfig;

/// Bound used for every bookkeeping store's eviction cap (§4.4): `listen_cap
/// * 100`.
const STORE_CAP_MULTIPLIER: usize = 100;

pub use crate::file_fetch::FileGetOutcome as FetchedFile;

/// An overlay client bound to one transport and one collaborator set.
///
/// Construction loads persisted state (peer registry, blob directory) from
/// the resolved data directory; [`OverlayClient::start`] spawns the
/// dispatcher and/or stabilizer as background tasks.
pub struct OverlayClient {
    state: Arc<OverlayState>,
    inbound_tx: InboundSender,
    inbound_rx: Mutex<Option<InboundReceiver>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    stabilizer: Mutex<Option<JoinHandle<()>>>,
}

impl OverlayClient {
    /// Build a client from `config`, a transport collaborator, and the
    /// matching halves of its inbound channel. `reachability` and
    /// `signature_verifier` default to the production implementations when
    /// `None`. `broadcast_check` defaults to deny-all (§12).
    pub fn new(
        config: &OverlayConfig,
        transport: Arc<dyn Transport>,
        inbound_rx: InboundReceiver,
        inbound_tx: InboundSender,
        reachability: Option<Arc<dyn ReachabilityProbe>>,
        signature_verifier: Option<Arc<dyn SignatureVerifier>>,
        broadcast_check: Option<Arc<dyn Fn(&BroadcastPayload) -> bool + Send + Sync>>,
    ) -> Result<Self, OverlayError> {
        let data_dir = config.resolved_data_dir();
        std::fs::create_dir_all(&data_dir)?;
        let cap = config.listen_cap.max(1) * STORE_CAP_MULTIPLIER;

        let state = Arc::new(OverlayState {
            header: config.header.clone(),
            listen_cap: config.listen_cap,
            need_connection: config.need_connection,
            transport,
            reachability: reachability.unwrap_or_else(|| Arc::new(TcpReachabilityProbe)),
            signature_verifier: signature_verifier
                .unwrap_or_else(|| Arc::new(RsaSignatureVerifier::new(config.pem_dir()))),
            broadcast_check: broadcast_check.unwrap_or_else(|| Arc::new(|_: &BroadcastPayload| false)),
            waiter: WaiterTable::new(cap),
            direct_waiter: WaiterTable::new(cap),
            relay_path: RelayPathTable::new(cap),
            markers: BroadcasterMarkerSet::new(),
            peer_registry: PeerRegistry::load(config.peer_registry_path())?,
            blob_store: BlobStore::new(data_dir.clone())?,
            broadcast_fanout: FanoutQueue::new(cap.min(1024)),
            direct_fanout: FanoutQueue::new(cap.min(1024)),
        });

        Ok(OverlayClient {
            state,
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            dispatcher: Mutex::new(None),
            stabilizer: Mutex::new(None),
        })
    }

    /// Start serving (the dispatcher task) and/or stabilizing (the
    /// neighbor-balancing task). Calling with both `false` only starts the
    /// transport.
    pub async fn start(&self, serve: bool, stabilize: bool) -> Result<(), OverlayError> {
        self.state.transport.start().await?;

        if serve {
            if let Some(inbound_rx) = self.inbound_rx.lock().await.take() {
                let state = Arc::clone(&self.state);
                let handle = tokio::spawn(dispatcher::run(state, inbound_rx));
                *self.dispatcher.lock().await = Some(handle);
            }
        }

        if stabilize {
            let state = Arc::clone(&self.state);
            *self.stabilizer.lock().await = Some(tokio::spawn(stabilizer::run(state)));
        }

        Ok(())
    }

    /// Stop the transport, remove every connection, then enqueue the
    /// shutdown sentinel and wait for the dispatcher to observe it (§5).
    pub async fn close(&self) -> Result<(), OverlayError> {
        self.state.transport.close().await?;
        for neighbor in self.state.transport.neighbors().await {
            self.state.transport.remove_connection(&neighbor).await;
        }
        let _ = self.inbound_tx.send(InboundItem::Shutdown).await;

        if let Some(handle) = self.dispatcher.lock().await.take() {
            let _ = handle.await;
        }
        if let Some(handle) = self.stabilizer.lock().await.take() {
            handle.abort();
        }
        Ok(())
    }

    /// `send_command(cmd, data, client, wait)` (§4.8).
    pub async fn send_command(
        &self,
        cmd: Cmd,
        data: serde_json::Value,
        client: Option<crate::transport::NeighborHandle>,
        wait: Duration,
    ) -> Result<(Option<crate::transport::NeighborHandle>, serde_json::Value), OverlayError> {
        sender::send_command(&self.state, cmd, data, client, wait).await
    }

    /// Store `bytes` in the local blob store, returning its SHA-256 hex digest.
    pub fn share_file(&self, bytes: &[u8]) -> Result<String, OverlayError> {
        self.state.blob_store.put(bytes)
    }

    /// `get_file(hash, only_check)` (§4.5).
    pub async fn get_file(&self, hash: &str, only_check: bool) -> Result<FileGetOutcome, OverlayError> {
        file_fetch::get_file(&self.state, hash, only_check).await
    }

    /// Delete `hash` from the local blob store only (no propagation).
    pub fn remove_file(&self, hash: &str) -> bool {
        self.state.blob_store.remove(hash)
    }

    /// Administrative delete (§4.7): sign `(hash, now)` with `private_key_pem`
    /// and flood a FILE_DELETE naming `pem_name` as the public key neighbors
    /// should verify against. Deletes locally first, then propagates.
    pub async fn remove_file_by_master(
        &self,
        private_key_pem: &str,
        hash: &str,
        pem_name: &str,
    ) -> Result<bool, OverlayError> {
        let raw = FileDeleteRaw {
            file_hash: hash.to_string(),
            time: crate::protocol::now_secs(),
        };
        let raw_bytes = encode_raw(&raw)?;

        let private_key = RsaPrivateKey::from_pkcs8_pem(private_key_pem)
            .map_err(|e| OverlayError::SignatureInvalid(format!("bad private key: {e}")))?;
        let signing_key = SigningKey::<Sha256>::new(private_key);
        let signature = signing_key.sign(&raw_bytes);

        let req = FileDeleteRequest {
            raw: raw_bytes,
            sign: signature.to_bytes().to_vec(),
            pem: pem_name.to_string(),
        };
        let data = serde_json::to_value(req).map_err(|e| OverlayError::Codec(e.to_string()))?;

        let existed = self.state.blob_store.remove(hash);

        let uuid = crate::protocol::new_uuid();
        self.state.markers.mark(uuid);
        let envelope = Envelope::request(Cmd::FileDelete, data, uuid);
        let bytes = codec::encode(&envelope)?;
        for neighbor in self.state.transport.neighbors().await {
            if let Err(e) = self.state.transport.send_msg(bytes.clone(), &neighbor).await {
                tracing::warn!("propagating FILE_DELETE to {neighbor} failed: {e}");
            }
        }

        Ok(existed)
    }

    pub fn state(&self) -> &Arc<OverlayState> {
        &self.state
    }
}

fn encode_raw(raw: &FileDeleteRaw) -> Result<Vec<u8>, OverlayError> {
    #[derive(Serialize)]
    struct Wire<'a> {
        file_hash: &'a str,
        time: f64,
    }
    serde_json::to_vec(&Wire {
        file_hash: &raw.file_hash,
        time: raw.time,
    })
    .map_err(|e| OverlayError::Codec(e.to_string()))
}
