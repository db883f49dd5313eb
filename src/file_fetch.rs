//! Content-addressed file fetch (§4.5): the local `get_file` API and the
//! FILE_GET relay walk it shares with every intermediate hop.
//!
//! The fetch walk is the most intricate handler: each hop resolves the
//! endpoints the requester already knows about, probes its own neighbors for
//! the blob, picks one hopeful candidate, records who to ship the eventual
//! reply back to, and forwards the request one hop further under the *same*
//! correlation id end to end. That shared id is what lets every hop's
//! relay-path entry and the final dispatcher's origin check line up without
//! any translation step, and what lets a probed neighbor answer FILE_CHECK's
//! `asked` flag against its own relay-path table rather than the probe's own
//! (per-probe, non-shared) envelope uuid.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use rand::seq::SliceRandom;

use crate::{
    error::OverlayError,
    handlers::send_envelope,
    protocol::{Cmd, Envelope, FileCheckRequest, FileCheckResponse, FileGetRequest, PeerKey},
    relay_path::{RelayPathEntry, Requester},
    sender::{self, FILE_GET_WAIT},
    state::OverlayState,
    transport::{NeighborHandle, NeighborId},
};

/// Wait allotted to each probing FILE_CHECK along the walk.
const FILE_CHECK_WAIT: Duration = Duration::from_secs(2);

pub enum FileGetOutcome {
    Bytes(Vec<u8>),
    Have(bool),
}

/// The local, blocking `get_file(hash, only_check)` API (§4.5, direct fetch).
///
/// `only_check = true` never touches the network: it reports whether the
/// blob is already in the local store. Otherwise this returns the bytes,
/// fetching from a neighbor (and verifying the hash) if necessary.
pub async fn get_file(
    state: &Arc<OverlayState>,
    hash: &str,
    only_check: bool,
) -> Result<FileGetOutcome, OverlayError> {
    if only_check {
        return Ok(FileGetOutcome::Have(state.blob_store.has(hash)));
    }

    if let Some(bytes) = state.blob_store.get(hash) {
        return Ok(FileGetOutcome::Bytes(bytes));
    }

    let mut neighbors = state.transport.neighbors().await;
    if neighbors.is_empty() {
        return Err(OverlayError::FileReceive(
            "no connected neighbors to fetch from".to_string(),
        ));
    }
    neighbors.shuffle(&mut rand::thread_rng());

    // The whole fetch's correlation id: carried in every FILE_CHECK probe's
    // payload for the `asked` loop check, then reused as the FILE_GET
    // envelope's own uuid so the relay-path origin check lines up end to end.
    let uuid = crate::protocol::new_uuid();

    let mut hopeful: Option<NeighborHandle> = None;
    let mut candidates: Vec<NeighborHandle> = Vec::new();
    for neighbor in &neighbors {
        match probe_file_check(state, neighbor, uuid, hash).await {
            Some(resp) if resp.have => {
                hopeful = Some(neighbor.clone());
                break;
            }
            Some(resp) if !resp.asked => candidates.push(neighbor.clone()),
            _ => {}
        }
    }
    let hopeful = hopeful.or_else(|| candidates.first().cloned()).ok_or_else(|| {
        OverlayError::FileReceive(format!("no peer claims to have blob {hash}"))
    })?;

    state.relay_path.insert(
        uuid,
        RelayPathEntry {
            requester: Requester::Local,
            ship_to: hopeful.clone(),
        },
    );

    let asked: Vec<PeerKey> = neighbors
        .iter()
        .map(|n| PeerKey::new(n.host.clone(), n.header.p2p_port))
        .collect();
    let req = FileGetRequest {
        hash: hash.to_string(),
        asked,
    };
    let data = serde_json::to_value(req).map_err(|e| OverlayError::Codec(e.to_string()))?;
    let (_, payload) = sender::send_and_wait(
        state,
        Cmd::FileGet,
        data,
        uuid,
        std::slice::from_ref(&hopeful),
        FILE_GET_WAIT,
    )
    .await?;

    if payload.is_null() {
        return Err(OverlayError::FileReceive(format!("no peer has blob {hash}")));
    }
    let bytes: Vec<u8> = serde_json::from_value(payload).map_err(|e| OverlayError::Codec(e.to_string()))?;
    state.blob_store.put_verified(&bytes, hash)?;
    Ok(FileGetOutcome::Bytes(bytes))
}

/// Probe `neighbor` for `hash`. `fetch_uuid` is the whole walk's shared
/// correlation id, carried inside the FILE_CHECK payload so the probed
/// neighbor can answer `asked` against its own relay-path table; the
/// envelope's own transport uuid is minted fresh per probe so concurrent
/// probes don't collide in the waiter table.
async fn probe_file_check(
    state: &Arc<OverlayState>,
    neighbor: &NeighborHandle,
    fetch_uuid: u32,
    hash: &str,
) -> Option<FileCheckResponse> {
    let req = FileCheckRequest {
        hash: hash.to_string(),
        uuid: fetch_uuid,
    };
    let data = serde_json::to_value(req).ok()?;
    let (_, payload) = sender::send_and_wait(
        state,
        Cmd::FileCheck,
        data,
        crate::protocol::new_uuid(),
        std::slice::from_ref(neighbor),
        FILE_CHECK_WAIT,
    )
    .await
    .ok()?;
    serde_json::from_value(payload).ok()
}

/// Resolve `asked` endpoints to currently connected neighbors.
///
/// Accumulates every observation into a multi-map rather than overwriting a
/// single-entry slot per key: a second endpoint resolving under the same
/// `(host, port)` (e.g. because two different neighbor ids briefly shared a
/// rebound connection) is appended, not discarded.
async fn resolve_nears(
    state: &Arc<OverlayState>,
    asked: &[PeerKey],
) -> HashMap<PeerKey, Vec<NeighborHandle>> {
    let mut nears: HashMap<PeerKey, Vec<NeighborHandle>> = HashMap::new();
    for key in asked {
        if let Some(neighbor) = state.transport.peer_format_to_neighbor(&key.host, key.port).await {
            nears.entry(key.clone()).or_default().push(neighbor);
        }
    }
    nears
}

/// Handle an inbound FILE_GET REQUEST (§4.5, relayed fetch).
///
/// If the blob is already local, reply immediately. Otherwise spawn the walk
/// so the dispatcher loop isn't blocked for up to 20s.
pub async fn handle_file_get_request(state: Arc<OverlayState>, from: NeighborHandle, envelope: Envelope) {
    let uuid = envelope.uuid;
    let req: FileGetRequest = match serde_json::from_value(envelope.data.clone()) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!("malformed FILE_GET payload from {from}: {e}");
            let resp = Envelope::response(Cmd::FileGet, serde_json::Value::Null, uuid);
            send_envelope(&state, &resp, &from).await;
            return;
        }
    };

    if let Some(bytes) = state.blob_store.get(&req.hash) {
        state.relay_path.insert(
            uuid,
            RelayPathEntry {
                requester: Requester::Neighbor(from.clone()),
                ship_to: from.clone(),
            },
        );
        let data = serde_json::to_value(bytes).unwrap_or(serde_json::Value::Null);
        let resp = Envelope::response(Cmd::FileGet, data, uuid);
        send_envelope(&state, &resp, &from).await;
        return;
    }

    tokio::spawn(relay_walk(state, from, uuid, req));
}

async fn relay_walk(state: Arc<OverlayState>, requester: NeighborHandle, uuid: u32, req: FileGetRequest) {
    let nears = resolve_nears(&state, &req.asked).await;
    let visited_ids: HashSet<NeighborId> = nears.values().flatten().map(|n| n.id).collect();

    let mut candidates_order = state.transport.neighbors().await;
    candidates_order.shuffle(&mut rand::thread_rng());
    let (mut unvisited, mut visited): (Vec<_>, Vec<_>) = candidates_order
        .into_iter()
        .partition(|n| !visited_ids.contains(&n.id));
    let mut walk_order = Vec::new();
    walk_order.append(&mut unvisited);
    walk_order.append(&mut visited);

    let mut hopeful: Option<NeighborHandle> = None;
    let mut candidates: Vec<NeighborHandle> = Vec::new();
    for neighbor in &walk_order {
        match probe_file_check(&state, neighbor, uuid, &req.hash).await {
            Some(resp) if resp.have => {
                hopeful = Some(neighbor.clone());
                break;
            }
            Some(resp) if !resp.asked => candidates.push(neighbor.clone()),
            _ => {}
        }
    }
    let hopeful = match hopeful.or_else(|| candidates.first().cloned()) {
        Some(n) => n,
        None => {
            let resp = Envelope::response(Cmd::FileGet, serde_json::Value::Null, uuid);
            send_envelope(&state, &resp, &requester).await;
            return;
        }
    };

    state.relay_path.insert(
        uuid,
        RelayPathEntry {
            requester: Requester::Neighbor(requester.clone()),
            ship_to: hopeful.clone(),
        },
    );

    let mut next_asked: Vec<PeerKey> = state
        .transport
        .neighbors()
        .await
        .into_iter()
        .map(|n| PeerKey::new(n.host, n.header.p2p_port))
        .collect();
    for key in &req.asked {
        if !next_asked.contains(key) {
            next_asked.push(key.clone());
        }
    }

    let next_req = FileGetRequest {
        hash: req.hash.clone(),
        asked: next_asked,
    };
    let data = match serde_json::to_value(next_req) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!("encoding relayed FILE_GET failed: {e}");
            let resp = Envelope::response(Cmd::FileGet, serde_json::Value::Null, uuid);
            send_envelope(&state, &resp, &requester).await;
            return;
        }
    };

    let result = sender::send_and_wait(
        &state,
        Cmd::FileGet,
        data,
        uuid,
        std::slice::from_ref(&hopeful),
        FILE_GET_WAIT,
    )
    .await;

    let reply_payload = match result {
        Ok((_, payload)) => payload,
        Err(_) => serde_json::Value::Null,
    };
    let resp = Envelope::response(Cmd::FileGet, reply_payload, uuid);
    send_envelope(&state, &resp, &requester).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Header;

    fn neighbor(name: &str, port: u16) -> NeighborHandle {
        NeighborHandle::new(
            "127.0.0.1",
            port,
            Header {
                name: name.to_string(),
                p2p_port: port,
                p2p_accept: true,
            },
        )
    }

    #[test]
    fn neighbor_display_is_stable() {
        let n = neighbor("A", 4001);
        assert_eq!(format!("{n}"), "A(127.0.0.1:4001)");
    }
}
