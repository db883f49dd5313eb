//! Client-side sender (§4.8): generates correlation ids, sends a request to
//! one or many peers, and waits with a timeout for a rendezvous entry.

use std::{sync::Arc, time::Duration};

use rand::seq::SliceRandom;
use tokio::time::Instant;

use crate::{
    codec,
    error::OverlayError,
    protocol::{Cmd, Envelope},
    relay_path::{RelayPathEntry, Requester},
    state::{OverlayState, WaiterItem},
    transport::NeighborHandle,
    waiter::POLL_INTERVAL,
};

/// `FILE_GET` always waits this long regardless of the caller's request
/// (§4.8).
pub const FILE_GET_WAIT: Duration = Duration::from_secs(20);

/// `send_command` fails immediately for waits shorter than this (§8 boundary
/// behaviors).
const MIN_WAIT: Duration = Duration::from_secs(1);

/// Build and send a REQUEST envelope under an explicit, already-decided
/// `uuid`, then poll the waiter table for a matching reply.
///
/// This is the building block both [`send_command`] (which mints its own
/// uuid) and the FILE_GET relay walk (which must reuse the *original*
/// requester's uuid end-to-end, see §4.5/§12) are built on. It never touches
/// the relay-path table or the broadcaster-marker set — callers that need
/// that bookkeeping do it themselves before calling in.
pub async fn send_and_wait(
    state: &Arc<OverlayState>,
    cmd: Cmd,
    data: serde_json::Value,
    uuid: u32,
    targets: &[NeighborHandle],
    wait: Duration,
) -> Result<(Option<NeighborHandle>, serde_json::Value), OverlayError> {
    if targets.is_empty() {
        return Err(OverlayError::NoConnection("no target neighbors".to_string()));
    }

    let envelope = Envelope::request(cmd, data, uuid);
    let bytes = codec::encode(&envelope)?;
    for target in targets {
        if let Err(e) = state.transport.send_msg(bytes.clone(), target).await {
            tracing::warn!("send_and_wait: failed sending {} to {target}: {e}", cmd.as_str());
        }
    }

    let deadline = Instant::now() + wait;
    loop {
        if let Some(WaiterItem { origin, payload }) = state.waiter.get(uuid) {
            if matches!(cmd, Cmd::Broadcast) {
                state.broadcast_fanout.publish(crate::state::BroadcastItem {
                    origin: origin.clone(),
                    payload: payload.clone(),
                });
            }
            return Ok((origin, payload));
        }
        if Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    if targets.len() == 1 {
        state.transport.remove_connection(&targets[0]).await;
    }
    Err(OverlayError::Timeout {
        cmd: cmd.as_str().to_string(),
        uuid,
        neighbor: targets
            .first()
            .map(|n| n.to_string())
            .unwrap_or_else(|| "<none>".to_string()),
    })
}

/// `send_command(cmd, data, client, wait)` (§4.8): the client-facing
/// synchronous request API. Mints a fresh correlation id and decides the
/// target set per `cmd`.
pub async fn send_command(
    state: &Arc<OverlayState>,
    cmd: Cmd,
    data: serde_json::Value,
    client: Option<NeighborHandle>,
    wait: Duration,
) -> Result<(Option<NeighborHandle>, serde_json::Value), OverlayError> {
    if wait < MIN_WAIT {
        return Err(OverlayError::NoConnection(
            "send_command wait must be at least 1s".to_string(),
        ));
    }

    let uuid = crate::protocol::new_uuid();
    let neighbors = state.transport.neighbors().await;

    let (targets, effective_wait): (Vec<NeighborHandle>, Duration) = match cmd {
        Cmd::Broadcast | Cmd::FileDelete => {
            if neighbors.is_empty() {
                return Err(OverlayError::NoConnection(
                    "no connected neighbors".to_string(),
                ));
            }
            state.markers.mark(uuid);
            (neighbors, wait)
        }
        Cmd::FileGet => {
            let target = client.ok_or_else(|| {
                OverlayError::NoConnection("FILE_GET requires an explicit neighbor".to_string())
            })?;
            if !neighbors.iter().any(|n| n.id == target.id) {
                return Err(OverlayError::NoConnection(format!(
                    "{target} is not currently connected"
                )));
            }
            state.relay_path.insert(
                uuid,
                RelayPathEntry {
                    requester: Requester::Local,
                    ship_to: target.clone(),
                },
            );
            (vec![target], FILE_GET_WAIT)
        }
        _ => {
            let target = match client {
                Some(n) => n,
                None => neighbors
                    .choose(&mut rand::thread_rng())
                    .cloned()
                    .ok_or_else(|| OverlayError::NoConnection("no connected neighbors".to_string()))?,
            };
            (vec![target], wait)
        }
    };

    send_and_wait(state, cmd, data, uuid, &targets, effective_wait).await
}
