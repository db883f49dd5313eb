//! BROADCAST (§4.6) and administrative FILE_DELETE (§4.7) request handlers.
//!
//! Both flood the overlay with loop suppression via the waiter table
//! (first-seen uuid) and the broadcaster-marker set (own echo).

use std::sync::Arc;

use serde_json::json;

use crate::{
    handlers::send_ack,
    handlers::send_envelope,
    protocol::{BroadcastPayload, Cmd, Envelope, FileDeleteRaw, FileDeleteRequest},
    state::{BroadcastItem, OverlayState, WaiterItem},
    transport::NeighborHandle,
};

/// Reject a FILE_DELETE whose signed timestamp is further than this from now
/// (§4.7).
const FILE_DELETE_MAX_SKEW_SECS: f64 = 30.0;

pub async fn handle_broadcast_request(state: Arc<OverlayState>, from: NeighborHandle, envelope: Envelope) {
    let uuid = envelope.uuid;
    if state.waiter.contains(uuid) {
        return;
    }
    if state.markers.contains(uuid) {
        return;
    }

    let payload = BroadcastPayload {
        value: envelope.data.clone(),
    };
    if !(state.broadcast_check)(&payload) {
        return;
    }

    state.waiter.put(
        uuid,
        WaiterItem {
            origin: Some(from.clone()),
            payload: envelope.data.clone(),
        },
    );
    state.broadcast_fanout.publish(BroadcastItem {
        origin: Some(from.clone()),
        payload: envelope.data.clone(),
    });

    let others: Vec<NeighborHandle> = state
        .transport
        .neighbors()
        .await
        .into_iter()
        .filter(|n| n.id != from.id)
        .collect();

    send_ack(&state, Cmd::Broadcast, json!(others.len()), uuid, &from).await;

    let repropagate = Envelope::request(Cmd::Broadcast, envelope.data.clone(), uuid);
    for neighbor in &others {
        send_envelope(&state, &repropagate, neighbor).await;
    }
}

pub async fn handle_file_delete_request(state: Arc<OverlayState>, from: NeighborHandle, envelope: Envelope) {
    let uuid = envelope.uuid;
    if state.waiter.contains(uuid) {
        return;
    }
    if state.markers.contains(uuid) {
        return;
    }

    let req: FileDeleteRequest = match serde_json::from_value(envelope.data.clone()) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!("malformed FILE_DELETE payload from {from}: {e}");
            return;
        }
    };
    let raw: FileDeleteRaw = match serde_json::from_slice(&req.raw) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!("malformed FILE_DELETE raw field from {from}: {e}");
            return;
        }
    };

    let now = crate::protocol::now_secs();
    if (now - raw.time).abs() > FILE_DELETE_MAX_SKEW_SECS {
        tracing::warn!(
            "dropping FILE_DELETE for {} from {from}: timestamp skew {:.1}s",
            raw.file_hash,
            (now - raw.time).abs()
        );
        return;
    }

    if let Err(e) = state
        .signature_verifier
        .verify(&req.pem, &req.raw, &req.sign)
        .await
    {
        tracing::warn!("dropping FILE_DELETE for {} from {from}: {e}", raw.file_hash);
        return;
    }

    state.waiter.put(
        uuid,
        WaiterItem {
            origin: Some(from.clone()),
            payload: envelope.data.clone(),
        },
    );
    state.blob_store.remove(&raw.file_hash);

    let others: Vec<NeighborHandle> = state
        .transport
        .neighbors()
        .await
        .into_iter()
        .filter(|n| n.id != from.id)
        .collect();
    let repropagate = Envelope::request(Cmd::FileDelete, envelope.data.clone(), uuid);
    for neighbor in &others {
        send_envelope(&state, &repropagate, neighbor).await;
    }
}
