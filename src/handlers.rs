//! Request handlers for the simple, non-relaying commands (§4.4): PING_PONG,
//! GET_PEER_INFO, GET_PEERS, CHECK_REACHABLE, FILE_CHECK, DIRECT_CMD.
//!
//! BROADCAST and FILE_DELETE live in [`crate::broadcast`]; FILE_GET lives in
//! [`crate::file_fetch`] — both are intricate enough to earn their own module.

use std::{sync::Arc, time::Duration};

use serde_json::json;
use tokio::time::sleep;

use crate::{
    codec,
    protocol::{
        Cmd, CheckReachableRequest, DirectCmdRequest, Envelope, FileCheckRequest,
        FileCheckResponse, GetPeersResponse, PeerKey, PingPongResponse,
    },
    state::{DirectItem, OverlayState},
    transport::NeighborHandle,
};

/// Spin interval/count for DIRECT_CMD's external-reply wait (§4.4): up to
/// 200 x 20ms ≈ 4s.
const DIRECT_CMD_POLL_INTERVAL: Duration = Duration::from_millis(20);
const DIRECT_CMD_MAX_POLLS: u32 = 200;

async fn reply(state: &Arc<OverlayState>, cmd: Cmd, data: serde_json::Value, uuid: u32, to: &NeighborHandle) {
    let envelope = Envelope::response(cmd, data, uuid);
    send_envelope(state, &envelope, to).await;
}

pub(crate) async fn send_ack(state: &Arc<OverlayState>, cmd: Cmd, data: serde_json::Value, uuid: u32, to: &NeighborHandle) {
    let envelope = Envelope::ack(cmd, data, uuid);
    send_envelope(state, &envelope, to).await;
}

pub(crate) async fn send_envelope(state: &Arc<OverlayState>, envelope: &Envelope, to: &NeighborHandle) {
    match codec::encode(envelope) {
        Ok(bytes) => {
            if let Err(e) = state.transport.send_msg(bytes, to).await {
                tracing::warn!("sending {} to {to} failed: {e}", envelope.cmd);
            }
        }
        Err(e) => tracing::warn!("encoding {} response failed: {e}", envelope.cmd),
    }
}

pub async fn ping_pong(state: &Arc<OverlayState>, from: &NeighborHandle, envelope: &Envelope) {
    let response = PingPongResponse {
        ping: envelope.data.clone(),
        pong: crate::protocol::now_secs(),
    };
    reply(
        state,
        Cmd::PingPong,
        serde_json::to_value(response).unwrap_or(json!(null)),
        envelope.uuid,
        from,
    )
    .await;
}

pub async fn get_peer_info(state: &Arc<OverlayState>, from: &NeighborHandle, envelope: &Envelope) {
    let header = state.transport.local_header();
    reply(
        state,
        Cmd::GetPeerInfo,
        serde_json::to_value(header).unwrap_or(json!(null)),
        envelope.uuid,
        from,
    )
    .await;
}

pub async fn get_peers(state: &Arc<OverlayState>, from: &NeighborHandle, envelope: &Envelope) {
    let near = state
        .transport
        .neighbors()
        .await
        .into_iter()
        .map(|n| (PeerKey::new(n.host.clone(), n.header.p2p_port), n.header.clone()))
        .collect();
    let peer = state
        .peer_registry
        .all()
        .into_iter()
        .map(|(key, record)| (key, record.header))
        .collect();
    let response = GetPeersResponse { near, peer };
    reply(
        state,
        Cmd::GetPeers,
        serde_json::to_value(response).unwrap_or(json!(null)),
        envelope.uuid,
        from,
    )
    .await;
}

pub async fn check_reachable(state: &Arc<OverlayState>, from: &NeighborHandle, envelope: &Envelope) {
    let req: CheckReachableRequest = serde_json::from_value(envelope.data.clone()).unwrap_or_default();
    let port = req.port.filter(|p| *p != 0).unwrap_or(from.header.p2p_port);
    let reachable = state.reachability.probe(&from.host, port).await;
    reply(state, Cmd::CheckReachable, json!(reachable), envelope.uuid, from).await;
}

pub async fn file_check(state: &Arc<OverlayState>, from: &NeighborHandle, envelope: &Envelope) {
    let req: Result<FileCheckRequest, _> = serde_json::from_value(envelope.data.clone());
    let Ok(req) = req else {
        tracing::warn!("malformed FILE_CHECK payload from {from}");
        return;
    };
    let response = FileCheckResponse {
        have: state.blob_store.has(&req.hash),
        asked: state.relay_path.contains(req.uuid),
    };
    reply(
        state,
        Cmd::FileCheck,
        serde_json::to_value(response).unwrap_or(json!(null)),
        envelope.uuid,
        from,
    )
    .await;
}

pub async fn direct_cmd(state: Arc<OverlayState>, from: NeighborHandle, envelope: Envelope) {
    let req: DirectCmdRequest = match serde_json::from_value(envelope.data.clone()) {
        Ok(r) => r,
        Err(_) => DirectCmdRequest {
            data: envelope.data.clone(),
        },
    };
    state.direct_fanout.publish(DirectItem {
        uuid: envelope.uuid,
        data: req.data,
    });

    for _ in 0..DIRECT_CMD_MAX_POLLS {
        if let Some(payload) = state.direct_waiter.get(envelope.uuid) {
            reply(&state, Cmd::DirectCmd, payload, envelope.uuid, &from).await;
            return;
        }
        sleep(DIRECT_CMD_POLL_INTERVAL).await;
    }
    reply(&state, Cmd::DirectCmd, json!(null), envelope.uuid, &from).await;
}
