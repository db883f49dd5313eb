//! The inbound dispatcher (§4.3): the single consumer of the transport's
//! inbound stream. Decodes each envelope, routes it by `type`, and is the
//! network-side writer of the waiter table.

use std::sync::Arc;

use crate::{
    broadcast, codec, file_fetch, handlers,
    protocol::{Envelope, TYPE_ACK, TYPE_REQUEST, TYPE_RESPONSE},
    state::{OverlayState, WaiterItem},
    transport::{InboundItem, InboundReceiver, NeighborHandle},
};

/// Drain `inbound` until the shutdown sentinel is seen, dispatching each
/// decoded envelope. Returns once the sentinel arrives or the channel closes.
pub async fn run(state: Arc<OverlayState>, mut inbound: InboundReceiver) {
    while let Some(item) = inbound.recv().await {
        match item {
            InboundItem::Shutdown => break,
            InboundItem::Message(from, bytes) => {
                let envelope = match codec::decode(&bytes) {
                    Ok(e) => e,
                    Err(e) => {
                        tracing::warn!("dropping unreadable message from {from}: {e}");
                        state.transport.remove_connection(&from).await;
                        continue;
                    }
                };
                dispatch(&state, from, envelope).await;
                state.prune();
            }
        }
    }
}

async fn dispatch(state: &Arc<OverlayState>, from: NeighborHandle, envelope: Envelope) {
    match envelope.r#type.as_str() {
        TYPE_REQUEST => dispatch_request(state, from, envelope).await,
        TYPE_RESPONSE | TYPE_ACK => dispatch_reply(state, from, envelope),
        other => tracing::warn!("dropping envelope with unknown type {other} from {from}"),
    }
}

async fn dispatch_request(state: &Arc<OverlayState>, from: NeighborHandle, envelope: Envelope) {
    let Some(cmd) = envelope.cmd() else {
        tracing::warn!("dropping request with unknown cmd {} from {from}", envelope.cmd);
        return;
    };

    use crate::protocol::Cmd;
    match cmd {
        Cmd::PingPong => handlers::ping_pong(state, &from, &envelope).await,
        Cmd::GetPeerInfo => handlers::get_peer_info(state, &from, &envelope).await,
        Cmd::GetPeers => handlers::get_peers(state, &from, &envelope).await,
        Cmd::CheckReachable => handlers::check_reachable(state, &from, &envelope).await,
        Cmd::FileCheck => handlers::file_check(state, &from, &envelope).await,
        Cmd::DirectCmd => {
            tokio::spawn(handlers::direct_cmd(Arc::clone(state), from, envelope));
        }
        Cmd::FileGet => file_fetch::handle_file_get_request(Arc::clone(state), from, envelope).await,
        Cmd::Broadcast => {
            tokio::spawn(broadcast::handle_broadcast_request(Arc::clone(state), from, envelope));
        }
        Cmd::FileDelete => {
            tokio::spawn(broadcast::handle_file_delete_request(Arc::clone(state), from, envelope));
        }
    }
}

/// Store a RESPONSE/ACK payload into the appropriate waiter table, applying
/// the FILE_GET response origin check (§4.5) before acceptance.
fn dispatch_reply(state: &Arc<OverlayState>, from: NeighborHandle, envelope: Envelope) {
    let Some(cmd) = envelope.cmd() else {
        tracing::warn!("dropping reply with unknown cmd {} from {from}", envelope.cmd);
        return;
    };

    use crate::protocol::Cmd;
    if cmd == Cmd::DirectCmd {
        state.direct_waiter.put(envelope.uuid, envelope.data);
        return;
    }

    if cmd == Cmd::FileGet && !state.relay_path.accepts_response_from(envelope.uuid, &from) {
        tracing::warn!(
            "dropping FILE_GET response for uuid {} from unexpected neighbor {from}",
            envelope.uuid
        );
        return;
    }

    state.waiter.put(
        envelope.uuid,
        WaiterItem {
            origin: Some(from),
            payload: envelope.data,
        },
    );
}
