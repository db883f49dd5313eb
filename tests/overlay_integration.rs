//! Multi-node integration tests.
//!
//! Every test wires two or three `OverlayClient`s directly together through an
//! in-process fake `Transport` — no real sockets, no libp2p, no external
//! relay. Each node gets its own `tempfile::TempDir` for its peer registry,
//! blob store, and pem directory so tests never touch each other's state.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use overlay_p2p::{
    Cmd, Header, InboundItem, InboundReceiver, InboundSender, NeighborHandle, OverlayClient,
    OverlayConfig, OverlayError, Transport,
};
use rsa::{pkcs8::EncodePublicKey, RsaPrivateKey, RsaPublicKey};
use serde_json::json;
use tokio::sync::mpsc;

// ── Fake transport ────────────────────────────────────────────────────────────

/// An in-process transport: `send_msg` delivers straight into the target
/// node's inbound channel, wrapped with the sending node's own advertised
/// handle as `from`. Peers are wired in after construction, so a test can
/// build any topology (a direct pair, or a three-node chain with no direct
/// edge between the ends).
struct FakeTransport {
    header: Header,
    self_handle: NeighborHandle,
    peers: Mutex<HashMap<u64, (NeighborHandle, InboundSender)>>,
}

impl FakeTransport {
    fn new(header: Header, self_handle: NeighborHandle) -> Self {
        FakeTransport {
            header,
            self_handle,
            peers: Mutex::new(HashMap::new()),
        }
    }

    fn add_peer(&self, handle: NeighborHandle, tx: InboundSender) {
        self.peers.lock().unwrap().insert(id_key(&handle), (handle, tx));
    }
}

fn id_key(handle: &NeighborHandle) -> u64 {
    // NeighborId has no public accessor beyond Display; its rendered form
    // ("neighbor#N") is stable and unique per handle, so it doubles as a map key.
    handle
        .id
        .to_string()
        .trim_start_matches("neighbor#")
        .parse()
        .unwrap()
}

#[async_trait]
impl Transport for FakeTransport {
    async fn start(&self) -> Result<(), OverlayError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), OverlayError> {
        Ok(())
    }

    async fn create_connection(&self, _host: &str, _port: u16) -> bool {
        false
    }

    async fn remove_connection(&self, neighbor: &NeighborHandle) {
        self.peers.lock().unwrap().remove(&id_key(neighbor));
    }

    async fn send_msg(&self, bytes: Vec<u8>, neighbor: &NeighborHandle) -> Result<(), OverlayError> {
        let tx = self
            .peers
            .lock()
            .unwrap()
            .get(&id_key(neighbor))
            .map(|(_, tx)| tx.clone())
            .ok_or_else(|| OverlayError::NoConnection(neighbor.to_string()))?;
        tx.send(InboundItem::Message(self.self_handle.clone(), bytes))
            .await
            .map_err(|_| OverlayError::Shutdown)
    }

    async fn neighbors(&self) -> Vec<NeighborHandle> {
        self.peers.lock().unwrap().values().map(|(h, _)| h.clone()).collect()
    }

    async fn peer_format_to_neighbor(&self, host: &str, port: u16) -> Option<NeighborHandle> {
        self.peers
            .lock()
            .unwrap()
            .values()
            .map(|(h, _)| h.clone())
            .find(|h| h.host == host && h.port == port)
    }

    fn local_header(&self) -> Header {
        self.header.clone()
    }
}

// ── Node harness ──────────────────────────────────────────────────────────────

struct Node {
    client: OverlayClient,
    transport: Arc<FakeTransport>,
    self_handle: NeighborHandle,
    _data_dir: tempfile::TempDir,
}

fn header(name: &str, port: u16) -> Header {
    Header {
        name: name.to_string(),
        p2p_port: port,
        p2p_accept: true,
    }
}

fn make_node(name: &str, port: u16, broadcast_check: Option<Arc<dyn Fn(&overlay_p2p::protocol::BroadcastPayload) -> bool + Send + Sync>>) -> (Node, InboundSender) {
    let hdr = header(name, port);
    let self_handle = NeighborHandle::new("127.0.0.1", port, hdr.clone());
    let transport = Arc::new(FakeTransport::new(hdr.clone(), self_handle.clone()));
    let (tx, rx): (InboundSender, InboundReceiver) = mpsc::channel(64);
    let data_dir = tempfile::tempdir().unwrap();

    let mut config = OverlayConfig::new(8, "test", hdr);
    config.data_dir = Some(data_dir.path().to_path_buf());
    config.test_suffix = true;
    config.need_connection = 1;

    let client = OverlayClient::new(
        &config,
        transport.clone() as Arc<dyn Transport>,
        rx,
        tx.clone(),
        None,
        None,
        broadcast_check,
    )
    .expect("client construction should succeed");

    (
        Node {
            client,
            transport,
            self_handle,
            _data_dir: data_dir,
        },
        tx,
    )
}

fn connect(a: &Node, a_tx: &InboundSender, b: &Node, b_tx: &InboundSender) {
    a.transport.add_peer(b.self_handle.clone(), b_tx.clone());
    b.transport.add_peer(a.self_handle.clone(), a_tx.clone());
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn ping_pong_round_trips_through_two_nodes() {
    let (a, a_tx) = make_node("a", 4101, None);
    let (b, b_tx) = make_node("b", 4102, None);
    connect(&a, &a_tx, &b, &b_tx);

    a.client.start(true, false).await.unwrap();
    b.client.start(true, false).await.unwrap();

    let (_, payload) = a
        .client
        .send_command(Cmd::PingPong, json!(42), None, Duration::from_secs(2))
        .await
        .expect("ping should get a pong back");

    assert_eq!(payload["ping"], json!(42));
    assert!(payload["pong"].as_f64().unwrap() > 0.0);
}

#[tokio::test]
async fn broadcast_is_accepted_and_fanned_out_when_the_check_allows_it() {
    let accept_all: Arc<dyn Fn(&overlay_p2p::protocol::BroadcastPayload) -> bool + Send + Sync> =
        Arc::new(|_| true);
    let (a, a_tx) = make_node("a", 4111, None);
    let (b, b_tx) = make_node("b", 4112, Some(accept_all));
    connect(&a, &a_tx, &b, &b_tx);

    a.client.start(true, false).await.unwrap();
    b.client.start(true, false).await.unwrap();

    let mut b_feed = b.client.state().broadcast_fanout.subscribe();

    a.client
        .send_command(Cmd::Broadcast, json!({"msg": "hello overlay"}), None, Duration::from_secs(2))
        .await
        .expect("broadcast should be acked");

    let item = tokio::time::timeout(Duration::from_secs(2), b_feed.recv())
        .await
        .expect("b should see the broadcast")
        .unwrap();
    assert_eq!(item.payload["msg"], "hello overlay");
}

#[tokio::test]
async fn broadcast_is_dropped_when_the_check_denies_it() {
    // Default broadcast_check is deny-all (§12); b should never fan it out.
    let (a, a_tx) = make_node("a", 4121, None);
    let (b, b_tx) = make_node("b", 4122, None);
    connect(&a, &a_tx, &b, &b_tx);

    a.client.start(true, false).await.unwrap();
    b.client.start(true, false).await.unwrap();

    let mut b_feed = b.client.state().broadcast_fanout.subscribe();

    let result = a
        .client
        .send_command(Cmd::Broadcast, json!({"msg": "should be denied"}), None, Duration::from_secs(1))
        .await;
    assert!(result.is_err(), "with nobody acking, the broadcast should time out");
    assert!(tokio::time::timeout(Duration::from_millis(100), b_feed.recv())
        .await
        .is_err());
}

#[tokio::test]
async fn file_fetch_relays_through_an_intermediate_node() {
    // a -- b -- c: c holds the file, a has no direct edge to c.
    let (a, a_tx) = make_node("a", 4131, None);
    let (b, b_tx) = make_node("b", 4132, None);
    let (c, c_tx) = make_node("c", 4133, None);
    connect(&a, &a_tx, &b, &b_tx);
    connect(&b, &b_tx, &c, &c_tx);

    a.client.start(true, false).await.unwrap();
    b.client.start(true, false).await.unwrap();
    c.client.start(true, false).await.unwrap();

    let bytes = b"the file c is holding onto".to_vec();
    let hash = c.client.share_file(&bytes).unwrap();

    let fetched = a
        .client
        .get_file(&hash, false)
        .await
        .expect("a should be able to fetch through b");
    match fetched {
        overlay_p2p::FileGetOutcome::Bytes(got) => assert_eq!(got, bytes),
        overlay_p2p::FileGetOutcome::Have(_) => panic!("expected bytes, not a have-check result"),
    }
}

#[tokio::test]
async fn file_check_only_reports_local_presence_without_touching_the_network() {
    let (a, _a_tx) = make_node("a", 4141, None);
    a.client.start(true, false).await.unwrap();

    let bytes = b"local only".to_vec();
    let hash = a.client.share_file(&bytes).unwrap();

    match a.client.get_file(&hash, true).await.unwrap() {
        overlay_p2p::FileGetOutcome::Have(true) => {}
        _ => panic!("expected Have(true) for a locally stored blob"),
    }
    match a.client.get_file("not-a-real-hash", true).await.unwrap() {
        overlay_p2p::FileGetOutcome::Have(false) => {}
        _ => panic!("expected Have(false) for an unknown hash"),
    }
}

#[tokio::test]
async fn get_file_with_no_neighbors_fails_immediately() {
    let (a, _a_tx) = make_node("a", 4151, None);
    a.client.start(true, false).await.unwrap();

    let err = a.client.get_file("deadbeefcafe", false).await.unwrap_err();
    match err {
        OverlayError::FileReceive(_) => {}
        other => panic!("expected FileReceive, got {other:?}"),
    }
}

#[tokio::test]
async fn send_command_rejects_a_wait_shorter_than_the_minimum() {
    let (a, a_tx) = make_node("a", 4161, None);
    let (b, b_tx) = make_node("b", 4162, None);
    connect(&a, &a_tx, &b, &b_tx);
    a.client.start(true, false).await.unwrap();
    b.client.start(true, false).await.unwrap();

    let err = a
        .client
        .send_command(Cmd::PingPong, json!(null), None, Duration::from_millis(500))
        .await
        .unwrap_err();
    match err {
        OverlayError::NoConnection(_) => {}
        other => panic!("expected a rejection for the too-short wait, got {other:?}"),
    }
}

#[tokio::test]
async fn administrative_delete_propagates_to_neighbors_after_signature_verification() {
    let mut rng = rsa::rand_core::OsRng;
    let private = RsaPrivateKey::new(&mut rng, 2048).unwrap();
    let public = RsaPublicKey::from(&private);
    let public_pem = public.to_public_key_pem(Default::default()).unwrap();
    let private_pem = {
        use rsa::pkcs8::EncodePrivateKey;
        private.to_pkcs8_pem(Default::default()).unwrap().to_string()
    };

    let (a, a_tx) = make_node("a", 4171, None);

    // b needs a non-default signature verifier (pointed at a directory
    // holding the master public key), so it's built by hand here instead of
    // through `make_node`, which always installs the default RSA verifier
    // rooted at the node's own (empty) pem directory.
    let b_pem_dir = tempfile::tempdir().unwrap();
    std::fs::write(b_pem_dir.path().join("master.pem"), &public_pem).unwrap();
    let hdr_b = header("b", 4172);
    let self_handle_b = NeighborHandle::new("127.0.0.1", 4172, hdr_b.clone());
    let transport_b = Arc::new(FakeTransport::new(hdr_b.clone(), self_handle_b.clone()));
    let (tx_b, rx_b): (InboundSender, InboundReceiver) = mpsc::channel(64);
    let data_dir_b = tempfile::tempdir().unwrap();
    let mut config_b = OverlayConfig::new(8, "test", hdr_b);
    config_b.data_dir = Some(data_dir_b.path().to_path_buf());
    config_b.test_suffix = true;
    let verifier = Arc::new(overlay_p2p::RsaSignatureVerifier::new(b_pem_dir.path()));
    let client_b = OverlayClient::new(
        &config_b,
        transport_b.clone() as Arc<dyn Transport>,
        rx_b,
        tx_b.clone(),
        None,
        Some(verifier),
        None,
    )
    .unwrap();

    a.transport.add_peer(self_handle_b.clone(), tx_b.clone());
    transport_b.add_peer(a.self_handle.clone(), a_tx.clone());

    a.client.start(true, false).await.unwrap();
    client_b.start(true, false).await.unwrap();

    let bytes = b"file under administrative control".to_vec();
    let hash = client_b.share_file(&bytes).unwrap();
    assert!(matches!(
        client_b.get_file(&hash, true).await.unwrap(),
        overlay_p2p::FileGetOutcome::Have(true)
    ));

    a.client
        .remove_file_by_master(&private_pem, &hash, "master")
        .await
        .unwrap();

    // FILE_DELETE propagation is fire-and-forget; give b's dispatcher a moment
    // to process the signed request and delete the blob.
    for _ in 0..50 {
        if matches!(
            client_b.get_file(&hash, true).await.unwrap(),
            overlay_p2p::FileGetOutcome::Have(false)
        ) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("b never deleted the blob after the administrative delete");
}
