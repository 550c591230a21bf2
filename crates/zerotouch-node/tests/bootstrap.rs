//! End-to-end bootstrapping over the in-memory network.
//!
//! Every test builds a fresh network: an authentication server host with an
//! operator tool next to it, and a device host on the same multicast segment.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::timeout;
use zerotouch_core::security::keychain;
use zerotouch_core::{
    encoding, hmac, ControlParameters, ControlResponse, Name, Pin, ProbeResponse, Signing,
};
use zerotouch_node::sim::{SimNetwork, SimNode};
use zerotouch_node::{
    AuthenticationServer, BootstrapState, CommandTool, DeviceController, DeviceState, Entity,
    LinkType, NodeConfig, NodeError, RecordingObserver,
};

const PIN: &str = "1234";
const WAIT: Duration = Duration::from_secs(5);

fn name(s: &str) -> Name {
    s.parse().unwrap()
}

fn config() -> NodeConfig {
    NodeConfig {
        command_lifetime_ms: 1500,
        probe_lifetime_ms: 400,
        cert_fetch_lifetime_ms: 1000,
        ..NodeConfig::default()
    }
}

fn spawn_entity(node: &SimNode, id: &str, observer: Arc<RecordingObserver>) -> Entity {
    let (face, incoming) = node.attach_app();
    let entity = Entity::builder(name(id), face, node.controller())
        .config(config())
        .observer(observer)
        .build();
    tokio::spawn(entity.clone().run(incoming));
    entity
}

struct Setup {
    as_node: SimNode,
    dev_node: SimNode,
    server: AuthenticationServer,
    device: DeviceController,
    tool: CommandTool,
    as_packets: Arc<RecordingObserver>,
    dev_packets: Arc<RecordingObserver>,
}

async fn setup(device_pin: &str) -> Setup {
    let net = SimNetwork::new();
    let as_node = net.add_node("as");
    let dev_node = net.add_node("device");

    let as_packets = Arc::new(RecordingObserver::new());
    let server = AuthenticationServer::start(spawn_entity(&as_node, "/home/as", Arc::clone(&as_packets)))
        .await
        .unwrap();
    let dev_packets = Arc::new(RecordingObserver::new());
    let device = DeviceController::start(
        spawn_entity(&dev_node, "/home/dev", Arc::clone(&dev_packets)),
        Pin::from(device_pin),
        false,
    )
    .await
    .unwrap();

    let (operator_face, _) = as_node.attach_app();
    let tool = CommandTool::new(operator_face, name("/home/operator")).with_lifetime(Duration::from_millis(1500));

    Setup {
        as_node,
        dev_node,
        server,
        device,
        tool,
        as_packets,
        dev_packets,
    }
}

/// Send a probe carrying `params` from the server's node, signed with `pin`,
/// and decode the device's answer as a status
async fn probe_device(s: &Setup, params: &ControlParameters, pin: &Pin) -> Vec<u8> {
    let entity = s.server.entity();
    let probe = entity
        .make_command(name("/localhop/probe-device"), params, &Signing::SharedSecret(pin.clone()))
        .unwrap();
    entity
        .broadcast(probe, |data| hmac::verify_data(data, pin))
        .await
        .unwrap()
}

async fn device_finished(device: &DeviceController) -> DeviceState {
    let mut states = device.subscribe();
    let state = *timeout(WAIT, states.wait_for(|s| s.is_terminal()))
        .await
        .unwrap()
        .unwrap();
    state
}

#[tokio::test]
async fn test_device_is_bootstrapped() {
    let s = setup(PIN).await;

    let response = s.tool.add_device(&Pin::from(PIN)).await;
    assert_eq!(response.code(), 200, "{response}");
    assert_eq!(device_finished(&s.device).await, DeviceState::Done);

    let attempt = s.server.attempts().pop().unwrap();
    let mut states = attempt.subscribe();
    timeout(WAIT, states.wait_for(|s| *s == BootstrapState::Done))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(attempt.device(), Some(name("/home/dev")));

    // The installed certificate is the one the server issued for the device key.
    let anchor = s.server.entity().default_certificate().unwrap();
    let key = s.device.entity().default_key().unwrap();
    let issued = s.device.entity().default_certificate().unwrap();
    assert_eq!(issued.key_name(), *key.name());
    assert_eq!(issued.issuer(), Some(anchor.name()));
    assert_eq!(issued.public_key(), key.public_key());
    assert_eq!(issued.validity(), anchor.validity());
    assert!(keychain::verify_data(issued.data(), anchor.public_key()));
    assert!(s
        .device
        .entity()
        .trust_anchors()
        .iter()
        .any(|c| c.name() == anchor.name()));

    // One face each way, with the other side's name routed over it.
    let as_faces = s.server.entity().created_faces();
    assert_eq!(as_faces.len(), 1);
    assert!(s
        .as_node
        .routes()
        .iter()
        .any(|r| r.name == name("/home/dev") && r.face_id == as_faces[0]));
    let dev_faces = s.device.entity().created_faces();
    assert_eq!(dev_faces.len(), 1);
    assert!(s
        .dev_node
        .routes()
        .iter()
        .any(|r| r.name == name("/home/as") && r.face_id == dev_faces[0]));
}

#[tokio::test]
async fn test_probe_carries_server_name_and_no_pin() {
    let s = setup(PIN).await;
    s.tool.add_device(&Pin::from(PIN)).await;

    let probes: Vec<_> = s
        .as_packets
        .interests_out()
        .into_iter()
        .filter(|i| name("/localhop/probe-device").is_prefix_of(i.name()))
        .collect();
    assert_eq!(probes.len(), 1);
    assert!(hmac::verify_interest(&probes[0], &Pin::from(PIN)));
    let params = ControlParameters::from_command_interest(&probes[0]).unwrap();
    assert_eq!(params.name(), Some(&name("/home/as")));
    assert!(!params.has_pin_code());
}

#[tokio::test]
async fn test_wrong_pin_times_out() {
    let s = setup(PIN).await;

    let response = s.tool.add_device(&Pin::from("9999")).await;
    assert_eq!((response.code(), response.text()), (1, "Timeout"));
    assert_eq!(s.device.state(), DeviceState::Idle);
    assert!(s.as_node.create_face_log().is_empty());
    assert_eq!(
        s.server.attempts().pop().map(|a| a.state()),
        Some(BootstrapState::Failed)
    );
}

#[tokio::test]
async fn test_invalid_add_device_parameters() {
    let s = setup(PIN).await;
    let prefix = name("/localhost/add-device");

    let with_name = ControlParameters::new().set_pin_code(PIN).set_name(name("/x"));
    let response = s.tool.issue_command(prefix.clone(), &with_name).await;
    assert_eq!(response.code(), 0);

    let without_pin = ControlParameters::new();
    let response = s.tool.issue_command(prefix, &without_pin).await;
    assert_eq!(response.code(), 0);

    assert!(s
        .as_packets
        .interests_out()
        .iter()
        .all(|i| !name("/localhop").is_prefix_of(i.name())));
}

#[tokio::test]
async fn test_bad_probe_content() {
    #[derive(Serialize)]
    struct NameOnly {
        name: Name,
    }

    let s = setup(PIN).await;
    let pin = Pin::from(PIN);

    let response = s.server.handle_probe_response(&[0x01, 0x02], &pin).await;
    assert_eq!(response.code(), 2);

    let content = encoding::encode(&NameOnly {
        name: name("/home/dev"),
    })
    .unwrap();
    let response = s.server.handle_probe_response(&content, &pin).await;
    assert_eq!(response.code(), 3);
}

#[tokio::test]
async fn test_no_address_means_no_face() {
    let s = setup(PIN).await;
    let content = ProbeResponse {
        name: name("/home/dev"),
        uris: Vec::new(),
    }
    .encode()
    .unwrap();

    let response = s.server.handle_probe_response(&content, &Pin::from(PIN)).await;
    assert_eq!(response.code(), 4);
    assert!(s.as_node.create_face_log().is_empty());
}

#[tokio::test]
async fn test_addresses_are_tried_last_first() {
    let s = setup(PIN).await;
    let device = format!("tcp4://{}", s.dev_node.address());
    let content = ProbeResponse {
        name: name("/home/dev"),
        uris: vec![device.clone(), "not a uri".into(), "tcp4://10.9.9.9".into()],
    }
    .encode()
    .unwrap();

    let response = s.server.handle_probe_response(&content, &Pin::from(PIN)).await;
    assert_eq!(response.code(), 200, "{response}");
    assert_eq!(
        s.as_node.create_face_log(),
        vec!["tcp4://10.9.9.9:6363".to_string(), format!("{device}:6363")]
    );
}

#[tokio::test]
async fn test_unreachable_addresses() {
    let s = setup(PIN).await;
    let response = s
        .server
        .connect_to_device(vec!["tcp4://10.9.9.8".into(), "tcp4://10.9.9.9".into()])
        .await
        .unwrap_err();
    assert_eq!(response.code(), 4);
    assert_eq!(s.as_node.create_face_log().len(), 2);
}

#[tokio::test]
async fn test_existing_face_counts_as_connected() {
    let s = setup(PIN).await;
    let uri = format!("tcp4://{}", s.dev_node.address());

    let first = s.server.connect_to_device(vec![uri.clone()]).await.unwrap();
    let second = s.server.connect_to_device(vec![uri]).await.unwrap();
    assert_eq!(first.face_id, second.face_id);
}

#[tokio::test]
async fn test_route_failure_is_reported() {
    let s = setup(PIN).await;
    let uri = format!("tcp4://{}", s.dev_node.address());
    let face = s.server.connect_to_device(vec![uri.clone()]).await.unwrap();
    s.as_node.refuse_routes_on(face.face_id);

    let content = ProbeResponse {
        name: name("/home/dev"),
        uris: vec![uri],
    }
    .encode()
    .unwrap();
    let response = s.server.handle_probe_response(&content, &Pin::from(PIN)).await;
    assert_eq!((response.code(), response.text()), (403, "route refused"));
}

#[tokio::test]
async fn test_device_face_query_failure_is_forwarded() {
    let s = setup(PIN).await;
    s.dev_node.fail_face_queries(503, "forwarder busy");

    let response = s.tool.add_device(&Pin::from(PIN)).await;
    // The device answers with a status instead of a probe response.
    assert_eq!(response.code(), 2);
    assert!(s.as_node.create_face_log().is_empty());
}

#[tokio::test]
async fn test_issued_certificate_matches_request() {
    let s = setup(PIN).await;
    let device_key = s.device.entity().default_key().unwrap();
    let params = ControlParameters::new()
        .set_name(device_key.name().clone())
        .set_public_key(device_key.public_key().to_vec());

    let anchor = s.server.issue_certificate(&params).await.unwrap();
    assert_eq!(anchor, s.server.entity().default_certificate().unwrap());

    let missing_key = ControlParameters::new().set_name(device_key.name().clone());
    let response = s.server.issue_certificate(&missing_key).await.unwrap_err();
    assert_eq!(response.code(), 0);
}

#[tokio::test]
async fn test_zoned_device_address_is_tried() {
    let s = setup(PIN).await;
    let response = s
        .server
        .connect_to_device(vec!["tcp6://[fe80::1%25eth0]".into()])
        .await
        .unwrap_err();
    assert_eq!(response.code(), 4);
    assert_eq!(s.as_node.create_face_log(), vec!["tcp6://[fe80::1%25eth0]:6363".to_string()]);
}

#[tokio::test]
async fn test_probe_without_prober_name() {
    let s = setup(PIN).await;
    let content = probe_device(&s, &ControlParameters::new(), &Pin::from(PIN)).await;
    let response = ControlResponse::wire_decode(&content).unwrap();
    assert_eq!(response.code(), 0);
    assert_eq!(s.device.state(), DeviceState::Idle);
}

#[tokio::test]
async fn test_shutdown_stops_waiting_for_the_prober() {
    let s = setup(PIN).await;
    let params = ControlParameters::new().set_name(name("/home/as"));
    let content = probe_device(&s, &params, &Pin::from(PIN)).await;
    assert_eq!(ProbeResponse::decode_name(&content).unwrap(), name("/home/dev"));
    assert_eq!(s.device.state(), DeviceState::AwaitingFace);

    s.device.shutdown().await;
    assert!(s.device.entity().is_shut_down());

    // The server connects anyway; nobody on the device side reacts.
    let uri = format!("tcp4://{}", s.dev_node.address());
    s.server.connect_to_device(vec![uri]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(s.device.entity().created_faces().is_empty());
    assert_eq!(s.device.state(), DeviceState::AwaitingFace);
    assert!(s
        .dev_packets
        .interests_out()
        .iter()
        .all(|i| !i.name().to_string().contains("apply-cert")));
}

#[tokio::test]
async fn test_undecodable_anchor_fails_the_device() {
    let s = setup(PIN).await;
    let key = s.device.entity().default_key().unwrap();
    let err = s
        .device
        .handle_apply_response(key.name(), 0, &[0x01, 0x02])
        .await
        .unwrap_err();
    assert!(!err.is_timeout(), "{err}");
    assert_eq!(s.device.state(), DeviceState::Failed);
    assert!(s.device.entity().trust_anchors().is_empty());
}

#[tokio::test]
async fn test_certificate_fetch_failure_is_terminal() {
    let s = setup(PIN).await;
    let key = s.device.entity().default_key().unwrap();
    let before = s.device.entity().default_certificate().unwrap();
    let anchor = s.server.entity().default_certificate().unwrap();
    let multicast = s
        .dev_node
        .faces()
        .into_iter()
        .find(|f| f.link_type == LinkType::MultiAccess)
        .unwrap();

    // Nothing was published for the key, so the fetch goes unanswered.
    let err = s
        .device
        .handle_apply_response(key.name(), multicast.face_id, &anchor.wire_encode().unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, NodeError::Timeout | NodeError::Nack(_)), "{err}");
    assert_eq!(s.device.state(), DeviceState::Failed);
    assert_eq!(s.device.entity().default_certificate().unwrap(), before);
}
