//! Binding resolution and session activation

use super::fakes::{lan_interface, FakeCaptureEngine, FakeProcessTable};
use super::*;
use rebind::capture::{AdapterHandle, CaptureInterface, Decision, Direction, WanType};
use rebind::Error;

fn session(capture: &Arc<FakeCaptureEngine>) -> Session {
    let config = RebindConfig::resolve(
        capture.interfaces(),
        &default_adapter(),
        &rebind_adapter(),
        "game.exe",
    )
    .unwrap();
    let engine = RebindEngine::new(
        Arc::new(config),
        Arc::new(FakeProcessTable::new()),
        Arc::new(RebindStats::new()),
    );
    Session::new(capture.clone(), Arc::new(engine))
}

#[test]
fn test_session_activates_both_slots() {
    let capture = Arc::new(capture_engine());
    let session = session(&capture);
    assert!(!session.is_active());

    session.start().unwrap();
    assert!(session.is_active());
    assert_eq!(capture.active(0), Some(AdapterHandle(2)));
    assert_eq!(capture.active(1), Some(AdapterHandle(3)));
}

#[test]
fn test_rebind_slot_failure_leaves_nothing_running() {
    let capture = Arc::new(capture_engine());
    capture.fail_on(AdapterHandle(3));
    let session = session(&capture);

    let err = session.start().unwrap_err();
    assert!(matches!(err, Error::ActivationFailed { ref role, .. } if role == "rebind"));
    assert!(!session.is_active());
    assert_eq!(capture.active(0), None);
    assert_eq!(capture.active(1), None);
}

#[test]
fn test_default_slot_failure_reported() {
    let capture = Arc::new(capture_engine());
    capture.fail_on(AdapterHandle(2));
    let session = session(&capture);

    let err = session.start().unwrap_err();
    assert!(matches!(err, Error::ActivationFailed { ref name, .. } if name == "eth0"));
    assert_eq!(capture.active(1), None);
}

#[test]
fn test_stop_twice_is_harmless() {
    let capture = Arc::new(capture_engine());
    let session = session(&capture);
    session.start().unwrap();

    session.stop();
    session.stop();
    assert!(!session.is_active());

    let mut frame = udp_frame(DEFAULT_IP, 5000, REMOTE_IP, 27015);
    assert_eq!(capture.deliver(0, Direction::Outbound, &mut frame), None);
}

#[test]
fn test_session_restarts_after_stop() {
    let capture = Arc::new(capture_engine());
    let session = session(&capture);

    session.start().unwrap();
    session.stop();
    session.start().unwrap();

    let mut frame = udp_frame(REMOTE_IP, 27015, REBIND_IP, 5000);
    assert_eq!(
        capture.deliver(1, Direction::Inbound, &mut frame),
        Some(Decision::Route)
    );
}

#[test]
fn test_dropping_session_stops_capture() {
    let capture = Arc::new(capture_engine());
    {
        let session = session(&capture);
        session.start().unwrap();
    }
    assert_eq!(capture.active(0), None);
    assert_eq!(capture.active(1), None);
}

#[test]
fn test_missing_rebind_interface_named() {
    let interfaces = vec![lan_interface(2, "eth0", MAC_A)];
    let err = RebindConfig::resolve(&interfaces, &default_adapter(), &rebind_adapter(), "game.exe")
        .unwrap_err();
    assert!(matches!(err, Error::AdapterNotFound { ref role } if role == "rebind"));
    assert!(err.to_string().contains("rebind"));
}

#[test]
fn test_ppp_default_adapter_bound_by_address() {
    let ppp_ip = Ipv4Addr::new(100, 64, 3, 7);
    let interfaces = vec![
        CaptureInterface {
            handle: AdapterHandle(9),
            internal_name: "ppp0".to_string(),
            hw_address: MacAddr::ZERO,
            virtual_links: Some(vec![ppp_ip]),
            wan_type: WanType::Ip,
        },
        lan_interface(3, "wlan0", MAC_B),
    ];
    let dialup = HostAdapter {
        adapter_name: "dsl-provider".to_string(),
        friendly_name: "dsl-provider".to_string(),
        description: "PPP".to_string(),
        if_type: IfType::Ppp,
        unicast: vec![ppp_ip],
        gateways: Vec::new(),
    };

    let config = RebindConfig::resolve(&interfaces, &dialup, &rebind_adapter(), "game.exe").unwrap();
    assert_eq!(config.default_binding().handle, AdapterHandle(9));
    assert_eq!(config.default_binding().ip, ppp_ip);
}

#[test]
fn test_tunnel_rebind_target_rejected() {
    let interfaces = vec![
        lan_interface(2, "eth0", MAC_A),
        CaptureInterface {
            wan_type: WanType::Tunnel,
            ..lan_interface(3, "wlan0", MacAddr::ZERO)
        },
    ];
    let err = RebindConfig::resolve(&interfaces, &default_adapter(), &rebind_adapter(), "game.exe")
        .unwrap_err();
    assert!(matches!(err, Error::UnsupportedTunnel { ref name } if name == "wlan0"));
}
