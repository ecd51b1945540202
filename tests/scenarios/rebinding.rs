//! Frame rewriting through a started session

use super::fakes::FakeProcessTable;
use super::*;
use rebind::capture::{CaptureLog, Decision, Direction, PcapWriter};
use rebind::process::TcpSession;
use rebind::protocol::ethernet::Frame;
use rebind::protocol::ipv4::Ipv4Header;
use rebind::protocol::tcp::TcpHeader;
use rebind::protocol::udp::UdpHeader;
use std::net::SocketAddrV4;

fn game_socket() -> SocketAddrV4 {
    SocketAddrV4::new(DEFAULT_IP, 5000)
}

fn outbound(harness: &Harness, frame: &mut [u8]) -> Decision {
    harness
        .capture
        .deliver(0, Direction::Outbound, frame)
        .expect("slot 0 active")
}

fn inbound(harness: &Harness, frame: &mut [u8]) -> Decision {
    harness
        .capture
        .deliver(1, Direction::Inbound, frame)
        .expect("slot 1 active")
}

/// Scenario A: game.exe UDP leaves through the rebind adapter
#[test]
fn test_scenario_a_outbound_udp_rebound() {
    let harness = Harness::start(FakeProcessTable::new().with_udp(game_socket(), "game.exe", 4242));
    let mut frame = udp_frame(DEFAULT_IP, 5000, REMOTE_IP, 27015);

    assert_eq!(outbound(&harness, &mut frame), Decision::Route);

    let eth = Frame::parse(&frame).unwrap();
    assert_eq!(eth.src_mac(), MAC_B);
    assert_eq!(eth.dst_mac(), MAC_G);

    let ip = Ipv4Header::parse(eth.payload()).unwrap();
    assert_eq!(ip.src_addr(), REBIND_IP);
    assert_eq!(ip.dst_addr(), REMOTE_IP);
    assert!(ip.validate_checksum());

    let udp = UdpHeader::parse(ip.payload()).unwrap();
    assert_eq!((udp.src_port(), udp.dst_port()), (5000, 27015));
    assert_eq!(udp.payload(), b"state update");
    assert!(udp.validate_checksum(REBIND_IP, REMOTE_IP));

    // Injected on the rebind adapter and logged
    assert_eq!(harness.capture.injected(), vec![(1, frame.clone())]);
    assert_eq!(harness.log.frames(), vec![frame]);
    assert_eq!(harness.stats.outbound_routed.get(), 1);
    assert_eq!(harness.table.refreshes(), 0);
}

/// Scenario B: the reply is moved back to the default adapter
#[test]
fn test_scenario_b_inbound_udp_restored() {
    let harness = Harness::start(FakeProcessTable::new());
    let mut frame = udp_frame(REMOTE_IP, 27015, REBIND_IP, 5000);

    assert_eq!(inbound(&harness, &mut frame), Decision::Route);

    let eth = Frame::parse(&frame).unwrap();
    assert_eq!(eth.dst_mac(), MAC_A);
    assert_eq!(eth.src_mac(), MAC_G);

    let ip = Ipv4Header::parse(eth.payload()).unwrap();
    assert_eq!(ip.src_addr(), REMOTE_IP);
    assert_eq!(ip.dst_addr(), DEFAULT_IP);
    assert!(ip.validate_checksum());
    assert!(UdpHeader::parse(ip.payload())
        .unwrap()
        .validate_checksum(REMOTE_IP, DEFAULT_IP));

    assert_eq!(harness.capture.injected(), vec![(0, frame.clone())]);
    assert_eq!(harness.log.frames().len(), 1);
    assert_eq!(harness.stats.inbound_routed.get(), 1);
}

#[test]
fn test_inbound_tcp_restored() {
    let harness = Harness::start(FakeProcessTable::new());
    let mut frame = tcp_frame(REMOTE_IP, 443, REBIND_IP, 40000);

    assert_eq!(inbound(&harness, &mut frame), Decision::Route);

    let eth = Frame::parse(&frame).unwrap();
    assert_eq!(eth.dst_mac(), MAC_A);

    let ip = Ipv4Header::parse(eth.payload()).unwrap();
    assert_eq!(ip.dst_addr(), DEFAULT_IP);
    assert!(ip.validate_checksum());

    let tcp = TcpHeader::parse(ip.payload()).unwrap();
    assert_eq!((tcp.src_port(), tcp.dst_port()), (443, 40000));
    assert!(tcp.validate_checksum(REMOTE_IP, DEFAULT_IP));
    assert!(!tcp.validate_checksum(REMOTE_IP, REBIND_IP));

    // Replies never consult the process table
    assert_eq!(harness.table.refreshes(), 0);
    assert_eq!(harness.stats.inbound_routed.get(), 1);
}

#[test]
fn test_inbound_icmp_to_rebind_ip_passes() {
    let harness = Harness::start(FakeProcessTable::new());
    let echo_reply = [0, 0, 0xff, 0xfe, 0, 1, 0, 1];
    let mut frame = super::frame(Protocol::Icmp, &echo_reply, REMOTE_IP, REBIND_IP);
    let before = frame.clone();

    assert_eq!(inbound(&harness, &mut frame), Decision::Pass);
    assert_eq!(frame, before);
    assert!(harness.capture.injected().is_empty());
    assert!(harness.log.frames().is_empty());
    assert_eq!(harness.stats.inbound_routed.get(), 0);
}

/// Scenario C: another process keeps its path, byte for byte
#[test]
fn test_scenario_c_other_process_untouched() {
    let session = TcpSession {
        local: SocketAddrV4::new(DEFAULT_IP, 40000),
        remote: SocketAddrV4::new(REMOTE_IP, 443),
    };
    let harness = Harness::start(FakeProcessTable::new().with_tcp(session, "other.exe", 77));
    let mut frame = tcp_frame(DEFAULT_IP, 40000, REMOTE_IP, 443);
    let before = frame.clone();

    assert_eq!(outbound(&harness, &mut frame), Decision::Pass);
    assert_eq!(frame, before);
    assert!(harness.capture.injected().is_empty());
    assert!(harness.log.frames().is_empty());
    assert_eq!(harness.stats.passed.get(), 1);
}

#[test]
fn test_outbound_tcp_rebound() {
    let session = TcpSession {
        local: SocketAddrV4::new(DEFAULT_IP, 40000),
        remote: SocketAddrV4::new(REMOTE_IP, 443),
    };
    let harness = Harness::start(FakeProcessTable::new().with_tcp(session, "game.exe", 4242));
    let mut frame = tcp_frame(DEFAULT_IP, 40000, REMOTE_IP, 443);

    assert_eq!(outbound(&harness, &mut frame), Decision::Route);

    let eth = Frame::parse(&frame).unwrap();
    let ip = Ipv4Header::parse(eth.payload()).unwrap();
    let tcp = TcpHeader::parse(ip.payload()).unwrap();
    assert_eq!(tcp.payload(), b"GET / HTTP/1.1\r\n\r\n");
    assert!(tcp.validate_checksum(REBIND_IP, REMOTE_IP));
}

#[test]
fn test_substring_match_rebinds() {
    let harness = Harness::start(
        FakeProcessTable::new().with_udp(game_socket(), "launcher-game.exe-x64", 1),
    );
    let mut frame = udp_frame(DEFAULT_IP, 5000, REMOTE_IP, 27015);

    assert_eq!(outbound(&harness, &mut frame), Decision::Route);
}

#[test]
fn test_new_socket_found_after_single_refresh() {
    let harness =
        Harness::start(FakeProcessTable::new().stage_udp(game_socket(), "game.exe", 4242));
    let mut frame = udp_frame(DEFAULT_IP, 5000, REMOTE_IP, 27015);

    assert_eq!(outbound(&harness, &mut frame), Decision::Route);
    assert_eq!(harness.table.refreshes(), 1);
    assert_eq!(harness.stats.resolver_refreshes.get(), 1);

    // Cached from now on
    let mut next = udp_frame(DEFAULT_IP, 5000, REMOTE_IP, 27015);
    assert_eq!(outbound(&harness, &mut next), Decision::Route);
    assert_eq!(harness.table.refreshes(), 1);
}

#[test]
fn test_unknown_socket_refreshed_once_then_passed() {
    let harness = Harness::start(FakeProcessTable::new());
    let mut frame = udp_frame(DEFAULT_IP, 6000, REMOTE_IP, 53);
    let before = frame.clone();

    assert_eq!(outbound(&harness, &mut frame), Decision::Pass);
    assert_eq!(frame, before);
    assert_eq!(harness.table.refreshes(), 1);
    assert_eq!(harness.stats.classification_misses.get(), 1);
}

#[test]
fn test_reinjected_frame_passes() {
    let harness = Harness::start(FakeProcessTable::new().with_udp(game_socket(), "game.exe", 4242));
    let mut frame = udp_frame(DEFAULT_IP, 5000, REMOTE_IP, 27015);
    assert_eq!(outbound(&harness, &mut frame), Decision::Route);

    // The tap on the default adapter sees our own injection again
    let mut echo = frame.clone();
    assert_eq!(outbound(&harness, &mut echo), Decision::Pass);
    assert_eq!(echo, frame);
    assert_eq!(harness.capture.injected().len(), 1);
}

#[test]
fn test_inbound_for_other_host_passes() {
    let harness = Harness::start(FakeProcessTable::new());
    let mut frame = udp_frame(REMOTE_IP, 27015, Ipv4Addr::new(192, 168, 1, 77), 5000);
    let before = frame.clone();

    assert_eq!(inbound(&harness, &mut frame), Decision::Pass);
    assert_eq!(frame, before);
}

#[test]
fn test_non_ipv4_passes() {
    let harness = Harness::start(FakeProcessTable::new());
    let mut arp = FrameBuilder::new()
        .dst_mac(MacAddr::BROADCAST)
        .src_mac(MAC_A)
        .ethertype(EtherType::Arp as u16)
        .payload(&[0u8; 28])
        .build();
    let before = arp.clone();

    assert_eq!(outbound(&harness, &mut arp), Decision::Pass);
    assert_eq!(inbound(&harness, &mut arp), Decision::Pass);
    assert_eq!(arp, before);
    assert_eq!(harness.table.refreshes(), 0);
}

#[test]
fn test_truncated_frames_pass_untouched() {
    let harness = Harness::start(FakeProcessTable::new().with_udp(game_socket(), "game.exe", 4242));
    let full = tcp_frame(DEFAULT_IP, 5000, REMOTE_IP, 443);

    // Ethernet cut short, IPv4 cut short, TCP cut short
    for len in [6, 13, 14, 30, 40, 50] {
        let mut frame = full[..len].to_vec();
        let before = frame.clone();
        assert_eq!(outbound(&harness, &mut frame), Decision::Pass, "len {}", len);
        assert_eq!(frame, before, "len {}", len);
    }

    // TCP data offset pointing past the segment
    let mut frame = full.clone();
    frame[14 + 20 + 12] = 0xF0;
    let before = frame.clone();
    assert_eq!(outbound(&harness, &mut frame), Decision::Pass);
    assert_eq!(frame, before);
    assert!(harness.capture.injected().is_empty());
}

#[test]
fn test_capture_log_written_as_pcap() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("capture.pcap");

    let capture = Arc::new(capture_engine());
    let config = RebindConfig::resolve(
        capture.interfaces(),
        &default_adapter(),
        &rebind_adapter(),
        "game.exe",
    )
    .unwrap();
    let table: Arc<dyn ProcessTable> =
        Arc::new(FakeProcessTable::new().with_udp(game_socket(), "game.exe", 4242));
    let log: Arc<dyn CaptureLog> = Arc::new(PcapWriter::create(&path).unwrap());
    let engine = RebindEngine::new(Arc::new(config), table, Arc::new(RebindStats::new()))
        .with_capture_log(log);

    let session = Session::new(capture.clone(), Arc::new(engine));
    session.start().unwrap();

    let mut out = udp_frame(DEFAULT_IP, 5000, REMOTE_IP, 27015);
    let mut reply = udp_frame(REMOTE_IP, 27015, REBIND_IP, 5000);
    assert_eq!(capture.deliver(0, Direction::Outbound, &mut out), Some(Decision::Route));
    assert_eq!(capture.deliver(1, Direction::Inbound, &mut reply), Some(Decision::Route));
    session.stop();

    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(&bytes[0..4], &0xa1b2_c3d4u32.to_le_bytes());
    assert_eq!(bytes.len(), 24 + 2 * 16 + out.len() + reply.len());

    let first_len = u32::from_le_bytes(bytes[32..36].try_into().unwrap()) as usize;
    assert_eq!(first_len, out.len());
    assert_eq!(&bytes[40..40 + first_len], out.as_slice());
}
