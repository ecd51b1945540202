//! End-to-end rebind scenarios against in-memory collaborators
//!
//! Topology:
//! ```text
//!              ┌──────── eth0 (slot 0) 10.0.0.5 / MAC-A ──────▶ default path
//!  game.exe ───┤
//!              └──────── wlan0 (slot 1) 192.168.1.9 / MAC-B ──▶ gateway MAC-G
//! ```

mod fakes;
mod lifecycle;
mod rebinding;

use fakes::{lan_interface, FakeCaptureEngine, FakeProcessTable, MemoryLog};
use rebind::capture::{CaptureEngine, CaptureLog};
use rebind::dataplane::{RebindConfig, RebindEngine, Session};
use rebind::host::{Gateway, HostAdapter, IfType};
use rebind::process::ProcessTable;
use rebind::protocol::ethernet::FrameBuilder;
use rebind::protocol::ipv4::{Ipv4Builder, Protocol};
use rebind::protocol::tcp::TcpBuilder;
use rebind::protocol::udp::UdpBuilder;
use rebind::protocol::{EtherType, MacAddr};
use rebind::telemetry::RebindStats;
use std::net::Ipv4Addr;
use std::sync::Arc;

pub const MAC_A: MacAddr = MacAddr([0x02, 0x00, 0x00, 0x00, 0x00, 0x0a]);
pub const MAC_B: MacAddr = MacAddr([0x02, 0x00, 0x00, 0x00, 0x00, 0x0b]);
pub const MAC_G: MacAddr = MacAddr([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);
pub const MAC_ROUTER: MacAddr = MacAddr([0x02, 0x00, 0x00, 0x00, 0x00, 0xfe]);
pub const DEFAULT_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 5);
pub const REBIND_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 9);
pub const GATEWAY_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 1);
pub const REMOTE_IP: Ipv4Addr = Ipv4Addr::new(1, 2, 3, 4);

pub fn default_adapter() -> HostAdapter {
    HostAdapter {
        adapter_name: "eth0".to_string(),
        friendly_name: "eth0".to_string(),
        description: "Ethernet".to_string(),
        if_type: IfType::Ethernet,
        unicast: vec![DEFAULT_IP],
        gateways: vec![Gateway {
            ip: Ipv4Addr::new(10, 0, 0, 1),
            hw_address: Some(MAC_ROUTER),
        }],
    }
}

pub fn rebind_adapter() -> HostAdapter {
    HostAdapter {
        adapter_name: "wlan0".to_string(),
        friendly_name: "wlan0".to_string(),
        description: "Wireless".to_string(),
        if_type: IfType::Wireless,
        unicast: vec![REBIND_IP],
        gateways: vec![Gateway {
            ip: GATEWAY_IP,
            hw_address: Some(MAC_G),
        }],
    }
}

pub fn capture_engine() -> FakeCaptureEngine {
    FakeCaptureEngine::new(vec![
        lan_interface(1, "lo", MacAddr::ZERO),
        lan_interface(2, "eth0", MAC_A),
        lan_interface(3, "wlan0", MAC_B),
    ])
}

/// A resolved, started session
pub struct Harness {
    pub capture: Arc<FakeCaptureEngine>,
    pub table: Arc<FakeProcessTable>,
    pub log: Arc<MemoryLog>,
    pub stats: Arc<RebindStats>,
    pub session: Session,
}

impl Harness {
    pub fn start(table: FakeProcessTable) -> Self {
        let capture = Arc::new(capture_engine());
        let config = RebindConfig::resolve(
            capture.interfaces(),
            &default_adapter(),
            &rebind_adapter(),
            "game.exe",
        )
        .expect("bindings resolve");

        let table = Arc::new(table);
        let log = Arc::new(MemoryLog::default());
        let stats = Arc::new(RebindStats::new());

        let process_table: Arc<dyn ProcessTable> = table.clone();
        let capture_log: Arc<dyn CaptureLog> = log.clone();
        let engine = RebindEngine::new(Arc::new(config), process_table, stats.clone())
            .with_capture_log(capture_log);

        let engine_capture: Arc<dyn CaptureEngine> = capture.clone();
        let session = Session::new(engine_capture, Arc::new(engine));
        session.start().expect("session starts");

        Self {
            capture,
            table,
            log,
            stats,
            session,
        }
    }
}

pub fn frame(protocol: Protocol, segment: &[u8], src: Ipv4Addr, dst: Ipv4Addr) -> Vec<u8> {
    let (src_mac, dst_mac) = if src == REMOTE_IP {
        (MAC_G, MAC_B)
    } else {
        (MAC_A, MAC_ROUTER)
    };

    let packet = Ipv4Builder::new()
        .protocol(protocol as u8)
        .src_addr(src)
        .dst_addr(dst)
        .payload(segment)
        .build();

    FrameBuilder::new()
        .dst_mac(dst_mac)
        .src_mac(src_mac)
        .ethertype(EtherType::Ipv4 as u16)
        .payload(&packet)
        .build()
}

pub fn udp_frame(src: Ipv4Addr, sport: u16, dst: Ipv4Addr, dport: u16) -> Vec<u8> {
    let segment = UdpBuilder::new()
        .src_port(sport)
        .dst_port(dport)
        .payload(b"state update")
        .build(src, dst);
    frame(Protocol::Udp, &segment, src, dst)
}

pub fn tcp_frame(src: Ipv4Addr, sport: u16, dst: Ipv4Addr, dport: u16) -> Vec<u8> {
    let segment = TcpBuilder::new()
        .src_port(sport)
        .dst_port(dport)
        .seq_num(1000)
        .payload(b"GET / HTTP/1.1\r\n\r\n")
        .build(src, dst);
    frame(Protocol::Tcp, &segment, src, dst)
}
