//! In-memory collaborators

use rebind::capture::{
    AdapterHandle, CaptureEngine, CaptureInterface, CaptureLog, Decision, Direction, FrameHandler,
    WanType,
};
use rebind::process::{ProcessIdentity, ProcessTable, TcpSession};
use rebind::protocol::MacAddr;
use std::collections::HashMap;
use std::net::SocketAddrV4;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Process table whose `staged` entries only become visible after a refresh
#[derive(Default)]
pub struct FakeProcessTable {
    tcp: Mutex<HashMap<TcpSession, Arc<ProcessIdentity>>>,
    udp: Mutex<HashMap<SocketAddrV4, Arc<ProcessIdentity>>>,
    staged_tcp: Mutex<HashMap<TcpSession, Arc<ProcessIdentity>>>,
    staged_udp: Mutex<HashMap<SocketAddrV4, Arc<ProcessIdentity>>>,
    refreshes: AtomicUsize,
}

impl FakeProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_udp(self, local: SocketAddrV4, name: &str, pid: u32) -> Self {
        self.udp
            .lock()
            .unwrap()
            .insert(local, Arc::new(ProcessIdentity::new(name, pid)));
        self
    }

    pub fn with_tcp(self, session: TcpSession, name: &str, pid: u32) -> Self {
        self.tcp
            .lock()
            .unwrap()
            .insert(session, Arc::new(ProcessIdentity::new(name, pid)));
        self
    }

    /// Socket created after the last refresh
    pub fn stage_udp(self, local: SocketAddrV4, name: &str, pid: u32) -> Self {
        self.staged_udp
            .lock()
            .unwrap()
            .insert(local, Arc::new(ProcessIdentity::new(name, pid)));
        self
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

impl ProcessTable for FakeProcessTable {
    fn lookup_tcp(&self, session: &TcpSession) -> Option<Arc<ProcessIdentity>> {
        self.tcp.lock().unwrap().get(session).cloned()
    }

    fn lookup_udp(&self, endpoint: SocketAddrV4) -> Option<Arc<ProcessIdentity>> {
        self.udp.lock().unwrap().get(&endpoint).cloned()
    }

    fn actualize(&self, refresh_tcp: bool, refresh_udp: bool) -> rebind::Result<()> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        if refresh_tcp {
            let staged = std::mem::take(&mut *self.staged_tcp.lock().unwrap());
            self.tcp.lock().unwrap().extend(staged);
        }
        if refresh_udp {
            let staged = std::mem::take(&mut *self.staged_udp.lock().unwrap());
            self.udp.lock().unwrap().extend(staged);
        }
        Ok(())
    }
}

/// Capture engine that delivers frames by hand and records injections
pub struct FakeCaptureEngine {
    interfaces: Vec<CaptureInterface>,
    handler: Mutex<Option<Arc<dyn FrameHandler>>>,
    slots: Mutex<[Option<AdapterHandle>; 2]>,
    failing: Mutex<Vec<AdapterHandle>>,
    injected: Mutex<Vec<(usize, Vec<u8>)>>,
}

impl FakeCaptureEngine {
    pub fn new(interfaces: Vec<CaptureInterface>) -> Self {
        Self {
            interfaces,
            handler: Mutex::new(None),
            slots: Mutex::new([None, None]),
            failing: Mutex::new(Vec::new()),
            injected: Mutex::new(Vec::new()),
        }
    }

    /// Make `start` fail for `handle`
    pub fn fail_on(&self, handle: AdapterHandle) {
        self.failing.lock().unwrap().push(handle);
    }

    pub fn active(&self, slot: usize) -> Option<AdapterHandle> {
        self.slots.lock().unwrap()[slot]
    }

    /// Deliver a frame captured in `slot`. Returns None when the slot is idle.
    /// Routed frames are recorded as injected through the peer slot.
    pub fn deliver(&self, slot: usize, direction: Direction, frame: &mut [u8]) -> Option<Decision> {
        self.active(slot)?;
        let handler = self.handler.lock().unwrap().clone()?;

        let decision = handler.handle(direction, frame);
        if decision == Decision::Route {
            self.injected
                .lock()
                .unwrap()
                .push(((slot + 1) % 2, frame.to_vec()));
        }
        Some(decision)
    }

    pub fn injected(&self) -> Vec<(usize, Vec<u8>)> {
        self.injected.lock().unwrap().clone()
    }
}

impl CaptureEngine for FakeCaptureEngine {
    fn interfaces(&self) -> &[CaptureInterface] {
        &self.interfaces
    }

    fn register(&self, handler: Arc<dyn FrameHandler>) {
        *self.handler.lock().unwrap() = Some(handler);
    }

    fn start(&self, handle: AdapterHandle, slot: usize) -> bool {
        if slot >= 2 || self.failing.lock().unwrap().contains(&handle) {
            return false;
        }
        self.slots.lock().unwrap()[slot] = Some(handle);
        true
    }

    fn stop(&self, slot: usize) {
        if let Some(entry) = self.slots.lock().unwrap().get_mut(slot) {
            *entry = None;
        }
    }
}

#[derive(Default)]
pub struct MemoryLog {
    frames: Mutex<Vec<Vec<u8>>>,
}

impl MemoryLog {
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.frames.lock().unwrap().clone()
    }
}

impl CaptureLog for MemoryLog {
    fn append(&self, frame: &[u8]) {
        self.frames.lock().unwrap().push(frame.to_vec());
    }
}

pub fn lan_interface(index: u32, name: &str, mac: MacAddr) -> CaptureInterface {
    CaptureInterface {
        handle: AdapterHandle(index),
        internal_name: name.to_string(),
        hw_address: mac,
        virtual_links: None,
        wan_type: WanType::None,
    }
}
