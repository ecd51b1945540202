//! AF_PACKET capture engine
//!
//! Each active slot owns a socket bound to one interface and a tokio task
//! that feeds captured frames to the registered [`FrameHandler`]. Frames the
//! kernel marks as outgoing go to the outbound callback, frames addressed to
//! this host go to the inbound callback, everything else is ignored.
//!
//! A `Route` decision on an outbound frame transmits the rewritten frame
//! through the peer slot's socket. On an inbound frame it hands the rewritten
//! packet to the local stack through the receive-path [`TunDevice`], if one
//! was opened. A raw socket only sees a copy of each frame, so the original
//! still takes its normal path whatever the decision.

use super::tun::{self, TunDevice};
use super::{
    AdapterHandle, AfPacketSocket, CaptureEngine, CaptureInterface, Decision, Direction,
    FrameHandler, PacketType,
};
use crate::host::linux;
use crate::telemetry::RebindStats;
use crate::{Error, Result};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::runtime::Runtime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Number of filter slots
pub const SLOTS: usize = 2;

/// Large enough for any frame the kernel hands us (GSO/GRO included)
const RECV_BUFFER_SIZE: usize = 65536;

type SlotSockets = Arc<RwLock<[Option<Arc<AfPacketSocket>>; SLOTS]>>;

struct SlotTask {
    interface: String,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Capture engine over Linux AF_PACKET sockets.
///
/// `stop` blocks on the slot's task, so it must be called from outside any
/// tokio runtime.
pub struct AfPacketEngine {
    runtime: Runtime,
    interfaces: Vec<CaptureInterface>,
    handler: RwLock<Option<Arc<dyn FrameHandler>>>,
    sockets: SlotSockets,
    slots: Mutex<[Option<SlotTask>; SLOTS]>,
    receive: Option<Arc<TunDevice>>,
    stats: Arc<RebindStats>,
}

impl AfPacketEngine {
    /// Create an engine over the host's interfaces
    pub fn new(stats: Arc<RebindStats>) -> Result<Self> {
        let interfaces = linux::capture_interfaces()?;
        Self::with_interfaces(interfaces, stats)
    }

    /// Create an engine over an explicit interface list
    pub fn with_interfaces(
        interfaces: Vec<CaptureInterface>,
        stats: Arc<RebindStats>,
    ) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_io()
            .thread_name("rebind-capture")
            .build()
            .map_err(Error::Io)?;

        Ok(Self {
            runtime,
            interfaces,
            handler: RwLock::new(None),
            sockets: Arc::new(RwLock::new([None, None])),
            slots: Mutex::new([None, None]),
            receive: None,
            stats,
        })
    }

    /// Open the TUN device that inbound `Route` frames are delivered
    /// through. Without it they are discarded.
    pub fn open_receive_path(&mut self, name: &str) -> Result<()> {
        let device = {
            let _guard = self.runtime.enter();
            TunDevice::open(name)?
        };
        self.receive = Some(Arc::new(device));
        Ok(())
    }
}

impl CaptureEngine for AfPacketEngine {
    fn interfaces(&self) -> &[CaptureInterface] {
        &self.interfaces
    }

    fn register(&self, handler: Arc<dyn FrameHandler>) {
        *self.handler.write().unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    fn start(&self, handle: AdapterHandle, slot: usize) -> bool {
        if slot >= SLOTS {
            warn!("Capture slot {} out of range", slot);
            return false;
        }

        let Some(handler) = self
            .handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        else {
            warn!("No frame handler registered, refusing to start slot {}", slot);
            return false;
        };

        let Some(interface) = self.interfaces.iter().find(|i| i.handle == handle) else {
            warn!("Capture interface {} not found", handle);
            return false;
        };

        // Restarting a slot replaces its previous binding
        self.stop(slot);

        let socket = {
            let _guard = self.runtime.enter();
            match AfPacketSocket::bind(handle.0) {
                Ok(socket) => Arc::new(socket),
                Err(e) => {
                    warn!("Failed to bind to {}: {}", interface.internal_name, e);
                    return false;
                }
            }
        };

        self.sockets.write().unwrap_or_else(PoisonError::into_inner)[slot] = Some(socket.clone());

        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = self.runtime.spawn(run_slot(
            slot,
            socket,
            handler,
            self.sockets.clone(),
            self.receive.clone(),
            shutdown_rx,
            self.stats.clone(),
        ));

        self.slots.lock().unwrap_or_else(PoisonError::into_inner)[slot] = Some(SlotTask {
            interface: interface.internal_name.clone(),
            shutdown,
            task,
        });

        info!("Filtering started on {} (slot {})", interface.internal_name, slot);
        true
    }

    fn stop(&self, slot: usize) {
        let Some(slot_task) = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(slot)
            .and_then(Option::take)
        else {
            return;
        };

        let _ = slot_task.shutdown.send(true);
        if let Err(e) = self.runtime.block_on(slot_task.task) {
            warn!("Capture task for slot {} ended abnormally: {}", slot, e);
        }

        self.sockets.write().unwrap_or_else(PoisonError::into_inner)[slot] = None;
        info!("Filtering stopped on {} (slot {})", slot_task.interface, slot);
    }
}

impl Drop for AfPacketEngine {
    fn drop(&mut self) {
        for slot in 0..SLOTS {
            self.stop(slot);
        }
    }
}

fn direction_of(packet_type: PacketType) -> Option<Direction> {
    match packet_type {
        PacketType::Outgoing => Some(Direction::Outbound),
        PacketType::Host | PacketType::Broadcast | PacketType::Multicast => {
            Some(Direction::Inbound)
        }
        PacketType::OtherHost | PacketType::Other(_) => None,
    }
}

async fn run_slot(
    slot: usize,
    socket: Arc<AfPacketSocket>,
    handler: Arc<dyn FrameHandler>,
    sockets: SlotSockets,
    receive: Option<Arc<TunDevice>>,
    mut shutdown: watch::Receiver<bool>,
    stats: Arc<RebindStats>,
) {
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];

    loop {
        let received = tokio::select! {
            _ = shutdown.changed() => break,
            result = socket.recv(&mut buf) => result,
        };

        let rx = match received {
            Ok(rx) => rx,
            Err(e) => {
                stats.capture_errors.inc();
                warn!("Receive error on slot {}: {}", slot, e);
                continue;
            }
        };

        let Some(direction) = direction_of(rx.packet_type) else {
            continue;
        };

        let frame = &mut buf[..rx.len];
        // Process lookups may touch procfs
        let decision = tokio::task::block_in_place(|| handler.handle(direction, frame));

        if decision != Decision::Route {
            continue;
        }

        let routed = &buf[..rx.len];
        match direction {
            Direction::Outbound => {
                let peer =
                    sockets.read().unwrap_or_else(PoisonError::into_inner)[(slot + 1) % SLOTS].clone();
                let Some(peer) = peer else {
                    debug!("Peer of slot {} not active, routed frame discarded", slot);
                    continue;
                };
                if let Err(e) = peer.send(routed).await {
                    stats.capture_errors.inc();
                    warn!("Failed to inject routed frame from slot {}: {}", slot, e);
                }
            }
            Direction::Inbound => {
                let Some(device) = &receive else {
                    debug!("No receive path, routed frame from slot {} discarded", slot);
                    continue;
                };
                let Some(packet) = tun::ipv4_packet(routed) else {
                    continue;
                };
                if let Err(e) = device.send(packet).await {
                    stats.capture_errors.inc();
                    warn!("Failed to deliver routed frame to {}: {}", device.name(), e);
                }
            }
        }
    }
}
