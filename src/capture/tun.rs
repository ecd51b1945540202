//! TUN device feeding rewritten replies into the local IP stack
//!
//! A frame sent on an AF_PACKET socket is transmitted on the wire. A reply
//! that was moved back to the default address has to be *received* instead,
//! so its IPv4 packet is written to a TUN device and the kernel handles it
//! as if it had arrived on that device.

use crate::protocol::ethernet::Frame;
use crate::protocol::ipv4::Ipv4Header;
use crate::protocol::EtherType;
use crate::{Error, Result};
use std::ffi::CStr;
use std::fs;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use tokio::io::unix::AsyncFd;
use tracing::{info, warn};

/// Name of the receive-path device
pub const RECEIVE_DEVICE: &str = "rebind0";

const TUN_PATH: &CStr = c"/dev/net/tun";
const TUNSETIFF: u64 = 0x4004_54ca;

/// `struct ifreq` with only the name and flags members in use
#[repr(C)]
struct IfReq {
    name: [libc::c_char; libc::IFNAMSIZ],
    flags: libc::c_short,
    _pad: [u8; 22],
}

impl IfReq {
    fn new(name: &str) -> Result<Self> {
        let bytes = name.as_bytes();
        if bytes.is_empty() || bytes.len() >= libc::IFNAMSIZ || bytes.contains(&0) {
            return Err(Error::Config(format!("invalid interface name: {:?}", name)));
        }

        let mut req = Self {
            name: [0; libc::IFNAMSIZ],
            flags: 0,
            _pad: [0; 22],
        };
        for (dst, &src) in req.name.iter_mut().zip(bytes) {
            *dst = src as libc::c_char;
        }
        Ok(req)
    }
}

fn last_os_error() -> Error {
    Error::Io(std::io::Error::last_os_error())
}

/// IPv4 packet carried by an Ethernet frame, without link-layer padding
pub fn ipv4_packet(frame: &[u8]) -> Option<&[u8]> {
    let eth = Frame::parse(frame).ok()?;
    if EtherType::from_u16(eth.ethertype()) != Some(EtherType::Ipv4) {
        return None;
    }

    let payload = eth.payload();
    let ip = Ipv4Header::parse(payload).ok()?;
    payload.get(..usize::from(ip.total_length()))
}

fn set_up(name: &str) -> Result<()> {
    let mut req = IfReq::new(name)?;

    let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM | libc::SOCK_CLOEXEC, 0) };
    if fd < 0 {
        return Err(last_os_error());
    }
    let socket = unsafe { OwnedFd::from_raw_fd(fd) };

    if unsafe { libc::ioctl(socket.as_raw_fd(), libc::SIOCGIFFLAGS, &mut req) } < 0 {
        return Err(last_os_error());
    }
    req.flags |= libc::IFF_UP as libc::c_short;
    if unsafe { libc::ioctl(socket.as_raw_fd(), libc::SIOCSIFFLAGS, &req) } < 0 {
        return Err(last_os_error());
    }
    Ok(())
}

/// The device has no route back to the remote peers, so strict reverse
/// path filtering would drop every injected reply.
fn relax_rp_filter(name: &str) {
    let path = format!("/proc/sys/net/ipv4/conf/{}/rp_filter", name);
    if let Err(e) = fs::write(&path, "0") {
        warn!("Failed to disable rp_filter on {}: {}", name, e);
    }

    let strict = fs::read_to_string("/proc/sys/net/ipv4/conf/all/rp_filter")
        .is_ok_and(|value| value.trim() == "1");
    if strict {
        warn!(
            "net.ipv4.conf.all.rp_filter is strict, replies injected on {} will be dropped",
            name
        );
    }
}

/// Non-persistent TUN device; it disappears when dropped.
pub struct TunDevice {
    async_fd: AsyncFd<OwnedFd>,
    name: String,
}

impl TunDevice {
    /// Create the device and bring it up.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(name: &str) -> Result<Self> {
        let mut req = IfReq::new(name)?;
        req.flags = (libc::IFF_TUN | libc::IFF_NO_PI) as libc::c_short;

        let fd = unsafe {
            libc::open(
                TUN_PATH.as_ptr(),
                libc::O_RDWR | libc::O_NONBLOCK | libc::O_CLOEXEC,
            )
        };
        if fd < 0 {
            return Err(last_os_error());
        }
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };

        if unsafe { libc::ioctl(fd.as_raw_fd(), TUNSETIFF as _, &mut req) } < 0 {
            return Err(last_os_error());
        }

        set_up(name)?;
        relax_rp_filter(name);

        let async_fd = AsyncFd::new(fd).map_err(Error::Io)?;
        info!("Receive path device {} is up", name);

        Ok(Self {
            async_fd,
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hand one IPv4 packet to the local stack
    pub async fn send(&self, packet: &[u8]) -> Result<usize> {
        loop {
            let mut guard = self.async_fd.writable().await.map_err(Error::Io)?;

            match guard.try_io(|inner| {
                let fd = inner.get_ref().as_raw_fd();
                let n = unsafe { libc::write(fd, packet.as_ptr() as *const _, packet.len()) };
                if n < 0 {
                    Err(std::io::Error::last_os_error())
                } else {
                    Ok(n as usize)
                }
            }) {
                Ok(Ok(len)) => return Ok(len),
                Ok(Err(e)) => return Err(Error::Io(e)),
                Err(_would_block) => continue,
            }
        }
    }
}
