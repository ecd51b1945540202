//! Classic libpcap capture file writer
//!
//! ```text
//! Global header (24 bytes):
//! +----------------+-------+-------+----------+---------+---------+----------+
//! | magic a1b2c3d4 | major | minor | thiszone | sigfigs | snaplen | linktype |
//! +----------------+-------+-------+----------+---------+---------+----------+
//! Record header (16 bytes), followed by the frame bytes:
//! +--------+---------+----------+---------+
//! | ts_sec | ts_usec | incl_len | orig_len|
//! +--------+---------+----------+---------+
//! ```
//!
//! All fields are written little-endian; readers detect byte order from the
//! magic number.

use super::CaptureLog;
use crate::{Error, Result};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use tracing::warn;

const MAGIC: u32 = 0xa1b2_c3d4;
const VERSION_MAJOR: u16 = 2;
const VERSION_MINOR: u16 = 4;
const SNAPLEN: u32 = 65535;
/// LINKTYPE_ETHERNET
const LINKTYPE_ETHERNET: u32 = 1;

pub const GLOBAL_HEADER_SIZE: usize = 24;
pub const RECORD_HEADER_SIZE: usize = 16;

#[derive(Debug)]
struct Sink<W> {
    writer: W,
    /// Set once a record failed to write; the file may end in a torn record
    broken: bool,
}

/// Append-only pcap sink.
///
/// Appends from concurrent capture workers are serialized by an internal
/// mutex and flushed one record at a time. After a failed write no further
/// records are appended.
#[derive(Debug)]
pub struct PcapWriter<W: Write + Send> {
    sink: Mutex<Sink<W>>,
}

impl PcapWriter<BufWriter<File>> {
    /// Create (or truncate) a capture file at `path`
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path).map_err(Error::Io)?;
        Self::new(BufWriter::new(file))
    }
}

impl<W: Write + Send> PcapWriter<W> {
    /// Wrap a writer and emit the global header
    pub fn new(mut writer: W) -> Result<Self> {
        let mut header = [0u8; GLOBAL_HEADER_SIZE];
        header[0..4].copy_from_slice(&MAGIC.to_le_bytes());
        header[4..6].copy_from_slice(&VERSION_MAJOR.to_le_bytes());
        header[6..8].copy_from_slice(&VERSION_MINOR.to_le_bytes());
        // thiszone and sigfigs stay zero
        header[16..20].copy_from_slice(&SNAPLEN.to_le_bytes());
        header[20..24].copy_from_slice(&LINKTYPE_ETHERNET.to_le_bytes());

        writer.write_all(&header).map_err(Error::Io)?;
        writer.flush().map_err(Error::Io)?;

        Ok(Self {
            sink: Mutex::new(Sink {
                writer,
                broken: false,
            }),
        })
    }

    /// Append one frame stamped with the current wall-clock time
    pub fn write_frame(&self, frame: &[u8]) -> Result<()> {
        let now = chrono::Utc::now();
        let ts_sec = now.timestamp() as u32;
        let ts_usec = now.timestamp_subsec_micros();

        let orig_len = frame.len() as u32;
        let incl_len = orig_len.min(SNAPLEN);

        let mut record = Vec::with_capacity(RECORD_HEADER_SIZE + incl_len as usize);
        record.extend_from_slice(&ts_sec.to_le_bytes());
        record.extend_from_slice(&ts_usec.to_le_bytes());
        record.extend_from_slice(&incl_len.to_le_bytes());
        record.extend_from_slice(&orig_len.to_le_bytes());
        record.extend_from_slice(&frame[..incl_len as usize]);

        let mut sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        if sink.broken {
            return Err(Error::Io(io::Error::other("capture log disabled after write failure")));
        }

        let written = sink
            .writer
            .write_all(&record)
            .and_then(|()| sink.writer.flush());
        if let Err(e) = written {
            sink.broken = true;
            return Err(Error::Io(e));
        }
        Ok(())
    }

    /// Consume the writer and return the underlying sink
    pub fn into_inner(self) -> W {
        self.sink
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .writer
    }
}

impl<W: Write + Send> CaptureLog for PcapWriter<W> {
    fn append(&self, frame: &[u8]) {
        if let Err(e) = self.write_frame(frame) {
            warn!("Failed to append frame to capture log: {}", e);
        }
    }
}
