//! Packet capture sinks handed to the native engine.

use std::io::{self, Write};
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use byteorder::{LittleEndian, WriteBytesExt};

const PCAP_MAGIC: u32 = 0xa1b2_c3d4;
const PCAP_VERSION_MAJOR: u16 = 2;
const PCAP_VERSION_MINOR: u16 = 4;
const PCAP_SNAPLEN: u32 = 65_535;
/// Raw IP packets, no link-layer header
const LINKTYPE_RAW: u32 = 101;
const GLOBAL_HEADER_LEN: usize = 24;
const RECORD_HEADER_LEN: usize = 16;

/// Destination for captured packets.
///
/// The native engine writes from its own threads, so implementations must be
/// thread-safe.
pub trait PacketSink: Send + Sync {
    fn write_packet(&self, packet: &[u8]) -> io::Result<()>;
}

/// Writes packets in classic libpcap format.
pub struct PcapWriter<W: Write + Send> {
    inner: Mutex<W>,
}

impl<W: Write + Send> PcapWriter<W> {
    /// Write the global header and return a writer ready for packets.
    pub fn new(mut inner: W) -> io::Result<Self> {
        let mut header = Vec::with_capacity(GLOBAL_HEADER_LEN);
        header.write_u32::<LittleEndian>(PCAP_MAGIC)?;
        header.write_u16::<LittleEndian>(PCAP_VERSION_MAJOR)?;
        header.write_u16::<LittleEndian>(PCAP_VERSION_MINOR)?;
        header.write_i32::<LittleEndian>(0)?; // thiszone
        header.write_u32::<LittleEndian>(0)?; // sigfigs
        header.write_u32::<LittleEndian>(PCAP_SNAPLEN)?;
        header.write_u32::<LittleEndian>(LINKTYPE_RAW)?;
        inner.write_all(&header)?;

        Ok(PcapWriter {
            inner: Mutex::new(inner),
        })
    }

    /// Flush and return the underlying writer.
    pub fn into_inner(self) -> io::Result<W> {
        let mut inner = self.inner.into_inner().unwrap_or_else(PoisonError::into_inner);
        inner.flush()?;
        Ok(inner)
    }
}

impl<W: Write + Send> PacketSink for PcapWriter<W> {
    fn write_packet(&self, packet: &[u8]) -> io::Result<()> {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let captured = packet.len().min(PCAP_SNAPLEN as usize);

        let mut record = Vec::with_capacity(RECORD_HEADER_LEN + captured);
        record.write_u32::<LittleEndian>(ts.as_secs() as u32)?;
        record.write_u32::<LittleEndian>(ts.subsec_micros())?;
        record.write_u32::<LittleEndian>(captured as u32)?;
        record.write_u32::<LittleEndian>(packet.len() as u32)?;
        record.extend_from_slice(&packet[..captured]);

        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.write_all(&record)
    }
}
