//! The binary message record format.
//!
//! A record is a 128-byte little-endian header followed by `payload_len`
//! opaque payload bytes. The header is the wire contract between producers
//! and consumers; the queueing substrate treats the whole record as bytes.
//!
//! ```text
//! offset  size  field
//!      0     4  magic            0x4147454E ("AGEN")
//!      4     2  version          starts at 1
//!      6     2  flags            bit 15 = extended metadata
//!      8     4  msg_type         opaque to the core
//!     12     4  priority         0..=5
//!     16     8  timestamp        monotonic ns at build time
//!     24     8  sequence         per-producer, monotonically increasing
//!     32     4  source_agent     opaque producer tag
//!     36     4  target_count     0..=16
//!     40    64  target_agents    16 x u32, valid entries = target_count
//!    104     4  payload_len      <= 16 MiB
//!    108     4  crc32            CRC32C over header[0..104] ++ payload
//!    112    16  reserved         carried byte-for-byte, never interpreted
//! ```
//!
//! The CRC deliberately excludes `payload_len`, the CRC field itself, and
//! the reserved bytes. It is a defense against memory corruption in the
//! shared ring, not a cryptographic MAC.

use crate::crc32c::Crc32c;
use crate::error::RecordError;

/// Header magic, "AGEN" read as a little-endian u32.
pub const MAGIC: u32 = 0x4147_454E;

/// Current protocol version.
pub const VERSION: u16 = 1;

/// Size of the fixed header in bytes (cache-line aligned).
pub const HEADER_SIZE: usize = 128;

/// Maximum payload size.
pub const MAX_PAYLOAD_LEN: usize = 16 * 1024 * 1024;

/// Maximum number of target agents per record.
pub const MAX_TARGETS: usize = 16;

/// Flags bit 15: the reserved bytes carry producer-private extended metadata.
pub const FLAG_EXTENDED_METADATA: u16 = 1 << 15;

/// Number of priority classes.
pub const NUM_PRIORITY_CLASSES: usize = 6;

/// Byte range of the header covered by the CRC.
const CRC_COVERED: usize = 104;

/// The six priority classes.
///
/// Each class is an independent FIFO; there is no ordering across classes.
/// The labels carry the scheduling affinity used by the worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u32)]
pub enum Priority {
    /// P-cores only.
    Critical = 0,
    /// P-cores preferred.
    High = 1,
    /// E-cores preferred.
    Normal = 2,
    /// E-cores only.
    Low = 3,
    /// Either core type, consumed in batches.
    Batch = 4,
    /// E-cores only.
    Background = 5,
}

impl Priority {
    /// All classes, in numeric order.
    pub const ALL: [Priority; NUM_PRIORITY_CLASSES] = [
        Priority::Critical,
        Priority::High,
        Priority::Normal,
        Priority::Low,
        Priority::Batch,
        Priority::Background,
    ];

    /// Converts a wire value. Returns `None` for anything above 5.
    #[inline]
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Priority::Critical),
            1 => Some(Priority::High),
            2 => Some(Priority::Normal),
            3 => Some(Priority::Low),
            4 => Some(Priority::Batch),
            5 => Some(Priority::Background),
            _ => None,
        }
    }

    /// Class index for table lookups.
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Parsed view of a record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub version: u16,
    pub flags: u16,
    pub msg_type: u32,
    pub priority: Priority,
    pub timestamp_ns: u64,
    pub sequence: u64,
    pub source_agent: u32,
    pub target_count: u32,
    pub target_agents: [u32; MAX_TARGETS],
    pub payload_len: u32,
    pub crc32: u32,
    /// Reserved bytes, zero unless `flags` has [`FLAG_EXTENDED_METADATA`].
    /// Opaque to the core; preserved byte-for-byte across the queue.
    pub metadata: [u8; 16],
}

impl MessageHeader {
    /// Parses the fixed header from the front of `bytes`.
    ///
    /// Validates magic, version, priority range, target count, and payload
    /// length. Does not touch the payload and does not verify the CRC.
    pub fn parse(bytes: &[u8]) -> Result<Self, RecordError> {
        if bytes.len() < HEADER_SIZE {
            return Err(RecordError::Malformed("short header"));
        }
        if read_u32(bytes, 0) != MAGIC {
            return Err(RecordError::Malformed("bad magic"));
        }

        let version = read_u16(bytes, 4);
        if version != VERSION {
            return Err(RecordError::Malformed("unsupported version"));
        }

        let priority = Priority::from_u32(read_u32(bytes, 12))
            .ok_or(RecordError::Malformed("priority out of range"))?;

        let target_count = read_u32(bytes, 36);
        if target_count as usize > MAX_TARGETS {
            return Err(RecordError::Malformed("target count out of range"));
        }

        let payload_len = read_u32(bytes, 104);
        if payload_len as usize > MAX_PAYLOAD_LEN {
            return Err(RecordError::Malformed("payload length out of range"));
        }

        let mut target_agents = [0u32; MAX_TARGETS];
        for (i, agent) in target_agents.iter_mut().enumerate() {
            *agent = read_u32(bytes, 40 + i * 4);
        }

        let mut metadata = [0u8; 16];
        metadata.copy_from_slice(&bytes[112..128]);

        Ok(Self {
            version,
            flags: read_u16(bytes, 6),
            msg_type: read_u32(bytes, 8),
            priority,
            timestamp_ns: read_u64(bytes, 16),
            sequence: read_u64(bytes, 24),
            source_agent: read_u32(bytes, 32),
            target_count,
            target_agents,
            payload_len,
            crc32: read_u32(bytes, 108),
            metadata,
        })
    }

    /// Encodes the header into `out[0..128]`.
    pub fn encode(&self, out: &mut [u8]) -> Result<(), RecordError> {
        if out.len() < HEADER_SIZE {
            return Err(RecordError::BufferTooSmall {
                needed: HEADER_SIZE,
                available: out.len(),
            });
        }

        write_u32(out, 0, MAGIC);
        write_u16(out, 4, self.version);
        write_u16(out, 6, self.flags);
        write_u32(out, 8, self.msg_type);
        write_u32(out, 12, self.priority as u32);
        write_u64(out, 16, self.timestamp_ns);
        write_u64(out, 24, self.sequence);
        write_u32(out, 32, self.source_agent);
        write_u32(out, 36, self.target_count);
        for (i, &agent) in self.target_agents.iter().enumerate() {
            write_u32(out, 40 + i * 4, agent);
        }
        write_u32(out, 104, self.payload_len);
        write_u32(out, 108, self.crc32);
        out[112..128].copy_from_slice(&self.metadata);
        Ok(())
    }

    /// Recomputes the checksum over this header and `payload` and compares
    /// it against the stored `crc32` field.
    pub fn verify_crc(&self, payload: &[u8]) -> bool {
        let mut covered = [0u8; HEADER_SIZE];
        // Encoding into a full-size scratch header cannot fail.
        let _ = self.encode(&mut covered);

        let mut hasher = Crc32c::new();
        hasher.update(&covered[..CRC_COVERED]).update(payload);
        hasher.finalize() == self.crc32
    }
}

/// Verifies a complete record (header + payload) in place.
///
/// Returns `Ok(header)` only if the header parses, the byte length is
/// consistent with `payload_len`, and the CRC matches.
pub fn verify_record(bytes: &[u8]) -> Result<MessageHeader, RecordError> {
    let header = MessageHeader::parse(bytes)?;
    let total = HEADER_SIZE + header.payload_len as usize;
    if bytes.len() < total {
        return Err(RecordError::Malformed("truncated payload"));
    }

    let mut hasher = Crc32c::new();
    hasher
        .update(&bytes[..CRC_COVERED])
        .update(&bytes[HEADER_SIZE..total]);
    if hasher.finalize() != header.crc32 {
        return Err(RecordError::Malformed("crc mismatch"));
    }
    Ok(header)
}

/// Builder for complete records.
///
/// Producers keep one builder per destination stream and bump `sequence`
/// between records.
///
/// # Example
///
/// ```
/// use agentring::{Priority, RecordBuilder};
///
/// let record = RecordBuilder::new(Priority::Normal)
///     .msg_type(7)
///     .source_agent(0xA11CE)
///     .sequence(1)
///     .build_vec(b"hello")
///     .unwrap();
/// assert_eq!(record.len(), 128 + 5);
/// ```
#[derive(Debug, Clone)]
pub struct RecordBuilder {
    priority: Priority,
    flags: u16,
    msg_type: u32,
    sequence: u64,
    source_agent: u32,
    targets: [u32; MAX_TARGETS],
    target_count: usize,
    metadata: [u8; 16],
    timestamp_ns: Option<u64>,
}

impl RecordBuilder {
    /// Creates a builder for the given priority class.
    pub fn new(priority: Priority) -> Self {
        Self {
            priority,
            flags: 0,
            msg_type: 0,
            sequence: 0,
            source_agent: 0,
            targets: [0; MAX_TARGETS],
            target_count: 0,
            metadata: [0; 16],
            timestamp_ns: None,
        }
    }

    /// Sets the producer-defined message type.
    pub fn msg_type(mut self, msg_type: u32) -> Self {
        self.msg_type = msg_type;
        self
    }

    /// Sets the per-producer sequence number.
    pub fn sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    /// Sets the producer tag.
    pub fn source_agent(mut self, source_agent: u32) -> Self {
        self.source_agent = source_agent;
        self
    }

    /// Sets the flags bitfield. The extended-metadata bit is set
    /// automatically by [`metadata`](Self::metadata).
    pub fn flags(mut self, flags: u16) -> Self {
        self.flags = flags;
        self
    }

    /// Replaces the target agent list. At most [`MAX_TARGETS`] entries.
    pub fn targets(mut self, targets: &[u32]) -> Result<Self, RecordError> {
        if targets.len() > MAX_TARGETS {
            return Err(RecordError::InvalidArgument("too many target agents"));
        }
        self.targets = [0; MAX_TARGETS];
        self.targets[..targets.len()].copy_from_slice(targets);
        self.target_count = targets.len();
        Ok(self)
    }

    /// Attaches 16 bytes of producer-private metadata and sets the
    /// extended-metadata flag.
    pub fn metadata(mut self, metadata: [u8; 16]) -> Self {
        self.metadata = metadata;
        self.flags |= FLAG_EXTENDED_METADATA;
        self
    }

    /// Overrides the enqueue timestamp (monotonic nanoseconds). Mostly for
    /// tests; the default is the current monotonic clock.
    pub fn timestamp_ns(mut self, timestamp_ns: u64) -> Self {
        self.timestamp_ns = Some(timestamp_ns);
        self
    }

    /// Encodes a complete record (header + payload + CRC) into `out`.
    ///
    /// Returns the number of bytes written.
    pub fn build(&self, payload: &[u8], out: &mut [u8]) -> Result<usize, RecordError> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(RecordError::InvalidArgument("payload exceeds 16 MiB"));
        }

        let total = HEADER_SIZE + payload.len();
        if out.len() < total {
            return Err(RecordError::BufferTooSmall {
                needed: total,
                available: out.len(),
            });
        }

        let header = MessageHeader {
            version: VERSION,
            flags: self.flags,
            msg_type: self.msg_type,
            priority: self.priority,
            timestamp_ns: self.timestamp_ns.unwrap_or_else(monotonic_ns),
            sequence: self.sequence,
            source_agent: self.source_agent,
            target_count: self.target_count as u32,
            target_agents: self.targets,
            payload_len: payload.len() as u32,
            crc32: 0,
            metadata: self.metadata,
        };
        header.encode(&mut out[..HEADER_SIZE])?;
        out[HEADER_SIZE..total].copy_from_slice(payload);

        let mut hasher = Crc32c::new();
        hasher.update(&out[..CRC_COVERED]).update(payload);
        write_u32(out, 108, hasher.finalize());

        Ok(total)
    }

    /// Convenience: encodes into a freshly allocated vector.
    pub fn build_vec(&self, payload: &[u8]) -> Result<Vec<u8>, RecordError> {
        let mut out = vec![0u8; HEADER_SIZE + payload.len()];
        let written = self.build(payload, &mut out)?;
        out.truncate(written);
        Ok(out)
    }
}

/// Monotonic nanoseconds since the first call in this process.
pub fn monotonic_ns() -> u64 {
    use std::sync::OnceLock;
    use std::time::Instant;

    static START: OnceLock<Instant> = OnceLock::new();
    START.get_or_init(Instant::now).elapsed().as_nanos() as u64
}

#[inline]
fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

#[inline]
fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

#[inline]
fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(raw)
}

#[inline]
fn write_u16(bytes: &mut [u8], offset: usize, value: u16) {
    bytes[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

#[inline]
fn write_u32(bytes: &mut [u8], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

#[inline]
fn write_u64(bytes: &mut [u8], offset: usize, value: u64) {
    bytes[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}
