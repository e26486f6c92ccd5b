use std::sync::atomic::Ordering;

use tracing::info;

use crate::backoff::Backoff;
use crate::config::RingConfig;
use crate::error::{CreateError, ReadError, WriteError};
use crate::record::{Priority, NUM_PRIORITY_CLASSES};
use crate::ring::{ClassRing, LEN_PREFIX};
use crate::topology::Capabilities;

/// The multi-priority ring buffer.
///
/// Six independent FIFO queues, one per [`Priority`] class. Records are
/// opaque byte sequences; the buffer neither parses headers nor verifies
/// checksums.
///
/// # Concurrency contract
///
/// Each class is single-producer: at most one thread may call
/// [`write`](Self::write) for a given priority at a time. Concurrent
/// producers on the same class are rejected by contract, not at runtime.
/// The consumer side is shared safely: reads route through a per-class
/// claim, so any number of workers may poll any class.
///
/// # Example
///
/// ```
/// use agentring::{Capabilities, Priority, RingBuffer, RingConfig};
///
/// let caps = Capabilities::probe();
/// let config = RingConfig::new(64 * 1024).huge_pages(false).lock_memory(false);
/// let rb = RingBuffer::create(config, &caps).unwrap();
///
/// rb.write(Priority::Normal, b"a raw record").unwrap();
/// let mut out = [0u8; 64];
/// assert_eq!(rb.read(Priority::Normal, &mut out).unwrap(), 12);
/// ```
pub struct RingBuffer {
    classes: Vec<ClassRing>,
    config: RingConfig,
}

impl RingBuffer {
    /// Allocates all six class queues.
    ///
    /// Capacities are rounded up to the next power of two; huge pages,
    /// memory locking, and NUMA placement follow the configuration on a
    /// best-effort basis.
    pub fn create(config: RingConfig, caps: &Capabilities) -> Result<Self, CreateError> {
        // The config fields are public; re-apply the construction contract
        // here so a literal-built config cannot smuggle in a bad capacity.
        if config.capacity_per_class < crate::config::MIN_CLASS_CAPACITY
            || config.capacity_per_class > crate::config::MAX_CLASS_CAPACITY
        {
            return Err(CreateError::InvalidArgument("capacity_per_class out of range"));
        }
        let mut config = config;
        config.capacity_per_class = config.capacity_per_class.next_power_of_two();

        let mut classes = Vec::with_capacity(NUM_PRIORITY_CLASSES);
        for _ in 0..NUM_PRIORITY_CLASSES {
            classes.push(ClassRing::new(&config, caps)?);
        }

        info!(
            capacity_per_class = config.capacity(),
            numa_node = ?config.numa_node,
            huge_pages = config.huge_pages,
            "ring buffer created"
        );
        Ok(Self { classes, config })
    }

    /// Per-class capacity in bytes.
    #[inline]
    pub fn capacity_per_class(&self) -> usize {
        self.config.capacity()
    }

    /// Enqueues a complete record (header + payload bytes) on a class.
    ///
    /// `Full` is normal backpressure; the caller decides whether to retry,
    /// drop, or push back. `TooLarge` means the record can never fit.
    #[inline]
    pub fn write(&self, priority: Priority, record: &[u8]) -> Result<(), WriteError> {
        self.classes[priority.index()].write(record)
    }

    /// [`write`](Self::write) with bounded spin/yield retries around `Full`.
    /// Never blocks indefinitely; returns `Full` once patience runs out.
    pub fn write_with_backoff(&self, priority: Priority, record: &[u8]) -> Result<(), WriteError> {
        let mut backoff = Backoff::new();
        loop {
            match self.write(priority, record) {
                Err(WriteError::Full) if !backoff.is_completed() => backoff.snooze(),
                other => return other,
            }
        }
    }

    /// Dequeues the next record on a class into `out`, returning its size.
    ///
    /// On [`ReadError::BufferTooSmall`] the record stays queued; retry with
    /// at least `needed` bytes. Corrupt length prefixes are skipped locally
    /// (counted in [`RingStats::corrupt_skips`]) and surface as `Empty`.
    pub fn read(&self, priority: Priority, out: &mut [u8]) -> Result<usize, ReadError> {
        let class = &self.classes[priority.index()];
        if !class.try_claim_consumer() {
            // Another worker holds the class; same as nothing to do here.
            return Err(ReadError::Empty);
        }
        let result = class.read(out);
        class.release_consumer();
        result
    }

    /// Dequeues the next record into a fresh vector, growing on
    /// `BufferTooSmall`. Returns `None` when the class is empty.
    pub fn read_vec(&self, priority: Priority) -> Option<Vec<u8>> {
        let mut out = vec![0u8; 4096];
        loop {
            match self.read(priority, &mut out) {
                Ok(n) => {
                    out.truncate(n);
                    return Some(out);
                }
                Err(ReadError::Empty) => return None,
                Err(ReadError::BufferTooSmall { needed }) => out.resize(needed, 0),
            }
        }
    }

    /// Bytes currently queued on a class, length prefixes included.
    #[inline]
    pub fn queued_bytes(&self, priority: Priority) -> u64 {
        self.classes[priority.index()].queued_bytes()
    }

    /// True when every class is drained.
    pub fn is_empty(&self) -> bool {
        self.classes.iter().all(ClassRing::is_empty)
    }

    /// Snapshot of the per-class counters.
    pub fn stats(&self) -> RingStats {
        let mut stats = RingStats::default();
        for (i, class) in self.classes.iter().enumerate() {
            let c = class.counters();
            stats.messages[i] = c.messages.load(Ordering::Relaxed);
            stats.bytes[i] = c.bytes.load(Ordering::Relaxed);
            stats.drops[i] = c.drops.load(Ordering::Relaxed);
            stats.oversize_drops[i] = c.oversize_drops.load(Ordering::Relaxed);
            stats.corrupt_skips[i] = c.corrupt_skips.load(Ordering::Relaxed);
        }
        stats
    }

    /// Largest record the buffer accepts (prefix overhead subtracted).
    #[inline]
    pub fn max_record_size(&self) -> usize {
        self.capacity_per_class() - LEN_PREFIX
    }
}

/// Per-class counter snapshot from [`RingBuffer::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RingStats {
    /// Records successfully enqueued, per class.
    pub messages: [u64; NUM_PRIORITY_CLASSES],
    /// Payload bytes successfully enqueued, per class.
    pub bytes: [u64; NUM_PRIORITY_CLASSES],
    /// Writes rejected because the class was full.
    pub drops: [u64; NUM_PRIORITY_CLASSES],
    /// Writes rejected because the record exceeds the class capacity.
    pub oversize_drops: [u64; NUM_PRIORITY_CLASSES],
    /// Corrupt length prefixes skipped by consumers.
    pub corrupt_skips: [u64; NUM_PRIORITY_CLASSES],
}

impl RingStats {
    /// Total records enqueued across all classes.
    pub fn total_messages(&self) -> u64 {
        self.messages.iter().sum()
    }

    /// Total full-queue drops across all classes.
    pub fn total_drops(&self) -> u64 {
        self.drops.iter().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::small_ring_config;

    fn buffer() -> RingBuffer {
        RingBuffer::create(small_ring_config(), &Capabilities::synthetic(1, 0)).unwrap()
    }

    #[test]
    fn test_classes_are_independent() {
        let rb = buffer();
        rb.write(Priority::Critical, &[1u8; 16]).unwrap();
        rb.write(Priority::Background, &[2u8; 16]).unwrap();

        let mut out = [0u8; 32];
        // Draining one class leaves the other untouched.
        assert_eq!(rb.read(Priority::Background, &mut out).unwrap(), 16);
        assert_eq!(out[0], 2);
        assert_eq!(rb.read(Priority::Background, &mut out), Err(ReadError::Empty));

        assert_eq!(rb.read(Priority::Critical, &mut out).unwrap(), 16);
        assert_eq!(out[0], 1);
    }

    #[test]
    fn test_stats_track_per_class() {
        let rb = buffer();
        rb.write(Priority::Normal, &[0u8; 100]).unwrap();
        rb.write(Priority::Normal, &[0u8; 100]).unwrap();
        rb.write(Priority::Low, &[0u8; 40]).unwrap();

        let stats = rb.stats();
        assert_eq!(stats.messages[Priority::Normal.index()], 2);
        assert_eq!(stats.bytes[Priority::Normal.index()], 200);
        assert_eq!(stats.messages[Priority::Low.index()], 1);
        assert_eq!(stats.total_messages(), 3);
        assert_eq!(stats.total_drops(), 0);
    }

    #[test]
    fn test_read_vec_grows() {
        let rb = buffer();
        let record = vec![0xA5u8; 8000];
        rb.write(Priority::Batch, &record).unwrap();
        assert_eq!(rb.read_vec(Priority::Batch).unwrap(), record);
        assert!(rb.read_vec(Priority::Batch).is_none());
    }

    #[test]
    fn test_create_rejects_bad_capacity() {
        let mut config = small_ring_config();
        config.capacity_per_class = 16; // below minimum
        assert!(matches!(
            RingBuffer::create(config, &Capabilities::synthetic(1, 0)),
            Err(CreateError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_write_with_backoff_gives_up() {
        let rb = RingBuffer::create(
            RingConfig::new(1024).huge_pages(false).lock_memory(false),
            &Capabilities::synthetic(1, 0),
        )
        .unwrap();

        // Fill the class; the backoff variant must eventually return Full.
        while rb.write(Priority::High, &[0u8; 100]).is_ok() {}
        assert_eq!(
            rb.write_with_backoff(Priority::High, &[0u8; 100]),
            Err(WriteError::Full)
        );
    }
}
