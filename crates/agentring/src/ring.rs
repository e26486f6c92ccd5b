use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::config::RingConfig;
use crate::error::{CreateError, ReadError, WriteError};
use crate::invariants::{
    debug_assert_bounded_bytes, debug_assert_monotonic, debug_assert_read_not_past_write,
};
use crate::memcopy::BodyCopier;
use crate::region::Region;
use crate::topology::Capabilities;

// =============================================================================
// MEMORY ORDERING & SYNCHRONIZATION STRATEGY
// =============================================================================
//
// One ClassRing is the queue for a single priority class: an SPSC byte ring
// carrying variable-length records, each preceded by an 8-byte length prefix.
//
// ## Position Counters
//
// `write_pos` and `read_pos` are unbounded u64 byte counters, never wrapped.
// The physical index is `pos & mask`, computed only at buffer access. This
// removes the ABA problem and makes full/empty unambiguous:
// - queued bytes  = write_pos - read_pos
// - free bytes    = capacity - queued
//
// ## Memory Ordering Protocol
//
// **Producer (write path):**
// 1. Load `write_pos` with Relaxed (only the producer writes it)
// 2. Check free space against `cached_read_pos` (UnsafeCell, producer-only)
// 3. If insufficient: reload `read_pos` with Acquire (syncs with consumer)
// 4. Store length prefix and body into the buffer (plain/NT stores; the NT
//    path ends in sfence)
// 5. Store `write_pos` with Release (publishes prefix + body)
//
// **Consumer (read path):**
// 1. Load `read_pos` with Relaxed (only the consumer writes it)
// 2. Check available bytes against `cached_write_pos` (consumer-only cell)
// 3. If empty: reload `write_pos` with Acquire (syncs with producer)
// 4. Copy prefix + body out of the buffer
// 5. Store `read_pos` with Release (returns the space to the producer)
//
// ## Single-Writer Invariants
//
// Accessed via UnsafeCell without atomics because each has exactly one
// writer:
// - `cached_read_pos`: written and read by the producer only
// - `cached_write_pos`: written and read by the consumer only
// - buffer bytes in [write_pos, write_pos + needed): producer, pre-publish
// - buffer bytes in [read_pos, write_pos): consumer, post-Acquire
//
// The single-consumer side is enforced above this type: RingBuffer routes
// all reads through a per-class consumer claim.
//
// =============================================================================

/// Bytes of length prefix preceding every in-queue record.
pub(crate) const LEN_PREFIX: usize = 8;

/// Relaxed per-class statistics counters.
///
/// Written from the hot paths with relaxed ordering; read by `stats()`
/// snapshots. Exactness across concurrent readers is not a goal.
#[derive(Debug, Default)]
pub(crate) struct ClassCounters {
    pub(crate) messages: AtomicU64,
    pub(crate) bytes: AtomicU64,
    pub(crate) drops: AtomicU64,
    pub(crate) oversize_drops: AtomicU64,
    pub(crate) corrupt_skips: AtomicU64,
}

/// SPSC byte ring for one priority class.
///
/// Variable-length records, 8-byte length prefix, wrap-aware copies, and the
/// cached-position fast paths that keep cross-core traffic off the common
/// case.
#[repr(C)]
pub(crate) struct ClassRing {
    // === PRODUCER HOT === (128-byte aligned)
    /// Committed write position (written by producer, read by consumer).
    write_pos: CacheAligned<AtomicU64>,
    /// Producer's cached view of `read_pos`.
    cached_read_pos: CacheAligned<UnsafeCell<u64>>,

    // === CONSUMER HOT === (128-byte aligned)
    /// Read position (written by consumer, read by producer).
    read_pos: CacheAligned<AtomicU64>,
    /// Consumer's cached view of `write_pos`.
    cached_write_pos: CacheAligned<UnsafeCell<u64>>,
    /// Consumer claim for multi-worker polling; the read path itself stays
    /// single-consumer.
    consumer_claim: CacheAligned<AtomicBool>,

    // === COLD STATE ===
    counters: ClassCounters,
    capacity: usize,
    mask: u64,
    copier: BodyCopier,

    // === DATA BUFFER ===
    region: Region,
}

// SAFETY: all cross-thread access is governed by the protocol above; the
// UnsafeCell caches are single-writer by construction.
unsafe impl Send for ClassRing {}
unsafe impl Sync for ClassRing {}

impl ClassRing {
    /// Allocates a class queue per the configuration.
    pub(crate) fn new(config: &RingConfig, caps: &Capabilities) -> Result<Self, CreateError> {
        let capacity = config.capacity();
        let region = Region::allocate(capacity, config)?;

        Ok(Self {
            write_pos: CacheAligned::new(AtomicU64::new(0)),
            cached_read_pos: CacheAligned::new(UnsafeCell::new(0)),
            read_pos: CacheAligned::new(AtomicU64::new(0)),
            cached_write_pos: CacheAligned::new(UnsafeCell::new(0)),
            consumer_claim: CacheAligned::new(AtomicBool::new(false)),
            counters: ClassCounters::default(),
            capacity,
            mask: capacity as u64 - 1,
            copier: BodyCopier::new(caps),
            region,
        })
    }

    /// Queue capacity in bytes.
    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently queued (prefixes included).
    #[inline]
    pub(crate) fn queued_bytes(&self) -> u64 {
        let write = self.write_pos.load(Ordering::Relaxed);
        let read = self.read_pos.load(Ordering::Relaxed);
        write.wrapping_sub(read)
    }

    /// True when no committed record is waiting.
    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.queued_bytes() == 0
    }

    pub(crate) fn counters(&self) -> &ClassCounters {
        &self.counters
    }

    // ---------------------------------------------------------------------
    // PRODUCER API (single producer per class)
    // ---------------------------------------------------------------------

    /// Enqueues one record. `Full` and `TooLarge` bump their counters; the
    /// buffer is never partially written.
    pub(crate) fn write(&self, record: &[u8]) -> Result<(), WriteError> {
        if record.is_empty() {
            return Err(WriteError::InvalidArgument("empty record"));
        }

        let needed = (LEN_PREFIX + record.len()) as u64;
        if needed > self.capacity as u64 {
            self.counters.oversize_drops.fetch_add(1, Ordering::Relaxed);
            return Err(WriteError::TooLarge {
                size: record.len(),
                capacity: self.capacity,
            });
        }

        let write_pos = self.write_pos.load(Ordering::Relaxed);

        // Fast path: judge free space from the cached consumer position.
        // SAFETY: cached_read_pos is written only on this (producer) path.
        let cached = unsafe { *self.cached_read_pos.get() };
        let mut free = self.capacity as u64 - write_pos.wrapping_sub(cached);

        if free < needed {
            // Slow path: refresh the cache from the consumer.
            let read_pos = self.read_pos.load(Ordering::Acquire);
            // SAFETY: producer-only cell; the Acquire load above synchronizes
            // with the consumer's Release store of read_pos.
            unsafe {
                *self.cached_read_pos.get() = read_pos;
            }
            free = self.capacity as u64 - write_pos.wrapping_sub(read_pos);
            if free < needed {
                self.counters.drops.fetch_add(1, Ordering::Relaxed);
                return Err(WriteError::Full);
            }
        }

        // SAFETY: [write_pos, write_pos + needed) is free space not visible
        // to the consumer until the Release store below.
        unsafe {
            self.store_prefix(write_pos, record.len() as u64);
            self.store_body(write_pos.wrapping_add(LEN_PREFIX as u64), record);
        }

        let new_write = write_pos.wrapping_add(needed);
        debug_assert_monotonic!("write_pos", write_pos, new_write);
        debug_assert_bounded_bytes!(
            new_write.wrapping_sub(self.read_pos.load(Ordering::Relaxed)),
            self.capacity
        );
        self.write_pos.store(new_write, Ordering::Release);

        self.counters.messages.fetch_add(1, Ordering::Relaxed);
        self.counters
            .bytes
            .fetch_add(record.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    // ---------------------------------------------------------------------
    // CONSUMER API (single consumer; claim enforced by RingBuffer)
    // ---------------------------------------------------------------------

    /// Dequeues one record into `out`. On `BufferTooSmall` the record stays
    /// queued. A corrupt length prefix resyncs the read position to the
    /// committed write position and is reported as `Empty`.
    pub(crate) fn read(&self, out: &mut [u8]) -> Result<usize, ReadError> {
        let read_pos = self.read_pos.load(Ordering::Relaxed);

        // Fast path: cached producer position.
        // SAFETY: cached_write_pos is written only on this (consumer) path.
        let mut committed = unsafe { *self.cached_write_pos.get() };
        let mut avail = committed.wrapping_sub(read_pos);

        if avail == 0 {
            // Slow path: refresh the cache from the producer.
            committed = self.write_pos.load(Ordering::Acquire);
            // SAFETY: consumer-only cell; the Acquire load synchronizes with
            // the producer's Release store of write_pos.
            unsafe {
                *self.cached_write_pos.get() = committed;
            }
            avail = committed.wrapping_sub(read_pos);
            if avail == 0 {
                return Err(ReadError::Empty);
            }
        }

        // A committed record always occupies at least prefix + 1 bytes.
        if avail < LEN_PREFIX as u64 {
            return Err(self.resync(committed));
        }

        let mut prefix = [0u8; LEN_PREFIX];
        // SAFETY: [read_pos, committed) was published by the producer.
        unsafe { self.load_bytes(read_pos, &mut prefix) };
        let len = u64::from_le_bytes(prefix);

        if len == 0 || len > (self.capacity - LEN_PREFIX) as u64 || LEN_PREFIX as u64 + len > avail
        {
            return Err(self.resync(committed));
        }
        let len = len as usize;

        if len > out.len() {
            return Err(ReadError::BufferTooSmall { needed: len });
        }

        // SAFETY: the body lies inside the published range checked above.
        unsafe { self.load_bytes(read_pos.wrapping_add(LEN_PREFIX as u64), &mut out[..len]) };

        let new_read = read_pos.wrapping_add((LEN_PREFIX + len) as u64);
        debug_assert_monotonic!("read_pos", read_pos, new_read);
        debug_assert_read_not_past_write!(new_read, committed);
        self.read_pos.store(new_read, Ordering::Release);
        Ok(len)
    }

    /// Tries to become the class consumer. Contention is not an error; the
    /// loser simply treats the class as empty this round.
    #[inline]
    pub(crate) fn try_claim_consumer(&self) -> bool {
        !self.consumer_claim.swap(true, Ordering::Acquire)
    }

    /// Releases the consumer claim.
    #[inline]
    pub(crate) fn release_consumer(&self) {
        self.consumer_claim.store(false, Ordering::Release);
    }

    /// Skips unreadable bytes: jumps the read position to the committed
    /// write position and counts the corruption event.
    fn resync(&self, committed: u64) -> ReadError {
        self.counters.corrupt_skips.fetch_add(1, Ordering::Relaxed);
        self.read_pos.store(committed, Ordering::Release);
        ReadError::Empty
    }

    // ---------------------------------------------------------------------
    // WRAP-AWARE BYTE ACCESS
    // ---------------------------------------------------------------------

    #[inline]
    fn base(&self) -> *mut u8 {
        self.region.as_ptr()
    }

    /// Stores the length prefix, split across the wrap boundary if needed.
    /// Prefixes are small and unaligned in general; always a scalar copy.
    ///
    /// # Safety
    ///
    /// The 8 bytes at `pos` must be unpublished free space.
    unsafe fn store_prefix(&self, pos: u64, len: u64) {
        let raw = len.to_le_bytes();
        let idx = (pos & self.mask) as usize;
        let first = raw.len().min(self.capacity - idx);
        std::ptr::copy_nonoverlapping(raw.as_ptr(), self.base().add(idx), first);
        if first < raw.len() {
            std::ptr::copy_nonoverlapping(raw.as_ptr().add(first), self.base(), raw.len() - first);
        }
    }

    /// Stores the record body through the SIMD-aware copier, split across
    /// the wrap boundary if needed.
    ///
    /// # Safety
    ///
    /// `src.len()` bytes at `pos` must be unpublished free space.
    unsafe fn store_body(&self, pos: u64, src: &[u8]) {
        let idx = (pos & self.mask) as usize;
        let first = src.len().min(self.capacity - idx);
        self.copier.copy(src.as_ptr(), self.base().add(idx), first);
        if first < src.len() {
            self.copier
                .copy(src.as_ptr().add(first), self.base(), src.len() - first);
        }
    }

    /// Copies published bytes out of the ring, split across the wrap
    /// boundary if needed.
    ///
    /// # Safety
    ///
    /// `dst.len()` bytes at `pos` must lie inside the published range.
    unsafe fn load_bytes(&self, pos: u64, dst: &mut [u8]) {
        let idx = (pos & self.mask) as usize;
        let first = dst.len().min(self.capacity - idx);
        std::ptr::copy_nonoverlapping(self.base().add(idx), dst.as_mut_ptr(), first);
        if first < dst.len() {
            std::ptr::copy_nonoverlapping(self.base(), dst.as_mut_ptr().add(first), dst.len() - first);
        }
    }

    /// Test hook: overwrite the length prefix of the record at the current
    /// read position.
    #[cfg(test)]
    pub(crate) fn corrupt_next_prefix(&self, fake_len: u64) {
        let pos = self.read_pos.load(Ordering::Relaxed);
        unsafe { self.store_prefix(pos, fake_len) };
    }

    /// Test hook: raw position counters.
    #[cfg(test)]
    pub(crate) fn positions(&self) -> (u64, u64) {
        (
            self.write_pos.load(Ordering::Relaxed),
            self.read_pos.load(Ordering::Relaxed),
        )
    }
}

// ---------------------------------------------------------------------
// HELPER: 128-byte cache-aligned wrapper
// ---------------------------------------------------------------------

/// Ensures 128-byte alignment to prevent prefetcher-induced false sharing
/// on Intel/AMD CPUs (which may prefetch adjacent cache lines).
#[repr(align(128))]
struct CacheAligned<T> {
    value: T,
}

impl<T> CacheAligned<T> {
    const fn new(value: T) -> Self {
        Self { value }
    }
}

impl<T> std::ops::Deref for CacheAligned<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}
