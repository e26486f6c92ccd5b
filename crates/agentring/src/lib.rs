//! Agentring - priority-aware lock-free message transport.
//!
//! An in-process transport for multi-agent coordination on hybrid
//! P-core/E-core CPUs. Producers enqueue fixed-header + variable-payload
//! records tagged with one of six priority classes; core-pinned workers
//! dequeue by class affinity and steal parked work from their peers.
//!
//! # Architecture
//!
//! - [`Capabilities`]: one-shot probe of core topology (P vs E via CPUID
//!   leaf 0x1A), SIMD level, hardware CRC32C, NUMA nodes, and huge pages.
//! - [`RecordBuilder`] / [`MessageHeader`]: the 128-byte wire format with a
//!   CRC32C integrity check.
//! - [`RingBuffer`]: six independent SPSC byte rings (one per
//!   [`Priority`]), huge-page backed when available, with cached-position
//!   fast paths and an 8-byte length prefix per record.
//! - [`WorkerPool`]: one worker per core; P-core workers spin on
//!   CRITICAL/HIGH, E-core workers sleep-poll the throughput classes, and
//!   idle workers steal from peer deques.
//!
//! # Example
//!
//! ```
//! use agentring::{Capabilities, Priority, RecordBuilder, RingBuffer, RingConfig};
//!
//! let caps = Capabilities::probe();
//! let config = RingConfig::new(64 * 1024).huge_pages(false).lock_memory(false);
//! let rb = RingBuffer::create(config, &caps).unwrap();
//!
//! let record = RecordBuilder::new(Priority::Normal)
//!     .source_agent(1)
//!     .sequence(0)
//!     .build_vec(b"status update")
//!     .unwrap();
//! rb.write(Priority::Normal, &record).unwrap();
//!
//! let back = rb.read_vec(Priority::Normal).unwrap();
//! assert_eq!(back, record);
//! ```
//!
//! # Concurrency contract
//!
//! Each priority class accepts a single producer at a time; concurrent
//! producers on one class are rejected by contract (the write path is
//! undefined under that misuse, so the restriction is part of the API).
//! Consumption is safe from any number of threads: reads go through a
//! per-class claim.

mod backoff;
mod buffer;
mod config;
mod crc32c;
mod deque;
mod error;
mod invariants;
mod memcopy;
mod pool;
mod record;
mod region;
mod ring;
mod topology;
mod worker;

pub use backoff::Backoff;
pub use buffer::{RingBuffer, RingStats};
pub use config::{small_ring_config, PoolConfig, RingConfig, MAX_CLASS_CAPACITY, MIN_CLASS_CAPACITY};
pub use crc32c::{crc32c, hardware_available as crc32c_hardware_available, Crc32c};
pub use deque::{work_queue, LocalQueue, Steal, Stealer, DEQUE_CAPACITY};
pub use error::{CreateError, PoolError, ReadError, RecordError, WriteError};
pub use pool::{ProcessFn, WorkerPool, WorkerStats};
pub use record::{
    monotonic_ns, verify_record, MessageHeader, Priority, RecordBuilder, FLAG_EXTENDED_METADATA,
    HEADER_SIZE, MAGIC, MAX_PAYLOAD_LEN, MAX_TARGETS, NUM_PRIORITY_CLASSES, VERSION,
};
pub use topology::{Capabilities, CoreType};
pub use worker::WorkerState;
