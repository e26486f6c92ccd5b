//! Error types for transport operations.
//!
//! Hot-path operations (`write`, `read`) return small `Copy` enums that are
//! normal control flow (`Full`, `Empty`) or caller contract violations.
//! Resource errors only ever come out of creation paths.

use thiserror::Error;

/// Errors from building or parsing message records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RecordError {
    /// A caller-supplied field violates the wire contract.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The bytes do not form a valid record header.
    #[error("malformed record: {0}")]
    Malformed(&'static str),

    /// The output buffer cannot hold the encoded record.
    #[error("output buffer too small: need {needed}, have {available}")]
    BufferTooSmall {
        /// Bytes required to encode the record.
        needed: usize,
        /// Bytes the caller provided.
        available: usize,
    },
}

/// Errors from enqueuing a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WriteError {
    /// The class queue has no room. Normal backpressure signal; the caller
    /// decides whether to retry, drop, or push back.
    #[error("priority class queue is full")]
    Full,

    /// The record can never fit in this class queue, even when empty.
    #[error("record of {size} bytes exceeds class capacity {capacity}")]
    TooLarge {
        /// Record size including the length prefix.
        size: usize,
        /// Class queue capacity in bytes.
        capacity: usize,
    },

    /// A caller-supplied parameter violates the API contract.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}

impl WriteError {
    /// Returns `true` if retrying later can succeed.
    #[inline]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Full)
    }
}

/// Errors from dequeuing a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReadError {
    /// No record available. Normal control flow for consumers.
    #[error("priority class queue is empty")]
    Empty,

    /// The caller's buffer cannot hold the next record. The record stays in
    /// the queue; retry with a buffer of at least `needed` bytes.
    #[error("output buffer too small: next record is {needed} bytes")]
    BufferTooSmall {
        /// Size of the record at the head of the queue.
        needed: usize,
    },
}

/// Errors from ring buffer creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CreateError {
    /// Backing memory could not be allocated or mapped.
    #[error("allocation failed: {0}")]
    OutOfMemory(&'static str),

    /// The configuration violates a construction contract.
    #[error("invalid configuration: {0}")]
    InvalidArgument(&'static str),
}

/// Errors from worker pool construction and control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PoolError {
    /// The capability record lists no usable cores.
    #[error("capability record lists no cores to run workers on")]
    NoCores,

    /// An OS thread could not be spawned.
    #[error("worker thread spawn failed")]
    Spawn,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_error_recoverable() {
        assert!(WriteError::Full.is_recoverable());
        assert!(!WriteError::TooLarge { size: 10, capacity: 4 }.is_recoverable());
        assert!(!WriteError::InvalidArgument("x").is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let e = WriteError::TooLarge { size: 5000, capacity: 4096 };
        assert_eq!(
            e.to_string(),
            "record of 5000 bytes exceeds class capacity 4096"
        );
        assert_eq!(ReadError::Empty.to_string(), "priority class queue is empty");
    }
}
