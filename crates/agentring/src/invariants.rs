//! Debug assertion macros for the position-counter protocol.
//!
//! Active only in debug builds; release builds carry zero overhead. The ring
//! uses these at every counter update to catch protocol violations early.

/// Queued bytes may never exceed the class capacity.
///
/// Holds because writers check for room before advancing `write_pos`.
macro_rules! debug_assert_bounded_bytes {
    ($queued:expr, $capacity:expr) => {
        debug_assert!(
            $queued <= $capacity as u64,
            "queued bytes {} exceed class capacity {}",
            $queued,
            $capacity
        )
    };
}

/// Position counters only move forward.
macro_rules! debug_assert_monotonic {
    ($name:literal, $old:expr, $new:expr) => {
        debug_assert!(
            $new >= $old,
            "{} moved backwards: {} -> {}",
            $name,
            $old,
            $new
        )
    };
}

/// The consumer may never advance past the committed write position.
macro_rules! debug_assert_read_not_past_write {
    ($new_read:expr, $write:expr) => {
        debug_assert!(
            $new_read <= $write,
            "read_pos {} advanced past write_pos {}",
            $new_read,
            $write
        )
    };
}

pub(crate) use debug_assert_bounded_bytes;
pub(crate) use debug_assert_monotonic;
pub(crate) use debug_assert_read_not_past_write;
