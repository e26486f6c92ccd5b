use std::time::Duration;

use crate::record::NUM_PRIORITY_CLASSES;

/// Total default queue memory across all priority classes.
const DEFAULT_TOTAL_CAPACITY: usize = 64 * 1024 * 1024;

/// Smallest accepted per-class capacity.
pub const MIN_CLASS_CAPACITY: usize = 1024;

/// Largest accepted per-class capacity (4 GiB keeps byte counters far from wrap).
pub const MAX_CLASS_CAPACITY: usize = 1 << 32;

/// Configuration for the priority ring buffer.
#[derive(Debug, Clone, Copy)]
pub struct RingConfig {
    /// Capacity of each priority class queue in bytes. Rounded up to the
    /// next power of two at construction.
    pub capacity_per_class: usize,
    /// Preferred NUMA node for queue memory. `None` leaves placement to the
    /// kernel's first-touch policy.
    pub numa_node: Option<u32>,
    /// Request 2 MiB huge pages for queue memory (best-effort).
    pub huge_pages: bool,
    /// Pin queue memory with mlock (best-effort).
    pub lock_memory: bool,
}

impl RingConfig {
    /// Creates a configuration with the given per-class capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity_per_class` is outside
    /// [`MIN_CLASS_CAPACITY`, `MAX_CLASS_CAPACITY`].
    pub fn new(capacity_per_class: usize) -> Self {
        assert!(
            capacity_per_class >= MIN_CLASS_CAPACITY
                && capacity_per_class <= MAX_CLASS_CAPACITY,
            "capacity_per_class must be between {MIN_CLASS_CAPACITY} and {MAX_CLASS_CAPACITY}"
        );

        Self {
            capacity_per_class: capacity_per_class.next_power_of_two(),
            numa_node: None,
            huge_pages: true,
            lock_memory: true,
        }
    }

    /// Sets the preferred NUMA node.
    pub fn numa_node(mut self, node: u32) -> Self {
        self.numa_node = Some(node);
        self
    }

    /// Enables or disables the huge-page request.
    pub fn huge_pages(mut self, enable: bool) -> Self {
        self.huge_pages = enable;
        self
    }

    /// Enables or disables memory locking.
    pub fn lock_memory(mut self, enable: bool) -> Self {
        self.lock_memory = enable;
        self
    }

    /// Per-class capacity after power-of-two rounding.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity_per_class
    }
}

impl Default for RingConfig {
    fn default() -> Self {
        // 64 MiB split across the six classes, rounded up per class.
        Self::new(DEFAULT_TOTAL_CAPACITY / NUM_PRIORITY_CLASSES)
    }
}

/// Configuration for the worker pool.
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// How many records a worker pulls from one class per poll. The first is
    /// processed inline; the rest land on the worker's local deque where
    /// peers can steal them.
    pub batch_size: usize,
    /// Pin each worker to its assigned CPU.
    pub pin_workers: bool,
    /// Request a real-time-like scheduling class (best-effort; P workers
    /// get a higher priority than E workers).
    pub realtime_priority: bool,
    /// Idle sleep applied by E-core workers when there is nothing to do.
    /// P-core workers always spin with pause hints instead.
    pub idle_sleep: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            pin_workers: true,
            realtime_priority: true,
            idle_sleep: Duration::from_micros(10),
        }
    }
}

/// Low-footprint configuration (64 KiB per class, no page tricks).
pub fn small_ring_config() -> RingConfig {
    RingConfig::new(64 * 1024).huge_pages(false).lock_memory(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_rounds_to_power_of_two() {
        let cfg = RingConfig::new(5000);
        assert_eq!(cfg.capacity(), 8192);

        let cfg = RingConfig::new(4096);
        assert_eq!(cfg.capacity(), 4096);
    }

    #[test]
    fn test_default_splits_total_capacity() {
        let cfg = RingConfig::default();
        assert!(cfg.capacity().is_power_of_two());
        assert!(cfg.capacity() >= DEFAULT_TOTAL_CAPACITY / NUM_PRIORITY_CLASSES);
    }

    #[test]
    #[should_panic(expected = "capacity_per_class")]
    fn test_rejects_tiny_capacity() {
        let _ = RingConfig::new(16);
    }
}
