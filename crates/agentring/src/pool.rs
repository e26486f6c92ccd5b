use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{info, warn};

use crate::buffer::RingBuffer;
use crate::config::PoolConfig;
use crate::deque::{work_queue, Stealer};
use crate::error::PoolError;
use crate::record::{MessageHeader, Priority, NUM_PRIORITY_CLASSES};
use crate::topology::{Capabilities, CoreType};
use crate::worker::{
    run_worker, IdleStrategy, Task, WorkerContext, WorkerShared, WorkerState,
};

/// The record-processing callback.
///
/// Invoked inline on the worker thread for every dequeued record. Must be
/// non-blocking and bounded; a panic is caught, counted, and logged, and the
/// record is never retried.
pub type ProcessFn = dyn Fn(Priority, &MessageHeader, &[u8]) + Send + Sync;

/// Priority-affine worker pool with work-stealing.
///
/// One worker per core in the capability record. P-core workers poll
/// CRITICAL/HIGH (plus BATCH), E-core workers poll NORMAL/LOW/BATCH/
/// BACKGROUND; when the topology has only one core type every worker polls
/// all six classes so nothing starves. Idle workers steal parked tasks from
/// same-type peers before backing off, so stolen work keeps its class
/// affinity.
///
/// Dropping the pool stops and joins all workers.
pub struct WorkerPool {
    workers: Vec<Arc<WorkerShared>>,
    running: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Starts one worker per core with the default [`PoolConfig`].
    pub fn start<F>(
        caps: &Capabilities,
        rb: Arc<RingBuffer>,
        process: F,
    ) -> Result<Self, PoolError>
    where
        F: Fn(Priority, &MessageHeader, &[u8]) + Send + Sync + 'static,
    {
        Self::start_with_config(caps, rb, process, PoolConfig::default())
    }

    /// Starts one worker per core.
    pub fn start_with_config<F>(
        caps: &Capabilities,
        rb: Arc<RingBuffer>,
        process: F,
        config: PoolConfig,
    ) -> Result<Self, PoolError>
    where
        F: Fn(Priority, &MessageHeader, &[u8]) + Send + Sync + 'static,
    {
        let mut assignments: Vec<(usize, CoreType)> = Vec::with_capacity(caps.total_cores());
        assignments.extend(caps.p_cores.iter().map(|&id| (id, CoreType::Performance)));
        assignments.extend(caps.e_cores.iter().map(|&id| (id, CoreType::Efficiency)));
        if assignments.is_empty() {
            return Err(PoolError::NoCores);
        }

        // With a single core type present, that pool must cover every class.
        let single_class = caps.p_cores.is_empty() || caps.e_cores.is_empty();

        let process: Arc<ProcessFn> = Arc::new(process);
        let running = Arc::new(AtomicBool::new(true));
        let batch = config.batch_size.max(1);

        let mut locals = Vec::with_capacity(assignments.len());
        let mut stealers: Vec<Stealer<Task>> = Vec::with_capacity(assignments.len());
        for _ in 0..assignments.len() {
            let (local, stealer) = work_queue::<Task>();
            locals.push(local);
            stealers.push(stealer);
        }

        let mut pool = Self {
            workers: Vec::with_capacity(assignments.len()),
            running: Arc::clone(&running),
            handles: Vec::with_capacity(assignments.len()),
        };

        let mut p_seq = 0usize;
        let mut e_seq = 0usize;
        for (index, ((cpu_id, core_type), local)) in
            assignments.iter().copied().zip(locals).enumerate()
        {
            let shared = Arc::new(WorkerShared::new(cpu_id, core_type));

            // Steal only from same-type peers: a stolen task keeps its
            // class affinity. Pre-rotated so each worker starts at its
            // successor instead of everyone hammering the first deque.
            let n = stealers.len();
            let peers: Vec<Stealer<Task>> = (1..n)
                .map(|k| (index + k) % n)
                .filter(|&peer| assignments[peer].1 == core_type)
                .map(|peer| stealers[peer].clone())
                .collect();

            let name = match core_type {
                CoreType::Efficiency => {
                    let name = format!("agentring-e{e_seq}");
                    e_seq += 1;
                    name
                }
                _ => {
                    let name = format!("agentring-p{p_seq}");
                    p_seq += 1;
                    name
                }
            };

            let ctx = WorkerContext {
                shared: Arc::clone(&shared),
                rb: Arc::clone(&rb),
                process: Arc::clone(&process),
                local,
                peers,
                running: Arc::clone(&running),
                poll_order: poll_order(core_type, single_class),
                batch,
                idle: match core_type {
                    CoreType::Efficiency => IdleStrategy::Sleep(config.idle_sleep),
                    _ => IdleStrategy::Spin,
                },
                pin: config.pin_workers,
                realtime: config.realtime_priority,
            };

            let handle = std::thread::Builder::new()
                .name(name)
                .spawn(move || run_worker(ctx));
            match handle {
                Ok(handle) => {
                    pool.workers.push(shared);
                    pool.handles.push(handle);
                }
                Err(err) => {
                    warn!(%err, "worker spawn failed, stopping pool");
                    pool.stop();
                    return Err(PoolError::Spawn);
                }
            }
        }

        info!(
            p_workers = caps.num_p_cores(),
            e_workers = caps.num_e_cores(),
            batch,
            "worker pool started"
        );
        Ok(pool)
    }

    /// Signals all workers to stop and joins them. In-flight callbacks
    /// finish; each worker drains its own deque best-effort before exiting.
    /// Idempotent.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }

    /// True until [`stop`](Self::stop) completes.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire) && !self.handles.is_empty()
    }

    /// Number of workers.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Per-worker counter snapshot.
    pub fn stats(&self) -> Vec<WorkerStats> {
        self.workers
            .iter()
            .map(|w| WorkerStats {
                cpu_id: w.cpu_id,
                core_type: w.core_type(),
                state: w.state(),
                tasks_executed: w.tasks_executed.load(Ordering::Relaxed),
                executed_by_class: snapshot_classes(&w.executed_by_class),
                tasks_stolen: w.tasks_stolen.load(Ordering::Relaxed),
                idle_cycles: w.idle_cycles.load(Ordering::Relaxed),
                callback_errors: w.callback_errors.load(Ordering::Relaxed),
                malformed_records: w.malformed_records.load(Ordering::Relaxed),
            })
            .collect()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Snapshot of one worker's counters.
#[derive(Debug, Clone, Copy)]
pub struct WorkerStats {
    pub cpu_id: usize,
    pub core_type: CoreType,
    pub state: WorkerState,
    pub tasks_executed: u64,
    pub executed_by_class: [u64; NUM_PRIORITY_CLASSES],
    pub tasks_stolen: u64,
    pub idle_cycles: u64,
    pub callback_errors: u64,
    pub malformed_records: u64,
}

fn snapshot_classes(
    counters: &[std::sync::atomic::AtomicU64; NUM_PRIORITY_CLASSES],
) -> [u64; NUM_PRIORITY_CLASSES] {
    let mut out = [0u64; NUM_PRIORITY_CLASSES];
    for (slot, counter) in out.iter_mut().zip(counters) {
        *slot = counter.load(Ordering::Relaxed);
    }
    out
}

/// Class polling order by core type.
fn poll_order(core_type: CoreType, single_class: bool) -> Vec<Priority> {
    if single_class {
        return Priority::ALL.to_vec();
    }
    match core_type {
        CoreType::Efficiency => vec![
            Priority::Normal,
            Priority::Low,
            Priority::Batch,
            Priority::Background,
        ],
        // BATCH is "either"; P workers take it after their own classes.
        CoreType::Performance | CoreType::Unknown => {
            vec![Priority::Critical, Priority::High, Priority::Batch]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::small_ring_config;

    #[test]
    fn test_poll_order_by_core_type() {
        let p = poll_order(CoreType::Performance, false);
        assert_eq!(p, vec![Priority::Critical, Priority::High, Priority::Batch]);

        let e = poll_order(CoreType::Efficiency, false);
        assert_eq!(
            e,
            vec![
                Priority::Normal,
                Priority::Low,
                Priority::Batch,
                Priority::Background
            ]
        );

        assert_eq!(poll_order(CoreType::Performance, true), Priority::ALL.to_vec());
    }

    #[test]
    fn test_empty_capability_record_rejected() {
        let caps = Capabilities::synthetic(0, 0);
        let rb = Arc::new(
            RingBuffer::create(small_ring_config(), &caps).unwrap(),
        );
        let result = WorkerPool::start(&caps, rb, |_, _, _| {});
        assert!(matches!(result, Err(PoolError::NoCores)));
    }

    #[test]
    fn test_start_and_stop() {
        let caps = Capabilities::synthetic(1, 1);
        let rb = Arc::new(
            RingBuffer::create(small_ring_config(), &caps).unwrap(),
        );
        let mut pool = WorkerPool::start_with_config(
            &caps,
            rb,
            |_, _, _| {},
            PoolConfig {
                pin_workers: false,
                realtime_priority: false,
                ..PoolConfig::default()
            },
        )
        .unwrap();

        assert_eq!(pool.worker_count(), 2);
        assert!(pool.is_running());
        pool.stop();
        assert!(!pool.is_running());
        for stats in pool.stats() {
            assert_eq!(stats.state, WorkerState::Stopped);
        }
    }
}
