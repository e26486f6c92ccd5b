use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::backoff::Backoff;
use crate::buffer::RingBuffer;
use crate::deque::{LocalQueue, Steal, Stealer};
use crate::pool::ProcessFn;
use crate::record::{MessageHeader, Priority, HEADER_SIZE, NUM_PRIORITY_CLASSES};
use crate::topology::CoreType;

/// Worker lifecycle states, observable through pool stats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    Starting = 0,
    Pinned = 1,
    Polling = 2,
    Stealing = 3,
    Backoff = 4,
    Stopping = 5,
    Stopped = 6,
}

impl WorkerState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Starting,
            1 => Self::Pinned,
            2 => Self::Polling,
            3 => Self::Stealing,
            4 => Self::Backoff,
            5 => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

fn core_type_to_u8(ct: CoreType) -> u8 {
    match ct {
        CoreType::Performance => 0,
        CoreType::Efficiency => 1,
        CoreType::Unknown => 2,
    }
}

fn core_type_from_u8(raw: u8) -> CoreType {
    match raw {
        0 => CoreType::Performance,
        1 => CoreType::Efficiency,
        _ => CoreType::Unknown,
    }
}

/// A dequeued record owned by the worker layer; what the deques carry.
pub(crate) struct Task {
    pub(crate) record: Vec<u8>,
}

/// Counters and observable state shared between a worker thread and the
/// pool handle. All counters are relaxed; exactness under concurrent reads
/// is not a goal.
pub(crate) struct WorkerShared {
    pub(crate) cpu_id: usize,
    core_type: AtomicU8,
    state: AtomicU8,
    pub(crate) tasks_executed: AtomicU64,
    pub(crate) executed_by_class: [AtomicU64; NUM_PRIORITY_CLASSES],
    pub(crate) tasks_stolen: AtomicU64,
    pub(crate) idle_cycles: AtomicU64,
    pub(crate) callback_errors: AtomicU64,
    pub(crate) malformed_records: AtomicU64,
}

impl WorkerShared {
    pub(crate) fn new(cpu_id: usize, core_type: CoreType) -> Self {
        Self {
            cpu_id,
            core_type: AtomicU8::new(core_type_to_u8(core_type)),
            state: AtomicU8::new(WorkerState::Starting as u8),
            tasks_executed: AtomicU64::new(0),
            executed_by_class: Default::default(),
            tasks_stolen: AtomicU64::new(0),
            idle_cycles: AtomicU64::new(0),
            callback_errors: AtomicU64::new(0),
            malformed_records: AtomicU64::new(0),
        }
    }

    pub(crate) fn core_type(&self) -> CoreType {
        core_type_from_u8(self.core_type.load(Ordering::Relaxed))
    }

    fn demote_core_type(&self) {
        self.core_type
            .store(core_type_to_u8(CoreType::Unknown), Ordering::Relaxed);
    }

    pub(crate) fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Relaxed))
    }

    fn set_state(&self, state: WorkerState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }
}

/// How a worker waits when there is nothing to do.
pub(crate) enum IdleStrategy {
    /// PAUSE-hint spinning; P-core workers never sleep.
    Spin,
    /// Bounded sleep; E-core workers yield the core.
    Sleep(Duration),
}

/// Everything a worker thread needs, moved into the thread at spawn.
pub(crate) struct WorkerContext {
    pub(crate) shared: Arc<WorkerShared>,
    pub(crate) rb: Arc<RingBuffer>,
    pub(crate) process: Arc<ProcessFn>,
    pub(crate) local: LocalQueue<Task>,
    /// Same-type peer deques, pre-rotated so iteration starts at the next
    /// worker rather than always at the first.
    pub(crate) peers: Vec<Stealer<Task>>,
    pub(crate) running: Arc<AtomicBool>,
    pub(crate) poll_order: Vec<Priority>,
    pub(crate) batch: usize,
    pub(crate) idle: IdleStrategy,
    pub(crate) pin: bool,
    pub(crate) realtime: bool,
}

/// Worker thread entry point.
pub(crate) fn run_worker(mut ctx: WorkerContext) {
    let shared = Arc::clone(&ctx.shared);

    if ctx.pin {
        if core_affinity::set_for_current(core_affinity::CoreId { id: shared.cpu_id }) {
            shared.set_state(WorkerState::Pinned);
        } else {
            warn!(
                cpu = shared.cpu_id,
                "worker pinning failed, continuing unpinned"
            );
            shared.demote_core_type();
        }
    }
    if ctx.realtime {
        request_realtime_class(shared.core_type());
    }

    let mut backoff = Backoff::new();
    while ctx.running.load(Ordering::Acquire) {
        // 1. Local work first: tasks this worker parked during batch refill.
        if let Some(task) = ctx.local.pop() {
            execute(&shared, &ctx.process, &task);
            backoff.reset();
            continue;
        }

        // 2. Poll the ring classes in affinity order.
        shared.set_state(WorkerState::Polling);
        if poll_ring(&mut ctx) {
            backoff.reset();
            continue;
        }

        // 3. Nothing queued for us: try the peers' deques.
        shared.set_state(WorkerState::Stealing);
        if let Some(task) = steal_one(&ctx.peers) {
            ctx.shared.tasks_stolen.fetch_add(1, Ordering::Relaxed);
            execute(&ctx.shared, &ctx.process, &task);
            backoff.reset();
            continue;
        }

        // 4. Idle.
        shared.set_state(WorkerState::Backoff);
        shared.idle_cycles.fetch_add(1, Ordering::Relaxed);
        match ctx.idle {
            IdleStrategy::Spin => backoff.spin(),
            IdleStrategy::Sleep(duration) => std::thread::sleep(duration),
        }
    }

    // Best-effort drain of our own deque so parked tasks are not lost.
    shared.set_state(WorkerState::Stopping);
    while let Some(task) = ctx.local.pop() {
        execute(&shared, &ctx.process, &task);
    }
    shared.set_state(WorkerState::Stopped);
    debug!(cpu = shared.cpu_id, "worker stopped");
}

/// Polls classes in affinity order. The first record found is processed
/// inline; up to `batch - 1` more from the same class are parked on the
/// local deque, where peers can steal them. Returns `true` on progress.
fn poll_ring(ctx: &mut WorkerContext) -> bool {
    for &priority in &ctx.poll_order {
        let Some(record) = ctx.rb.read_vec(priority) else {
            continue;
        };
        execute(&ctx.shared, &ctx.process, &Task { record });

        for _ in 1..ctx.batch {
            match ctx.rb.read_vec(priority) {
                Some(record) => {
                    if let Err(task) = ctx.local.push(Task { record }) {
                        // Deque full: process inline and stop refilling.
                        execute(&ctx.shared, &ctx.process, &task);
                        break;
                    }
                }
                None => break,
            }
        }
        return true;
    }
    false
}

/// Tries each peer once, absorbing CAS contention with pause hints.
fn steal_one(peers: &[Stealer<Task>]) -> Option<Task> {
    for peer in peers {
        loop {
            match peer.steal() {
                Steal::Success(task) => return Some(task),
                Steal::Retry => std::hint::spin_loop(),
                Steal::Empty => break,
            }
        }
    }
    None
}

/// Parses the record and hands it to the user callback. Malformed records
/// and panicking callbacks are counted and dropped, never retried.
pub(crate) fn execute(shared: &WorkerShared, process: &Arc<ProcessFn>, task: &Task) {
    let header = match MessageHeader::parse(&task.record) {
        Ok(header) => header,
        Err(err) => {
            shared.malformed_records.fetch_add(1, Ordering::Relaxed);
            debug!(cpu = shared.cpu_id, %err, "dropping malformed record");
            return;
        }
    };

    let total = HEADER_SIZE + header.payload_len as usize;
    if task.record.len() < total {
        shared.malformed_records.fetch_add(1, Ordering::Relaxed);
        debug!(cpu = shared.cpu_id, "dropping truncated record");
        return;
    }

    let payload = &task.record[HEADER_SIZE..total];
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        process(header.priority, &header, payload);
    }));
    if outcome.is_err() {
        shared.callback_errors.fetch_add(1, Ordering::Relaxed);
        warn!(
            cpu = shared.cpu_id,
            priority = header.priority.index(),
            "process callback panicked; continuing"
        );
    }

    shared.tasks_executed.fetch_add(1, Ordering::Relaxed);
    shared.executed_by_class[header.priority.index()].fetch_add(1, Ordering::Relaxed);
}

/// Best-effort request for a real-time-like scheduling class; P workers ask
/// for a higher priority than E workers. EPERM is the common case for
/// unprivileged processes and is only logged.
#[cfg(target_os = "linux")]
fn request_realtime_class(core_type: CoreType) {
    let priority = match core_type {
        CoreType::Efficiency => 10,
        CoreType::Performance | CoreType::Unknown => 20,
    };
    let param = libc::sched_param {
        sched_priority: priority,
    };
    // SAFETY: operates on the calling thread only.
    let rc = unsafe { libc::sched_setscheduler(0, libc::SCHED_RR, &param) };
    if rc != 0 {
        debug!(priority, "sched_setscheduler declined, staying SCHED_OTHER");
    }
}

#[cfg(not(target_os = "linux"))]
fn request_realtime_class(_core_type: CoreType) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordBuilder;

    fn shared() -> WorkerShared {
        WorkerShared::new(0, CoreType::Performance)
    }

    #[test]
    fn test_execute_counts_by_class() {
        let shared = shared();
        let process: Arc<ProcessFn> = Arc::new(|_, _, _| {});

        let record = RecordBuilder::new(Priority::Low).build_vec(b"x").unwrap();
        execute(&shared, &process, &Task { record });

        assert_eq!(shared.tasks_executed.load(Ordering::Relaxed), 1);
        assert_eq!(
            shared.executed_by_class[Priority::Low.index()].load(Ordering::Relaxed),
            1
        );
    }

    #[test]
    fn test_execute_drops_malformed() {
        let shared = shared();
        let process: Arc<ProcessFn> = Arc::new(|_, _, _| panic!("must not be called"));

        execute(&shared, &process, &Task { record: vec![0u8; 64] });

        assert_eq!(shared.malformed_records.load(Ordering::Relaxed), 1);
        assert_eq!(shared.tasks_executed.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_execute_survives_panicking_callback() {
        let shared = shared();
        let process: Arc<ProcessFn> = Arc::new(|_, _, _| panic!("application bug"));

        let record = RecordBuilder::new(Priority::Normal).build_vec(&[]).unwrap();
        execute(&shared, &process, &Task { record });

        assert_eq!(shared.callback_errors.load(Ordering::Relaxed), 1);
        // The record still counts as executed; it is never retried.
        assert_eq!(shared.tasks_executed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_state_round_trip() {
        let shared = shared();
        assert_eq!(shared.state(), WorkerState::Starting);
        shared.set_state(WorkerState::Polling);
        assert_eq!(shared.state(), WorkerState::Polling);
        shared.set_state(WorkerState::Stopped);
        assert_eq!(shared.state(), WorkerState::Stopped);
    }
}
