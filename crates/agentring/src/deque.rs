use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{fence, AtomicIsize, Ordering};
use std::sync::Arc;

use crossbeam_utils::CachePadded;

// =============================================================================
// BOUNDED CHASE-LEV WORK-STEALING DEQUE
// =============================================================================
//
// One deque per worker. The owner pushes and pops at the *bottom*; thieves
// take from the *top* with a CAS on the top index. Capacity is fixed: a full
// deque rejects the push and the caller falls back to the ring buffer.
//
// ## Index protocol
//
// `bottom` and `top` are unbounded isize sequence numbers; the slot index is
// `seq & (CAPACITY - 1)`. `bottom - top` is the current length. Slots in
// [top, bottom) hold live tasks.
//
// - push:  write slot at `bottom`, then Release-store `bottom + 1`. The
//   Release pairs with the thief's Acquire load of `bottom`.
// - pop:   decrement `bottom`, SeqCst fence, read `top`. With two or more
//   items the owner takes the bottom slot uncontended. With exactly one
//   item left the owner races thieves for it via the CAS on `top`.
// - steal: Acquire-load `top`, SeqCst fence, Acquire-load `bottom`, read
//   the top slot, then CAS `top`. A failed CAS means another thief or the
//   owner won; the bitwise copy of the slot is discarded undropped
//   (MaybeUninit), so exactly one side ever owns the task.
//
// The speculative slot read before the CAS may race a concurrent owner push
// reusing the physical slot; the copy is only kept when the CAS proves the
// slot was still ours, so a torn copy is never observed by the caller.
//
// =============================================================================

/// Fixed deque capacity (tasks).
pub const DEQUE_CAPACITY: usize = 4096;

struct Inner<T> {
    /// Owner end. Written only by the owner.
    bottom: CachePadded<AtomicIsize>,
    /// Thief end. Advanced by CAS from any thread.
    top: CachePadded<AtomicIsize>,
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
}

// SAFETY: slot access is governed by the index protocol above; tasks are
// handed across threads, so T must be Send.
unsafe impl<T: Send> Send for Inner<T> {}
unsafe impl<T: Send> Sync for Inner<T> {}

impl<T> Inner<T> {
    #[inline]
    fn slot(&self, seq: isize) -> *mut MaybeUninit<T> {
        self.slots[(seq as usize) & (DEQUE_CAPACITY - 1)].get()
    }

    fn len(&self) -> usize {
        let b = self.bottom.load(Ordering::Relaxed);
        let t = self.top.load(Ordering::Relaxed);
        (b - t).max(0) as usize
    }
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        // Drop the live range [top, bottom).
        let t = self.top.load(Ordering::Relaxed);
        let b = self.bottom.load(Ordering::Relaxed);
        let mut seq = t;
        while seq < b {
            // SAFETY: exclusive access in Drop; [t, b) slots are initialized.
            unsafe {
                (*self.slot(seq)).assume_init_drop();
            }
            seq += 1;
        }
    }
}

/// Creates a deque, returning the owner handle and a cloneable stealer.
pub fn work_queue<T>() -> (LocalQueue<T>, Stealer<T>) {
    let mut slots = Vec::with_capacity(DEQUE_CAPACITY);
    slots.resize_with(DEQUE_CAPACITY, || UnsafeCell::new(MaybeUninit::uninit()));

    let inner = Arc::new(Inner {
        bottom: CachePadded::new(AtomicIsize::new(0)),
        top: CachePadded::new(AtomicIsize::new(0)),
        slots: slots.into_boxed_slice(),
    });

    (
        LocalQueue {
            inner: Arc::clone(&inner),
        },
        Stealer { inner },
    )
}

/// Owner handle: push and pop at the bottom.
///
/// Not `Clone`; exactly one thread owns the bottom end. The handle itself is
/// `Send` so it can move into the worker thread.
pub struct LocalQueue<T> {
    inner: Arc<Inner<T>>,
}

impl<T> LocalQueue<T> {
    /// Pushes a task at the bottom. Returns the task back when the deque is
    /// full so the caller can route it to the ring buffer instead.
    pub fn push(&mut self, task: T) -> Result<(), T> {
        let b = self.inner.bottom.load(Ordering::Relaxed);
        let t = self.inner.top.load(Ordering::Acquire);

        if b - t >= DEQUE_CAPACITY as isize {
            return Err(task);
        }

        // SAFETY: slot `b` is outside the live range [t, b); thieves cannot
        // observe it until the Release store below.
        unsafe {
            self.inner.slot(b).write(MaybeUninit::new(task));
        }
        self.inner.bottom.store(b + 1, Ordering::Release);
        Ok(())
    }

    /// Pops the most recently pushed task (LIFO for locality).
    pub fn pop(&mut self) -> Option<T> {
        let b = self.inner.bottom.load(Ordering::Relaxed) - 1;
        self.inner.bottom.store(b, Ordering::Relaxed);
        fence(Ordering::SeqCst);
        let t = self.inner.top.load(Ordering::Relaxed);

        if t > b {
            // Deque was empty; undo the decrement.
            self.inner.bottom.store(b + 1, Ordering::Relaxed);
            return None;
        }

        // SAFETY: slot `b` holds a live task; the copy is only kept if the
        // CAS below (or t < b) proves ownership.
        let task = unsafe { self.inner.slot(b).read() };

        if t == b {
            // Last element: race thieves via the top CAS.
            let won = self
                .inner
                .top
                .compare_exchange(t, t + 1, Ordering::SeqCst, Ordering::Relaxed)
                .is_ok();
            self.inner.bottom.store(b + 1, Ordering::Relaxed);
            if won {
                // SAFETY: the CAS proved the slot was still ours.
                return Some(unsafe { task.assume_init() });
            }
            // A thief took it; our bitwise copy is discarded undropped.
            return None;
        }

        // SAFETY: at least two items were present, no thief can reach `b`.
        Some(unsafe { task.assume_init() })
    }

    /// Current number of queued tasks.
    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// True when no tasks are queued.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outcome of a steal attempt.
#[derive(Debug)]
pub enum Steal<T> {
    /// Nothing to take.
    Empty,
    /// Lost a race with the owner or another thief; trying again may work.
    Retry,
    /// Took a task.
    Success(T),
}

/// Thief handle: takes tasks from the top. Cloneable and shareable.
pub struct Stealer<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Stealer<T> {
    /// Attempts to steal the oldest task.
    pub fn steal(&self) -> Steal<T> {
        let t = self.inner.top.load(Ordering::Acquire);
        fence(Ordering::SeqCst);
        let b = self.inner.bottom.load(Ordering::Acquire);

        if b - t <= 0 {
            return Steal::Empty;
        }

        // SAFETY: speculative copy; kept only if the CAS proves slot `t`
        // still belonged to us (see protocol block).
        let task = unsafe { self.inner.slot(t).read() };

        if self
            .inner
            .top
            .compare_exchange(t, t + 1, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok()
        {
            // SAFETY: CAS won; we own the task.
            Steal::Success(unsafe { task.assume_init() })
        } else {
            Steal::Retry
        }
    }

    /// Observed number of queued tasks.
    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// True when no tasks are observed.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Clone for Stealer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}
