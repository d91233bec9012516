//! An implementation of the "Pass The Buck" reclamation scheme with
//! dynamically allocated Guards
//!
//! # Reference:
//! * [Nonblocking Memory Management Support for Dynamic-Sized Data Structures](https://cs.brown.edu/~mph/HerlihyLMM05/ptb.pdf)
//!
//! # Difference to the Hazard-Ptr scheme
//! The Guards are not bound to a per-Thread Slot-Array but drawn from a
//! single lock-free, grow-only Pool, so one Thread can hold any number of
//! Protections at the same time. Acquiring a Guard costs a CAS on the Pool
//! in exchange. Retired Entries are batched into Chunks per Thread and
//! spliced onto a shared Reclaim-Queue once a Chunk is full, the
//! [`liveness_scan`] then walks the Pool and frees every Entry no Guard
//! refers to anymore

use std::fmt::Debug;

use crate::reclaim::{Deleter, Gc, GcGuard, RetiredPtr};
use crate::sync::atomic;
use crate::threading;

mod pool;
use pool::{GuardNode, GuardPool};

mod reclaim_queue;
use reclaim_queue::ReclaimQueue;

lazy_static::lazy_static! {
    static ref POOL: GuardPool = GuardPool::new();
    static ref RECLAIM: ReclaimQueue = ReclaimQueue::new();
}

/// The Pass-The-Buck scheme as a Capability for the generic Containers in
/// this Crate
pub struct Ptb;

impl Gc for Ptb {
    type Guard = Guard;

    fn guard() -> Self::Guard {
        guard()
    }

    unsafe fn retire(ptr: *mut (), deleter: Deleter) {
        let entry = RetiredPtr::new(ptr, deleter);
        let freeable = threading::with_ptb(|gc| gc.retire_entry(entry));
        for entry in freeable {
            unsafe { entry.reclaim() };
        }
    }

    fn scan() {
        liveness_scan();
    }
}

/// A Guard drawn from the shared Pool, protecting at most one Address at a
/// time for as long as it is held
pub struct Guard {
    node: &'static GuardNode,
}

impl Debug for Guard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Guard ()")
    }
}

impl GcGuard for Guard {
    fn protect(&mut self, cell: &atomic::AtomicUsize, transform: fn(usize) -> usize) -> usize {
        let mut raw = cell.load(atomic::Ordering::SeqCst);
        loop {
            self.node
                .protected
                .store(transform(raw), atomic::Ordering::SeqCst);

            let n_raw = cell.load(atomic::Ordering::SeqCst);
            if transform(n_raw) == transform(raw) {
                return n_raw;
            }

            raw = n_raw;
        }
    }

    fn assign(&mut self, addr: usize) {
        self.node.protected.store(addr, atomic::Ordering::SeqCst);
    }

    fn clear(&mut self) {
        self.node.protected.store(0, atomic::Ordering::Relaxed);
    }
}

impl Drop for Guard {
    fn drop(&mut self) {
        self.node.release();
    }
}

/// Acquires a Guard from the shared Pool, either by re-using a free one or
/// by growing the Pool by one Node
pub fn guard() -> Guard {
    Guard {
        node: POOL.acquire(),
    }
}

/// Hands the given Pointer over for eventual reclamation, once no Guard in
/// the Pool refers to it anymore. The `retire_fn` may run on a different
/// Thread than the one that retired
///
/// # Safety
/// The Pointer must have been unlinked from every shared Structure before
/// this is called and must not be retired a second time
pub unsafe fn retire<T, F>(ptr: *mut T, retire_fn: F)
where
    F: FnOnce(*mut T) + Send + 'static,
{
    let entry = RetiredPtr::new(
        ptr as *mut (),
        Box::new(move |raw_ptr| retire_fn(raw_ptr as *mut T)),
    );

    let freeable = threading::with_ptb(|gc| gc.retire_entry(entry));
    for entry in freeable {
        unsafe { entry.reclaim() };
    }
}

/// Walks the Guard-Pool and the shared Reclaim-Queue and frees every
/// retired Entry that no Guard refers to anymore
pub fn liveness_scan() {
    let freeable = threading::with_ptb(|gc| gc.scan());
    for entry in freeable {
        unsafe { entry.reclaim() };
    }
}

mod thread_gc;
pub(crate) use thread_gc::ThreadGc;
