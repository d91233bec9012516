//! An implementation of Michael-style Hazard-Pointers, with the per-Thread
//! State managed through the [`threading`](crate::threading) Registry
//!
//! # Reference:
//! * [Hazard Pointers: Safe Memory Reclamation for Lock-Free Objects](https://www.eecg.utoronto.ca/~amza/ece1747h/papers/hazard_pointers.pdf)
//!
//! # How it works
//! Every attached Thread owns a Record with a fixed number of Hazard-Slots
//! (the `hazards_per_thread` Config-Value). Before a Thread dereferences a
//! shared Pointer it publishes it in one of its Slots through a [`Guard`]
//! and revalidates the Source afterwards. Unlinked Pointers are handed to
//! [`retire`] together with a Deleter, they are buffered per Thread and
//! periodically checked against the published Slots of all Threads, only
//! unprotected Pointers are actually reclaimed

use std::sync::Mutex;

use crate::reclaim::{Deleter, Gc, RetiredPtr};
use crate::sync::atomic;
use crate::threading;

mod record;

mod global;
use global::GlobalList;

mod guard;
pub use guard::Guard;

mod thread_gc;
pub(crate) use thread_gc::ThreadGc;

lazy_static::lazy_static! {
    static ref GLOBAL: GlobalList = GlobalList::new();
    static ref DRAIN: Mutex<Vec<RetiredPtr>> = Mutex::new(Vec::new());
}

/// The Hazard-Ptr scheme as a Capability for the generic Containers in
/// this Crate
pub struct Hp;

impl Gc for Hp {
    type Guard = Guard;

    fn guard() -> Self::Guard {
        guard()
    }

    unsafe fn retire(ptr: *mut (), deleter: Deleter) {
        let entry = RetiredPtr::new(ptr, deleter);
        let freeable = threading::with_hp(|gc| gc.retire_entry(entry));
        for entry in freeable {
            unsafe { entry.reclaim() };
        }
    }

    fn scan() {
        scan();
    }
}

/// Acquires one of the free Hazard-Slots of the current Thread
///
/// # Panics
/// If the current Thread is not attached, or if it already holds all of its
/// `hazards_per_thread` Slots through other Guards
pub fn guard() -> Guard {
    threading::with_hp(|gc| gc.acquire_guard())
}

/// This function is used to reclaim a piece of memory, once it is no longer
/// in use by any other Thread. Once it is determined that the given Address
/// is no longer protected by any Hazard-Slot, the provided `retire_fn`
/// function will be called with the given Address to then properly reclaim
/// the piece of memory.
///
/// This function does not provide any garantue about when the memory will
/// be reclaimed, as there is no way to predict when the memory will not be
/// used anymore. The `retire_fn` may itself retire further Pointers and
/// may run on a different Thread than the one that retired
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

    let freeable = threading::with_hp(|gc| gc.retire_entry(entry));
    for entry in freeable {
        unsafe { entry.reclaim() };
    }
}

/// Forces a reclaimation attempt, which might reclaim some of the retired
/// Nodes, but does not garantue that any Node will be reclaimed, as they
/// might still be used
pub fn scan() {
    let freeable = threading::with_hp(|gc| gc.scan());
    for entry in freeable {
        unsafe { entry.reclaim() };
    }
}

/// The number of retired Entries the current Thread still buffers, used by
/// the Tests to check that Reclamation actually catches up
pub fn outstanding_retires() -> usize {
    let local = threading::with_hp(|gc| gc.retired_len());
    let drained = DRAIN.lock().unwrap().len();
    local + drained
}

/// Snapshots the currently protected Addresses of all Threads, also used by
/// the HRC scheme which rides on the same Hazard-Records
pub(crate) fn protected_set() -> std::collections::HashSet<usize> {
    atomic::fence(atomic::Ordering::SeqCst);
    GLOBAL.protected_set()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{atomic::AtomicPtr, Arc};

    fn setup() {
        crate::tests_support::ensure_init();
    }

    #[test]
    fn protect_memory() {
        setup();
        let _attach = threading::attach_scoped();

        let raw_ptr = Box::into_raw(Box::new(15));
        let shared_ptr = AtomicPtr::new(raw_ptr);

        let mut guard = guard();
        let protected = guard.protect_ptr(&shared_ptr);
        assert_eq!(raw_ptr, protected);
        assert_eq!(15, unsafe { *protected });

        unsafe {
            retire(raw_ptr, |ptr| {
                drop(Box::from_raw(ptr));
            })
        };

        // still protected by the Guard
        assert_eq!(15, unsafe { *protected });
        drop(guard);

        scan();
    }

    #[test]
    fn retire_unprotected_is_freed() {
        setup();
        let _attach = threading::attach_scoped();

        let freed = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let raw_ptr = Box::into_raw(Box::new(13));
        let signal = freed.clone();
        unsafe {
            retire(raw_ptr, move |ptr| {
                drop(Box::from_raw(ptr));
                signal.store(true, std::sync::atomic::Ordering::SeqCst);
            })
        };

        scan();
        assert!(freed.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn guard_reuse() {
        setup();
        let _attach = threading::attach_scoped();

        let first = Box::into_raw(Box::new(1));
        let second = Box::into_raw(Box::new(2));
        let shared_ptr = AtomicPtr::new(first);

        let mut guard = guard();
        assert_eq!(first, guard.protect_ptr(&shared_ptr));

        shared_ptr.store(second, std::sync::atomic::Ordering::SeqCst);
        assert_eq!(second, guard.protect_ptr(&shared_ptr));

        drop(guard);
        unsafe {
            drop(Box::from_raw(first));
            drop(Box::from_raw(second));
        }
    }
}
