use std::mem::MaybeUninit;
use std::sync::{Mutex, MutexGuard};

use super::markptr::MarkPtr;
use crate::sync::atomic;

/// A single Range-Node, covering the half-open Interval
/// `[key, key + size)` and carrying a Tower of `nlevel` Next-Pointers
pub struct Range<V> {
    pub key: u64,
    pub size: u64,
    /// Only the Head-Sentinel leaves this uninitialized, every Node handed
    /// out by the Map carries a Value
    pub value: MaybeUninit<V>,
    /// The Tower-Height, fixed at Construction
    pub nlevel: usize,
    /// The number of Levels this Node is currently physically linked on,
    /// plus one removal Pin while the Remover that marked it still holds
    /// the Node-Lock. Only grows under the Node-Lock, only shrinks once
    /// per physical Unlink or Pin-Release, the Transition to 0 retires
    /// the Node
    pub curlevel: atomic::AtomicUsize,
    /// One Next-Pointer per Level, the Mark-Bit of any of them flags this
    /// Node as logically deleted
    pub next: Box<[MarkPtr<Range<V>>]>,
    /// Guards structural Edits around this Node: Splices of the Level-0
    /// Chain behind it, its own Tower-Growth and its Marking
    lock: Mutex<()>,
}

impl<V> Range<V> {
    /// Creates a new unlinked Node for the given Interval
    pub fn boxed(key: u64, size: u64, value: V, height: usize) -> Box<Self> {
        let next: Vec<_> = (0..height)
            .map(|_| MarkPtr::new(std::ptr::null_mut()))
            .collect();

        Box::new(Self {
            key,
            size,
            value: MaybeUninit::new(value),
            nlevel: height,
            // the Level-0 Link is installed as part of the Splice that
            // publishes the Node
            curlevel: atomic::AtomicUsize::new(1),
            next: next.into_boxed_slice(),
            lock: Mutex::new(()),
        })
    }

    /// Creates the Head-Sentinel with the full Tower-Height of the Map
    pub fn boxed_head(nlevel: usize) -> Box<Self> {
        let next: Vec<_> = (0..nlevel)
            .map(|_| MarkPtr::new(std::ptr::null_mut()))
            .collect();

        Box::new(Self {
            key: 0,
            size: 0,
            value: MaybeUninit::uninit(),
            nlevel,
            curlevel: atomic::AtomicUsize::new(nlevel),
            next: next.into_boxed_slice(),
            lock: Mutex::new(()),
        })
    }

    /// The exclusive End of the covered Interval
    pub fn end(&self) -> u64 {
        self.key.saturating_add(self.size)
    }

    /// Checks if the Node's Interval intersects `[k, k + sz)`
    pub fn overlaps(&self, k: u64, sz: u64) -> bool {
        self.key < k.saturating_add(sz) && self.end() > k
    }

    /// A set Mark on any of the own Next-Pointers flags the Node as
    /// logically deleted, Level 0 is always marked first-to-last so it is
    /// the authoritative one
    pub fn is_deleted(&self) -> bool {
        self.next[0].mark(atomic::Ordering::SeqCst)
    }

    /// Acquires the Node-Lock and revalidates that the Node was not marked
    /// in the mean time, the two are coupled so no Caller can forget the
    /// Check
    ///
    /// # Safety
    /// The returned Lock-Guard has its Lifetime detached from the Node, the
    /// Caller must make sure the Node outlives it. As long as the Node
    /// stays unmarked the Lock itself covers that, Marking requires this
    /// Lock. The Moment the Lock-Holder marks the Node that Protection is
    /// gone, helping Traversals can then drive the Unlinks to completion,
    /// so the Holder has to take a removal Pin on `curlevel` first to keep
    /// the terminal Retire out until the Guard is dropped. A transient
    /// Locker of a possibly-marked Node needs a Guard of the backing
    /// reclamation scheme over the Lock/Unlock window instead
    pub unsafe fn lock_unmarked(&self) -> Option<MutexGuard<'static, ()>> {
        let guard = self.lock.lock().expect("the Node-Lock is never poisoned");
        let guard: MutexGuard<'static, ()> = unsafe { std::mem::transmute(guard) };

        if self.is_deleted() {
            return None;
        }

        Some(guard)
    }

    /// Sets the Mark-Bit on the Levels `[0, top)`, from the Top downwards.
    /// Must be called while holding the Node-Lock
    pub fn mark_tower(&self, top: usize) {
        for level in (0..top).rev() {
            self.next[level].set_mark();
        }
    }
}

/// The Deleter handed to the reclamation scheme for an unlinked Node
///
/// # Safety
/// `ptr` must be an unlinked, exclusively owned `Range<V>` that carries an
/// initialized Value (which rules out the Head-Sentinel)
pub unsafe fn free_range<V>(ptr: *mut ()) {
    let mut boxed = unsafe { Box::from_raw(ptr as *mut Range<V>) };
    unsafe { std::ptr::drop_in_place(boxed.value.as_mut_ptr()) };
    drop(boxed);
}

/// Frees the Head-Sentinel, which never carries a Value
///
/// # Safety
/// `ptr` must be the Head-Sentinel of a Map that is being destroyed
pub unsafe fn free_head<V>(ptr: *mut Range<V>) {
    drop(unsafe { Box::from_raw(ptr) });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlap_is_half_open() {
        let range = Range::boxed(10, 5, (), 1);

        assert!(range.overlaps(10, 5));
        assert!(range.overlaps(14, 1));
        assert!(range.overlaps(8, 3));

        // touching Intervals do not overlap
        assert!(!range.overlaps(15, 5));
        assert!(!range.overlaps(5, 5));
    }

    #[test]
    fn lock_unmarked_rejects_deleted() {
        let range = Range::boxed(10, 5, (), 2);

        {
            let guard = unsafe { range.lock_unmarked() };
            assert!(guard.is_some());
        }

        range.mark_tower(2);
        assert!(range.is_deleted());

        let guard = unsafe { range.lock_unmarked() };
        assert!(guard.is_none());
    }

    #[test]
    fn mark_tower_marks_every_level() {
        let range = Range::<u32>::boxed(0, 1, 0, 3);
        range.mark_tower(3);

        for level in 0..3 {
            assert!(range.next[level].mark(atomic::Ordering::SeqCst));
        }
    }
}
