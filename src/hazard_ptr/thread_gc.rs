use std::cell::RefCell;
use std::rc::Rc;

use super::record::HazardRecord;
use super::{Guard, DRAIN, GLOBAL};
use crate::reclaim::RetiredPtr;
use crate::sync::atomic;
use crate::threading::Config;

/// The Hazard-Ptr State of a single attached Thread
pub struct ThreadGc {
    /// The Record in the global List holding this Thread's Slots
    record: &'static HazardRecord,
    /// The Indices of the currently unused Slots, shared with the Guards
    /// handed out by this Thread so they can return their Slot on Drop
    free_slots: Rc<RefCell<Vec<usize>>>,
    /// The Threshold at which it should try to reclaim all Memory marked
    /// as retired
    scan_threshold: usize,
    /// The List of Entries marked as being ready to retire, that have not
    /// yet been reclaimed and may still be in use by some other Part of
    /// the overall System
    retired: Vec<RetiredPtr>,
}

impl ThreadGc {
    pub fn new(config: &Config) -> Self {
        let record = GLOBAL.acquire_record(config.hazards_per_thread);
        let free_slots = (0..config.hazards_per_thread).rev().collect();

        Self {
            record,
            free_slots: Rc::new(RefCell::new(free_slots)),
            scan_threshold: config.scan_threshold,
            retired: Vec::new(),
        }
    }

    /// Hands out one of the free Slots of this Thread as a Guard
    pub fn acquire_guard(&mut self) -> Guard {
        let idx = {
            let mut free = self.free_slots.borrow_mut();
            free.pop()
        };

        let idx = idx.expect("every Hazard-Slot of the current Thread is already held by a Guard");
        Guard::new(self.record, idx, self.free_slots.clone())
    }

    /// Appends the given Entry to the local Retired-List and, once the List
    /// reached the Scan-Threshold, runs a Scan.
    ///
    /// The returned Entries are no longer protected by anyone and must be
    /// reclaimed by the Caller, outside of the Registry borrow, so that
    /// their Deleters can call back into the reclaimers
    pub fn retire_entry(&mut self, entry: RetiredPtr) -> Vec<RetiredPtr> {
        self.retired.push(entry);

        if self.retired.len() >= self.scan_threshold {
            self.scan()
        } else {
            Vec::new()
        }
    }

    /// Checks the local Retired-List (and the shared Drain-List) against
    /// the published Slots of all Threads and returns every Entry that is
    /// no longer protected
    pub fn scan(&mut self) -> Vec<RetiredPtr> {
        atomic::fence(atomic::Ordering::SeqCst);
        let plist = GLOBAL.protected_set();

        let mut freeable = Vec::new();

        let tmplist = std::mem::take(&mut self.retired);
        for entry in tmplist {
            if plist.contains(&entry.addr()) {
                self.retired.push(entry);
            } else {
                freeable.push(entry);
            }
        }

        // Entries parked by detached Threads, only drained when the Lock is
        // free so the Scan itself stays non-blocking
        if let Ok(mut drain) = DRAIN.try_lock() {
            let parked = std::mem::take(&mut *drain);
            for entry in parked {
                if plist.contains(&entry.addr()) {
                    drain.push(entry);
                } else {
                    freeable.push(entry);
                }
            }
        }

        freeable
    }

    /// The detach path: parks everything that is still protected on the
    /// shared Drain-List and returns the rest for immediate reclamation
    pub fn detach_scan(&mut self) -> Vec<RetiredPtr> {
        let freeable = self.scan();

        if !self.retired.is_empty() {
            let mut drain = DRAIN.lock().unwrap();
            drain.append(&mut self.retired);
        }

        freeable
    }

    /// The number of retired Entries this Thread still buffers
    pub fn retired_len(&self) -> usize {
        self.retired.len()
    }
}

impl Drop for ThreadGc {
    fn drop(&mut self) {
        // Deleters that ran during detach may have retired more Entries,
        // those are parked on the Drain-List for the other Threads
        if !self.retired.is_empty() {
            let mut drain = DRAIN.lock().unwrap();
            drain.append(&mut self.retired);
        }

        debug_assert_eq!(
            self.record.slots.len(),
            self.free_slots.borrow().len(),
            "a Guard outlived the detach of its Thread"
        );

        self.record.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::threading;

    fn setup() {
        crate::tests_support::ensure_init();
    }

    #[test]
    fn guard_slots_are_recycled() {
        setup();
        let _attach = threading::attach_scoped();

        let first = threading::with_hp(|gc| gc.acquire_guard());
        drop(first);
        let second = threading::with_hp(|gc| gc.acquire_guard());
        drop(second);
    }

    #[test]
    fn scan_threshold_triggers_reclaim() {
        setup();
        let _attach = threading::attach_scoped();

        let threshold = threading::config().unwrap().scan_threshold;
        let freed = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));

        for _ in 0..threshold {
            let ptr = Box::into_raw(Box::new(0_u64));
            let counter = freed.clone();
            unsafe {
                crate::hazard_ptr::retire(ptr, move |p| {
                    drop(Box::from_raw(p));
                    counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                })
            };
        }

        assert!(freed.load(std::sync::atomic::Ordering::SeqCst) >= threshold);
    }
}
