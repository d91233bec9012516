use std::collections::HashSet;

use super::record::HazardRecord;
use crate::sync::atomic;

/// This represents the Global shared state of the Hazard-Ptr scheme, which
/// is mainly the grow-only List of all Hazard-Records
pub struct GlobalList {
    records: atomic::AtomicPtr<HazardRecord>,
}

impl GlobalList {
    pub fn new() -> Self {
        Self {
            records: atomic::AtomicPtr::new(std::ptr::null_mut()),
        }
    }

    /// Acquires a Record with the given number of Slots for an attaching
    /// Thread, either by reusing a released Record from the List or by
    /// appending a fresh one.
    ///
    /// The Records are never removed from the List again, so handing out a
    /// `'static` reference to them is fine
    pub fn acquire_record(&self, slot_count: usize) -> &'static HazardRecord {
        if let Some(reused) = self.try_acquire_inactive(slot_count) {
            return reused;
        }

        let n_record_ptr = Box::into_raw(HazardRecord::boxed(slot_count));

        loop {
            let head = self.records.load(atomic::Ordering::Acquire);
            unsafe { (*n_record_ptr).next.store(head, atomic::Ordering::Relaxed) };

            match self.records.compare_exchange(
                head,
                n_record_ptr,
                atomic::Ordering::Release,
                atomic::Ordering::Relaxed,
            ) {
                Ok(_) => return unsafe { &*n_record_ptr },
                Err(_) => continue,
            };
        }
    }

    /// Attempts to find a released Record in the List and re-activate it
    fn try_acquire_inactive(&self, slot_count: usize) -> Option<&'static HazardRecord> {
        let mut current = self.records.load(atomic::Ordering::Acquire);

        while !current.is_null() {
            let record = unsafe { &*current };

            if record.slots.len() == slot_count
                && record
                    .active
                    .compare_exchange(
                        false,
                        true,
                        atomic::Ordering::Acquire,
                        atomic::Ordering::Relaxed,
                    )
                    .is_ok()
            {
                return Some(record);
            }

            current = record.next.load(atomic::Ordering::Acquire);
        }

        None
    }

    /// Checks all the current Hazard-Slots and returns a Set of all
    /// currently protected Addresses stored in them
    pub fn protected_set(&self) -> HashSet<usize> {
        let mut plist = HashSet::new();

        let mut current = self.records.load(atomic::Ordering::Acquire);
        while !current.is_null() {
            let record = unsafe { &*current };

            for slot in record.slots.iter() {
                let value = slot.load(atomic::Ordering::Acquire);
                if value != 0 {
                    plist.insert(value);
                }
            }

            current = record.next.load(atomic::Ordering::Acquire);
        }

        plist
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_appends_record() {
        let list = GlobalList::new();

        let record = list.acquire_record(2);
        assert!(record.active.load(atomic::Ordering::SeqCst));
    }

    #[test]
    fn released_records_are_reused() {
        let list = GlobalList::new();

        let first = list.acquire_record(2);
        let first_ptr = first as *const HazardRecord;
        first.release();

        let second = list.acquire_record(2);
        assert_eq!(first_ptr, second as *const HazardRecord);
    }

    #[test]
    fn protected_set_contains_published() {
        let list = GlobalList::new();

        let record = list.acquire_record(2);
        record.slots[0].store(0x123, atomic::Ordering::SeqCst);
        record.slots[1].store(0x456, atomic::Ordering::SeqCst);

        let protections = list.protected_set();
        assert!(protections.contains(&0x123));
        assert!(protections.contains(&0x456));
        assert!(!protections.contains(&0x789));
    }
}
