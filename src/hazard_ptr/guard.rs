use std::cell::RefCell;
use std::fmt::Debug;
use std::rc::Rc;

use super::record::HazardRecord;
use crate::reclaim::GcGuard;
use crate::sync::atomic;

/// A Guard owns a single Hazard-Slot of the current Thread and protects at
/// most one Address through it at a time
///
/// The Guard can be re-pointed at other Addresses over its lifetime, which
/// avoids going back to the Slot-Allocation for every step of a traversal.
/// Dropping the Guard clears the Slot and returns it to the Thread's
/// Free-List
pub struct Guard {
    /// The Record holding the Slot, shared with all other Guards of the
    /// owning Thread
    record: &'static HazardRecord,
    /// The Index of the owned Slot inside the Record
    idx: usize,
    /// The Free-List of the owning Thread the Slot is returned to
    free_slots: Rc<RefCell<Vec<usize>>>,
}

impl Debug for Guard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Guard ( slot = {} )", self.idx)
    }
}

impl Guard {
    pub(crate) fn new(
        record: &'static HazardRecord,
        idx: usize,
        free_slots: Rc<RefCell<Vec<usize>>>,
    ) -> Self {
        Self {
            record,
            idx,
            free_slots,
        }
    }

    fn slot(&self) -> &atomic::AtomicUsize {
        &self.record.slots[self.idx]
    }

    /// Loads the most recent Value from the given AtomicPtr, publishes it in
    /// the owned Slot and revalidates by re-reading the AtomicPtr, repeating
    /// until the re-read matches the published Value.
    ///
    /// The returned Pointer is safe to dereference until the Guard is
    /// dropped, cleared or re-pointed
    pub fn protect_ptr<T>(&mut self, atom_ptr: &std::sync::atomic::AtomicPtr<T>) -> *mut T {
        let mut protect_ptr = atom_ptr.load(std::sync::atomic::Ordering::SeqCst);
        loop {
            self.slot()
                .store(protect_ptr as usize, atomic::Ordering::SeqCst);

            let n_ptr = atom_ptr.load(std::sync::atomic::Ordering::SeqCst);
            if n_ptr == protect_ptr {
                return protect_ptr;
            }

            protect_ptr = n_ptr;
        }
    }
}

impl GcGuard for Guard {
    fn protect(&mut self, cell: &atomic::AtomicUsize, transform: fn(usize) -> usize) -> usize {
        let mut raw = cell.load(atomic::Ordering::SeqCst);
        loop {
            self.slot().store(transform(raw), atomic::Ordering::SeqCst);

            let n_raw = cell.load(atomic::Ordering::SeqCst);
            if transform(n_raw) == transform(raw) {
                return n_raw;
            }

            raw = n_raw;
        }
    }

    fn assign(&mut self, addr: usize) {
        self.slot().store(addr, atomic::Ordering::SeqCst);
    }

    fn clear(&mut self) {
        // a cleared Slot can not extend any lifetime, so relaxed is enough
        self.slot().store(0, atomic::Ordering::Relaxed);
    }
}

impl Drop for Guard {
    fn drop(&mut self) {
        self.slot().store(0, atomic::Ordering::Relaxed);
        self.free_slots.borrow_mut().push(self.idx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hazard_ptr::record::HazardRecord;

    fn leaked_record(slots: usize) -> &'static HazardRecord {
        Box::leak(HazardRecord::boxed(slots))
    }

    #[test]
    fn protect_publishes_value() {
        let record = leaked_record(2);
        let free = Rc::new(RefCell::new(vec![1]));

        let mut guard = Guard::new(record, 0, free);

        let cell = atomic::AtomicUsize::new(0x120);
        let raw = guard.protect(&cell, |r| r & !1);
        assert_eq!(0x120, raw);
        assert_eq!(0x120, record.slots[0].load(atomic::Ordering::SeqCst));
    }

    #[test]
    fn protect_strips_transform_bits() {
        let record = leaked_record(2);
        let free = Rc::new(RefCell::new(vec![1]));

        let mut guard = Guard::new(record, 0, free);

        let cell = atomic::AtomicUsize::new(0x121);
        let raw = guard.protect(&cell, |r| r & !1);

        // the raw read keeps the Mark-Bit, the published Slot does not
        assert_eq!(0x121, raw);
        assert_eq!(0x120, record.slots[0].load(atomic::Ordering::SeqCst));
    }

    #[test]
    fn drop_returns_slot() {
        let record = leaked_record(2);
        let free = Rc::new(RefCell::new(Vec::new()));

        let guard = Guard::new(record, 0, free.clone());
        drop(guard);

        assert_eq!(vec![0], *free.borrow());
        assert_eq!(0, record.slots[0].load(atomic::Ordering::SeqCst));
    }
}
