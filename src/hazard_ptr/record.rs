use std::fmt::Debug;

use crate::sync::atomic;

/// A single Record in the global List of Hazard-Records, owning the
/// Hazard-Slots of one attached Thread
pub struct HazardRecord {
    /// The Hazard-Slots themselves, a Slot containing 0 does not protect
    /// anything
    pub slots: Box<[atomic::AtomicUsize]>,
    /// Marks the Record as owned by a living Thread, released Records stay
    /// in the List and are reused by later attaching Threads
    pub active: atomic::AtomicBool,
    /// The Pointer to the next element in the Linked-List
    pub next: atomic::AtomicPtr<HazardRecord>,
}

impl HazardRecord {
    /// Creates a new active Record with the given number of empty Slots,
    /// which can be appended to the List of Records
    pub fn boxed(slot_count: usize) -> Box<Self> {
        let slots: Vec<_> = (0..slot_count).map(|_| atomic::AtomicUsize::new(0)).collect();

        Box::new(Self {
            slots: slots.into_boxed_slice(),
            active: atomic::AtomicBool::new(true),
            next: atomic::AtomicPtr::new(std::ptr::null_mut()),
        })
    }

    /// This resets all the Hazard-Slots to their empty initial State and
    /// marks the Record as free to be acquired by another Thread
    pub fn release(&self) {
        for slot in self.slots.iter() {
            slot.store(0, atomic::Ordering::SeqCst);
        }
        self.active.store(false, atomic::Ordering::Release);
    }
}

impl Debug for HazardRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let active = self.active.load(atomic::Ordering::SeqCst);
        write!(
            f,
            "HazardRecord ( slots = {}, active = {} )",
            self.slots.len(),
            active
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boxed_starts_active_and_empty() {
        let record = HazardRecord::boxed(4);

        assert!(record.active.load(atomic::Ordering::SeqCst));
        assert_eq!(4, record.slots.len());
        for slot in record.slots.iter() {
            assert_eq!(0, slot.load(atomic::Ordering::SeqCst));
        }
    }

    #[test]
    fn release_clears_slots() {
        let record = HazardRecord::boxed(2);
        record.slots[0].store(0x123, atomic::Ordering::SeqCst);

        record.release();

        assert!(!record.active.load(atomic::Ordering::SeqCst));
        assert_eq!(0, record.slots[0].load(atomic::Ordering::SeqCst));
    }
}
