use std::marker::PhantomData;

use crate::sync::atomic;

const MARK: usize = 1;

/// Strips the Mark-Bit from a raw Cell-Value, used as the Transform for
/// Guard-Protection so the published Address is always the real Node
pub fn strip_mark(raw: usize) -> usize {
    raw & !MARK
}

/// Splits a raw Cell-Value into the Address and the Mark-Bit
pub fn decompose(raw: usize) -> (usize, bool) {
    (raw & !MARK, raw & MARK != 0)
}

fn compose(addr: usize, mark: bool) -> usize {
    debug_assert_eq!(0, addr & MARK, "Node-Addresses are at least 2-Byte aligned");
    addr | (mark as usize)
}

/// An atomic Pointer carrying the logical-deletion Mark of the owning Node
/// in its lowest Bit
///
/// The packed Representation is kept opaque, everything goes through the
/// (Address, Mark) Pairs of [`decompose`]. The Cell works on plain `usize`
/// throughout so the Mark-Bit stuffing never touches a live Reference
pub struct MarkPtr<T> {
    raw: atomic::AtomicUsize,
    _marker: PhantomData<*mut T>,
}

impl<T> MarkPtr<T> {
    pub fn new(ptr: *mut T) -> Self {
        Self {
            raw: atomic::AtomicUsize::new(compose(ptr as usize, false)),
            _marker: PhantomData,
        }
    }

    /// The underlying Cell, for publishing its Target through a Guard
    pub fn cell(&self) -> &atomic::AtomicUsize {
        &self.raw
    }

    /// Loads the (Address, Mark) Pair
    pub fn load(&self, order: atomic::Ordering) -> (usize, bool) {
        decompose(self.raw.load(order))
    }

    /// Loads just the Address-Part as a Pointer
    pub fn ptr(&self, order: atomic::Ordering) -> *mut T {
        self.load(order).0 as *mut T
    }

    /// Loads just the Mark-Bit
    pub fn mark(&self, order: atomic::Ordering) -> bool {
        self.load(order).1
    }

    /// Stores the given (Address, Mark) Pair, only usable while the Cell is
    /// not shared yet
    pub fn store(&self, addr: usize, mark: bool, order: atomic::Ordering) {
        self.raw.store(compose(addr, mark), order);
    }

    /// Attempts to swap the expected (Address, Mark) Pair for the new one,
    /// failing on any concurrent Modification
    pub fn cas(
        &self,
        expected_addr: usize,
        expected_mark: bool,
        new_addr: usize,
        new_mark: bool,
    ) -> Result<(), usize> {
        self.raw
            .compare_exchange(
                compose(expected_addr, expected_mark),
                compose(new_addr, new_mark),
                atomic::Ordering::SeqCst,
                atomic::Ordering::SeqCst,
            )
            .map(|_| ())
            .map_err(|current| current)
    }

    /// Sets the Mark-Bit while keeping the Address, returns whether this
    /// Call was the one that set it
    pub fn set_mark(&self) -> bool {
        let mut raw = self.raw.load(atomic::Ordering::SeqCst);
        loop {
            if raw & MARK != 0 {
                return false;
            }

            match self.raw.compare_exchange_weak(
                raw,
                raw | MARK,
                atomic::Ordering::SeqCst,
                atomic::Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(current) => raw = current,
            };
        }
    }
}
