use crate::reclaim::Deleter;

/// A single Entry awaiting Reclamation
///
/// Only the type-erased Address is kept around, everything the eventual
/// Reclamation needs to know about the concrete Type lives in the Deleter.
/// The Scans of the schemes compare plain Addresses against their
/// protected Sets, so the Entry hands its Address out as `usize` directly
/// instead of round-tripping through a Pointer
pub struct RetiredPtr {
    addr: usize,
    deleter: Deleter,
}

impl RetiredPtr {
    /// Creates a new Entry for the given Pointer
    pub fn new<T>(ptr: *mut T, deleter: Deleter) -> Self {
        Self {
            addr: ptr as usize,
            deleter,
        }
    }

    /// The Address this Entry is waiting to reclaim, compared against the
    /// protected Sets during a Scan
    pub fn addr(&self) -> usize {
        self.addr
    }

    /// Runs the Deleter on the stored Address
    ///
    /// # Safety
    /// No Guard may refer to the Address anymore and this has to be the
    /// only Entry left for it, the Deleter will free the Memory behind it
    pub unsafe fn reclaim(self) {
        (self.deleter)(self.addr as *mut ());
    }
}

impl std::fmt::Debug for RetiredPtr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RetiredPtr ( addr = {:#x} )", self.addr)
    }
}
