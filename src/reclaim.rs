//! The small interface between the Containers in this Crate and the
//! reclamation schemes backing them
//!
//! A Container is generic over one [`Gc`] implementation, which it uses to
//! protect the Nodes it traverses and to hand over unlinked Nodes for
//! eventual reclamation. This gives us one generic Container and one
//! Monomorphization per scheme, instead of a specialized Container per
//! scheme

use crate::sync::atomic;

mod retired;
pub(crate) use retired::RetiredPtr;

/// The Function used to actually reclaim a retired piece of Memory, called
/// exactly once, at some unspecified point after the matching retire, on
/// whatever Thread happens to run the reclaiming Scan. Detaching Threads
/// park their leftover Entries on a shared Drain-List, so the Deleter has
/// to be `Send`
pub type Deleter = Box<dyn FnOnce(*mut ()) + Send>;

/// A single Protection-Slot of a reclamation scheme
///
/// A Guard protects at most one Address at a time and can be re-pointed at
/// other Addresses over its lifetime, which is what the hand-over-hand
/// traversals in the Containers rely on
pub trait GcGuard {
    /// Loads the current Value from the given Cell, publishes the
    /// transformed Value in this Guard and revalidates by re-reading the
    /// Cell, repeating until the re-read (after `transform`) matches the
    /// published Value.
    ///
    /// The `transform` is used by Containers that store extra Bits in their
    /// Pointer-Cells (like the Mark-Bit of the Range-Map) to strip those
    /// before publication. The raw last-read Value of the Cell is returned,
    /// so the Caller still sees the extra Bits
    fn protect(&mut self, cell: &atomic::AtomicUsize, transform: fn(usize) -> usize) -> usize;

    /// Unconditionally publishes the given Address in this Guard, without
    /// any revalidation.
    ///
    /// This is only sound if the Caller already knows the Address to be
    /// live through some other Invariant, for example because the current
    /// Thread allocated it and has not yet shared it
    fn assign(&mut self, addr: usize);

    /// Clears the Guard again, a cleared Guard does not extend the lifetime
    /// of any Address
    fn clear(&mut self);
}

/// A reclamation scheme that can back a Container
///
/// The current Thread needs to be attached to the [`threading`](crate::threading)
/// Registry before any of these Operations are used
pub trait Gc {
    /// The Guard-Type handed out by this scheme
    type Guard: GcGuard;

    /// Acquires a free Guard for the current Thread
    fn guard() -> Self::Guard;

    /// Hands the given Address over to the scheme for eventual reclamation,
    /// once no Guard protects it anymore, at which point the given Deleter
    /// will be called with it exactly once.
    ///
    /// # Safety
    /// The Address must have been unlinked from every shared Structure
    /// before this is called, so that no new Guard can be established for
    /// it, and it must not be retired a second time
    unsafe fn retire(ptr: *mut (), deleter: Deleter);

    /// Forces a reclamation attempt on the current Thread, which might
    /// reclaim some of the retired Addresses but gives no Guarantee that
    /// any Address will be reclaimed
    fn scan();
}
