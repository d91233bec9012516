//! An implementation of Gidenstam-style Reference-Counting backed by
//! Hazard-Pointers
//!
//! # Reference:
//! * [Efficient and Reliable Lock-Free Memory Reclamation Based on Reference Counting](https://ieeexplore.ieee.org/document/1410131)
//!
//! # How it works
//! Every managed Node embeds a [`NodeBase`] carrying a small Reference-Count
//! next to its Payload. Holding a Reference (a [`HrcRef`]) keeps the Node
//! alive without any further Protection, the Hazard-Slots of the
//! [`hazard_ptr`](crate::hazard_ptr) scheme are only needed for the short
//! window in which a Thread reads a shared Pointer and has not incremented
//! the Count yet.
//!
//! Removed Nodes are handed to [`retire`], which flags them as deleted and
//! buffers them per Thread. The Scan then runs the CleanUp-Callback exactly
//! once per unprotected retired Node, which drops its outgoing Links (and
//! with them the Counts of the Link-Targets, so even cyclic Garbage
//! unravels), and finally the Terminate-Callback once the Count reached
//! zero and no Hazard-Slot refers to the Node anymore

use std::fmt::Debug;
use std::ops::Deref;
use std::ptr::NonNull;
use std::sync::Mutex;

use crate::sync::atomic;
use crate::threading;

mod node;
pub use node::{CleanFn, HrcNode, NodeBase, TermFn};

mod thread_gc;
pub(crate) use thread_gc::{PendingOps, ThreadGc};
use thread_gc::RetiredBase;

lazy_static::lazy_static! {
    static ref DRAIN: Mutex<Vec<RetiredBase>> = Mutex::new(Vec::new());
}

/// A counted Reference to a managed Node, keeping it alive for as long as
/// the Reference exists
pub struct HrcRef<T> {
    node: NonNull<HrcNode<T>>,
}

// A HrcRef behaves like an Arc: the Count is atomic and the Payload is only
// handed out as a shared Reference
unsafe impl<T> Send for HrcRef<T> where T: Send + Sync {}
unsafe impl<T> Sync for HrcRef<T> where T: Send + Sync {}

impl<T> Debug for HrcRef<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HrcRef<{}> ()", std::any::type_name::<T>())
    }
}

impl<T> Deref for HrcRef<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // # Safety:
        //
        // The Reference-Count held by this HrcRef keeps the Node from being
        // cleaned up or terminated, so the Payload stays valid
        unsafe { &self.node.as_ref().value }
    }
}

impl<T> Clone for HrcRef<T> {
    fn clone(&self) -> Self {
        self.base().inc_ref();
        Self { node: self.node }
    }
}

impl<T> Drop for HrcRef<T> {
    fn drop(&mut self) {
        self.base().dec_ref();
    }
}

impl<T> HrcRef<T> {
    fn base(&self) -> &NodeBase {
        unsafe { &self.node.as_ref().base }
    }

    /// The raw Pointer to the managed Node, for publishing it in a shared
    /// AtomicPtr. Publishing a Link this way does not transfer the Count,
    /// use [`set_link`] for counted Links between Nodes
    pub fn as_ptr(&self) -> *mut HrcNode<T> {
        self.node.as_ptr()
    }
}

/// Allocates a new managed Node with the given number of Link-Slots and a
/// Count of one for the returned Reference, using the default Callbacks
/// (CleanUp drops all outgoing Links, Terminate frees the Node)
///
/// # Panics
/// If `links` exceeds the configured `hrc_link_count`
pub fn alloc<T>(value: T, links: usize) -> HrcRef<T> {
    let config = threading::config().expect("the Registry is not initialized");
    assert!(
        links <= config.hrc_link_count,
        "more Link-Slots requested than the configured hrc_link_count"
    );

    let node = HrcNode::boxed(value, links, node::clean_links, node::terminate_node::<T>);
    HrcRef {
        node: NonNull::new(Box::into_raw(node)).expect("a fresh Allocation is never null"),
    }
}

/// Allocates a new managed Node with custom CleanUp/Terminate Callbacks
///
/// # Safety
/// `term_fn` must free the Node it is called with exactly once and
/// `clean_fn` must drop every counted Link the Node still holds, otherwise
/// the Counts of the Link-Targets never reach zero
pub unsafe fn alloc_with<T>(value: T, links: usize, clean_fn: CleanFn, term_fn: TermFn) -> HrcRef<T> {
    let config = threading::config().expect("the Registry is not initialized");
    assert!(
        links <= config.hrc_link_count,
        "more Link-Slots requested than the configured hrc_link_count"
    );

    let node = HrcNode::boxed(value, links, clean_fn, term_fn);
    HrcRef {
        node: NonNull::new(Box::into_raw(node)).expect("a fresh Allocation is never null"),
    }
}

/// Acquires a counted Reference from a shared AtomicPtr
///
/// The Pointer is briefly protected through a Hazard-Slot while the Count
/// is incremented, afterwards the Count alone keeps the Node alive. Returns
/// None if the Pointer is null or the Node is already flagged as deleted
///
/// # Panics
/// If the current Thread is not attached
pub fn acquire<T>(src: &std::sync::atomic::AtomicPtr<HrcNode<T>>) -> Option<HrcRef<T>> {
    let mut guard = crate::hazard_ptr::guard();

    loop {
        let ptr = guard.protect_ptr(src);
        if ptr.is_null() {
            return None;
        }

        let base = unsafe { &(*ptr).base };
        if base.try_acquire() {
            return Some(HrcRef {
                node: NonNull::new(ptr).expect("the null case was handled above"),
            });
        }

        // the Node is dying, only retry if the Source moved on to another
        // Node in the mean time
        let n_ptr = src.load(std::sync::atomic::Ordering::SeqCst);
        if n_ptr == ptr {
            return None;
        }
    }
}

/// Stores a counted Link from `parent` to `child` in the given Link-Slot,
/// dropping whatever Link the Slot held before
///
/// # Panics
/// If `idx` is outside the Link-Slots of `parent`
pub fn set_link<T, U>(parent: &HrcRef<T>, idx: usize, child: Option<&HrcRef<U>>) {
    let n_addr = match child {
        Some(c) => {
            c.base().inc_ref();
            c.node.as_ptr() as usize
        }
        None => 0,
    };

    let old = parent.base().links()[idx].swap(n_addr, atomic::Ordering::SeqCst);
    if old != 0 {
        unsafe { (*(old as *mut NodeBase)).dec_ref() };
    }
}

/// Hands the Node behind the given Reference over for Reclamation,
/// consuming the Reference
///
/// The Node is flagged as deleted, so no new Reference can be acquired for
/// it through [`acquire`] anymore, and is buffered until the Scan finds it
/// unprotected. Its CleanUp-Callback then drops the outgoing Links and its
/// Terminate-Callback frees it once the Count reached zero
///
/// # Panics
/// If the current Thread is not attached
pub fn retire<T>(this: HrcRef<T>) {
    let base_ptr = this.base() as *const NodeBase as *mut NodeBase;

    let newly_flagged = unsafe { (*base_ptr).set_deleted() };
    // consuming the Callers Reference
    drop(this);

    // a second retire through another Reference lost the Flag-Race and the
    // Node is already buffered
    if !newly_flagged {
        return;
    }

    let pending = threading::with_hrc(|gc| gc.retire_base(base_ptr));
    pending.run();
}

/// Forces a reclamation attempt over the retired Nodes of the current
/// Thread and the shared Drain-List
pub fn scan() {
    let pending = threading::with_hrc(|gc| gc.scan());
    pending.run();
}
