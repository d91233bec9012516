use crate::sync::atomic;

/// The CleanUp-Callback of a managed Node, responsible for dropping its
/// outgoing counted Links. Called at most once per Node, only after the
/// Node was retired and no Hazard-Slot refers to it anymore
pub type CleanFn = unsafe fn(*mut NodeBase);

/// The Terminate-Callback of a managed Node, responsible for freeing it.
/// Called at most once per Node, only after CleanUp ran and the Count
/// reached zero
pub type TermFn = unsafe fn(*mut NodeBase);

// Layout of the combined State-Word: the Reference-Count lives in the low
// Bits, the Flags in the top three
const DELETED: u32 = 1 << 31;
const CLEANED: u32 = 1 << 30;
const TRACE: u32 = 1 << 29;
const RC_MASK: u32 = TRACE - 1;

/// The State every managed Node embeds: the Reference-Count with its Flags,
/// the outgoing Link-Slots and the two Callbacks
pub struct NodeBase {
    /// Reference-Count plus the Deleted/Cleaned/Trace Flags in one Word, so
    /// Count-Transitions can atomically observe the Flags
    word: atomic::AtomicU32,
    links: Box<[atomic::AtomicUsize]>,
    clean_fn: CleanFn,
    term_fn: TermFn,
}

impl NodeBase {
    fn new(links: usize, clean_fn: CleanFn, term_fn: TermFn) -> Self {
        let links: Vec<_> = (0..links).map(|_| atomic::AtomicUsize::new(0)).collect();

        Self {
            // one Reference for the Caller of the Allocation
            word: atomic::AtomicU32::new(1),
            links: links.into_boxed_slice(),
            clean_fn,
            term_fn,
        }
    }

    /// The outgoing Link-Slots of this Node, each holding the Address of
    /// another Node's [`NodeBase`] or 0
    pub fn links(&self) -> &[atomic::AtomicUsize] {
        &self.links
    }

    /// The current Reference-Count
    pub fn ref_count(&self) -> u32 {
        self.word.load(atomic::Ordering::SeqCst) & RC_MASK
    }

    /// Attempts to take a new Reference, failing if the Node is already
    /// flagged as deleted, claimed for Termination or not referenced by
    /// anything anymore
    pub fn try_acquire(&self) -> bool {
        let mut word = self.word.load(atomic::Ordering::SeqCst);
        loop {
            if word & (DELETED | TRACE) != 0 || word & RC_MASK == 0 {
                return false;
            }

            match self.word.compare_exchange_weak(
                word,
                word + 1,
                atomic::Ordering::SeqCst,
                atomic::Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(current) => word = current,
            };
        }
    }

    /// Takes a new Reference unconditionally, used when the Caller already
    /// holds one (cloning, counted Links from live Nodes)
    pub fn inc_ref(&self) {
        self.word.fetch_add(1, atomic::Ordering::SeqCst);
    }

    /// Drops one Reference again
    pub fn dec_ref(&self) {
        let prev = self.word.fetch_sub(1, atomic::Ordering::SeqCst);
        debug_assert!(prev & RC_MASK > 0, "dropped a Reference that was never taken");
    }

    /// Flags the Node as deleted, returns whether this Call was the one
    /// that set the Flag
    pub fn set_deleted(&self) -> bool {
        let prev = self.word.fetch_or(DELETED, atomic::Ordering::SeqCst);
        prev & DELETED == 0
    }

    pub(crate) fn is_deleted(&self) -> bool {
        self.word.load(atomic::Ordering::SeqCst) & DELETED != 0
    }

    /// Claims the single CleanUp-Run for this Node, returns whether this
    /// Call won the Claim
    pub(crate) fn try_claim_clean(&self) -> bool {
        let prev = self.word.fetch_or(CLEANED, atomic::Ordering::SeqCst);
        prev & CLEANED == 0
    }

    /// Claims the Node for Termination, which only succeeds once CleanUp
    /// ran, the Count is zero and no new Reference can sneak in anymore
    pub(crate) fn try_claim_terminate(&self) -> bool {
        self.word
            .compare_exchange(
                DELETED | CLEANED,
                DELETED | CLEANED | TRACE,
                atomic::Ordering::SeqCst,
                atomic::Ordering::SeqCst,
            )
            .is_ok()
    }

    pub(crate) fn clean_fn(&self) -> CleanFn {
        self.clean_fn
    }

    pub(crate) fn term_fn(&self) -> TermFn {
        self.term_fn
    }
}

/// A managed Node, the [`NodeBase`] followed by the user Payload
///
/// The Base is the first Field with a C-Layout, so the Address of the Node
/// and of its Base coincide and the reclamation machinery can work on
/// type-erased Base-Pointers
#[repr(C)]
pub struct HrcNode<T> {
    pub(crate) base: NodeBase,
    pub(crate) value: T,
}

impl<T> HrcNode<T> {
    pub(crate) fn boxed(value: T, links: usize, clean_fn: CleanFn, term_fn: TermFn) -> Box<Self> {
        Box::new(Self {
            base: NodeBase::new(links, clean_fn, term_fn),
            value,
        })
    }
}

/// The default CleanUp: drop every outgoing counted Link of the Node
pub(crate) unsafe fn clean_links(base: *mut NodeBase) {
    let links = unsafe { (*base).links() };

    for link in links.iter() {
        let addr = link.swap(0, atomic::Ordering::SeqCst);
        if addr != 0 {
            unsafe { (*(addr as *mut NodeBase)).dec_ref() };
        }
    }
}

/// The default Terminate for a Node with Payload-Type `T`: free it
pub(crate) unsafe fn terminate_node<T>(base: *mut NodeBase) {
    drop(unsafe { Box::from_raw(base as *mut HrcNode<T>) });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_node_has_one_reference() {
        let node = HrcNode::boxed(13_u32, 2, clean_links, terminate_node::<u32>);
        assert_eq!(1, node.base.ref_count());
    }

    #[test]
    fn try_acquire_fails_on_deleted() {
        let node = HrcNode::boxed(13_u32, 0, clean_links, terminate_node::<u32>);

        assert!(node.base.try_acquire());
        assert_eq!(2, node.base.ref_count());

        assert!(node.base.set_deleted());
        assert!(!node.base.try_acquire());
        assert_eq!(2, node.base.ref_count());
    }

    #[test]
    fn set_deleted_only_fires_once() {
        let node = HrcNode::boxed(0_u8, 0, clean_links, terminate_node::<u8>);

        assert!(node.base.set_deleted());
        assert!(!node.base.set_deleted());
    }

    #[test]
    fn terminate_claim_needs_cleaned_and_zero_count() {
        let node = HrcNode::boxed(0_u8, 0, clean_links, terminate_node::<u8>);

        node.base.set_deleted();
        assert!(!node.base.try_claim_terminate());

        assert!(node.base.try_claim_clean());
        assert!(!node.base.try_claim_terminate());

        node.base.dec_ref();
        assert!(node.base.try_claim_terminate());
        // the Claim only ever succeeds once
        assert!(!node.base.try_claim_terminate());
    }
}
