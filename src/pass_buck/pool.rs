use crate::sync::atomic;

/// A single Guard-Node in the grow-only Pool
pub struct GuardNode {
    /// Marks the Node as free to be acquired, held Nodes have this cleared
    pub free: atomic::AtomicBool,
    /// The Address currently protected through this Guard, 0 protects
    /// nothing
    pub protected: atomic::AtomicUsize,
    /// The next Node in the Pool, fixed once the Node is pushed
    pub next: atomic::AtomicPtr<GuardNode>,
}

impl GuardNode {
    fn boxed_held() -> Box<Self> {
        Box::new(Self {
            free: atomic::AtomicBool::new(false),
            protected: atomic::AtomicUsize::new(0),
            next: atomic::AtomicPtr::new(std::ptr::null_mut()),
        })
    }

    /// Clears the Protection and hands the Node back to the Pool
    pub fn release(&self) {
        self.protected.store(0, atomic::Ordering::Relaxed);
        self.free.store(true, atomic::Ordering::Release);
    }
}

/// The lock-free, grow-only Pool all Guards are drawn from
pub struct GuardPool {
    head: atomic::AtomicPtr<GuardNode>,
}

impl GuardPool {
    pub fn new() -> Self {
        Self {
            head: atomic::AtomicPtr::new(std::ptr::null_mut()),
        }
    }

    /// Acquires a Guard-Node, either by flipping the Free-Flag of an
    /// existing Node or by pushing a fresh one onto the Pool.
    ///
    /// Nodes are never removed from the Pool again, so handing out a
    /// `'static` reference is fine
    pub fn acquire(&self) -> &'static GuardNode {
        let mut current = self.head.load(atomic::Ordering::Acquire);
        while !current.is_null() {
            let node = unsafe { &*current };

            if node
                .free
                .compare_exchange(
                    true,
                    false,
                    atomic::Ordering::Acquire,
                    atomic::Ordering::Relaxed,
                )
                .is_ok()
            {
                return node;
            }

            current = node.next.load(atomic::Ordering::Acquire);
        }

        let n_node_ptr = Box::into_raw(GuardNode::boxed_held());
        loop {
            let head = self.head.load(atomic::Ordering::Acquire);
            unsafe { (*n_node_ptr).next.store(head, atomic::Ordering::Relaxed) };

            match self.head.compare_exchange(
                head,
                n_node_ptr,
                atomic::Ordering::Release,
                atomic::Ordering::Relaxed,
            ) {
                Ok(_) => return unsafe { &*n_node_ptr },
                Err(_) => continue,
            };
        }
    }

    /// Snapshots the Addresses currently protected by any held Guard
    pub fn live_set(&self) -> std::collections::HashSet<usize> {
        let mut live = std::collections::HashSet::new();

        let mut current = self.head.load(atomic::Ordering::Acquire);
        while !current.is_null() {
            let node = unsafe { &*current };

            if !node.free.load(atomic::Ordering::Acquire) {
                let addr = node.protected.load(atomic::Ordering::Acquire);
                if addr != 0 {
                    live.insert(addr);
                }
            }

            current = node.next.load(atomic::Ordering::Acquire);
        }

        live
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_grows_pool() {
        let pool = GuardPool::new();

        let node = pool.acquire();
        assert!(!node.free.load(atomic::Ordering::SeqCst));
    }

    #[test]
    fn released_nodes_are_reused() {
        let pool = GuardPool::new();

        let first = pool.acquire();
        let first_ptr = first as *const GuardNode;
        first.release();

        let second = pool.acquire();
        assert_eq!(first_ptr, second as *const GuardNode);
    }

    #[test]
    fn live_set_skips_free_nodes() {
        let pool = GuardPool::new();

        let held = pool.acquire();
        held.protected.store(0x123, atomic::Ordering::SeqCst);

        let released = pool.acquire();
        released.protected.store(0x456, atomic::Ordering::SeqCst);
        released.release();

        let live = pool.live_set();
        assert!(live.contains(&0x123));
        assert!(!live.contains(&0x456));
    }
}
