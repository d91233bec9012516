use crate::reclaim::RetiredPtr;
use crate::sync::atomic;

/// One spliced Batch of retired Entries
struct Chunk {
    items: Vec<RetiredPtr>,
    next: atomic::AtomicPtr<Chunk>,
}

/// The shared Queue of retired Chunks, a simple Treiber-Stack as the order
/// of the Chunks does not matter for Reclamation
pub struct ReclaimQueue {
    head: atomic::AtomicPtr<Chunk>,
}

impl ReclaimQueue {
    pub fn new() -> Self {
        Self {
            head: atomic::AtomicPtr::new(std::ptr::null_mut()),
        }
    }

    /// Splices the given Batch onto the Queue
    pub fn push(&self, items: Vec<RetiredPtr>) {
        if items.is_empty() {
            return;
        }

        let chunk_ptr = Box::into_raw(Box::new(Chunk {
            items,
            next: atomic::AtomicPtr::new(std::ptr::null_mut()),
        }));

        loop {
            let head = self.head.load(atomic::Ordering::Acquire);
            unsafe { (*chunk_ptr).next.store(head, atomic::Ordering::Relaxed) };

            match self.head.compare_exchange(
                head,
                chunk_ptr,
                atomic::Ordering::Release,
                atomic::Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(_) => continue,
            };
        }
    }

    /// Takes the entire Queue out in one Swap, returning all the buffered
    /// Entries. The Caller is responsible for re-splicing whatever is still
    /// protected
    pub fn pop_all(&self) -> Vec<RetiredPtr> {
        let mut current = self
            .head
            .swap(std::ptr::null_mut(), atomic::Ordering::AcqRel);

        let mut items = Vec::new();
        while !current.is_null() {
            let chunk = unsafe { Box::from_raw(current) };
            current = chunk.next.load(atomic::Ordering::Acquire);
            items.extend(chunk.items);
        }

        items
    }
}
