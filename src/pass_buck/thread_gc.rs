use super::{POOL, RECLAIM};
use crate::reclaim::RetiredPtr;
use crate::threading::Config;

/// The Pass-The-Buck State of a single attached Thread, mainly the current
/// Chunk of retired Entries
pub struct ThreadGc {
    chunk: Vec<RetiredPtr>,
    chunk_size: usize,
}

impl ThreadGc {
    pub fn new(config: &Config) -> Self {
        Self {
            chunk: Vec::with_capacity(config.ptb_chunk_size),
            chunk_size: config.ptb_chunk_size,
        }
    }

    /// Appends the given Entry to the current Chunk, splicing the Chunk
    /// onto the shared Reclaim-Queue and running a Scan once it is full.
    ///
    /// The returned Entries are unprotected and must be reclaimed by the
    /// Caller, outside of the Registry borrow
    pub fn retire_entry(&mut self, entry: RetiredPtr) -> Vec<RetiredPtr> {
        self.chunk.push(entry);

        if self.chunk.len() >= self.chunk_size {
            self.splice_chunk();
            self.scan()
        } else {
            Vec::new()
        }
    }

    /// Splices the current Chunk onto the shared Reclaim-Queue, even if it
    /// is not full yet
    pub fn splice_chunk(&mut self) {
        if self.chunk.is_empty() {
            return;
        }

        let chunk = std::mem::replace(&mut self.chunk, Vec::with_capacity(self.chunk_size));
        RECLAIM.push(chunk);
    }

    /// Walks the Guard-Pool, takes the shared Reclaim-Queue and splits it
    /// into still protected Entries (which are re-spliced) and unprotected
    /// ones, which are returned for Reclamation
    pub fn scan(&mut self) -> Vec<RetiredPtr> {
        crate::sync::atomic::fence(crate::sync::atomic::Ordering::SeqCst);
        let live = POOL.live_set();

        let mut freeable = Vec::new();
        let mut survivors = Vec::new();

        for entry in RECLAIM.pop_all() {
            if live.contains(&entry.addr()) {
                survivors.push(entry);
            } else {
                freeable.push(entry);
            }
        }

        RECLAIM.push(survivors);

        freeable
    }

    /// The detach path: everything this Thread still buffers goes onto the
    /// shared Queue, followed by one Scan on its behalf
    pub fn detach_scan(&mut self) -> Vec<RetiredPtr> {
        self.splice_chunk();
        self.scan()
    }
}

impl Drop for ThreadGc {
    fn drop(&mut self) {
        // Deleters running during detach may have retired more Entries
        self.splice_chunk();
    }
}
