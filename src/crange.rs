//! A concurrent Map of half-open Integer-Ranges, backed by a Skip-List
//!
//! # Reference:
//! * [A Pragmatic Implementation of Non-Blocking Linked-Lists](https://www.cl.cam.ac.uk/research/srg/netos/papers/2001-caslists.pdf)
//! * [Skip Lists: A Probabilistic Alternative to Balanced Trees](https://15721.courses.cs.cmu.edu/spring2018/papers/08-oltpindexes1/pugh-skiplists-cacm1990.pdf)
//!
//! # How it works
//! The Map keys its Entries by the half-open Interval `[key, key + size)`.
//! Linked Ranges never overlap: [`CRange::add`] destructively replaces
//! whatever its new Interval intersects and [`CRange::del`] removes every
//! intersecting Range.
//!
//! Lookups walk the Tower-Levels without any Lock, protecting the Nodes
//! hand-over-hand through the Guards of the backing reclamation scheme.
//! Removal is split in the usual two Steps: the Mark-Bit in the
//! Next-Pointers flags a Node as logically deleted, the physical Unlink
//! happens through CAS afterwards, helped along by any Traversal that
//! stumbles over a marked Node. Structural Edits (splicing new Nodes in,
//! marking, growing a Tower) serialize over the per-Node Mutex of the
//! affected Neighbourhood, always locked in increasing Key-Order.
//!
//! # Thread-Lifecycle
//! Every Operation uses Guards of the backing scheme, so the calling Thread
//! must be attached to the [`threading`](crate::threading) Registry

use std::fmt::Debug;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::MutexGuard;

use crate::backoff::{Backoff, Strategy};
use crate::hazard_ptr::Hp;
use crate::reclaim::{Gc, GcGuard};
use crate::sync::atomic;

mod markptr;
use markptr::{decompose, strip_mark};

mod node;
use node::Range;

mod iter;
pub use iter::Iter;

/// The Skip-List Height-Bound is also the upper Bound for the Map-Parameter
const MAX_NLEVEL: usize = 32;

/// Controls how much a Lookup helps concurrent Removals along
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    /// Just find the Range, leaving marked Nodes for others to unlink
    Lookup,
    /// Physically unlink any marked Node encountered during the Traversal
    RemoveAssist,
}

/// A concurrent Map of half-open Integer-Ranges `[key, key + size)`
///
/// The Map is generic over the backing reclamation scheme, by default the
/// Hazard-Ptr scheme. Every accessing Thread needs to be attached to the
/// [`threading`](crate::threading) Registry
pub struct CRange<V, G = Hp>
where
    G: Gc,
{
    head: *mut Range<V>,
    nlevel: usize,
    _marker: PhantomData<(fn() -> V, G)>,
}

// The Map hands out shared References to the Values from multiple Threads
// and moves Values across Threads through the Deleters
unsafe impl<V, G> Send for CRange<V, G>
where
    V: Send,
    G: Gc,
{
}
unsafe impl<V, G> Sync for CRange<V, G>
where
    V: Send + Sync,
    G: Gc,
{
}

impl<V, G> Debug for CRange<V, G>
where
    G: Gc,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CRange ( nlevel = {} )", self.nlevel)
    }
}

/// A Guard-protected Reference to a Range in the Map
///
/// The referenced Node stays dereferencable for as long as this exists,
/// even if a concurrent Operation removes it from the Map in the mean time
pub struct RangeRef<'r, V, G>
where
    G: Gc,
{
    node: *const Range<V>,
    _guard: G::Guard,
    _marker: PhantomData<&'r CRange<V, G>>,
}

impl<'r, V, G> RangeRef<'r, V, G>
where
    G: Gc,
{
    fn node(&self) -> &Range<V> {
        // # Safety:
        //
        // The Guard held alongside the Pointer keeps the Node from being
        // reclaimed
        unsafe { &*self.node }
    }

    /// The Start-Key of the Range (inclusive)
    pub fn key(&self) -> u64 {
        self.node().key
    }

    /// The Size of the Range
    pub fn size(&self) -> u64 {
        self.node().size
    }

    /// The stored Value
    pub fn value(&self) -> &V {
        // # Safety:
        //
        // Every Node reachable through the Map carries an initialized
        // Value, only the Head-Sentinel does not and that one is never
        // handed out
        unsafe { &*self.node().value.as_ptr() }
    }
}

impl<'r, V, G> Deref for RangeRef<'r, V, G>
where
    G: Gc,
{
    type Target = V;

    fn deref(&self) -> &Self::Target {
        self.value()
    }
}

impl<'r, V, G> Debug for RangeRef<'r, V, G>
where
    G: Gc,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RangeRef ( key = {}, size = {} )", self.key(), self.size())
    }
}

/// The locked Level-0 Neighbourhood of an Interval: the immediate
/// Predecessor plus every overlapping Range, all locked in increasing
/// Key-Order
struct LockedRun<V> {
    pred: *mut Range<V>,
    run: Vec<*mut Range<V>>,
    /// The Lock-Guards, Pred first, released in reverse Order on Drop
    locks: Vec<MutexGuard<'static, ()>>,
}

impl<V> Drop for LockedRun<V> {
    fn drop(&mut self) {
        while let Some(guard) = self.locks.pop() {
            drop(guard);
        }
    }
}

impl<V, G> CRange<V, G>
where
    G: Gc,
{
    /// Creates a new empty Map with the given Skip-List Height
    ///
    /// A higher `nlevel` shortens the expected Search-Path on large Maps
    /// but costs one Pointer per Level and Node, `nlevel = 1` degenerates
    /// to a sorted Linked-List
    ///
    /// # Panics
    /// If `nlevel` is outside of `1..=32`
    pub fn new(nlevel: usize) -> Self {
        assert!(
            (1..=MAX_NLEVEL).contains(&nlevel),
            "the Skip-List Height must be in 1..=32"
        );

        Self {
            head: Box::into_raw(Range::boxed_head(nlevel)),
            nlevel,
            _marker: PhantomData,
        }
    }
}

impl<V, G> CRange<V, G>
where
    V: Send + 'static,
    G: Gc,
{
    /// Draws the Tower-Height for a new Node from the usual geometric
    /// Distribution with p = 1/2, capped at the Map-Height
    fn random_height(&self) -> usize {
        use rand::Rng;

        let mut rng = rand::thread_rng();
        let mut height = 1;
        while height < self.nlevel && rng.gen::<bool>() {
            height += 1;
        }

        height
    }

    /// Drops one linked Level (or the removal Pin of [`Self::remove_run`])
    /// from the Node's Accounting, the Transition to 0 means the Node is
    /// fully unlinked, unpinned and gets retired
    fn dec_level(&self, node_ptr: *mut Range<V>) {
        let node = unsafe { &*node_ptr };

        let prev = node.curlevel.fetch_sub(1, atomic::Ordering::SeqCst);
        debug_assert!(prev > 0, "unlinked more Levels than were ever linked");

        if prev == 1 {
            let deleter: crate::reclaim::Deleter =
                Box::new(|ptr| unsafe { node::free_range::<V>(ptr) });

            // # Safety:
            //
            // The Accounting just reached 0: every Level is physically
            // unlinked, the Remover released its Pin (and with it the
            // Node-Lock), and this is the only Call that observed the
            // Transition
            unsafe { G::retire(node_ptr as *mut (), deleter) };
        }
    }

    /// Attempts the physical Unlink of a marked Node at the given Level,
    /// the spliced-out Level is accounted on Success. Fails on any
    /// concurrent Modification of the Predecessor-Cell, Retries are
    /// Caller-driven
    fn try_unlink(&self, pred: &Range<V>, node_addr: usize, level: usize) -> bool {
        let node = unsafe { &*(node_addr as *mut Range<V>) };
        debug_assert!(node.next[level].mark(atomic::Ordering::SeqCst));

        // the marked Cell is frozen, its Successor can not change anymore
        let (succ, _) = node.next[level].load(atomic::Ordering::SeqCst);

        if pred.next[level].cas(node_addr, false, succ, false).is_ok() {
            self.dec_level(node_addr as *mut Range<V>);
            true
        } else {
            false
        }
    }

    /// Walks the given Level up to the Key-Limit and physically unlinks
    /// every marked Node on the way, used to finish Removals on the upper
    /// Tower-Levels
    fn help_level(&self, limit: u64, level: usize) {
        let mut pred_guard = G::guard();
        let mut cur_guard = G::guard();

        'restart: loop {
            let mut pred_ptr = self.head;
            pred_guard.assign(pred_ptr as usize);

            loop {
                let pred = unsafe { &*pred_ptr };
                let raw = cur_guard.protect(pred.next[level].cell(), strip_mark);
                let (addr, pred_marked) = decompose(raw);

                if pred_marked {
                    continue 'restart;
                }
                if addr == 0 {
                    return;
                }

                let cur = unsafe { &*(addr as *mut Range<V>) };
                if cur.next[level].mark(atomic::Ordering::SeqCst) {
                    if self.try_unlink(pred, addr, level) {
                        continue;
                    }
                    continue 'restart;
                }
                if cur.key >= limit {
                    return;
                }

                pred_ptr = addr as *mut Range<V>;
                std::mem::swap(&mut pred_guard, &mut cur_guard);
            }
        }
    }

    /// Locates the Level-0 Predecessor of the given Key: the last Node
    /// whose Interval ends at or before `key`. The returned Guard keeps the
    /// Predecessor protected
    fn locate_pred0(&self, key: u64) -> (G::Guard, *mut Range<V>) {
        let mut pred_guard = G::guard();
        let mut cur_guard = G::guard();

        'restart: loop {
            let mut pred_ptr = self.head;
            pred_guard.assign(pred_ptr as usize);

            for level in (0..self.nlevel).rev() {
                loop {
                    let pred = unsafe { &*pred_ptr };
                    let raw = cur_guard.protect(pred.next[level].cell(), strip_mark);
                    let (addr, pred_marked) = decompose(raw);

                    if pred_marked {
                        continue 'restart;
                    }
                    if addr == 0 {
                        break;
                    }

                    let cur = unsafe { &*(addr as *mut Range<V>) };
                    if cur.next[level].mark(atomic::Ordering::SeqCst) {
                        if self.try_unlink(pred, addr, level) {
                            continue;
                        }
                        continue 'restart;
                    }
                    if cur.end() <= key {
                        pred_ptr = addr as *mut Range<V>;
                        std::mem::swap(&mut pred_guard, &mut cur_guard);
                        continue;
                    }

                    break;
                }
            }

            return (pred_guard, pred_ptr);
        }
    }

    /// Finds and locks the maximal Run of Ranges overlapping
    /// `[key, key + size)` on Level 0, together with the immediate
    /// Predecessor for the Splice. Predecessors are locked before the
    /// overlapping Nodes and those in increasing Key-Order, released in
    /// reverse
    fn find_and_lock(&self, key: u64, size: u64) -> LockedRun<V> {
        let end = key.saturating_add(size);
        let mut backoff = Backoff::new(Strategy::Yield);

        'retry: loop {
            let (_pred_guard, pred_ptr) = self.locate_pred0(key);
            let pred = unsafe { &*pred_ptr };

            // # Safety: the Guards are dropped before the Locks
            let pred_lock = match unsafe { pred.lock_unmarked() } {
                Some(guard) => guard,
                None => {
                    backoff.wait();
                    continue 'retry;
                }
            };

            let mut locks = vec![pred_lock];
            let mut run: Vec<*mut Range<V>> = Vec::new();
            let mut cur_guard = G::guard();

            let mut prev_ptr = pred_ptr;
            let mut stale = false;
            loop {
                let prev = unsafe { &*prev_ptr };
                let raw = cur_guard.protect(prev.next[0].cell(), strip_mark);
                let (addr, prev_marked) = decompose(raw);
                debug_assert!(!prev_marked, "a locked unmarked Node got marked");

                if addr == 0 {
                    break;
                }

                let cur = unsafe { &*(addr as *mut Range<V>) };
                if cur.is_deleted() {
                    // a Leftover of an earlier Removal, unlink it under the
                    // Lock of its Predecessor and re-read the Chain
                    self.try_unlink(prev, addr, 0);
                    continue;
                }
                if cur.key >= end {
                    break;
                }
                if cur.end() <= key {
                    // another Writer squeezed a Range in front of us while
                    // we were still locking, the located Pred is stale
                    stale = true;
                    break;
                }

                // # Safety: the Guards are dropped before the Locks
                match unsafe { cur.lock_unmarked() } {
                    Some(guard) => {
                        locks.push(guard);
                        run.push(addr as *mut Range<V>);
                        prev_ptr = addr as *mut Range<V>;
                    }
                    None => {
                        stale = true;
                        break;
                    }
                };
            }

            if stale {
                while let Some(guard) = locks.pop() {
                    drop(guard);
                }
                backoff.wait();
                continue 'retry;
            }

            return LockedRun {
                pred: pred_ptr,
                run,
                locks,
            };
        }
    }

    /// Marks every Node of the locked Run as logically deleted and splices
    /// it out of the Level-0 Chain, returns the highest Level any of them
    /// was linked on.
    ///
    /// Must be called while the Run-Locks are held. Every Node gets an
    /// extra removal Pin on its Level-Accounting before its Marks go out:
    /// once a Node is marked, this Thread and every helping Traversal can
    /// finish its physical Unlinks, and without the Pin the terminal Retire
    /// could free the Node while its Lock-Guard is still held by the
    /// Caller. The Caller releases the Pins through [`Self::dec_level`]
    /// once the Locks are dropped
    fn remove_run(&self, pred: &Range<V>, run: &[*mut Range<V>]) -> usize {
        let mut max_level = 0;

        for &e_ptr in run {
            let e = unsafe { &*e_ptr };
            let linked = e.curlevel.load(atomic::Ordering::SeqCst);
            e.curlevel.fetch_add(1, atomic::Ordering::SeqCst);
            e.mark_tower(linked);
            max_level = max_level.max(linked);
        }

        for &e_ptr in run {
            let e = unsafe { &*e_ptr };
            loop {
                let (cur, _) = pred.next[0].load(atomic::Ordering::SeqCst);
                if cur != e_ptr as usize {
                    // a helping Traversal already spliced this one out
                    break;
                }

                let (e_succ, _) = e.next[0].load(atomic::Ordering::SeqCst);
                if pred.next[0].cas(e_ptr as usize, false, e_succ, false).is_ok() {
                    self.dec_level(e_ptr);
                    break;
                }
            }
        }

        max_level
    }

    /// Links the upper Levels of a freshly inserted Node, one CAS per
    /// Level from the Bottom up. Runs under the Node's own Lock so the
    /// Level-Accounting stays serialized with a concurrent Marking
    fn raise_tower(&self, node_ptr: *mut Range<V>, height: usize) {
        if height <= 1 {
            return;
        }

        let node = unsafe { &*node_ptr };

        // # Safety: the Caller keeps the Node assigned to a Guard for the
        // whole Call, so it outlives the Lock-Window even if a concurrent
        // Removal finished in the mean time
        let _lock = match unsafe { node.lock_unmarked() } {
            Some(guard) => guard,
            // the Node was already removed again, nothing left to grow
            None => return,
        };

        let mut pred_guard = G::guard();
        let mut cur_guard = G::guard();

        for level in 1..height {
            'link: loop {
                let mut pred_ptr = self.head;
                pred_guard.assign(pred_ptr as usize);

                loop {
                    let pred = unsafe { &*pred_ptr };
                    let raw = cur_guard.protect(pred.next[level].cell(), strip_mark);
                    let (addr, pred_marked) = decompose(raw);

                    if pred_marked {
                        continue 'link;
                    }

                    if addr != 0 {
                        let cur = unsafe { &*(addr as *mut Range<V>) };
                        if cur.next[level].mark(atomic::Ordering::SeqCst) {
                            if self.try_unlink(pred, addr, level) {
                                continue;
                            }
                            continue 'link;
                        }
                        if cur.key < node.key {
                            pred_ptr = addr as *mut Range<V>;
                            std::mem::swap(&mut pred_guard, &mut cur_guard);
                            continue;
                        }
                    }

                    // install between pred and its current Successor
                    node.next[level].store(addr, false, atomic::Ordering::SeqCst);
                    if pred
                        .next[level]
                        .cas(addr, false, node_ptr as usize, false)
                        .is_ok()
                    {
                        node.curlevel.fetch_add(1, atomic::Ordering::SeqCst);
                        break 'link;
                    }

                    continue 'link;
                }
            }
        }
    }

    /// Inserts `[key, key + size) -> value`, destructively replacing every
    /// Range the new Interval overlaps
    ///
    /// # Panics
    /// If `size` is 0, or if the current Thread is not attached
    pub fn add(&self, key: u64, size: u64, value: V) {
        assert!(size > 0, "a zero-sized Range can not overlap anything");
        let end = key.saturating_add(size);

        let height = self.random_height();
        let node_ptr = Box::into_raw(Range::boxed(key, size, value, height));

        // the Node is ours until the Splice publishes it, the unconditional
        // Protection just keeps it alive through the concurrent Removal
        // that may follow the Publish
        let mut node_guard = G::guard();
        node_guard.assign(node_ptr as usize);

        let locked = self.find_and_lock(key, size);
        let pred = unsafe { &*locked.pred };

        let max_replaced = self.remove_run(pred, &locked.run);

        // splice into Level 0 behind the still locked Pred
        let node = unsafe { &*node_ptr };
        let mut succ_guard = G::guard();
        loop {
            let raw = succ_guard.protect(pred.next[0].cell(), strip_mark);
            let (succ_addr, pred_marked) = decompose(raw);
            debug_assert!(!pred_marked, "a locked unmarked Node got marked");

            if succ_addr != 0 {
                let succ = unsafe { &*(succ_addr as *mut Range<V>) };
                if succ.is_deleted() {
                    self.try_unlink(pred, succ_addr, 0);
                    continue;
                }
            }

            node.next[0].store(succ_addr, false, atomic::Ordering::SeqCst);
            if pred
                .next[0]
                .cas(succ_addr, false, node_ptr as usize, false)
                .is_ok()
            {
                break;
            }
        }

        let replaced = locked.run.clone();
        drop(locked);

        // with the Locks gone the removal Pins can be released, only now
        // may the replaced Nodes reach their terminal Retire
        for &e_ptr in &replaced {
            self.dec_level(e_ptr);
        }

        // finish the Removal of the replaced Towers, then grow our own
        for level in (1..max_replaced).rev() {
            self.help_level(end, level);
        }
        self.raise_tower(node_ptr, height);
    }

    /// Removes every Range whose Interval intersects `[key, key + size)`
    ///
    /// The Removal is logical, the physical Unlinks are finished before the
    /// Call returns but may also be helped along by concurrent Traversals
    ///
    /// # Panics
    /// If `size` is 0, or if the current Thread is not attached
    pub fn del(&self, key: u64, size: u64) {
        assert!(size > 0, "a zero-sized Range can not overlap anything");
        let end = key.saturating_add(size);

        let locked = self.find_and_lock(key, size);
        if locked.run.is_empty() {
            return;
        }

        let pred = unsafe { &*locked.pred };
        let max_removed = self.remove_run(pred, &locked.run);

        let removed = locked.run.clone();
        drop(locked);

        // with the Locks gone the removal Pins can be released, only now
        // may the removed Nodes reach their terminal Retire
        for &e_ptr in &removed {
            self.dec_level(e_ptr);
        }

        for level in (1..max_removed).rev() {
            self.help_level(end, level);
        }
    }

    /// Finds a Range overlapping `[key, key + size)`, if any
    ///
    /// The Traversal takes no Locks. With [`SearchMode::RemoveAssist`] it
    /// physically unlinks marked Nodes it encounters, with
    /// [`SearchMode::Lookup`] it leaves them for others
    ///
    /// # Panics
    /// If `size` is 0, or if the current Thread is not attached
    pub fn search(&self, key: u64, size: u64, mode: SearchMode) -> Option<RangeRef<'_, V, G>> {
        assert!(size > 0, "a zero-sized Range can not overlap anything");
        let end = key.saturating_add(size);

        let mut pred_guard = G::guard();
        let mut cur_guard = G::guard();

        'restart: loop {
            let mut pred_ptr = self.head;
            pred_guard.assign(pred_ptr as usize);
            let mut candidate = 0_usize;

            for level in (0..self.nlevel).rev() {
                loop {
                    let pred = unsafe { &*pred_ptr };
                    let raw = cur_guard.protect(pred.next[level].cell(), strip_mark);
                    let (addr, pred_marked) = decompose(raw);

                    if pred_marked {
                        continue 'restart;
                    }
                    if addr == 0 {
                        candidate = 0;
                        break;
                    }

                    let cur = unsafe { &*(addr as *mut Range<V>) };
                    if cur.next[level].mark(atomic::Ordering::SeqCst) {
                        match mode {
                            SearchMode::RemoveAssist => {
                                if self.try_unlink(pred, addr, level) {
                                    continue;
                                }
                                continue 'restart;
                            }
                            // a marked Successor can not be stepped over
                            // without unlinking it, its own Successor may
                            // already be gone
                            SearchMode::Lookup => continue 'restart,
                        };
                    }
                    if cur.end() <= key {
                        pred_ptr = addr as *mut Range<V>;
                        std::mem::swap(&mut pred_guard, &mut cur_guard);
                        continue;
                    }

                    candidate = addr;
                    break;
                }
            }

            if candidate == 0 {
                return None;
            }

            let cand = unsafe { &*(candidate as *mut Range<V>) };
            if cand.key < end {
                return Some(RangeRef {
                    node: candidate as *const Range<V>,
                    _guard: cur_guard,
                    _marker: PhantomData,
                });
            }

            return None;
        }
    }

    /// A forward Iterator over the Level-0 Chain, skipping marked Nodes
    ///
    /// The Iteration is not a consistent Cut over concurrent Writers: new
    /// Ranges behind the current Position are observed, Ranges whose
    /// Removal has not been physically finished may still show up
    pub fn iter(&self) -> Iter<'_, V, G> {
        Iter::new(self)
    }
}

impl<V, G> Drop for CRange<V, G>
where
    G: Gc,
{
    fn drop(&mut self) {
        // exclusive Access, so a plain Walk over Level 0 reaches every
        // still linked Node. Retired Nodes are owned by the reclamation
        // scheme at this point
        let head = unsafe { &*self.head };
        let (mut addr, _) = head.next[0].load(atomic::Ordering::SeqCst);

        while addr != 0 {
            let node_ptr = addr as *mut Range<V>;
            let (next_addr, _) = unsafe { &*node_ptr }.next[0].load(atomic::Ordering::SeqCst);

            unsafe { node::free_range::<V>(node_ptr as *mut ()) };
            addr = next_addr;
        }

        unsafe { node::free_head(self.head) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::threading;

    fn setup() {
        crate::tests_support::ensure_init();
    }

    fn collect<V: Clone + Send + 'static, G: Gc>(map: &CRange<V, G>) -> Vec<(u64, u64, V)> {
        map.iter()
            .map(|entry| (entry.key(), entry.size(), entry.value().clone()))
            .collect()
    }

    #[test]
    fn single_thread_ordered_set() {
        setup();
        let _attach = threading::attach_scoped();

        let map = CRange::<&str>::new(4);
        map.add(100, 10, "A");
        map.add(50, 10, "B");
        map.add(200, 5, "C");

        assert_eq!(
            vec![(50, 10, "B"), (100, 10, "A"), (200, 5, "C")],
            collect(&map)
        );

        map.del(50, 10);
        assert_eq!(vec![(100, 10, "A"), (200, 5, "C")], collect(&map));
    }

    #[test]
    fn overlap_replacement() {
        setup();
        let _attach = threading::attach_scoped();

        let map = CRange::<&str>::new(4);
        map.add(0, 100, "X");
        map.add(40, 20, "Y");

        assert_eq!(vec![(40, 20, "Y")], collect(&map));

        let found = map.search(45, 1, SearchMode::Lookup).expect("Y covers 45");
        assert_eq!("Y", *found.value());

        assert!(map.search(0, 1, SearchMode::Lookup).is_none());
    }

    #[test]
    fn touching_ranges_survive() {
        setup();
        let _attach = threading::attach_scoped();

        let map = CRange::<&str>::new(4);
        map.add(10, 5, "v");
        map.add(15, 5, "w");

        assert_eq!(vec![(10, 5, "v"), (15, 5, "w")], collect(&map));
    }

    #[test]
    fn partial_overlap_replaces() {
        setup();
        let _attach = threading::attach_scoped();

        let map = CRange::<&str>::new(4);
        map.add(10, 5, "v");
        map.add(14, 5, "w");

        assert_eq!(vec![(14, 5, "w")], collect(&map));

        let found = map.search(14, 1, SearchMode::Lookup).expect("w covers 14");
        assert_eq!("w", *found.value());
    }

    #[test]
    fn search_misses_between_ranges() {
        setup();
        let _attach = threading::attach_scoped();

        let map = CRange::<u32>::new(4);
        map.add(10, 5, 1);
        map.add(30, 5, 2);

        assert!(map.search(20, 5, SearchMode::Lookup).is_none());
        assert!(map.search(15, 16, SearchMode::Lookup).is_some());
        assert!(map.search(12, 5, SearchMode::Lookup).is_some());
    }

    #[test]
    fn search_covers_every_key_of_a_range() {
        setup();
        let _attach = threading::attach_scoped();

        let map = CRange::<u32>::new(4);
        map.add(100, 20, 7);

        for k in 100..120 {
            let found = map
                .search(k, 1, SearchMode::Lookup)
                .expect("the Range covers the Key");
            assert_eq!(7, *found.value());
        }
        assert!(map.search(99, 1, SearchMode::Lookup).is_none());
        assert!(map.search(120, 1, SearchMode::Lookup).is_none());
    }

    #[test]
    fn del_is_idempotent() {
        setup();
        let _attach = threading::attach_scoped();

        let map = CRange::<u32>::new(4);
        map.add(10, 10, 1);

        map.del(10, 10);
        assert!(map.search(10, 10, SearchMode::Lookup).is_none());

        map.del(10, 10);
        assert!(map.search(10, 10, SearchMode::Lookup).is_none());
        assert!(collect(&map).is_empty());
    }

    #[test]
    fn del_removes_any_overlap() {
        setup();
        let _attach = threading::attach_scoped();

        let map = CRange::<u32>::new(4);
        map.add(10, 10, 1);
        map.add(30, 10, 2);
        map.add(50, 10, 3);

        // the deleted Interval does not start on a Range-Boundary
        map.del(35, 20);

        assert_eq!(vec![(10, 10, 1)], collect(&map));
    }

    #[test]
    fn add_del_roundtrip_restores_search() {
        setup();
        let _attach = threading::attach_scoped();

        let map = CRange::<u32>::new(4);
        map.add(10, 5, 1);
        map.add(20, 5, 2);

        map.add(100, 50, 9);
        map.del(100, 50);

        assert!(map.search(100, 50, SearchMode::Lookup).is_none());
        assert_eq!(vec![(10, 5, 1), (20, 5, 2)], collect(&map));
    }

    #[test]
    fn degenerate_single_level() {
        setup();
        let _attach = threading::attach_scoped();

        let map = CRange::<u32>::new(1);
        map.add(30, 5, 3);
        map.add(10, 5, 1);
        map.add(20, 5, 2);

        assert_eq!(vec![(10, 5, 1), (20, 5, 2), (30, 5, 3)], collect(&map));

        map.del(15, 10);
        assert_eq!(vec![(10, 5, 1), (30, 5, 3)], collect(&map));
    }

    #[test]
    fn remove_assist_search_finds_too() {
        setup();
        let _attach = threading::attach_scoped();

        let map = CRange::<u32>::new(4);
        map.add(10, 5, 1);
        map.del(10, 5);
        map.add(12, 5, 2);

        let found = map
            .search(12, 1, SearchMode::RemoveAssist)
            .expect("the re-added Range covers 12");
        assert_eq!(2, *found.value());
    }

    #[test]
    fn values_are_dropped_with_the_map() {
        setup();
        let _attach = threading::attach_scoped();

        let drops = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));

        struct Tracked(std::sync::Arc<std::sync::atomic::AtomicUsize>);
        impl Drop for Tracked {
            fn drop(&mut self) {
                self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
        }

        {
            let map = CRange::<Tracked>::new(4);
            map.add(10, 5, Tracked(drops.clone()));
            map.add(20, 5, Tracked(drops.clone()));
        }

        assert_eq!(2, drops.load(std::sync::atomic::Ordering::SeqCst));
    }
}
