use std::marker::PhantomData;

use super::markptr::{decompose, strip_mark};
use super::node::Range;
use super::{CRange, RangeRef};
use crate::reclaim::{Gc, GcGuard};

/// A forward Iterator over the Level-0 Chain of a Range-Map
///
/// Every yielded [`RangeRef`] carries its own Guard, so the Entries can be
/// kept around past the next Step (within the Limits of the backing
/// scheme's Guard-Budget). If the Node the Iterator rests on is removed
/// under it, the Iteration restarts from the Head and skips forward to the
/// last yielded Key
pub struct Iter<'r, V, G>
where
    G: Gc,
{
    cr: &'r CRange<V, G>,
    /// The Node the Iteration continues from, protected by `pos_guard`
    /// unless it is the Head-Sentinel
    pos: *mut Range<V>,
    pos_guard: G::Guard,
    /// The Key of the last yielded Range, used to re-synchronize after a
    /// Restart
    resume_key: Option<u64>,
}

impl<'r, V, G> Iter<'r, V, G>
where
    V: Send + 'static,
    G: Gc,
{
    pub(crate) fn new(cr: &'r CRange<V, G>) -> Self {
        let mut pos_guard = G::guard();
        pos_guard.assign(cr.head as usize);

        Self {
            cr,
            pos: cr.head,
            pos_guard,
            resume_key: None,
        }
    }

    fn restart(&mut self) {
        self.pos = self.cr.head;
        self.pos_guard.assign(self.cr.head as usize);
    }
}

impl<'r, V, G> Iterator for Iter<'r, V, G>
where
    V: Send + 'static,
    G: Gc,
{
    type Item = RangeRef<'r, V, G>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut cur_guard = G::guard();

        loop {
            let pos = unsafe { &*self.pos };
            let raw = cur_guard.protect(pos.next[0].cell(), strip_mark);
            let (addr, pos_marked) = decompose(raw);

            if pos_marked {
                // the Node we rested on was removed under us
                self.restart();
                continue;
            }
            if addr == 0 {
                return None;
            }

            let cur = unsafe { &*(addr as *mut Range<V>) };
            if cur.is_deleted() {
                if self.cr.try_unlink(pos, addr, 0) {
                    continue;
                }
                self.restart();
                continue;
            }

            // after a Restart, skip everything that was already yielded
            if let Some(resume) = self.resume_key {
                if cur.key <= resume {
                    self.pos = addr as *mut Range<V>;
                    std::mem::swap(&mut self.pos_guard, &mut cur_guard);
                    continue;
                }
            }

            self.resume_key = Some(cur.key);

            let mut item_guard = G::guard();
            item_guard.assign(addr);

            self.pos = addr as *mut Range<V>;
            std::mem::swap(&mut self.pos_guard, &mut cur_guard);

            return Some(RangeRef {
                node: addr as *const Range<V>,
                _guard: item_guard,
                _marker: PhantomData,
            });
        }
    }
}

impl<'r, V, G> std::fmt::Debug for Iter<'r, V, G>
where
    G: Gc,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Iter ( resume_key = {:?} )", self.resume_key)
    }
}

#[cfg(test)]
mod tests {
    use super::super::{CRange, SearchMode};
    use crate::threading;

    fn setup() {
        crate::tests_support::ensure_init();
    }

    #[test]
    fn empty_map_yields_nothing() {
        setup();
        let _attach = threading::attach_scoped();

        let map = CRange::<u32>::new(4);
        assert_eq!(0, map.iter().count());
    }

    #[test]
    fn yields_in_key_order() {
        setup();
        let _attach = threading::attach_scoped();

        let map = CRange::<u32>::new(4);
        map.add(30, 5, 3);
        map.add(10, 5, 1);
        map.add(50, 5, 5);

        let keys: Vec<_> = map.iter().map(|entry| entry.key()).collect();
        assert_eq!(vec![10, 30, 50], keys);
    }

    #[test]
    fn entries_outlive_the_step() {
        setup();
        let _attach = threading::attach_scoped();

        let map = CRange::<u32>::new(4);
        map.add(10, 5, 1);
        map.add(20, 5, 2);

        let entries: Vec<_> = map.iter().collect();
        assert_eq!(2, entries.len());

        // the Entries stay readable even after a concurrent-style Removal
        map.del(10, 5);
        assert_eq!(1, *entries[0].value());
        assert_eq!(2, *entries[1].value());

        assert!(map.search(10, 5, SearchMode::Lookup).is_none());
    }
}
