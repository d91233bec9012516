use super::node::NodeBase;
use super::DRAIN;
use crate::threading::Config;

/// A retired Node on its way through the shared Drain-List
pub struct RetiredBase(pub *mut NodeBase);

// A retired Node is unlinked and flagged, the remaining Accesses go through
// the atomic State-Word, so moving it between Threads is fine
unsafe impl Send for RetiredBase {}

/// A single claimed Reclamation-Step, executed outside of the Registry
/// borrow so the Callbacks may call back into the reclaimers
enum PendingOp {
    CleanUp(*mut NodeBase),
    Terminate(*mut NodeBase),
}

impl PendingOp {
    unsafe fn execute(self) {
        match self {
            Self::CleanUp(base) => {
                let clean = unsafe { (*base).clean_fn() };
                unsafe { clean(base) };
            }
            Self::Terminate(base) => {
                let term = unsafe { (*base).term_fn() };
                unsafe { term(base) };
            }
        };
    }
}

/// The Reclamation-Steps one Scan claimed, to be run by the Caller
pub struct PendingOps {
    ops: Vec<PendingOp>,
}

impl PendingOps {
    fn none() -> Self {
        Self { ops: Vec::new() }
    }

    /// Executes the claimed Steps, in Claim-Order so a CleanUp always runs
    /// before a Terminate of the same Node
    pub fn run(self) {
        for op in self.ops {
            unsafe { op.execute() };
        }
    }
}

/// The HRC State of a single attached Thread
pub struct ThreadGc {
    /// The retired Nodes this Thread buffers until they are terminated
    retired: Vec<*mut NodeBase>,
    scan_threshold: usize,
}

impl ThreadGc {
    pub fn new(config: &Config) -> Self {
        Self {
            retired: Vec::new(),
            scan_threshold: config.scan_threshold,
        }
    }

    /// Buffers the given retired Node, running a Scan once the Buffer
    /// reached the Threshold
    pub fn retire_base(&mut self, base: *mut NodeBase) -> PendingOps {
        self.retired.push(base);

        if self.retired.len() >= self.scan_threshold {
            self.scan()
        } else {
            PendingOps::none()
        }
    }

    /// Walks the buffered Nodes (and the shared Drain-List), claims one
    /// CleanUp per unprotected Node and the Termination of every Node whose
    /// Count reached zero. Terminated Nodes leave the Buffer, everything
    /// else stays for the next Scan
    pub fn scan(&mut self) -> PendingOps {
        let plist = crate::hazard_ptr::protected_set();

        let mut ops = Vec::new();

        let tmplist = std::mem::take(&mut self.retired);
        for base in tmplist {
            Self::scan_one(base, &plist, &mut ops, &mut self.retired);
        }

        // Nodes parked by detached Threads, only drained when the Lock is
        // free so the Scan itself stays non-blocking
        if let Ok(mut drain) = DRAIN.try_lock() {
            let parked = std::mem::take(&mut *drain);
            let mut back = Vec::new();
            for node in parked {
                Self::scan_one(node.0, &plist, &mut ops, &mut back);
            }
            for base in back {
                drain.push(RetiredBase(base));
            }
        }

        PendingOps { ops }
    }

    fn scan_one(
        base: *mut NodeBase,
        plist: &std::collections::HashSet<usize>,
        ops: &mut Vec<PendingOp>,
        keep: &mut Vec<*mut NodeBase>,
    ) {
        if plist.contains(&(base as usize)) {
            keep.push(base);
            return;
        }

        let node = unsafe { &*base };
        debug_assert!(node.is_deleted());

        if node.try_claim_clean() {
            ops.push(PendingOp::CleanUp(base));
        }

        if node.try_claim_terminate() {
            ops.push(PendingOp::Terminate(base));
        } else {
            keep.push(base);
        }
    }

    /// The detach path: one Scan on behalf of the departing Thread, the
    /// rest is parked on the shared Drain-List
    pub fn detach_scan(&mut self) -> PendingOps {
        let pending = self.scan();

        if !self.retired.is_empty() {
            let mut drain = DRAIN.lock().unwrap();
            for base in self.retired.drain(..) {
                drain.push(RetiredBase(base));
            }
        }

        pending
    }
}

impl Drop for ThreadGc {
    fn drop(&mut self) {
        if !self.retired.is_empty() {
            let mut drain = DRAIN.lock().unwrap();
            for base in self.retired.drain(..) {
                drain.push(RetiredBase(base));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::threading;

    fn setup() {
        crate::tests_support::ensure_init();
    }

    #[test]
    fn threshold_scan_reclaims_unreferenced() {
        setup();
        let _attach = threading::attach_scoped();

        let threshold = threading::config().unwrap().scan_threshold;
        let drops = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));

        struct Tracked(std::sync::Arc<std::sync::atomic::AtomicUsize>);
        impl Drop for Tracked {
            fn drop(&mut self) {
                self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
        }

        for _ in 0..threshold {
            let node = crate::hrc::alloc(Tracked(drops.clone()), 0);
            crate::hrc::retire(node);
        }

        // the threshold Scan claimed the CleanUps, one more pass claims the
        // Terminations
        for _ in 0..10 {
            crate::hrc::scan();
            if drops.load(std::sync::atomic::Ordering::SeqCst) >= threshold {
                break;
            }
            std::thread::yield_now();
        }
        assert!(drops.load(std::sync::atomic::Ordering::SeqCst) >= threshold);
    }
}
