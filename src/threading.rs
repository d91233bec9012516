//! # Thread-Registry
//! This module binds the per-Thread State of the reclamation schemes to the
//! Threads using them.
//!
//! The Registry is process-wide and needs to be initialized exactly once
//! using [`init`], before any Thread attaches. Every Thread then calls
//! [`attach`] before its first Operation on a reclaimer-backed Structure and
//! [`detach`] before it exits, [`attach_scoped`] does both through a simple
//! RAII-Handle. Detaching drains the remaining retired Entries of the
//! Thread to a shared Drain-List and runs one reclamation pass on its
//! behalf, so the Memory does not get stuck with the departing Thread

use std::cell::RefCell;
use std::sync::Mutex;

use crate::sync::atomic;

lazy_static::lazy_static! {
    static ref REGISTRY: Registry = Registry::new();
}

thread_local! {
    static THREAD_CTL: RefCell<Option<ThreadCtl>> = RefCell::new(None);
}

/// The Parameters for the reclamation schemes, chosen once at [`init`] time
#[derive(Debug, Clone)]
pub struct Config {
    /// The maximum number of concurrently attached Threads
    pub max_threads: usize,
    /// The number of Hazard-Slots every attached Thread owns (`K`)
    pub hazards_per_thread: usize,
    /// The number of retired Entries a Thread buffers before it runs a
    /// reclamation Scan (`R`)
    pub scan_threshold: usize,
    /// The number of retired Entries the Pass-The-Buck scheme batches into
    /// a single Chunk before splicing it onto the shared Reclaim-Queue
    pub ptb_chunk_size: usize,
    /// The maximum number of outgoing Link-Slots of a single HRC-Node
    pub hrc_link_count: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_threads: 64,
            hazards_per_thread: 8,
            scan_threshold: 64,
            ptb_chunk_size: 64,
            hrc_link_count: 4,
        }
    }
}

/// The Error returned when tearing down the Registry failed
#[derive(Debug, PartialEq)]
pub enum FiniError {
    /// There are still Threads attached to the Registry, so tearing it down
    /// now would rip the State out from under them
    StillInUse,
}

struct Registry {
    initialized: atomic::AtomicBool,
    attached: atomic::AtomicUsize,
    config: Mutex<Option<Config>>,
}

impl Registry {
    fn new() -> Self {
        Self {
            initialized: atomic::AtomicBool::new(false),
            attached: atomic::AtomicUsize::new(0),
            config: Mutex::new(None),
        }
    }
}

/// The per-Thread State of all enabled reclamation schemes, created lazily
/// on [`attach`]
struct ThreadCtl {
    #[cfg(feature = "hazard_ptr")]
    hp: crate::hazard_ptr::ThreadGc,
    #[cfg(feature = "pass_buck")]
    ptb: crate::pass_buck::ThreadGc,
    #[cfg(feature = "hrc")]
    hrc: crate::hrc::ThreadGc,
}

impl ThreadCtl {
    fn new(config: &Config) -> Self {
        Self {
            #[cfg(feature = "hazard_ptr")]
            hp: crate::hazard_ptr::ThreadGc::new(config),
            #[cfg(feature = "pass_buck")]
            ptb: crate::pass_buck::ThreadGc::new(config),
            #[cfg(feature = "hrc")]
            hrc: crate::hrc::ThreadGc::new(config),
        }
    }
}

/// Initializes the process-wide Registry with the given Parameters
///
/// This must be called exactly once, before the first [`attach`],
/// re-initializing the Registry is a programming Error and panics
pub fn init(config: Config) {
    let mut stored = REGISTRY.config.lock().unwrap();
    assert!(
        !REGISTRY.initialized.load(atomic::Ordering::Acquire),
        "the Registry was already initialized"
    );

    *stored = Some(config);
    REGISTRY.initialized.store(true, atomic::Ordering::Release);
}

/// Tears the process-wide Registry down again
///
/// This fails with [`FiniError::StillInUse`] while any Thread is still
/// attached, in that case nothing is torn down and the Caller can retry
/// once the Threads have detached. Calling this on an already torn down
/// Registry is a No-Op
pub fn fini() -> Result<(), FiniError> {
    if REGISTRY.attached.load(atomic::Ordering::SeqCst) != 0 {
        return Err(FiniError::StillInUse);
    }

    let mut stored = REGISTRY.config.lock().unwrap();
    REGISTRY.initialized.store(false, atomic::Ordering::Release);
    *stored = None;

    Ok(())
}

/// Attaches the current Thread to the Registry, allocating the per-Thread
/// State of every enabled reclamation scheme
///
/// Calling this on an already attached Thread is a No-Op. Attaching without
/// a previous [`init`] is a programming Error and panics
pub fn attach() {
    if is_attached() {
        return;
    }

    assert!(
        REGISTRY.initialized.load(atomic::Ordering::Acquire),
        "attach called without initializing the Registry first"
    );

    let config = {
        let stored = REGISTRY.config.lock().unwrap();
        stored.clone().expect("the Registry is initialized")
    };

    let prev = REGISTRY.attached.fetch_add(1, atomic::Ordering::SeqCst);
    assert!(
        prev < config.max_threads,
        "more Threads attached than the configured max_threads"
    );

    let ctl = ThreadCtl::new(&config);
    THREAD_CTL.with(|cell| {
        *cell.borrow_mut() = Some(ctl);
    });
}

/// Detaches the current Thread from the Registry again
///
/// Any retired Entries the Thread still buffers are moved to the shared
/// Drain-Lists and one reclamation pass is run on its behalf. Calling this
/// on a Thread that is not attached is a No-Op
pub fn detach() {
    if !is_attached() {
        return;
    }

    // One Scan per scheme on behalf of the departing Thread, run while the
    // Thread still counts as attached so the Deleters may call back into
    // the reclaimers
    #[cfg(feature = "hazard_ptr")]
    {
        let pending = with_hp(|gc| gc.detach_scan());
        for entry in pending {
            unsafe { entry.reclaim() };
        }
    }
    #[cfg(feature = "pass_buck")]
    {
        let pending = with_ptb(|gc| gc.detach_scan());
        for entry in pending {
            unsafe { entry.reclaim() };
        }
    }
    #[cfg(feature = "hrc")]
    {
        let pending = with_hrc(|gc| gc.detach_scan());
        pending.run();
    }

    // Dropping the State parks any stragglers on the shared Drain-Lists
    // and releases the Hazard-Record for the next attaching Thread
    let ctl = THREAD_CTL.with(|cell| cell.borrow_mut().take());
    drop(ctl);

    REGISTRY.attached.fetch_sub(1, atomic::Ordering::SeqCst);
}

/// Checks if the current Thread is attached to the Registry
pub fn is_attached() -> bool {
    THREAD_CTL.with(|cell| cell.borrow().is_some())
}

/// A RAII-Handle that keeps the current Thread attached for as long as it
/// exists, see [`attach_scoped`]
pub struct AttachGuard {
    _private: (),
}

impl Drop for AttachGuard {
    fn drop(&mut self) {
        detach();
    }
}

/// Attaches the current Thread and returns a Handle that detaches it again
/// when dropped, the recommended way to manage the Thread-Lifecycle
pub fn attach_scoped() -> AttachGuard {
    attach();
    AttachGuard { _private: () }
}

/// The Config the Registry was initialized with
pub(crate) fn config() -> Option<Config> {
    let stored = REGISTRY.config.lock().unwrap();
    stored.clone()
}

/// Runs the given Closure with the Hazard-Ptr State of the current Thread
///
/// # Panics
/// If the current Thread is not attached
#[cfg(feature = "hazard_ptr")]
pub(crate) fn with_hp<F, R>(func: F) -> R
where
    F: FnOnce(&mut crate::hazard_ptr::ThreadGc) -> R,
{
    THREAD_CTL.with(|cell| {
        let mut borrow = cell.borrow_mut();
        let ctl = borrow
            .as_mut()
            .expect("the current Thread is not attached to the Registry");
        func(&mut ctl.hp)
    })
}

/// Runs the given Closure with the Pass-The-Buck State of the current Thread
///
/// # Panics
/// If the current Thread is not attached
#[cfg(feature = "pass_buck")]
pub(crate) fn with_ptb<F, R>(func: F) -> R
where
    F: FnOnce(&mut crate::pass_buck::ThreadGc) -> R,
{
    THREAD_CTL.with(|cell| {
        let mut borrow = cell.borrow_mut();
        let ctl = borrow
            .as_mut()
            .expect("the current Thread is not attached to the Registry");
        func(&mut ctl.ptb)
    })
}

/// Runs the given Closure with the HRC State of the current Thread
///
/// # Panics
/// If the current Thread is not attached
#[cfg(feature = "hrc")]
pub(crate) fn with_hrc<F, R>(func: F) -> R
where
    F: FnOnce(&mut crate::hrc::ThreadGc) -> R,
{
    THREAD_CTL.with(|cell| {
        let mut borrow = cell.borrow_mut();
        let ctl = borrow
            .as_mut()
            .expect("the current Thread is not attached to the Registry");
        func(&mut ctl.hrc)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() {
        crate::tests_support::ensure_init();
    }

    #[test]
    fn attach_detach_cycle() {
        setup();

        attach();
        assert!(is_attached());

        // a second attach on the same Thread is a No-Op
        attach();
        assert!(is_attached());

        detach();
        assert!(!is_attached());

        // detach is idempotent
        detach();
        assert!(!is_attached());
    }

    #[test]
    fn scoped_attach() {
        setup();

        {
            let _guard = attach_scoped();
            assert!(is_attached());
        }
        assert!(!is_attached());
    }

    #[test]
    fn fini_with_attached_thread() {
        setup();

        let _guard = attach_scoped();
        assert_eq!(Err(FiniError::StillInUse), fini());
    }
}
