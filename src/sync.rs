//! A small facade over the Atomic-Primitives used in the Crate, which allows
//! us to transparently swap them out for the loom versions when running the
//! loom based concurrency tests

#[cfg(not(loom))]
pub mod atomic {
    pub use std::sync::atomic::{
        compiler_fence, fence, AtomicBool, AtomicPtr, AtomicU32, AtomicU8, AtomicUsize, Ordering,
    };
}

#[cfg(loom)]
pub mod atomic {
    pub use loom::sync::atomic::{
        fence, AtomicBool, AtomicPtr, AtomicU32, AtomicU8, AtomicUsize, Ordering,
    };
    pub use std::sync::atomic::compiler_fence;
}

/// Emits a single Spin-Loop hint to the CPU, used in the tight retry loops
/// where we expect the contention to clear up almost immediately
#[cfg(not(loom))]
pub fn spin_hint() {
    std::hint::spin_loop();
}

#[cfg(loom)]
pub fn spin_hint() {
    loom::thread::yield_now();
}
