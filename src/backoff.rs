//! Backoff-Strategies for the retry loops in the Crate
//!
//! Most operations in this Crate recover from contention (failed CAS, a Node
//! that got marked under us) by simply retrying. Hammering the contended
//! Cache-Line right away usually just prolongs the contention, so the retry
//! loops accept one of the Strategies in this module to wait a bit between
//! the attempts. The default used throughout the Crate is [`Strategy::Yield`]

use crate::sync;

/// Describes how a retry loop should behave between two attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Emit a single Spin-Loop hint and try again immediately
    Pause,
    /// Yield the current Thread to the OS-Scheduler before trying again
    Yield,
    /// Spin with an exponentially growing number of Spin-Loop hints, capped
    /// at the given ceiling
    Exp {
        /// The maximum number of Spin-Loop hints emitted for a single wait
        ceiling: u32,
    },
}

impl Default for Strategy {
    fn default() -> Self {
        Self::Yield
    }
}

/// The State for a single retry loop, created from a [`Strategy`]
///
/// A Backoff instance should not be shared between two different loops, as
/// the exponential Strategy carries State between the attempts
#[derive(Debug, Clone)]
pub struct Backoff {
    strategy: Strategy,
    current: u32,
}

impl Backoff {
    /// Creates the State for a new retry loop using the given Strategy
    pub const fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            current: 1,
        }
    }

    /// Creates the State for a new retry loop using the default Strategy
    pub fn default_strategy() -> Self {
        Self::new(Strategy::Yield)
    }

    /// Waits once, according to the Strategy, and advances the internal State
    pub fn wait(&mut self) {
        match self.strategy {
            Strategy::Pause => sync::spin_hint(),
            Strategy::Yield => std::thread::yield_now(),
            Strategy::Exp { ceiling } => {
                for _ in 0..self.current {
                    sync::spin_hint();
                }

                if self.current < ceiling {
                    self.current = self.current.saturating_mul(2);
                }
            }
        };
    }

    /// Resets the internal State back to where a freshly created instance
    /// would start
    pub fn reset(&mut self) {
        self.current = 1;
    }
}
