#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs, unsafe_op_in_unsafe_fn)]
#![warn(rust_2018_idioms)]
//! This crate provides a set of Lock-Free memory reclamation schemes and a
//! concurrent Range-Map built on top of them
//!
//! # Feature-Flags
//! * `hazard_ptr`: Enables the Hazard-Ptr reclamation scheme
//! * `pass_buck`: Enables the Pass-The-Buck reclamation scheme
//! * `hrc`: Enables the Reference-Counting + Hazard-Ptr reclamation scheme
//! * `crange`: Enables the concurrent Range-Map
//! * `full`: Enables all the Feature-Flags
//!
//! # Thread-Lifecycle
//! All the reclamation schemes store their per-Thread State in a process-wide
//! Registry, so before a Thread uses any of them (directly or through a
//! Container like the Range-Map) it needs to call [`threading::attach`] and
//! before it exits it should call [`threading::detach`] again, see the
//! [`threading`] module for the details

#[cfg(feature = "std")]
#[cfg_attr(docsrs, doc(cfg(feature = "std")))]
pub mod backoff;
#[cfg(feature = "crange")]
#[cfg_attr(docsrs, doc(cfg(feature = "crange")))]
pub mod crange;
#[cfg(feature = "hazard_ptr")]
#[cfg_attr(docsrs, doc(cfg(feature = "hazard_ptr")))]
pub mod hazard_ptr;
#[cfg(feature = "hrc")]
#[cfg_attr(docsrs, doc(cfg(feature = "hrc")))]
pub mod hrc;
#[cfg(feature = "pass_buck")]
#[cfg_attr(docsrs, doc(cfg(feature = "pass_buck")))]
pub mod pass_buck;
#[cfg(feature = "std")]
#[cfg_attr(docsrs, doc(cfg(feature = "std")))]
pub mod reclaim;
#[cfg(feature = "std")]
#[cfg_attr(docsrs, doc(cfg(feature = "std")))]
pub mod threading;

pub(crate) mod sync;

#[cfg(feature = "crange")]
pub use crate::crange::{CRange, RangeRef, SearchMode};
