//! # pagestep
//!
//! pagestep is a page-fault controlled-channel oracle. It revokes access to
//! chosen pages of a victim, catches the resulting protection faults and
//! turns the sequence of faulting pages into secret bits.
//!
//! The framework is split into crates:
//!
//! - `pagestep-core`: page registry, fault policies, trace recording and
//!   decoding, and the ready-made experiments
//! - `pagestep-native`: Linux backend on `mprotect` and `SIGSEGV` (feature `native`)
//! - `pagestep-sim`: simulated backend for tests and other targets (feature `sim`)
//! - `pagestep-victims`: the demonstration victims (feature `victims`)
//! - `pagestep-flush-reload`: cache-timing baseline (feature `flush-reload`)
//!
//! This crate re-exports all of them.

pub use pagestep_core::*;

#[cfg(feature = "flush-reload")]
pub use pagestep_flush_reload as flush_reload;
#[cfg(all(feature = "native", target_os = "linux", target_arch = "x86_64"))]
pub use pagestep_native as native;
#[cfg(feature = "sim")]
pub use pagestep_sim as sim;
#[cfg(feature = "victims")]
pub use pagestep_victims as victims;
