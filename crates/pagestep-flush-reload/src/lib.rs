//! Flush+reload cache-timing experiment.
//!
//! The attacker flushes every slot of an array shared with the victim, lets
//! the victim perform its secret-dependent lookup, then times a reload of
//! each slot. The slot the victim touched is served from the cache and is
//! the fastest to reload. Repeating the round and taking the per-slot median
//! removes outliers.
//!
//! Timing is abstracted by [`CacheProbe`]; [`Rdtscp`] measures with
//! `clflush` and `rdtscp` on x86_64.

#![warn(missing_docs)]

mod flush_reload;
mod probe;

pub use flush_reload::{Error, FlushReload, FlushReloadConfig, FlushReloadOutcome, Result};
#[cfg(target_arch = "x86_64")]
pub use probe::Rdtscp;
pub use probe::CacheProbe;
