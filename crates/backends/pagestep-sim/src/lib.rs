//! Simulated MMU backend.
//!
//! [`SimPlatform`] keeps a software page table and checks every victim access
//! against it. A violating access is reported to the installed
//! [`FaultHandler`](pagestep_core::FaultHandler) synchronously, before the
//! access retires, exactly as a real protection fault would be.
//!
//! Implements [`pagestep_core::ProtectionControl`],
//! [`pagestep_core::FaultSource`] and [`pagestep_core::AddressSpace`].
//!
//! # Use Cases
//!
//! - Deterministic tests of the oracle on any host
//! - Dry runs of an experiment before running it natively

#![warn(missing_docs)]

mod sim;

pub use sim::{MAX_REFAULTS, SimPlatform};
