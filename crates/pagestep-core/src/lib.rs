//! Core of the pagestep controlled-channel oracle.
//!
//! A controlled-channel attack uses page protections to make a victim trap on
//! chosen memory accesses. Which pages trap, and in which order, reveals
//! secret-dependent control flow and data accesses of the victim.
//!
//! # Architecture
//!
//! - [`Registry`]: permission and role of every monitored page
//! - [`FaultPolicy`]: decides the permission transition for each fault
//!   ([`GrantOnFault`] for data probes, [`SingleStep`] for code pages)
//! - [`TraceRecorder`]: ordered, bounded record of all faults
//! - [`SquareMultiplyDecoder`]: recovers exponent bits from a single-stepped trace
//! - [`Oracle`]: one run's registry, recorder and policy, installed as the
//!   [`FaultHandler`] while a victim call runs
//!
//! Platforms plug in through [`ProtectionControl`], [`FaultSource`] and
//! [`AddressSpace`]; victims through [`Enclave`].
//!
//! # Example
//!
//! ```
//! use pagestep_core::{Role, SquareMultiplyDecoder};
//! use Role::{CodeModpow as P, CodeMultiply as M, CodeSquare as S};
//!
//! // 0b10 after no blinding prefix
//! let decoder = SquareMultiplyDecoder::new(2, 0)?;
//! let secret = decoder.decode(&[P, S, P, M, P, S, P])?;
//! assert_eq!(secret.value(), 0b10);
//! # Ok::<(), pagestep_core::OracleError>(())
//! ```

#![warn(missing_docs)]

mod config;
mod controller;
mod decoder;
mod error;
mod experiment;
mod oracle;
mod page;
mod platform;
mod registry;
mod trace;
/// Utility functions and types
pub mod util;
mod victim;

pub use self::config::{Error as ConfigError, OracleConfig};
pub use self::controller::{
    FaultPolicy, GrantOnFault, PermissionDecision, SingleStep, StepAction, StepState,
};
pub use self::decoder::{SecretBits, SquareMultiplyDecoder};
pub use self::error::{OracleError, Result};
pub use self::experiment::{
    CodePages, EXPECTED_FAULTS, ExperimentReport, ProbeOutcome, StepOutcome, adjacent_page,
    boolean_access, force_map, single_step,
};
pub use self::oracle::Oracle;
pub use self::page::{Access, Page, PageAddr, Protection, Role};
pub use self::platform::{AddressSpace, FaultHandler, FaultSource, Platform, ProtectionControl};
pub use self::registry::Registry;
pub use self::trace::{FaultEvent, Trace, TraceRecorder};
pub use self::victim::{Enclave, VictimCall, VictimError, VictimValue};
