//! The victim call boundary.
//!
//! A victim is whatever computation the oracle observes: a toy RSA
//! implementation, a string routine, an array lookup. The oracle treats each
//! victim as an opaque black box reachable through the [`Enclave`] trait; only
//! its memory and control-flow footprint is observed.
//!
//! Victims touch memory exclusively through an
//! [`AddressSpace`](crate::platform::AddressSpace), which lets the same victim
//! run on the native backend (real page faults) or the simulated one.

use serde::Serialize;
use std::fmt::{Display, Formatter};
use thiserror::Error;

/// Errors that can occur during victim calls.
#[derive(Error, Debug)]
pub enum VictimError {
    /// The victim does not implement the requested operation.
    #[error("Operation {0} is not supported by this victim")]
    Unsupported(&'static str),
    /// An I/O error occurred while setting up victim memory.
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    /// The fault handler hit a fatal error; the call was stopped at the faulting access.
    #[error("Run aborted by the fault handler at 0x{0:x}")]
    Aborted(usize),
    /// An access faulted while no handler was installed.
    #[error("Segmentation fault at 0x{0:x}")]
    Segfault(usize),
    /// The victim rejected its input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// A named operation on the victim.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum VictimCall {
    /// Encrypt a value with the victim's public key
    Encode(u64),
    /// Decrypt a value with the victim's private key
    Decode(u64),
    /// Perform the secret-dependent table lookup
    Lookup,
    /// Run the secret-dependent in-place transformation
    Transform,
    /// Replace the victim's secret
    SetSecret(u64),
    /// Increment a counter only if `secret` is set
    Increment {
        /// Whether the store happens
        secret: bool,
    },
    /// Increment a counter if `secret` is set, otherwise only read it
    IncrementOrRead {
        /// Whether the store happens
        secret: bool,
    },
}

impl VictimCall {
    /// Name of the operation, used in logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            VictimCall::Encode(_) => "encode",
            VictimCall::Decode(_) => "decode",
            VictimCall::Lookup => "lookup",
            VictimCall::Transform => "transform",
            VictimCall::SetSecret(_) => "set_secret",
            VictimCall::Increment { .. } => "increment",
            VictimCall::IncrementOrRead { .. } => "increment_or_read",
        }
    }
}

/// Plain value returned from a victim call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum VictimValue {
    /// The call has no result
    Unit,
    /// A numeric result
    Number(u64),
    /// A textual result
    Text(String),
}

impl VictimValue {
    /// Returns the number, or `None` for other variants.
    pub fn number(&self) -> Option<u64> {
        match self {
            VictimValue::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl Display for VictimValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            VictimValue::Unit => f.write_str("()"),
            VictimValue::Number(n) => write!(f, "{}", n),
            VictimValue::Text(s) => write!(f, "'{}'", s),
        }
    }
}

/// Trait for victims reachable through the call boundary.
///
/// Implementors expose the subset of [`VictimCall`] operations they support and
/// return [`VictimError::Unsupported`] for the rest.
///
/// # Examples
///
/// See `pagestep-victims` for the RSA, string, counter and lookup victims.
pub trait Enclave {
    /// Human-readable victim name.
    fn name(&self) -> &str;

    /// Performs one operation.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// * The operation is not supported ([`VictimError::Unsupported`])
    /// * The fault handler aborted the run ([`VictimError::Aborted`])
    /// * The input is invalid for this victim
    fn call(&mut self, call: VictimCall) -> Result<VictimValue, VictimError>;
}
