//! Errors that abort an oracle run.
//!
//! None of these are retried: each one means an assumption the oracle relies
//! on (known page layout, known iteration count, responsive platform) does not
//! hold, and repeating the run would at best fail the same way.

use crate::page::{PageAddr, Protection, Role};
use crate::victim::VictimError;
use serde::{Serialize, Serializer};
use thiserror::Error;

/// Fatal errors of an oracle run.
#[derive(Debug, Error)]
pub enum OracleError {
    /// A fault hit an address outside every registered page.
    #[error("Fault at 0x{address:x} is not on a registered page (trace length {trace_len})")]
    UnknownPage {
        /// The faulting address
        address: usize,
        /// Faults recorded before this one
        trace_len: usize,
    },
    /// The platform refused a protection change.
    #[error("Failed to set {page} to {protection}: {source}")]
    PermissionChangeFailed {
        /// Page whose protection was changed
        page: PageAddr,
        /// Protection that was requested
        protection: Protection,
        /// The platform error
        #[source]
        source: std::io::Error,
    },
    /// More faults than the configured trace capacity.
    #[error("Trace overflow: fault at 0x{address:x} exceeds capacity {capacity}")]
    TraceOverflow {
        /// Configured capacity
        capacity: usize,
        /// The faulting address that did not fit
        address: usize,
    },
    /// The decoder ran out of trace before producing every bit.
    #[error(
        "Trace exhausted at index {cursor} of {trace_len} after {decoded} of {width} bits"
    )]
    TraceExhausted {
        /// Scan position when the trace ran out
        cursor: usize,
        /// Length of the trace
        trace_len: usize,
        /// Bits produced so far in the failing phase
        decoded: u32,
        /// Bits that phase required
        width: u32,
    },
    /// The victim call itself failed.
    #[error("Victim call failed: {0}")]
    VictimCallFailed(#[from] VictimError),
    /// A second page was registered for a code role.
    #[error("Role {0} is already registered")]
    DuplicateRole(Role),
    /// The same page was registered twice.
    #[error("Page {0} is already registered")]
    DuplicatePage(PageAddr),
    /// A code role required by the policy has no page.
    #[error("No page registered for role {0}")]
    MissingRole(Role),
    /// Installing or removing the fault handler failed.
    #[error("Failed to install fault handler: {0}")]
    TrapInstall(#[source] std::io::Error),
    /// A secret width outside `1..=64`, or a blinding width above 64.
    #[error("Invalid bit width {0}")]
    InvalidWidth(u32),
}

impl OracleError {
    /// Fills in the trace length of an [`OracleError::UnknownPage`].
    ///
    /// The registry does not know how many faults preceded the lookup; the
    /// oracle adds that context before propagating the error.
    pub fn with_trace_len(self, len: usize) -> Self {
        match self {
            OracleError::UnknownPage { address, .. } => OracleError::UnknownPage {
                address,
                trace_len: len,
            },
            other => other,
        }
    }
}

impl Serialize for OracleError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Result type of oracle operations.
pub type Result<T> = std::result::Result<T, OracleError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::ExperimentReport;

    #[test]
    fn test_serializes_as_message() {
        let err = OracleError::TraceOverflow {
            capacity: 10,
            address: 0x3000,
        };
        let json = serde_json::to_value(&err).expect("serialize");
        assert_eq!(json, serde_json::Value::String(err.to_string()));
    }

    #[test]
    fn test_failed_report_keeps_error() {
        let report: ExperimentReport<u64> = ExperimentReport::new(
            "rsa",
            Err(OracleError::UnknownPage {
                address: 0xdead_0000,
                trace_len: 3,
            }),
        );
        let json = serde_json::to_value(&report).expect("serialize");
        assert_eq!(json["experiment"], "rsa");
        let message = json["result"]["Err"].as_str().expect("error message");
        assert!(message.contains("0xdead0000"));
        assert!(message.contains("trace length 3"));
    }
}
