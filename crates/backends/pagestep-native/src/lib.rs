//! Native Linux backend.
//!
//! Page protections are changed with `mprotect(2)`. Protection faults arrive
//! as `SIGSEGV`; a `SA_SIGINFO` handler forwards `si_addr` to the oracle
//! installed for the current session and returns, so the faulting
//! instruction is executed again under the new protection.
//!
//! Victim code pages are real executable pages holding a single `ret`,
//! assembled at run time with `iced-x86`. Fetching such a page calls it, which
//! is an instruction fetch the MMU checks like any other.
//!
//! # Safety
//!
//! Sessions are serialized process-wide, but the victim must run on the
//! thread that called [`FaultSource::deliver_to`](pagestep_core::FaultSource::deliver_to).
//! A fault on another thread during a session would reach the same handler.
//!
//! A fatal handler error cannot unwind out of the signal handler. The handler
//! releases every monitored page instead, so the victim call runs to
//! completion, and the error is returned from
//! [`FaultSource::deliver_to`](pagestep_core::FaultSource::deliver_to) once it
//! does. A fault outside every monitored page may be a genuine segmentation
//! fault: the default `SIGSEGV` disposition is restored, and the re-executed
//! access terminates the process.

#![cfg(all(target_os = "linux", target_arch = "x86_64"))]
#![warn(missing_docs)]

mod code;
mod native;
mod trap;

pub use native::{NativeError, NativePlatform, SYSTEM_PAGE_SIZE};
