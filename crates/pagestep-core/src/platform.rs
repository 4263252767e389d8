//! Platform seams: protection changes, fault delivery and victim memory.
//!
//! A backend implements all three traits below; the blanket [`Platform`] trait
//! names the combination. `pagestep-native` implements them with `mprotect`
//! and `SIGSEGV`, `pagestep-sim` with a software page table.

use crate::controller::PermissionDecision;
use crate::error::OracleError;
use crate::page::{PageAddr, Protection};
use crate::victim::VictimError;

/// Changes the protection of a page range.
pub trait ProtectionControl {
    /// Applies `protection` to `len` bytes starting at `page`.
    ///
    /// The change must be visible to the victim's next access.
    ///
    /// # Errors
    ///
    /// Returns the platform error if the change was refused.
    fn set_protection(
        &self,
        page: PageAddr,
        len: usize,
        protection: Protection,
    ) -> std::io::Result<()>;
}

/// Receives protection faults, one at a time, synchronously.
pub trait FaultHandler {
    /// Handles a fault at `address`.
    ///
    /// On success the handler has already applied a protection that lets the
    /// faulting access retire. An error is fatal for the run.
    fn on_fault(&mut self, address: usize) -> Result<PermissionDecision, OracleError>;

    /// Lifts every protection this handler applied after a fatal error.
    ///
    /// Platforms that cannot abort the victim call use this to let it run to
    /// completion without faulting again on a monitored page.
    fn release(&mut self) -> Result<(), OracleError>;
}

/// Delivers protection faults to a handler while a victim call runs.
pub trait FaultSource {
    /// Routes every protection fault raised by `run` to `handler`.
    ///
    /// The handler is reachable only until `run` returns.
    ///
    /// # Errors
    ///
    /// Returns [`OracleError::TrapInstall`] if the handler cannot be installed,
    /// or the handler's own error if it failed during `run`.
    fn deliver_to<R>(
        &self,
        handler: &mut dyn FaultHandler,
        run: impl FnOnce() -> R,
    ) -> Result<R, OracleError>;
}

/// Memory as seen by a victim.
///
/// Every access that violates the current protection of its page is reported
/// to the installed [`FaultHandler`] before it retires.
pub trait AddressSpace {
    /// Maps one page holding callable code.
    fn map_code(&self) -> Result<PageAddr, VictimError>;

    /// Maps `pages` consecutive, zeroed data pages.
    fn map_data(&self, pages: usize) -> Result<PageAddr, VictimError>;

    /// Executes the code on `page`.
    fn fetch(&self, page: PageAddr) -> Result<(), VictimError>;

    /// Loads the byte at `addr`.
    fn load(&self, addr: usize) -> Result<u8, VictimError>;

    /// Stores `value` at `addr`.
    fn store(&self, addr: usize, value: u8) -> Result<(), VictimError>;
}

/// A complete backend.
pub trait Platform: AddressSpace + ProtectionControl + FaultSource {}

impl<T: AddressSpace + ProtectionControl + FaultSource> Platform for T {}

#[cfg(test)]
pub(crate) mod mock {
    use super::ProtectionControl;
    use crate::page::{PageAddr, Protection};
    use std::cell::RefCell;

    /// Records every protection change; refuses changes to `refuse`.
    #[derive(Default)]
    pub(crate) struct RecordingProtector {
        pub(crate) calls: RefCell<Vec<(PageAddr, Protection)>>,
        pub(crate) refuse: Option<PageAddr>,
    }

    impl ProtectionControl for RecordingProtector {
        fn set_protection(
            &self,
            page: PageAddr,
            _len: usize,
            protection: Protection,
        ) -> std::io::Result<()> {
            if self.refuse == Some(page) {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "refused by mock",
                ));
            }
            self.calls.borrow_mut().push((page, protection));
            Ok(())
        }
    }
}
