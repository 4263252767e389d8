//! Fault Trap Controller policies.
//!
//! A [`FaultPolicy`] turns one trapped fault into a [`PermissionDecision`]:
//! which pages lose their permissions and which page is opened so that the
//! faulting access can retire. The [`Oracle`](crate::oracle::Oracle) applies
//! the decision through the registry.
//!
//! Two policies cover the three experiment variants:
//!
//! * [`GrantOnFault`] opens the faulting page and revokes nothing. With a
//!   `NONE` data page it answers "was the page touched at all"; placed on the
//!   page right after a buffer it answers "did the buffer reach the boundary".
//! * [`SingleStep`] keeps exactly one code page executable at a time, so every
//!   transfer of control between `square`, `multiply` and `modpow` traps.

use crate::error::Result;
use crate::page::{Page, PageAddr, Protection, Role};
use crate::registry::Registry;
use serde::Serialize;

/// Permission changes for one fault.
///
/// Produced inside the fault handler, so it is a plain value with a fixed
/// number of slots.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct PermissionDecision {
    /// Pages whose permissions are revoked, applied before the grant
    pub revoke: [Option<PageAddr>; 2],
    /// Protection the revoked pages are set to
    pub revoked_to: Protection,
    /// The faulting page
    pub grant: PageAddr,
    /// Protection applied to the faulting page
    pub granted: Protection,
}

impl PermissionDecision {
    /// A decision that only opens `page`.
    pub fn grant_only(page: PageAddr, granted: Protection) -> Self {
        Self {
            revoke: [None, None],
            revoked_to: Protection::NONE,
            grant: page,
            granted,
        }
    }

    /// Iterates over the revoked pages.
    pub fn revoked(&self) -> impl Iterator<Item = PageAddr> + '_ {
        self.revoke.iter().flatten().copied()
    }
}

/// Decides the permission transition for each fault.
pub trait FaultPolicy {
    /// Validates the registry and resets per-run state before the run is armed.
    ///
    /// # Errors
    ///
    /// [`OracleError::MissingRole`](crate::OracleError::MissingRole) if a page
    /// the policy needs was never registered.
    fn prepare(&mut self, _registry: &Registry) -> Result<()> {
        Ok(())
    }

    /// Decides how to handle a fault on `page`.
    fn decide(&mut self, page: &Page, registry: &Registry) -> Result<PermissionDecision>;
}

/// Adds `grant` to the faulting page's protection and revokes nothing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GrantOnFault {
    /// Protection bits added on a fault
    pub grant: Protection,
}

impl GrantOnFault {
    /// Grants read and write, letting any data access retire.
    pub fn read_write() -> Self {
        Self {
            grant: Protection::READ | Protection::WRITE,
        }
    }

    /// Grants write only.
    pub fn write() -> Self {
        Self {
            grant: Protection::WRITE,
        }
    }
}

impl FaultPolicy for GrantOnFault {
    fn decide(&mut self, page: &Page, _registry: &Registry) -> Result<PermissionDecision> {
        Ok(PermissionDecision::grant_only(
            page.base,
            page.protection | self.grant,
        ))
    }
}

/// Progress of a single-stepping run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StepState {
    /// Faults handled so far
    pub cursor: usize,
    /// Page opened by the previous fault
    pub previous: Option<PageAddr>,
}

/// What to revoke before opening the faulting page.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum StepAction {
    /// First entry into `modpow`: close `square` and `multiply`, which were
    /// executable before the run started.
    RevokeSquareAndMultiply,
    /// Close the page opened by the previous fault.
    RevokePrevious,
}

impl StepAction {
    /// Transition table of the single-stepping controller.
    ///
    /// | role     | previous | action                    |
    /// |----------|----------|---------------------------|
    /// | `modpow` | none     | `RevokeSquareAndMultiply` |
    /// | any      | any      | `RevokePrevious`          |
    pub fn transition(role: Role, previous: Option<PageAddr>) -> Self {
        match (role, previous) {
            (Role::CodeModpow, None) => StepAction::RevokeSquareAndMultiply,
            _ => StepAction::RevokePrevious,
        }
    }
}

/// Single-steps through the `square`, `multiply` and `modpow` code pages.
///
/// Only `modpow` starts non-executable. Its first fault closes the other two
/// code pages; from then on every fault closes the page opened before it and
/// opens the faulting one.
#[derive(Clone, Copy, Debug, Default)]
pub struct SingleStep {
    state: StepState,
}

impl SingleStep {
    /// Creates a policy in its initial state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    pub fn state(&self) -> StepState {
        self.state
    }
}

impl FaultPolicy for SingleStep {
    fn prepare(&mut self, registry: &Registry) -> Result<()> {
        for role in [Role::CodeSquare, Role::CodeMultiply, Role::CodeModpow] {
            registry.require(role)?;
        }
        self.state = StepState::default();
        Ok(())
    }

    fn decide(&mut self, page: &Page, registry: &Registry) -> Result<PermissionDecision> {
        let revoke = match StepAction::transition(page.role, self.state.previous) {
            StepAction::RevokeSquareAndMultiply => [
                Some(registry.require(Role::CodeSquare)?.base),
                Some(registry.require(Role::CodeMultiply)?.base),
            ],
            StepAction::RevokePrevious => {
                [self.state.previous.filter(|prev| *prev != page.base), None]
            }
        };
        let granted = if page.role.is_code() {
            Protection::EXEC
        } else {
            Role::Data.resting_protection()
        };
        self.state = StepState {
            cursor: self.state.cursor + 1,
            previous: Some(page.base),
        };
        Ok(PermissionDecision {
            revoke,
            revoked_to: Protection::NONE,
            grant: page.base,
            granted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OracleError;

    const SQUARE: usize = 0x1000;
    const MULTIPLY: usize = 0x2000;
    const MODPOW: usize = 0x3000;

    fn code_registry() -> Registry {
        let mut registry = Registry::new();
        let exec = Role::CodeSquare.resting_protection();
        registry
            .register(SQUARE, Role::CodeSquare, exec)
            .expect("square");
        registry
            .register(MULTIPLY, Role::CodeMultiply, exec)
            .expect("multiply");
        registry
            .register(MODPOW, Role::CodeModpow, Protection::NONE)
            .expect("modpow");
        registry
    }

    fn fault(policy: &mut SingleStep, registry: &Registry, addr: usize) -> PermissionDecision {
        let page = *registry.lookup(addr).expect("lookup");
        policy.decide(&page, registry).expect("decide")
    }

    #[test]
    fn test_transition_table() {
        let some = Some(PageAddr::containing(SQUARE));
        assert_eq!(
            StepAction::transition(Role::CodeModpow, None),
            StepAction::RevokeSquareAndMultiply
        );
        assert_eq!(
            StepAction::transition(Role::CodeModpow, some),
            StepAction::RevokePrevious
        );
        assert_eq!(
            StepAction::transition(Role::CodeSquare, some),
            StepAction::RevokePrevious
        );
        assert_eq!(
            StepAction::transition(Role::CodeMultiply, None),
            StepAction::RevokePrevious
        );
    }

    #[test]
    fn test_first_modpow_fault_closes_square_and_multiply() {
        let registry = code_registry();
        let mut policy = SingleStep::new();
        policy.prepare(&registry).expect("prepare");
        let decision = fault(&mut policy, &registry, MODPOW + 0x40);
        assert_eq!(
            decision.revoked().collect::<Vec<_>>(),
            vec![PageAddr::containing(SQUARE), PageAddr::containing(MULTIPLY)]
        );
        assert_eq!(decision.revoked_to, Protection::NONE);
        assert_eq!(decision.grant, PageAddr::containing(MODPOW));
        assert_eq!(decision.granted, Protection::EXEC);
    }

    #[test]
    fn test_later_faults_close_previous_page() {
        let registry = code_registry();
        let mut policy = SingleStep::new();
        policy.prepare(&registry).expect("prepare");
        fault(&mut policy, &registry, MODPOW);
        let decision = fault(&mut policy, &registry, SQUARE);
        assert_eq!(
            decision.revoked().collect::<Vec<_>>(),
            vec![PageAddr::containing(MODPOW)]
        );
        let decision = fault(&mut policy, &registry, MODPOW);
        assert_eq!(
            decision.revoked().collect::<Vec<_>>(),
            vec![PageAddr::containing(SQUARE)]
        );
        assert_eq!(
            policy.state(),
            StepState {
                cursor: 3,
                previous: Some(PageAddr::containing(MODPOW))
            }
        );
    }

    #[test]
    fn test_prepare_requires_all_code_roles() {
        let mut registry = Registry::new();
        registry
            .register(MODPOW, Role::CodeModpow, Protection::NONE)
            .expect("modpow");
        assert!(matches!(
            SingleStep::new().prepare(&registry),
            Err(OracleError::MissingRole(Role::CodeSquare))
        ));
    }

    #[test]
    fn test_grant_on_fault_adds_bits() {
        let mut registry = Registry::new();
        let page = registry
            .register(0x5000, Role::Data, Protection::READ)
            .expect("register");
        let decision = GrantOnFault::write()
            .decide(&page, &registry)
            .expect("decide");
        assert_eq!(decision.granted, Protection::READ | Protection::WRITE);
        assert_eq!(decision.revoked().count(), 0);
    }
}
