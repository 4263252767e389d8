//! The oracle aggregate.
//!
//! An [`Oracle`] owns the registry, the trace recorder and the fault policy of
//! exactly one run. During [`Oracle::observe`] it is lent to the platform as
//! the [`FaultHandler`]; nothing else can reach it while the victim runs.

use crate::config::OracleConfig;
use crate::controller::{FaultPolicy, PermissionDecision};
use crate::error::Result;
use crate::page::{Page, Protection, Role};
use crate::platform::{FaultHandler, FaultSource, ProtectionControl};
use crate::registry::Registry;
use crate::trace::{Trace, TraceRecorder};
use crate::victim::{Enclave, VictimCall, VictimValue};
use log::{debug, info, trace, warn};

/// Registry, trace recorder and policy of one run.
///
/// Pages registered with a protection other than their resting one are
/// restored when the oracle is finished or dropped.
///
/// # Example
///
/// ```no_run
/// # use pagestep_core::{Oracle, GrantOnFault, Protection, Role, ProtectionControl, FaultSource, Enclave, VictimCall};
/// # fn run<P: ProtectionControl + FaultSource>(platform: &P, victim: &mut impl Enclave, page: usize) -> pagestep_core::Result<()> {
/// let mut oracle = Oracle::new(platform, GrantOnFault::read_write(), 16);
/// oracle.register(page, Role::Data, Protection::NONE)?;
/// oracle.arm()?;
/// oracle.observe(platform, victim, VictimCall::Increment { secret: true })?;
/// let accessed = oracle.fault_count() == 1;
/// # Ok(())
/// # }
/// ```
pub struct Oracle<'p, P: ProtectionControl + ?Sized, F: FaultPolicy> {
    protector: &'p P,
    registry: Registry,
    recorder: TraceRecorder,
    policy: F,
    armed: bool,
}

impl<'p, P: ProtectionControl + ?Sized, F: FaultPolicy> Oracle<'p, P, F> {
    /// Creates an oracle recording at most `capacity` faults.
    pub fn new(protector: &'p P, policy: F, capacity: usize) -> Self {
        Self {
            protector,
            registry: Registry::new(),
            recorder: TraceRecorder::new(capacity),
            policy,
            armed: false,
        }
    }

    /// Creates an oracle with the trace capacity from `config`.
    pub fn with_config(protector: &'p P, policy: F, config: &OracleConfig) -> Self {
        Self::new(protector, policy, config.trace_capacity)
    }

    /// Registers the page containing `address`. See [`Registry::register`].
    pub fn register(&mut self, address: usize, role: Role, initial: Protection) -> Result<Page> {
        self.registry.register(address, role, initial)
    }

    /// Validates the configuration and applies the initial protections.
    ///
    /// Clears any trace left over from a previous call.
    ///
    /// # Errors
    ///
    /// * [`OracleError::MissingRole`](crate::OracleError::MissingRole) if the policy lacks a page
    /// * [`OracleError::PermissionChangeFailed`](crate::OracleError::PermissionChangeFailed) if a protection could not be applied
    pub fn arm(&mut self) -> Result<()> {
        self.policy.prepare(&self.registry)?;
        self.recorder.clear();
        self.armed = true;
        self.registry.apply_all(self.protector)?;
        info!(
            "Armed {} pages (trace capacity {})",
            self.registry.len(),
            self.recorder.capacity()
        );
        Ok(())
    }

    /// Calls the victim with this oracle installed as the fault handler.
    ///
    /// # Errors
    ///
    /// * Any fatal error raised by the handler during the call
    /// * [`OracleError::VictimCallFailed`](crate::OracleError::VictimCallFailed) if the victim failed
    pub fn observe<S, E>(
        &mut self,
        source: &S,
        enclave: &mut E,
        call: VictimCall,
    ) -> Result<VictimValue>
    where
        S: FaultSource,
        E: Enclave + ?Sized,
    {
        debug!("Calling {} on {}", call.name(), enclave.name());
        let value = source.deliver_to(&mut *self, || enclave.call(call))??;
        info!(
            "{} returned {} after {} faults",
            call.name(),
            value,
            self.fault_count()
        );
        Ok(value)
    }

    /// Number of faults handled so far.
    pub fn fault_count(&self) -> usize {
        self.recorder.len()
    }

    /// Copy of the trace recorded so far.
    pub fn trace(&self) -> Trace {
        self.recorder.snapshot()
    }

    /// The page registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The fault policy.
    pub fn policy(&self) -> &F {
        &self.policy
    }

    /// Restores every page to its resting protection.
    pub fn restore(&mut self) -> Result<()> {
        if !self.armed {
            return Ok(());
        }
        self.armed = false;
        self.registry.restore_all(self.protector)
    }

    /// Restores all pages and returns the trace.
    pub fn finish(mut self) -> Result<Trace> {
        self.restore()?;
        Ok(self.recorder.snapshot())
    }
}

impl<P: ProtectionControl + ?Sized, F: FaultPolicy> FaultHandler for Oracle<'_, P, F> {
    fn on_fault(&mut self, address: usize) -> Result<PermissionDecision> {
        let page = *self
            .registry
            .lookup(address)
            .map_err(|e| e.with_trace_len(self.recorder.len()))?;
        let event = self.recorder.record(address, page.role)?;
        trace!(
            "Fault #{} at 0x{:x} on {} page {}",
            event.index, address, page.role, page.base
        );
        let decision = self.policy.decide(&page, &self.registry)?;
        for revoked in decision.revoked() {
            self.registry
                .set_permission(self.protector, revoked.as_usize(), decision.revoked_to)?;
        }
        self.registry
            .set_permission(self.protector, decision.grant.as_usize(), decision.granted)?;
        Ok(decision)
    }

    fn release(&mut self) -> Result<()> {
        self.restore()
    }
}

impl<P: ProtectionControl + ?Sized, F: FaultPolicy> Drop for Oracle<'_, P, F> {
    fn drop(&mut self) {
        if let Err(e) = self.restore() {
            warn!("Failed to restore page protections: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{GrantOnFault, SingleStep};
    use crate::page::PageAddr;
    use crate::platform::mock::RecordingProtector;
    use crate::OracleError;

    const DATA: usize = 0x4000;

    #[test]
    fn test_unknown_page_carries_trace_len() {
        let protector = RecordingProtector::default();
        let mut oracle = Oracle::new(&protector, GrantOnFault::read_write(), 8);
        oracle
            .register(DATA, Role::Data, Protection::NONE)
            .expect("register");
        oracle.arm().expect("arm");
        oracle.on_fault(DATA + 1).expect("known page");
        assert!(matches!(
            oracle.on_fault(0xdead_0000),
            Err(OracleError::UnknownPage {
                address: 0xdead_0000,
                trace_len: 1
            })
        ));
        assert_eq!(oracle.fault_count(), 1);
    }

    #[test]
    fn test_fault_applies_decision() {
        let protector = RecordingProtector::default();
        let mut oracle = Oracle::new(&protector, GrantOnFault::read_write(), 8);
        oracle
            .register(DATA, Role::Data, Protection::NONE)
            .expect("register");
        oracle.arm().expect("arm");
        let decision = oracle.on_fault(DATA + 0x10).expect("fault");
        assert_eq!(decision.granted, Protection::READ | Protection::WRITE);
        assert_eq!(
            oracle.registry().lookup(DATA).expect("lookup").protection,
            Protection::READ | Protection::WRITE
        );
        let trace = oracle.finish().expect("finish");
        assert_eq!(trace.len(), 1);
        assert_eq!(trace.events()[0].address, DATA + 0x10);
        let base = PageAddr::containing(DATA);
        // arm, grant, restore
        assert_eq!(
            protector.calls.borrow().as_slice(),
            &[
                (base, Protection::NONE),
                (base, Protection::READ | Protection::WRITE),
                (base, Protection::READ | Protection::WRITE),
            ]
        );
    }

    #[test]
    fn test_single_step_faults_equal_decisions() {
        let protector = RecordingProtector::default();
        let mut oracle = Oracle::new(&protector, SingleStep::new(), 8);
        let exec = Role::CodeSquare.resting_protection();
        oracle
            .register(0x1000, Role::CodeSquare, exec)
            .expect("square");
        oracle
            .register(0x2000, Role::CodeMultiply, exec)
            .expect("multiply");
        oracle
            .register(0x3000, Role::CodeModpow, Protection::NONE)
            .expect("modpow");
        oracle.arm().expect("arm");
        for addr in [0x3000, 0x1000, 0x3000, 0x2000, 0x3000] {
            oracle.on_fault(addr).expect("fault");
        }
        assert_eq!(oracle.fault_count(), 5);
        assert_eq!(oracle.policy().state().cursor, 5);
        assert_eq!(oracle.trace().pattern(), "P S P M P");
        let registry = oracle.registry();
        assert_eq!(
            registry.lookup(0x3000).expect("modpow").protection,
            Protection::EXEC
        );
        assert_eq!(
            registry.lookup(0x2000).expect("multiply").protection,
            Protection::NONE
        );
    }

    #[test]
    fn test_overflow_aborts() {
        let protector = RecordingProtector::default();
        let mut oracle = Oracle::new(&protector, GrantOnFault::read_write(), 1);
        oracle
            .register(DATA, Role::Data, Protection::NONE)
            .expect("register");
        oracle.arm().expect("arm");
        oracle.on_fault(DATA).expect("first");
        assert!(matches!(
            oracle.on_fault(DATA),
            Err(OracleError::TraceOverflow { capacity: 1, .. })
        ));
    }

    #[test]
    fn test_release_restores_once() {
        let protector = RecordingProtector::default();
        let mut oracle = Oracle::new(&protector, GrantOnFault::write(), 1);
        oracle
            .register(DATA, Role::Data, Protection::NONE)
            .expect("register");
        oracle.arm().expect("arm");
        oracle.on_fault(DATA).expect("first");
        assert!(oracle.on_fault(DATA).is_err());
        oracle.release().expect("release");
        let base = PageAddr::containing(DATA);
        assert_eq!(
            protector.calls.borrow().last().copied(),
            Some((base, Protection::READ | Protection::WRITE))
        );
        let calls = protector.calls.borrow().len();
        let trace = oracle.finish().expect("finish");
        assert_eq!(trace.len(), 1);
        assert_eq!(protector.calls.borrow().len(), calls);
    }

    #[test]
    fn test_drop_restores() {
        let protector = RecordingProtector::default();
        {
            let mut oracle = Oracle::new(&protector, GrantOnFault::write(), 4);
            oracle
                .register(DATA, Role::Data, Protection::NONE)
                .expect("register");
            oracle.arm().expect("arm");
        }
        assert_eq!(
            protector.calls.borrow().last().copied(),
            Some((
                PageAddr::containing(DATA),
                Protection::READ | Protection::WRITE
            ))
        );
    }
}
