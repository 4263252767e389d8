use pagestep_core::{AddressSpace, Enclave, VictimCall, VictimError, VictimValue};

/// Increments a counter on its own data page depending on a secret bit.
///
/// * `increment`: loads and stores the counter iff the secret is set
/// * `increment_or_read`: loads and stores if set, otherwise only loads
///
/// The first leaks through any access to the page, the second only through
/// the store.
pub struct IncSecretVictim<'p, P: AddressSpace + ?Sized> {
    space: &'p P,
    counter: usize,
}

impl<'p, P: AddressSpace + ?Sized> IncSecretVictim<'p, P> {
    /// Maps the counter page.
    pub fn new(space: &'p P) -> Result<Self, VictimError> {
        let counter = space.map_data(1)?.as_usize();
        Ok(Self { space, counter })
    }

    /// Address of the counter.
    pub fn counter_addr(&self) -> usize {
        self.counter
    }

    fn increment(&self) -> Result<u64, VictimError> {
        let value = self.space.load(self.counter)?.wrapping_add(1);
        self.space.store(self.counter, value)?;
        Ok(value.into())
    }
}

impl<P: AddressSpace + ?Sized> Enclave for IncSecretVictim<'_, P> {
    fn name(&self) -> &str {
        "inc-secret"
    }

    fn call(&mut self, call: VictimCall) -> Result<VictimValue, VictimError> {
        match call {
            VictimCall::Increment { secret } => {
                if secret {
                    self.increment().map(VictimValue::Number)
                } else {
                    Ok(VictimValue::Unit)
                }
            }
            VictimCall::IncrementOrRead { secret } => {
                let value = if secret {
                    self.increment()?
                } else {
                    self.space.load(self.counter)?.into()
                };
                Ok(VictimValue::Number(value))
            }
            other => Err(VictimError::Unsupported(other.name())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagestep_core::{Protection, boolean_access};
    use pagestep_sim::SimPlatform;

    #[test]
    fn test_counter_semantics() -> anyhow::Result<()> {
        let sim = SimPlatform::new();
        let mut victim = IncSecretVictim::new(&sim)?;
        assert_eq!(
            victim.call(VictimCall::Increment { secret: false })?,
            VictimValue::Unit
        );
        assert_eq!(
            victim.call(VictimCall::Increment { secret: true })?,
            VictimValue::Number(1)
        );
        assert_eq!(
            victim.call(VictimCall::IncrementOrRead { secret: false })?,
            VictimValue::Number(1)
        );
        assert_eq!(
            victim.call(VictimCall::IncrementOrRead { secret: true })?,
            VictimValue::Number(2)
        );
        Ok(())
    }

    #[test]
    fn test_any_access_leaks_through_revoked_page() -> anyhow::Result<()> {
        let sim = SimPlatform::new();
        let mut victim = IncSecretVictim::new(&sim)?;
        let counter = victim.counter_addr();
        for secret in [true, false] {
            let call = VictimCall::Increment { secret };
            let outcome = boolean_access(&sim, &mut victim, counter, Protection::NONE, call)?;
            assert_eq!(outcome.bit, secret);
            assert_eq!(outcome.faults, secret as usize);
        }
        Ok(())
    }

    #[test]
    fn test_store_leaks_through_read_only_page() -> anyhow::Result<()> {
        let sim = SimPlatform::new();
        let mut victim = IncSecretVictim::new(&sim)?;
        let counter = victim.counter_addr();
        for secret in [true, false] {
            let call = VictimCall::IncrementOrRead { secret };
            let outcome = boolean_access(&sim, &mut victim, counter, Protection::READ, call)?;
            assert_eq!(outcome.bit, secret);
        }
        // a revoked page cannot tell the two apart
        let call = VictimCall::IncrementOrRead { secret: false };
        let outcome = boolean_access(&sim, &mut victim, counter, Protection::NONE, call)?;
        assert!(outcome.bit);
        Ok(())
    }
}
