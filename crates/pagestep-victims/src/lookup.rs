use pagestep_core::util::PAGE_SIZE;
use pagestep_core::{AddressSpace, Enclave, VictimCall, VictimError, VictimValue};

/// Reads one slot of a strided array, selected by the secret.
///
/// The array is mapped by the victim and shared with the attacker, who
/// flushes and reloads its slots.
pub struct SecretLookupVictim<'p, P: AddressSpace + ?Sized> {
    space: &'p P,
    array: usize,
    slots: usize,
    slot_size: usize,
    secret: usize,
}

impl<'p, P: AddressSpace + ?Sized> SecretLookupVictim<'p, P> {
    /// Maps an array of `slots` entries spaced `slot_size` bytes apart and
    /// writes every page once so all of them are backed.
    ///
    /// # Errors
    ///
    /// [`VictimError::InvalidInput`] if the geometry is empty or `secret` is
    /// not a valid slot.
    pub fn new(
        space: &'p P,
        slots: usize,
        slot_size: usize,
        secret: usize,
    ) -> Result<Self, VictimError> {
        if slots == 0 || slot_size == 0 {
            return Err(VictimError::InvalidInput(format!(
                "empty array geometry {}x{}",
                slots, slot_size
            )));
        }
        let len = slots * slot_size;
        let array = space.map_data(len.div_ceil(PAGE_SIZE))?.as_usize();
        for offset in (0..len).step_by(PAGE_SIZE) {
            space.store(array + offset, 0)?;
        }
        let mut victim = Self {
            space,
            array,
            slots,
            slot_size,
            secret: 0,
        };
        victim.set_secret(secret)?;
        Ok(victim)
    }

    /// Address of every slot, in order.
    pub fn slot_addresses(&self) -> Vec<usize> {
        (0..self.slots)
            .map(|i| self.array + i * self.slot_size)
            .collect()
    }

    fn set_secret(&mut self, secret: usize) -> Result<(), VictimError> {
        if secret >= self.slots {
            return Err(VictimError::InvalidInput(format!(
                "secret {} is not one of {} slots",
                secret, self.slots
            )));
        }
        self.secret = secret;
        Ok(())
    }
}

impl<P: AddressSpace + ?Sized> Enclave for SecretLookupVictim<'_, P> {
    fn name(&self) -> &str {
        "secret-lookup"
    }

    fn call(&mut self, call: VictimCall) -> Result<VictimValue, VictimError> {
        match call {
            VictimCall::Lookup => {
                let value = self.space.load(self.array + self.secret * self.slot_size)?;
                Ok(VictimValue::Number(value.into()))
            }
            VictimCall::SetSecret(secret) => {
                self.set_secret(usize::try_from(secret).unwrap_or(usize::MAX))?;
                Ok(VictimValue::Unit)
            }
            other => Err(VictimError::Unsupported(other.name())),
        }
    }
}
