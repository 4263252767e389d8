use log::debug;
use pagestep_core::util::PAGE_SIZE;
use pagestep_core::{AddressSpace, Enclave, VictimCall, VictimError, VictimValue};

/// String lowercased once unprotected to show the victim works.
pub const TEST_STRING: &str = "DeaDBEeF";

/// Lowercases a NUL-terminated string in place.
///
/// The string starts on the last byte of its first page. Its length is the
/// secret: a non-empty string makes `strlen` read the first byte of the
/// following page, an empty one does not.
pub struct SecretStringVictim<'p, P: AddressSpace + ?Sized> {
    space: &'p P,
    string: usize,
    capacity: usize,
}

impl<'p, P: AddressSpace + ?Sized> SecretStringVictim<'p, P> {
    /// Maps two pages and places an empty string at the end of the first.
    pub fn new(space: &'p P) -> Result<Self, VictimError> {
        let base = space.map_data(2)?.as_usize();
        let string = base + PAGE_SIZE - 1;
        space.store(string, 0)?;
        Ok(Self {
            space,
            string,
            // room up to the end of the second page, minus the terminator
            capacity: PAGE_SIZE,
        })
    }

    /// Address of the first character.
    pub fn string_addr(&self) -> usize {
        self.string
    }

    /// First address of the page after the string's first byte.
    pub fn neighbor_addr(&self) -> usize {
        self.string + 1
    }

    /// Replaces the string with `s`.
    pub fn write_string(&self, s: &str) -> Result<(), VictimError> {
        if s.len() > self.capacity || s.bytes().any(|b| b == 0) {
            return Err(VictimError::InvalidInput(format!(
                "string of {} bytes does not fit",
                s.len()
            )));
        }
        for (i, byte) in s.bytes().chain(std::iter::once(0)).enumerate() {
            self.space.store(self.string + i, byte)?;
        }
        Ok(())
    }

    fn strlen(&self) -> Result<usize, VictimError> {
        let mut len = 0;
        while self.space.load(self.string + len)? != 0 {
            len += 1;
        }
        Ok(len)
    }

    fn to_lowercase(&self) -> Result<String, VictimError> {
        let len = self.strlen()?;
        let mut out = Vec::with_capacity(len);
        for i in 0..len {
            let lower = self.space.load(self.string + i)?.to_ascii_lowercase();
            self.space.store(self.string + i, lower)?;
            out.push(lower);
        }
        debug!("Lowercased {} bytes", len);
        Ok(String::from_utf8_lossy(&out).into_owned())
    }
}

impl<P: AddressSpace + ?Sized> Enclave for SecretStringVictim<'_, P> {
    fn name(&self) -> &str {
        "secstr"
    }

    fn call(&mut self, call: VictimCall) -> Result<VictimValue, VictimError> {
        match call {
            VictimCall::Transform => self.to_lowercase().map(VictimValue::Text),
            VictimCall::SetSecret(len) => {
                let len = usize::try_from(len).unwrap_or(usize::MAX);
                if len > self.capacity {
                    return Err(VictimError::InvalidInput(format!(
                        "secret length {} exceeds {}",
                        len, self.capacity
                    )));
                }
                self.write_string(&"S".repeat(len))?;
                Ok(VictimValue::Unit)
            }
            other => Err(VictimError::Unsupported(other.name())),
        }
    }
}
