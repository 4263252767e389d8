use log::{debug, info};
use pagestep_core::util::EXPONENT_BITS;
use pagestep_core::{AddressSpace, CodePages, Enclave, VictimCall, VictimError, VictimValue};
use rand::Rng;
use serde::Serialize;

/// Plaintext used for the unprotected warm-up round trip.
pub const RSA_TEST_VAL: u64 = 1234;

/// A textbook RSA key pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct RsaKey {
    /// Modulus
    pub n: u64,
    /// Public exponent
    pub e: u64,
    /// Private exponent
    #[serde(skip_serializing)]
    pub d: u64,
}

/// 16-bit key with `n = 251 * 241`. Both exponents have their top bit set.
pub const TOY_KEY: RsaKey = RsaKey {
    n: 60491,
    e: 46499,
    d: 43499,
};

/// Square-and-multiply RSA whose three routines live on separate code pages.
///
/// Every call into `square` or `multiply` and every return to the `modpow`
/// loop is an instruction fetch on the corresponding page. Decryption is
/// blinded: a random `r` is raised to the public exponent first, so a
/// decryption trace starts with a full exponentiation by `e`.
pub struct RsaVictim<'p, P: AddressSpace + ?Sized> {
    space: &'p P,
    pages: CodePages,
    key: RsaKey,
}

impl<'p, P: AddressSpace + ?Sized> RsaVictim<'p, P> {
    /// Maps the three code pages and loads `key`.
    ///
    /// # Errors
    ///
    /// * [`VictimError::InvalidInput`] if an exponent does not fit
    ///   [`EXPONENT_BITS`] or the modulus does not fit 32 bits
    /// * Any error mapping the code pages
    pub fn new(space: &'p P, key: RsaKey) -> Result<Self, VictimError> {
        let limit = 1u64 << EXPONENT_BITS;
        if key.e >= limit || key.d >= limit || key.n >= 1 << 32 || key.n < 3 {
            return Err(VictimError::InvalidInput(format!(
                "key {:?} does not fit {} bit exponents",
                key, EXPONENT_BITS
            )));
        }
        let pages = CodePages {
            square: space.map_code()?,
            multiply: space.map_code()?,
            modpow: space.map_code()?,
        };
        info!(
            "square at {}; multiply at {}; modpow at {}",
            pages.square, pages.multiply, pages.modpow
        );
        Ok(Self { space, pages, key })
    }

    /// Pages of `square`, `multiply` and `modpow`.
    pub fn code_pages(&self) -> CodePages {
        self.pages
    }

    /// The loaded key.
    pub fn key(&self) -> RsaKey {
        self.key
    }

    /// Encrypts and decrypts `plain` once and returns the ciphertext.
    ///
    /// Run before arming an oracle so every page is mapped and the first
    /// traced call behaves like every later one.
    pub fn warm_up(&mut self, plain: u64) -> Result<u64, VictimError> {
        let cipher = self.encode(plain)?;
        let decoded = self.decode(cipher)?;
        info!(
            "Encrypted '{}' to '{}'; decrypted '{}'",
            plain, cipher, decoded
        );
        if decoded != plain {
            return Err(VictimError::InvalidInput(format!(
                "round trip of {} returned {}",
                plain, decoded
            )));
        }
        Ok(cipher)
    }

    fn square(&self, x: u64) -> Result<u64, VictimError> {
        self.space.fetch(self.pages.square)?;
        Ok(x * x % self.key.n)
    }

    fn multiply(&self, x: u64, y: u64) -> Result<u64, VictimError> {
        self.space.fetch(self.pages.multiply)?;
        Ok(x * y % self.key.n)
    }

    fn modpow(&self, base: u64, exponent: u64) -> Result<u64, VictimError> {
        self.space.fetch(self.pages.modpow)?;
        let mut result = 1;
        for bit in (0..EXPONENT_BITS).rev() {
            result = self.square(result)?;
            self.space.fetch(self.pages.modpow)?;
            if exponent >> bit & 1 == 1 {
                result = self.multiply(result, base)?;
                self.space.fetch(self.pages.modpow)?;
            }
        }
        Ok(result)
    }

    fn check_operand(&self, value: u64) -> Result<(), VictimError> {
        if value >= self.key.n {
            return Err(VictimError::InvalidInput(format!(
                "{} is not below the modulus {}",
                value, self.key.n
            )));
        }
        Ok(())
    }

    fn encode(&self, plain: u64) -> Result<u64, VictimError> {
        self.check_operand(plain)?;
        self.modpow(plain, self.key.e)
    }

    fn decode(&self, cipher: u64) -> Result<u64, VictimError> {
        self.check_operand(cipher)?;
        let n = self.key.n;
        let mut rng = rand::rng();
        let (r, r_inv) = loop {
            let r = rng.random_range(2..n);
            if let Some(inv) = mod_inverse(r, n) {
                break (r, inv);
            }
        };
        debug!("Blinding factor {}", r);
        let blinded = cipher * self.modpow(r, self.key.e)? % n;
        let unblinded = self.modpow(blinded, self.key.d)?;
        Ok(unblinded * r_inv % n)
    }
}

/// Inverse of `a` modulo `n`, if `gcd(a, n) == 1`.
fn mod_inverse(a: u64, n: u64) -> Option<u64> {
    let (mut t, mut new_t) = (0i64, 1i64);
    let (mut r, mut new_r) = (n as i64, (a % n) as i64);
    while new_r != 0 {
        let q = r / new_r;
        (t, new_t) = (new_t, t - q * new_t);
        (r, new_r) = (new_r, r - q * new_r);
    }
    (r == 1).then(|| t.rem_euclid(n as i64) as u64)
}

impl<P: AddressSpace + ?Sized> Enclave for RsaVictim<'_, P> {
    fn name(&self) -> &str {
        "rsa"
    }

    fn call(&mut self, call: VictimCall) -> Result<VictimValue, VictimError> {
        match call {
            VictimCall::Encode(plain) => self.encode(plain).map(VictimValue::Number),
            VictimCall::Decode(cipher) => self.decode(cipher).map(VictimValue::Number),
            other => Err(VictimError::Unsupported(other.name())),
        }
    }
}
