//! Bit Decoder for square-and-multiply traces.
//!
//! Binary exponentiation squares once per exponent bit and multiplies only
//! for set bits. Single-stepping the three code pages therefore yields, per
//! bit, `S P` for a 0 and `S P M P` for a 1, with `P` (the `modpow` loop)
//! interleaved wherever control returns to the loop.
//!
//! The decoder scans the role sequence with a cursor:
//!
//! * `S` at `i` and `M` at `i + 2`: bit 1, advance by 4
//! * `S` at `i`: bit 0, advance by 2
//! * anything else: advance by 1
//!
//! The lookahead assumes exactly one entry between a square and its multiply.
//! A victim that returns to the loop more or less often between the two is
//! misread.
//!
//! Blinded decryption runs one exponentiation with the public exponent before
//! the one with the secret exponent, so the scan runs twice: once to skip the
//! blinding prefix, once to extract the secret.

use crate::error::{OracleError, Result};
use crate::page::Role;
use serde::Serialize;
use std::fmt::{Display, Formatter};

/// A fixed-width value reconstructed MSB-first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct SecretBits {
    value: u64,
    width: u32,
}

impl SecretBits {
    /// The recovered value.
    pub fn value(&self) -> u64 {
        self.value
    }

    /// Number of bits recovered.
    pub fn width(&self) -> u32 {
        self.width
    }
}

impl Display for SecretBits {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (0b{:0width$b})",
            self.value,
            self.value,
            width = self.width as usize
        )
    }
}

/// Two-phase square-and-multiply pattern decoder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SquareMultiplyDecoder {
    width: u32,
    blinding_width: u32,
}

impl SquareMultiplyDecoder {
    /// Creates a decoder extracting `width` bits after skipping
    /// `blinding_width` bits.
    ///
    /// # Errors
    ///
    /// [`OracleError::InvalidWidth`] unless `width` is in `1..=64` and
    /// `blinding_width` in `0..=64`.
    pub fn new(width: u32, blinding_width: u32) -> Result<Self> {
        if width == 0 || width > u64::BITS {
            return Err(OracleError::InvalidWidth(width));
        }
        if blinding_width > u64::BITS {
            return Err(OracleError::InvalidWidth(blinding_width));
        }
        Ok(Self {
            width,
            blinding_width,
        })
    }

    /// Width of the secret.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Width of the skipped blinding prefix.
    pub fn blinding_width(&self) -> u32 {
        self.blinding_width
    }

    /// Decodes the secret from a role sequence.
    ///
    /// # Errors
    ///
    /// [`OracleError::TraceExhausted`] if the trace ends before either phase
    /// produced all of its bits.
    pub fn decode(&self, roles: &[Role]) -> Result<SecretBits> {
        let (_, cursor) = scan(roles, 0, self.blinding_width)?;
        let (value, _) = scan(roles, cursor, self.width)?;
        Ok(SecretBits {
            value,
            width: self.width,
        })
    }
}

/// Reads `width` bits starting at `cursor`; returns the value and the cursor
/// after the last bit.
fn scan(roles: &[Role], mut cursor: usize, width: u32) -> Result<(u64, usize)> {
    let mut value = 0u64;
    let mut decoded = 0;
    while decoded < width {
        let Some(&role) = roles.get(cursor) else {
            return Err(OracleError::TraceExhausted {
                cursor,
                trace_len: roles.len(),
                decoded,
                width,
            });
        };
        if role != Role::CodeSquare {
            cursor += 1;
            continue;
        }
        let bit = roles.get(cursor + 2) == Some(&Role::CodeMultiply);
        value = (value << 1) | u64::from(bit);
        decoded += 1;
        cursor += if bit { 4 } else { 2 };
    }
    Ok((value, cursor))
}
