//! Toy victims for controlled-channel experiments.
//!
//! Each victim performs a secret-dependent computation and touches memory
//! only through an [`AddressSpace`](pagestep_core::AddressSpace), so it runs
//! unchanged on the native and the simulated backend.
//!
//! Implements the [`pagestep_core::Enclave`] trait.
//!
//! | Victim | Leak | Experiment |
//! |---|---|---|
//! | [`IncSecretVictim`] | a store (or load) happens iff the secret is set | boolean access |
//! | [`SecretStringVictim`] | `strlen` reads past the page iff the string is non-empty | adjacent page |
//! | [`RsaVictim`] | square-and-multiply control flow | single stepping |
//! | [`SecretLookupVictim`] | the secret selects the touched slot | flush+reload |

#![warn(missing_docs)]

mod inc_secret;
mod lookup;
mod rsa;
mod secstr;

pub use inc_secret::IncSecretVictim;
pub use lookup::SecretLookupVictim;
pub use rsa::{RSA_TEST_VAL, RsaKey, RsaVictim, TOY_KEY};
pub use secstr::{SecretStringVictim, TEST_STRING};
