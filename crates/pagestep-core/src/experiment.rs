//! Ready-made experiments for the three controller variants.
//!
//! Each experiment builds a fresh [`Oracle`], registers its pages, runs one
//! victim call and restores all pages before returning, whatever the outcome.
//! The results are serializable and can be wrapped in an
//! [`ExperimentReport`] for JSON output.

use crate::config::OracleConfig;
use crate::controller::GrantOnFault;
use crate::controller::SingleStep;
use crate::decoder::SecretBits;
use crate::error::Result;
use crate::oracle::Oracle;
use crate::page::{PageAddr, Protection, Role};
use crate::platform::{AddressSpace, Platform};
use crate::trace::Trace;
use crate::util::DEFAULT_TRACE_CAPACITY;
use crate::victim::{Enclave, VictimCall, VictimValue};
use log::{info, warn};
use serde::Serialize;

/// Fault count that signals "the page was accessed".
pub const EXPECTED_FAULTS: usize = 1;

/// Outcome of a boolean-access or adjacent-page probe.
#[derive(Clone, Debug, Serialize)]
pub struct ProbeOutcome {
    /// The probed page
    pub page: PageAddr,
    /// Number of faults taken during the call
    pub faults: usize,
    /// Whether the fault count matched [`EXPECTED_FAULTS`]
    pub bit: bool,
    /// Value returned by the victim
    pub value: VictimValue,
    /// The recorded faults
    pub trace: Trace,
}

/// Outcome of a single-stepped exponentiation.
#[derive(Clone, Debug, Serialize)]
pub struct StepOutcome {
    /// Value returned by the victim
    pub value: VictimValue,
    /// The recorded control-flow trace
    pub trace: Trace,
    /// Role-tag rendering of the trace
    pub pattern: String,
    /// The recovered secret exponent
    pub secret: SecretBits,
}

/// Code pages of the exponentiation routines.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct CodePages {
    /// Page of `square`
    pub square: PageAddr,
    /// Page of `multiply`
    pub multiply: PageAddr,
    /// Page of the `modpow` loop
    pub modpow: PageAddr,
}

/// Result of an experiment, stamped with the time it ran.
#[derive(Serialize)]
pub struct ExperimentReport<T> {
    /// RFC 3339 timestamp of when the experiment ran
    date: String,
    /// Experiment name
    experiment: String,
    /// The outcome
    result: std::result::Result<T, crate::OracleError>,
}

impl<T> ExperimentReport<T> {
    /// Stamps `result` with the current local time.
    pub fn new(experiment: &str, result: std::result::Result<T, crate::OracleError>) -> Self {
        Self {
            date: chrono::Local::now().to_rfc3339(),
            experiment: experiment.to_string(),
            result,
        }
    }

    /// The outcome.
    pub fn result(&self) -> &std::result::Result<T, crate::OracleError> {
        &self.result
    }
}

/// Forces the page containing `address` to be backed by reading a byte and
/// writing it back.
pub fn force_map<P: AddressSpace + ?Sized>(platform: &P, address: usize) -> Result<()> {
    let byte = platform.load(address)?;
    platform.store(address, byte)?;
    Ok(())
}

fn probe<P, E>(
    platform: &P,
    enclave: &mut E,
    address: usize,
    initial: Protection,
    policy: GrantOnFault,
    call: VictimCall,
) -> Result<ProbeOutcome>
where
    P: Platform,
    E: Enclave + ?Sized,
{
    force_map(platform, address)?;
    let mut oracle = Oracle::new(platform, policy, DEFAULT_TRACE_CAPACITY);
    let page = oracle.register(address, Role::Data, initial)?.base;
    oracle.arm()?;
    let value = oracle.observe(platform, enclave, call)?;
    let faults = oracle.fault_count();
    let trace = oracle.finish()?;
    if faults > EXPECTED_FAULTS {
        warn!("{} faults on {}, expected at most {}", faults, page, EXPECTED_FAULTS);
    }
    Ok(ProbeOutcome {
        page,
        faults,
        bit: faults == EXPECTED_FAULTS,
        value,
        trace,
    })
}

/// Boolean-access probe.
///
/// The data page containing `address` is force-mapped, set to `initial`
/// (`NONE` to detect any access, `READ` to detect stores only) and opened
/// for reads and writes on the first fault. One fault means the victim
/// touched the page.
pub fn boolean_access<P, E>(
    platform: &P,
    enclave: &mut E,
    address: usize,
    initial: Protection,
    call: VictimCall,
) -> Result<ProbeOutcome>
where
    P: Platform,
    E: Enclave + ?Sized,
{
    let outcome = probe(
        platform,
        enclave,
        address,
        initial,
        GrantOnFault::read_write(),
        call,
    )?;
    info!(
        "Boolean access on {}: {} faults, secret = {}",
        outcome.page, outcome.faults, outcome.bit as u8
    );
    Ok(outcome)
}

/// Adjacent-page probe.
///
/// `neighbor` is an address on the page right after a variable-length
/// buffer. The page is revoked entirely and opened for writing on first
/// touch; one fault means the buffer reached the page boundary.
pub fn adjacent_page<P, E>(
    platform: &P,
    enclave: &mut E,
    neighbor: usize,
    call: VictimCall,
) -> Result<ProbeOutcome>
where
    P: Platform,
    E: Enclave + ?Sized,
{
    let outcome = probe(
        platform,
        enclave,
        neighbor,
        Protection::NONE,
        GrantOnFault::write(),
        call,
    )?;
    info!(
        "Adjacent page {}: {} faults, secret = {}",
        outcome.page, outcome.faults, outcome.bit as u8
    );
    Ok(outcome)
}

/// Single-steps one exponentiation call and decodes the secret exponent.
///
/// `square` and `multiply` keep their executable protection until the first
/// fault in `modpow`, which starts revoked.
pub fn single_step<P, E>(
    platform: &P,
    enclave: &mut E,
    pages: CodePages,
    call: VictimCall,
    config: &OracleConfig,
) -> Result<StepOutcome>
where
    P: Platform,
    E: Enclave + ?Sized,
{
    let decoder = config.decoder()?;
    let mut oracle = Oracle::with_config(platform, SingleStep::new(), config);
    let exec = Role::CodeSquare.resting_protection();
    oracle.register(pages.square.as_usize(), Role::CodeSquare, exec)?;
    oracle.register(pages.multiply.as_usize(), Role::CodeMultiply, exec)?;
    oracle.register(pages.modpow.as_usize(), Role::CodeModpow, Protection::NONE)?;
    oracle.arm()?;
    let value = oracle.observe(platform, enclave, call)?;
    let trace = oracle.finish()?;
    let pattern = trace.pattern();
    info!("Access pattern: {}", pattern);
    let secret = decoder.decode(&trace.roles())?;
    info!("Recovered secret exponent {}", secret);
    Ok(StepOutcome {
        value,
        trace,
        pattern,
        secret,
    })
}
