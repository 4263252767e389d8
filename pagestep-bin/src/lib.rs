//! # pagestep
//!
//! Command line front end for the pagestep controlled-channel experiments.
//!
//! ## Quickstart guide
//!
//! ```sh
//! cargo build --release
//! # single-step the toy RSA decryption and recover its private exponent
//! target/release/pagestep rsa
//! # same, on the simulated backend
//! target/release/pagestep --backend sim rsa
//! ```
//!
//! Every experiment writes its outcome as JSON when `--output` is given.
//! Use `target/release/pagestep --help` to see available options.
//!
//! ## Experiments
//!
//! - `inc-secret`: boolean-access probe on a counter page
//! - `secstr`: adjacent-page probe on a string crossing a page boundary
//! - `rsa`: page-granular single-stepping of square-and-multiply
//! - `flush-reload`: cache-timing baseline on a secret-indexed lookup

#[macro_use]
extern crate log;

use indicatif::MultiProgress;
use indicatif_log_bridge::LogWrapper;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};

/// Sets up `env_logger` (default level `info`) behind a [`MultiProgress`],
/// so log lines do not tear progress bars.
pub fn init_logging_with_progress() -> anyhow::Result<MultiProgress> {
    let logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).build();
    let progress = MultiProgress::new();
    LogWrapper::new(progress.clone(), logger).try_init()?;
    Ok(progress)
}

/// Writes `results` as pretty-printed JSON to `filename`.
pub fn save_to_file<T: Serialize + ?Sized>(results: &T, filename: &str) -> anyhow::Result<()> {
    let file = File::create(filename)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, results)?;
    writer.flush()?;
    info!("Results saved to {}", filename);
    Ok(())
}
