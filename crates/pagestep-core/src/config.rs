use crate::decoder::SquareMultiplyDecoder;
use crate::util::{DEFAULT_TRACE_CAPACITY, EXPONENT_BITS};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

/// Per-run parameters of the oracle.
///
/// Missing fields in a JSON file fall back to [`OracleConfig::default`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// Maximum number of faults recorded in one run
    pub trace_capacity: usize,
    /// Bits of the secret exponent
    pub secret_width: u32,
    /// Bits of the public exponent used for blinding, skipped by the decoder
    pub blinding_width: u32,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            trace_capacity: DEFAULT_TRACE_CAPACITY,
            secret_width: EXPONENT_BITS,
            blinding_width: EXPONENT_BITS,
        }
    }
}

#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum Error {
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error(transparent)]
    JsonError(#[from] serde_json::Error),
}

/// Result type of configuration loading.
pub type Result<T> = std::result::Result<T, Error>;

impl OracleConfig {
    /// Loads a configuration from a JSON file.
    pub fn from_jsonfile(filepath: &str) -> Result<OracleConfig> {
        let mut file = File::open(Path::new(filepath))?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        let config: OracleConfig = serde_json::from_str(&contents)?;
        Ok(config)
    }

    /// Builds the bit decoder for these widths.
    pub fn decoder(&self) -> crate::Result<SquareMultiplyDecoder> {
        SquareMultiplyDecoder::new(self.secret_width, self.blinding_width)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shipped_config() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../config/oracle.json");
        let config = OracleConfig::from_jsonfile(path).expect("failed to read config file");
        assert_eq!(config, OracleConfig::default());
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let config: OracleConfig =
            serde_json::from_str(r#"{ "secret_width": 8 }"#).expect("parse");
        assert_eq!(config.secret_width, 8);
        assert_eq!(config.blinding_width, EXPONENT_BITS);
        assert_eq!(config.trace_capacity, DEFAULT_TRACE_CAPACITY);
        assert_eq!(config.decoder().expect("decoder").width(), 8);
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            OracleConfig::from_jsonfile("does/not/exist.json"),
            Err(Error::IoError(_))
        ));
    }
}
