//! Assembler configuration

use crate::constants::*;
use crate::error::{MultisigError, Result};
use crate::types::{Network, SighashType};
use serde::{Deserialize, Serialize};

/// Defaults applied to every transaction a builder assembles
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AssemblerConfig {
    pub version: i32,
    pub lock_time: u32,
    /// Sequence given to each new input
    pub sequence: u32,
    pub default_sighash: SighashType,
    /// Extraction fails above this fee rate (sat/vbyte)
    pub max_fee_rate: u64,
    pub network: Network,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            version: DEFAULT_TX_VERSION,
            lock_time: 0,
            sequence: SEQUENCE_FINAL,
            default_sighash: SighashType::All,
            max_fee_rate: DEFAULT_MAX_FEE_RATE,
            network: Network::Regtest,
        }
    }
}

impl AssemblerConfig {
    /// Parse a JSON document; absent fields keep their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: AssemblerConfig =
            serde_json::from_str(json).map_err(|e| MultisigError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=2).contains(&self.version) {
            return Err(MultisigError::Config(format!(
                "unsupported transaction version {}",
                self.version
            )));
        }
        if self.max_fee_rate == 0 {
            return Err(MultisigError::Config("max_fee_rate must be positive".to_string()));
        }
        Ok(())
    }
}
