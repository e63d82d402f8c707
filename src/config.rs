//! Run parameters for a simulated collection round.

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct RunConfig {
    /// Distinct values each grouping attribute takes.
    #[serde(alias = "NbrGroups")]
    pub group_count: u64,
    #[serde(alias = "NbrAggrAttributes")]
    pub aggregating_attr_count: usize,
    #[serde(alias = "NbrGroupAttributes")]
    pub group_attr_count: usize,
    #[serde(alias = "Proofs")]
    pub proofs_enabled: bool,
    #[serde(alias = "Rounds")]
    pub rounds: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            group_count: 4,
            aggregating_attr_count: 2,
            group_attr_count: 1,
            proofs_enabled: true,
            rounds: 1,
        }
    }
}

impl RunConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|err| ProtocolError::InvalidInput(format!("run config: {err}")))
    }

    /// Top-level keys only; unknown keys and tables are rejected.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text)
            .map_err(|err| ProtocolError::InvalidInput(format!("run config: {err}")))
    }
}
