//! Node configuration file

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tss_core::{OrchestratorConfig, PartyDirectory, PartyIdentifier};

/// Cluster description shared by every node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// `threshold + 1` parties are needed to sign
    pub threshold: usize,

    /// Party ids that sign; all parties when absent
    #[serde(default)]
    pub signers: Option<Vec<String>>,

    pub parties: Vec<PartyIdentifier>,

    #[serde(default)]
    pub readiness_retry_ms: Option<u64>,

    #[serde(default)]
    pub phase_timeout_ms: Option<u64>,
}

impl Default for NodeConfig {
    /// Four local parties on ports 50051..50054, threshold 2, all signing
    fn default() -> Self {
        let parties = (1..=4)
            .map(|i| {
                PartyIdentifier::new(&format!("p{i}"), &format!("tss{i}"), &i.to_string())
                    .with_address(&format!("127.0.0.1:{}", 50050 + i))
            })
            .collect();

        Self {
            threshold: 2,
            signers: None,
            parties,
            readiness_retry_ms: None,
            phase_timeout_ms: None,
        }
    }
}

impl NodeConfig {
    /// Read a JSON config file, or fall back to the default cluster
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&json).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn directory(&self) -> tss_core::Result<PartyDirectory> {
        PartyDirectory::build(self.parties.clone())
    }

    pub fn orchestrator(&self) -> OrchestratorConfig {
        let mut config = OrchestratorConfig::new(self.threshold);
        if let Some(signers) = &self.signers {
            config = config.with_signers(signers.iter().cloned());
        }
        if let Some(ms) = self.readiness_retry_ms {
            config = config.with_readiness_retry(Duration::from_millis(ms));
        }
        if let Some(ms) = self.phase_timeout_ms {
            config = config.with_phase_timeout(Duration::from_millis(ms));
        }
        config
    }
}
