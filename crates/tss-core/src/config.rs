//! Orchestrator configuration

use crate::directory::PartyDirectory;
use crate::types::PartyIdentity;
use crate::{Error, Result};
use std::time::Duration;

/// Delay between readiness checks while inbound messages wait for a phase
pub const DEFAULT_READINESS_RETRY: Duration = Duration::from_secs(1);

/// Settings shared by both phases of one party
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Polynomial degree; `threshold + 1` parties are needed to sign
    pub threshold: usize,

    /// Party ids allowed to sign. `None` means every directory party.
    pub signers: Option<Vec<String>>,

    /// How long an inbound message waits before each "not ready" log line
    pub readiness_retry: Duration,

    /// Upper bound on each phase, if any
    pub phase_timeout: Option<Duration>,
}

impl OrchestratorConfig {
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold,
            signers: None,
            readiness_retry: DEFAULT_READINESS_RETRY,
            phase_timeout: None,
        }
    }

    pub fn with_signers<I, S>(mut self, signers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.signers = Some(signers.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_readiness_retry(mut self, retry: Duration) -> Self {
        self.readiness_retry = retry;
        self
    }

    pub fn with_phase_timeout(mut self, timeout: Duration) -> Self {
        self.phase_timeout = Some(timeout);
        self
    }

    /// Number of parties needed to sign, `threshold + 1`
    pub fn quorum(&self) -> Result<usize> {
        quorum(self.threshold)
    }

    /// Check the configuration against a directory
    pub fn validate(&self, directory: &PartyDirectory) -> Result<()> {
        if self.readiness_retry.is_zero() {
            return Err(Error::InvalidConfig(
                "Readiness retry must be greater than zero".into(),
            ));
        }
        let quorum = self.quorum()?;
        if directory.len() < quorum {
            return Err(Error::InvalidConfig(format!(
                "Threshold {} needs at least {} parties, directory has {}",
                self.threshold,
                quorum,
                directory.len()
            )));
        }
        self.signing_parties(directory).map(|_| ())
    }

    /// The signing subset in directory order
    ///
    /// Fails if it names unknown parties, repeats one, or is smaller than
    /// `threshold + 1`.
    pub fn signing_parties(&self, directory: &PartyDirectory) -> Result<Vec<PartyIdentity>> {
        let signers = match &self.signers {
            None => directory.parties().to_vec(),
            Some(ids) => {
                let signers = directory.subset(ids)?;
                if signers.len() != ids.len() {
                    return Err(Error::InvalidConfig("Signer listed twice".into()));
                }
                signers
            }
        };

        let quorum = self.quorum()?;
        if signers.len() < quorum {
            return Err(Error::ThresholdNotMet {
                required: quorum,
                actual: signers.len(),
            });
        }
        Ok(signers)
    }
}

/// `threshold + 1`, refusing thresholds with no representable quorum
pub fn quorum(threshold: usize) -> Result<usize> {
    threshold
        .checked_add(1)
        .ok_or_else(|| Error::InvalidConfig(format!("Threshold {threshold} is too large")))
}
