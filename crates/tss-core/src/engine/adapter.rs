//! Uniform wrapper around one engine instance

use super::{EngineConfig, EngineInstance, EventStream, ProtocolEngine};
use crate::types::{PartyIdentity, Phase};
use crate::{Error, Result};
use tracing::{debug, info, instrument};

/// Owns the engine instance of exactly one phase
pub struct EngineAdapter {
    phase: Phase,
    instance: Box<dyn EngineInstance>,
}

impl EngineAdapter {
    /// Create and start an engine instance
    ///
    /// Setup failures are returned as [`Error::Engine`]; engine setup is not
    /// idempotent, so nothing here retries.
    #[instrument(skip_all, fields(phase = %config.phase(), party = %config.local.id))]
    pub fn start(engine: &dyn ProtocolEngine, config: EngineConfig) -> Result<(Self, EventStream)> {
        let phase = config.phase();
        let parties = config.parties.len();

        let instance = engine
            .new_instance(config)
            .map_err(|e| setup_error(phase, e))?;
        let events = instance.start().map_err(|e| setup_error(phase, e))?;

        info!(parties, "Engine started");
        Ok((Self { phase, instance }, events))
    }

    /// Deliver one inbound payload to the engine
    pub fn feed(&self, from: &PartyIdentity, payload: &[u8], is_broadcast: bool) -> Result<()> {
        debug!(
            phase = %self.phase,
            from = %from.id,
            bytes = payload.len(),
            is_broadcast,
            "Feeding engine"
        );

        match self.instance.update_from_bytes(payload, from, is_broadcast) {
            Ok(true) => Ok(()),
            Ok(false) => Err(Error::EngineRejected {
                from: from.id.clone(),
                reason: "update not accepted".into(),
            }),
            Err(e @ Error::EngineRejected { .. }) => Err(e),
            Err(e) => Err(Error::EngineRejected {
                from: from.id.clone(),
                reason: e.to_string(),
            }),
        }
    }

    /// Identity the engine runs as
    pub fn identity(&self) -> &PartyIdentity {
        self.instance.identity()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }
}

fn setup_error(phase: Phase, e: Error) -> Error {
    match e {
        Error::Engine(_) => e,
        other => Error::Engine(format!("{phase} setup failed: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{party, Script, ScriptedEngine};
    use crate::engine::{EngineEvent, PhaseParams};

    fn config() -> EngineConfig {
        EngineConfig {
            parties: vec![party("p1", 0), party("p2", 1)],
            local: party("p1", 0),
            threshold: 1,
            params: PhaseParams::Keygen,
        }
    }

    #[tokio::test]
    async fn test_start_exposes_event_stream() {
        let engine = ScriptedEngine::new(Script::BroadcastOnStart);
        let (adapter, mut events) = EngineAdapter::start(&engine, config()).unwrap();

        assert_eq!(adapter.phase(), Phase::Keygen);
        assert_eq!(adapter.identity().id, "p1");
        assert!(matches!(events.recv().await, Some(EngineEvent::Outbound(_))));
    }

    #[test]
    fn test_setup_failure_is_engine_error() {
        let engine = ScriptedEngine::new(Script::FailSetup);
        let err = EngineAdapter::start(&engine, config()).err().unwrap();
        assert!(matches!(err, Error::Engine(_)));
    }

    #[test]
    fn test_rejected_update_is_reported() {
        let engine = ScriptedEngine::new(Script::Idle);
        let (adapter, _events) = EngineAdapter::start(&engine, config()).unwrap();

        let err = adapter.feed(&party("p2", 1), b"garbage", true).unwrap_err();
        assert!(matches!(err, Error::EngineRejected { ref from, .. } if from == "p2"));

        adapter.feed(&party("p2", 1), b"ok", true).unwrap();
    }
}
