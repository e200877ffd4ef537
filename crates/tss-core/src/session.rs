//! Per-phase session
//!
//! A session drives one engine instance through `Idle -> Running ->
//! Completed | Failed`. The state lives in a watch channel: transitions out
//! of `Running` happen under the channel's lock, so the first completion or
//! failure wins and every later one is a logged no-op. Waiters are released
//! by either terminal state.

use crate::engine::{
    EngineAdapter, EngineConfig, EngineEvent, EventStream, PhaseOutput, PhaseParams,
    ProtocolEngine,
};
use crate::router::Router;
use crate::store::KeyStore;
use crate::transport::TransportSender;
use crate::types::{KeyMaterial, PartyIdentity, Phase, SignatureResult};
use crate::{Error, Result};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Coarse session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    Completed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Failed)
    }
}

/// Result of a completed phase
#[derive(Debug, Clone)]
pub enum PhaseOutcome {
    Keygen(Arc<KeyMaterial>),
    Signing(SignatureResult),
}

#[derive(Debug, Clone)]
enum Status {
    Idle,
    Running,
    Completed(PhaseOutcome),
    Failed(Error),
}

impl Status {
    fn state(&self) -> SessionState {
        match self {
            Status::Idle => SessionState::Idle,
            Status::Running => SessionState::Running,
            Status::Completed(_) => SessionState::Completed,
            Status::Failed(_) => SessionState::Failed,
        }
    }

    fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }
}

/// One run of one phase
pub struct Session {
    id: Uuid,
    phase: Phase,
    local: PartyIdentity,
    participants: Vec<PartyIdentity>,
    threshold: usize,
    params: PhaseParams,
    status: watch::Sender<Status>,
    adapter: OnceLock<EngineAdapter>,
    key_store: Option<Arc<dyn KeyStore>>,
}

impl Session {
    /// Create an idle session
    pub fn new(
        local: PartyIdentity,
        participants: Vec<PartyIdentity>,
        threshold: usize,
        params: PhaseParams,
    ) -> Self {
        let phase = match params {
            PhaseParams::Keygen => Phase::Keygen,
            PhaseParams::Signing { .. } => Phase::Signing,
        };
        let (status, _) = watch::channel(Status::Idle);
        Self {
            id: Uuid::new_v4(),
            phase,
            local,
            participants,
            threshold,
            params,
            status,
            adapter: OnceLock::new(),
            key_store: None,
        }
    }

    /// Hand completed key material to an external store
    pub fn with_key_store(mut self, store: Arc<dyn KeyStore>) -> Self {
        self.key_store = Some(store);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn state(&self) -> SessionState {
        self.status.borrow().state()
    }

    pub fn participants(&self) -> &[PartyIdentity] {
        &self.participants
    }

    /// Key material of a completed keygen session
    pub fn key_material(&self) -> Option<Arc<KeyMaterial>> {
        match &*self.status.borrow() {
            Status::Completed(PhaseOutcome::Keygen(key)) => Some(Arc::clone(key)),
            _ => None,
        }
    }

    /// Start the engine and begin routing its output
    ///
    /// A setup failure moves the session to `Failed` and is also returned.
    #[instrument(skip_all, fields(session = %self.id, phase = %self.phase, party = %self.local.id))]
    pub fn start(
        self: &Arc<Self>,
        engine: &dyn ProtocolEngine,
        transport: Arc<dyn TransportSender>,
    ) -> Result<()> {
        let started = self.status.send_if_modified(|status| {
            if matches!(status, Status::Idle) {
                *status = Status::Running;
                true
            } else {
                false
            }
        });
        if !started {
            return Err(Error::AlreadyStarted(self.phase));
        }

        let config = EngineConfig {
            parties: self.participants.clone(),
            local: self.local.clone(),
            threshold: self.threshold,
            params: self.params.clone(),
        };
        let (adapter, events) = match EngineAdapter::start(engine, config) {
            Ok(started) => started,
            Err(e) => {
                self.fail(e.clone());
                return Err(e);
            }
        };
        if self.adapter.set(adapter).is_err() {
            return Err(Error::Internal("engine adapter already set".into()));
        }

        let router = Router::new(self.phase, self.participants.clone(), transport);
        self.spawn_pump(events, router);

        info!(participants = self.participants.len(), "Session running");
        Ok(())
    }

    /// Feed one inbound message to the engine
    ///
    /// Messages echoing the engine's own identity are ignored. A rejected
    /// payload fails the session; a sender outside the participant set is
    /// refused without touching the engine.
    pub fn deliver(&self, from: &PartyIdentity, payload: &[u8], is_broadcast: bool) -> Result<()> {
        match self.state() {
            SessionState::Running => {}
            SessionState::Completed => {
                debug!(phase = %self.phase, from = %from.id, "Message after completion ignored");
                return Ok(());
            }
            SessionState::Failed => return Err(Error::SessionClosed(self.phase)),
            SessionState::Idle => {
                return Err(Error::Internal(format!("{} session not started", self.phase)))
            }
        }

        let adapter = self
            .adapter
            .get()
            .ok_or_else(|| Error::Internal("running session without engine".into()))?;

        if from.id == adapter.identity().id {
            return Ok(());
        }

        if !self.participants.iter().any(|party| party.id == from.id) {
            warn!(phase = %self.phase, from = %from.id, "Message from non-participant refused");
            return Err(Error::NotParticipant {
                party: from.id.clone(),
                phase: self.phase,
            });
        }

        adapter.feed(from, payload, is_broadcast).map_err(|e| {
            self.fail(e.clone());
            e
        })
    }

    /// Wait for the session to reach a terminal state
    ///
    /// With a `limit`, a session still running when it expires is failed with
    /// [`Error::Timeout`].
    pub async fn wait(&self, limit: Option<Duration>) -> Result<PhaseOutcome> {
        let mut rx = self.status.subscribe();

        let finished = match limit {
            Some(limit) => tokio::time::timeout(limit, terminal(&mut rx)).await.ok(),
            None => Some(terminal(&mut rx).await),
        };
        let status = match finished {
            Some(status) => status,
            None => {
                self.fail(Error::Timeout(format!("{} session", self.phase)));
                self.status.borrow().clone()
            }
        };

        match status {
            Status::Completed(outcome) => Ok(outcome),
            Status::Failed(e) => Err(e),
            other => Err(Error::Internal(format!(
                "session released in state {:?}",
                other.state()
            ))),
        }
    }

    /// Move `Running -> Failed`. Returns false if the session was not running.
    pub(crate) fn fail(&self, error: Error) -> bool {
        let reason = error.to_string();
        if self.transition(Status::Failed(error)) {
            error!(session = %self.id, phase = %self.phase, error = %reason, "Session failed");
            true
        } else {
            debug!(session = %self.id, phase = %self.phase, error = %reason, "Failure after terminal state ignored");
            false
        }
    }

    fn complete(&self, output: PhaseOutput) {
        let outcome = match (&self.params, output) {
            (PhaseParams::Keygen, PhaseOutput::Key(key)) => PhaseOutcome::Keygen(Arc::new(key)),
            (PhaseParams::Signing { message, key }, PhaseOutput::Signature(raw)) => {
                let valid = key.verify(message, &raw.r, &raw.s);
                if !valid {
                    warn!(session = %self.id, "Signature does not verify against the keygen public key");
                }
                PhaseOutcome::Signing(SignatureResult {
                    r: raw.r,
                    s: raw.s,
                    valid,
                })
            }
            _ => {
                self.fail(Error::Engine(format!(
                    "completion payload does not match {} phase",
                    self.phase
                )));
                return;
            }
        };

        // Key material reaches the store before any waiter is released.
        if let (PhaseOutcome::Keygen(key), Some(store)) = (&outcome, &self.key_store) {
            if self.state() == SessionState::Running {
                if let Err(e) = store.put(&self.local.id, key) {
                    let error = match e {
                        Error::Store(_) => e,
                        other => Error::Store(other.to_string()),
                    };
                    self.fail(error);
                    return;
                }
            }
        }

        if !self.transition(Status::Completed(outcome.clone())) {
            warn!(session = %self.id, phase = %self.phase, "Duplicate completion event discarded");
            return;
        }

        match &outcome {
            PhaseOutcome::Keygen(key) => {
                info!(
                    session = %self.id,
                    public_key = hex::encode(&key.public_key),
                    "Keygen completed"
                );
            }
            PhaseOutcome::Signing(signature) => {
                info!(
                    session = %self.id,
                    r = hex::encode(signature.r),
                    s = hex::encode(signature.s),
                    valid = signature.valid,
                    "Signing completed"
                );
            }
        }
    }

    fn transition(&self, next: Status) -> bool {
        self.status.send_if_modified(|status| {
            if matches!(status, Status::Running) {
                *status = next;
                true
            } else {
                false
            }
        })
    }

    fn handle_event(
        &self,
        event: EngineEvent,
        router: &Router,
        failures: &mpsc::UnboundedSender<Error>,
    ) {
        match event {
            EngineEvent::Outbound(message) => {
                if self.state() == SessionState::Failed {
                    debug!(session = %self.id, "Outbound message after failure dropped");
                    return;
                }
                if let Err(e) = router.dispatch(message, failures) {
                    self.fail(e);
                }
            }
            EngineEvent::Completed(output) => self.complete(output),
            EngineEvent::Failed(e) => {
                self.fail(e);
            }
        }
    }

    /// Pump engine events into the router until the session ends
    fn spawn_pump(self: &Arc<Self>, mut events: EventStream, router: Router) {
        let session = Arc::clone(self);
        let mut status = self.status.subscribe();
        let (failures_tx, mut failures_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            loop {
                if session.state().is_terminal() {
                    // Anything the engine queued alongside its result.
                    while let Ok(event) = events.try_recv() {
                        session.handle_event(event, &router, &failures_tx);
                    }
                    break;
                }

                tokio::select! {
                    event = events.recv() => {
                        let Some(event) = event else {
                            session.fail(Error::Engine("event stream ended without a result".into()));
                            break;
                        };
                        session.handle_event(event, &router, &failures_tx);
                    }
                    Some(error) = failures_rx.recv() => {
                        session.fail(error);
                    }
                    Ok(()) = status.changed() => {}
                }
            }
            debug!(session = %session.id, state = ?session.state(), "Session pump stopped");
        });
    }
}

async fn terminal(rx: &mut watch::Receiver<Status>) -> Status {
    match rx.wait_for(Status::is_terminal).await {
        Ok(status) => status.clone(),
        Err(_) => Status::Failed(Error::Internal("session dropped".into())),
    }
}
