//! Fakes shared by unit tests

use crate::engine::{EngineConfig, EngineEvent, EngineInstance, EventStream, ProtocolEngine};
use crate::transport::{Envelope, TransportReceiver, TransportSender};
use crate::types::{PartyIdentity, ProtocolMessage};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub(crate) fn party(id: &str, index: usize) -> PartyIdentity {
    let mut key = [0u8; 32];
    key[31] = index as u8 + 1;
    PartyIdentity {
        id: id.to_string(),
        name: format!("tss{}", index + 1),
        key,
        index,
    }
}

pub(crate) fn parties(ids: &[&str]) -> Vec<PartyIdentity> {
    ids.iter()
        .enumerate()
        .map(|(index, id)| party(id, index))
        .collect()
}

#[derive(Clone, Copy)]
pub(crate) enum Script {
    /// Start quietly; accept `ok`, refuse `reject`, fail on anything else
    Idle,
    /// Like `Idle`, but broadcast one message on start
    BroadcastOnStart,
    /// Refuse to create an instance
    FailSetup,
}

/// Engine whose event stream is driven by the test
#[derive(Clone)]
pub(crate) struct ScriptedEngine {
    script: Script,
    events: Arc<Mutex<Option<mpsc::UnboundedSender<EngineEvent>>>>,
    feeds: Arc<AtomicUsize>,
}

impl ScriptedEngine {
    pub(crate) fn new(script: Script) -> Self {
        Self {
            script,
            events: Arc::new(Mutex::new(None)),
            feeds: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Sender into the most recently created instance's event stream
    pub(crate) fn events(&self) -> mpsc::UnboundedSender<EngineEvent> {
        self.events
            .lock()
            .unwrap()
            .clone()
            .expect("instance created")
    }

    /// Close the event stream of the current instance
    pub(crate) fn close(&self) {
        self.events.lock().unwrap().take();
    }

    pub(crate) fn feeds(&self) -> usize {
        self.feeds.load(Ordering::SeqCst)
    }
}

impl ProtocolEngine for ScriptedEngine {
    fn new_instance(&self, config: EngineConfig) -> Result<Box<dyn EngineInstance>> {
        if let Script::FailSetup = self.script {
            return Err(Error::InvalidConfig("scripted setup failure".into()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.events.lock().unwrap() = Some(tx);
        Ok(Box::new(ScriptedInstance {
            local: config.local,
            script: self.script,
            events: Arc::clone(&self.events),
            feeds: Arc::clone(&self.feeds),
            stream: Mutex::new(Some(rx)),
        }))
    }
}

struct ScriptedInstance {
    local: PartyIdentity,
    script: Script,
    events: Arc<Mutex<Option<mpsc::UnboundedSender<EngineEvent>>>>,
    feeds: Arc<AtomicUsize>,
    stream: Mutex<Option<EventStream>>,
}

impl EngineInstance for ScriptedInstance {
    fn start(&self) -> Result<EventStream> {
        let stream = self
            .stream
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| Error::Engine("already started".into()))?;
        if let Script::BroadcastOnStart = self.script {
            if let Some(tx) = self.events.lock().unwrap().as_ref() {
                let message = ProtocolMessage::broadcast(self.local.clone(), b"round1".to_vec());
                let _ = tx.send(EngineEvent::Outbound(message));
            }
        }
        Ok(stream)
    }

    fn update_from_bytes(
        &self,
        payload: &[u8],
        _from: &PartyIdentity,
        _is_broadcast: bool,
    ) -> Result<bool> {
        self.feeds.fetch_add(1, Ordering::SeqCst);
        match payload {
            b"ok" => Ok(true),
            b"reject" => Ok(false),
            _ => Err(Error::Deserialization("malformed payload".into())),
        }
    }

    fn identity(&self) -> &PartyIdentity {
        &self.local
    }
}

/// Sender that records every envelope and fails for chosen peers
#[derive(Default)]
pub(crate) struct RecordingTransport {
    sent: Mutex<Vec<(String, Envelope)>>,
    failing: HashSet<String>,
}

impl RecordingTransport {
    pub(crate) fn failing(ids: &[&str]) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failing: ids.iter().map(|id| id.to_string()).collect(),
        }
    }

    pub(crate) fn sent(&self) -> Vec<(String, Envelope)> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn recipients(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sent().into_iter().map(|(to, _)| to).collect();
        ids.sort();
        ids
    }

    /// Poll until `count` sends were attempted or the timeout passes
    pub(crate) async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<(String, Envelope)> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let sent = self.sent();
            if sent.len() >= count || tokio::time::Instant::now() >= deadline {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl TransportSender for RecordingTransport {
    async fn send(&self, to: &PartyIdentity, envelope: Envelope) -> Result<()> {
        self.sent.lock().unwrap().push((to.id.clone(), envelope));
        if self.failing.contains(&to.id) {
            return Err(Error::Transport {
                to: to.id.clone(),
                reason: "connection refused".into(),
            });
        }
        Ok(())
    }
}

/// Receiver that records every envelope
#[derive(Default)]
pub(crate) struct RecordingReceiver {
    received: Mutex<Vec<Envelope>>,
}

impl RecordingReceiver {
    pub(crate) async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<Envelope> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let received = self.received.lock().unwrap().clone();
            if received.len() >= count || tokio::time::Instant::now() >= deadline {
                return received;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl TransportReceiver for RecordingReceiver {
    async fn on_message(&self, envelope: Envelope) -> Result<()> {
        self.received.lock().unwrap().push(envelope);
        Ok(())
    }
}
