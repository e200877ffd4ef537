//! Readiness gate for inbound delivery
//!
//! Peers can start a phase before this node has built its engine for it.
//! Inbound messages for that phase wait here until the session is published;
//! they are never dropped. Every `retry` interval spent waiting is logged.

use crate::types::Phase;
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Construction barrier for one phase
pub struct ReadinessGate<T> {
    phase: Phase,
    retry: Duration,
    ready: watch::Sender<Option<Arc<T>>>,
}

impl<T> ReadinessGate<T> {
    pub fn new(phase: Phase, retry: Duration) -> Self {
        let (ready, _) = watch::channel(None);
        Self {
            phase,
            retry,
            ready,
        }
    }

    /// Publish the value inbound delivery waits for, releasing all waiters
    ///
    /// Publishing again replaces the value, which is how a retried phase
    /// takes over from a failed one.
    pub fn open(&self, value: Arc<T>) {
        self.ready.send_replace(Some(value));
    }

    /// Currently published value, if any
    pub fn current(&self) -> Option<Arc<T>> {
        self.ready.borrow().clone()
    }

    /// Wait until a value is published
    pub async fn wait(&self) -> Result<Arc<T>> {
        let mut rx = self.ready.subscribe();
        let mut stalls: u64 = 0;

        loop {
            let current = rx.borrow_and_update().clone();
            if let Some(value) = current {
                if stalls > 0 {
                    debug!(phase = %self.phase, stalls, "Readiness gate released");
                }
                return Ok(value);
            }

            match tokio::time::timeout(self.retry, rx.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) => return Err(Error::GateClosed(self.phase)),
                Err(_) => {
                    stalls += 1;
                    warn!(
                        phase = %self.phase,
                        stalls,
                        "Engine not ready yet, holding inbound message"
                    );
                }
            }
        }
    }
}
