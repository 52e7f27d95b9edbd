//! One-shot handshake signals
//!
//! A handshake step registers a waiter *before* sending its request, then
//! awaits it with a timeout. The matching inbound command resolves every
//! waiter for that signal. The returned `PendingSignal` removes its entry
//! when dropped, so timed-out waits leave nothing behind.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{AuthError, HandshakeError, HandshakeStep, RoomError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    /// `inited`: join acknowledged
    Inited,
    /// `pwdok` / `aliasok`, or a rejection
    Authenticated,
    /// Participant list applied
    ParticipantsSynced,
}

type Outcome = Result<(), AuthError>;

#[derive(Debug, Default)]
struct Waiters {
    next_id: u64,
    pending: HashMap<u64, (Signal, oneshot::Sender<Outcome>)>,
}

#[derive(Debug, Clone, Default)]
pub struct Signals {
    inner: Arc<Mutex<Waiters>>,
}

impl Signals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, signal: Signal) -> PendingSignal {
        let (tx, rx) = oneshot::channel();
        let mut waiters = self.inner.lock();
        let id = waiters.next_id;
        waiters.next_id += 1;
        waiters.pending.insert(id, (signal, tx));
        PendingSignal {
            id,
            rx,
            signals: self.clone(),
        }
    }

    /// Wake every waiter for `signal`; returns how many were woken
    pub fn resolve(&self, signal: Signal, outcome: Outcome) -> usize {
        let mut waiters = self.inner.lock();
        let ids: Vec<u64> = waiters
            .pending
            .iter()
            .filter(|(_, (s, _))| *s == signal)
            .map(|(id, _)| *id)
            .collect();
        for id in &ids {
            if let Some((_, tx)) = waiters.pending.remove(id) {
                let _ = tx.send(outcome.clone());
            }
        }
        ids.len()
    }

    /// Drop all waiters; their waits fail as transport-closed
    pub fn clear(&self) {
        self.inner.lock().pending.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
pub struct PendingSignal {
    id: u64,
    rx: oneshot::Receiver<Outcome>,
    signals: Signals,
}

impl PendingSignal {
    pub async fn wait(mut self, timeout: Duration, step: HandshakeStep) -> Result<(), RoomError> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(auth))) => Err(RoomError::Auth(auth)),
            Ok(Err(_)) => Err(HandshakeError::TransportClosed(step).into()),
            Err(_) => Err(HandshakeError::Timeout(step).into()),
        }
    }
}

impl Drop for PendingSignal {
    fn drop(&mut self) {
        self.signals.inner.lock().pending.remove(&self.id);
    }
}
