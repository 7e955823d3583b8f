//! Connection single-flight
//!
//! Stateful backends (SFTP, FTP) must never open two sessions because two
//! callers raced on `connect()`. [`ConnectionGate`] collapses concurrent
//! callers onto one in-flight attempt: later callers await the first
//! caller's result. [`SessionSlot`] holds the session an attempt produced.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info};

use super::result::OperationResult;

/// Observable connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

type ConnectFuture = Shared<BoxFuture<'static, OperationResult<()>>>;

enum GateState {
    Disconnected,
    Connecting {
        generation: u64,
        attempt: ConnectFuture,
    },
    Connected,
}

/// Guarded single-flight primitive for `connect()`
pub struct ConnectionGate {
    state: Mutex<GateState>,
    /// Number of Disconnected → Connecting transitions
    transitions: AtomicU64,
}

impl ConnectionGate {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState::Disconnected),
            transitions: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> ConnectionState {
        match &*self.state.lock() {
            GateState::Disconnected => ConnectionState::Disconnected,
            GateState::Connecting { .. } => ConnectionState::Connecting,
            GateState::Connected => ConnectionState::Connected,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// How many connection attempts were actually started
    pub fn connect_attempts(&self) -> u64 {
        self.transitions.load(Ordering::SeqCst)
    }

    /// Connect through `open`, or join the attempt already in flight.
    ///
    /// `open` is only invoked when the gate is disconnected. A failed attempt
    /// returns the gate to `Disconnected`, so the next call starts afresh.
    pub async fn connect_with<F, Fut>(&self, open: F) -> OperationResult<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = OperationResult<()>> + Send + 'static,
    {
        let (generation, attempt) = {
            let mut state = self.state.lock();
            match &*state {
                GateState::Connected => return Ok(()),
                GateState::Connecting {
                    generation,
                    attempt,
                } => {
                    debug!("Joining in-flight connection attempt {}", generation);
                    (*generation, attempt.clone())
                }
                GateState::Disconnected => {
                    let generation = self.transitions.fetch_add(1, Ordering::SeqCst) + 1;
                    info!("Starting connection attempt {}", generation);
                    let attempt = open().boxed().shared();
                    *state = GateState::Connecting {
                        generation,
                        attempt: attempt.clone(),
                    };
                    (generation, attempt)
                }
            }
        };

        let result = attempt.await;

        let mut state = self.state.lock();
        if let GateState::Connecting {
            generation: current,
            ..
        } = &*state
        {
            if *current == generation {
                *state = if result.is_ok() {
                    GateState::Connected
                } else {
                    GateState::Disconnected
                };
            }
        }
        result
    }

    /// Forget the current session (after disconnect or a dropped link)
    pub fn mark_disconnected(&self) {
        *self.state.lock() = GateState::Disconnected;
    }
}

impl Default for ConnectionGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Live session of a stateful backend.
///
/// Every `clear()` advances the epoch. An attempt records the epoch before
/// it starts and may only install its session if no clear happened since,
/// so a connect that finishes after a disconnect cannot revive the link.
pub struct SessionSlot<T> {
    session: RwLock<Option<T>>,
    epoch: AtomicU64,
}

impl<T: Clone> SessionSlot<T> {
    pub fn new() -> Self {
        Self {
            session: RwLock::new(None),
            epoch: AtomicU64::new(0),
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub fn get(&self) -> Option<T> {
        self.session.read().clone()
    }

    /// Store `session` if the slot was not cleared since `started`.
    /// A stale session is handed back so the caller can close it.
    pub fn install(&self, started: u64, session: T) -> Result<(), T> {
        let mut slot = self.session.write();
        if self.epoch.load(Ordering::SeqCst) != started {
            debug!("Discarding session from stale attempt (epoch {})", started);
            return Err(session);
        }
        *slot = Some(session);
        Ok(())
    }

    /// Drop the current session and invalidate attempts in flight
    pub fn clear(&self) -> Option<T> {
        let mut slot = self.session.write();
        self.epoch.fetch_add(1, Ordering::SeqCst);
        slot.take()
    }
}

impl<T: Clone> Default for SessionSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderError;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_connects_share_one_attempt() {
        let gate = Arc::new(ConnectionGate::new());
        let opened = Arc::new(AtomicUsize::new(0));

        let connect = |gate: Arc<ConnectionGate>, opened: Arc<AtomicUsize>| async move {
            gate.connect_with(move || async move {
                opened.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(())
            })
            .await
        };

        let (a, b, c) = tokio::join!(
            connect(gate.clone(), opened.clone()),
            connect(gate.clone(), opened.clone()),
            connect(gate.clone(), opened.clone()),
        );

        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(opened.load(Ordering::SeqCst), 1);
        assert_eq!(gate.connect_attempts(), 1);
        assert_eq!(gate.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_failed_attempt_is_shared_then_reset() {
        let gate = ConnectionGate::new();

        let first = gate.connect_with(|| async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Err(ProviderError::connection_failed("refused"))
        });
        let second = gate.connect_with(|| async { Ok(()) });
        let (first, second) = tokio::join!(first, second);

        // The second caller joined the failing attempt instead of opening its own
        assert!(first.is_err());
        assert!(second.is_err());
        assert_eq!(gate.connect_attempts(), 1);
        assert_eq!(gate.state(), ConnectionState::Disconnected);

        // Next call starts a fresh attempt
        gate.connect_with(|| async { Ok(()) }).await.unwrap();
        assert_eq!(gate.connect_attempts(), 2);
        assert!(gate.is_connected());
    }

    #[tokio::test]
    async fn test_connected_gate_skips_open() {
        let gate = ConnectionGate::new();
        gate.connect_with(|| async { Ok(()) }).await.unwrap();
        gate.connect_with(|| async { Err(ProviderError::connection_failed("unused")) })
            .await
            .unwrap();
        assert_eq!(gate.connect_attempts(), 1);

        gate.mark_disconnected();
        assert_eq!(gate.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_session_slot_rejects_stale_install() {
        let slot: SessionSlot<u32> = SessionSlot::new();

        let started = slot.epoch();
        slot.install(started, 1).unwrap();
        assert_eq!(slot.get(), Some(1));

        // connect started, then disconnect ran before it finished
        let started = slot.epoch();
        assert_eq!(slot.clear(), Some(1));
        assert_eq!(slot.install(started, 2), Err(2));
        assert_eq!(slot.get(), None);

        // a fresh attempt after the disconnect is accepted
        let started = slot.epoch();
        slot.install(started, 3).unwrap();
        assert_eq!(slot.get(), Some(3));
    }

    #[tokio::test]
    async fn test_disconnect_during_connect_leaves_no_session() {
        let gate = Arc::new(ConnectionGate::new());
        let slot = Arc::new(SessionSlot::<u32>::new());

        let connecting = {
            let gate = gate.clone();
            let slot = slot.clone();
            tokio::spawn(async move {
                let started = slot.epoch();
                let target = slot.clone();
                gate.connect_with(move || async move {
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    target
                        .install(started, 7)
                        .map_err(|_| ProviderError::cancelled("disconnected while connecting"))
                })
                .await
            })
        };

        tokio::time::sleep(Duration::from_millis(5)).await;
        slot.clear();
        gate.mark_disconnected();

        let result = connecting.await.unwrap();
        assert!(result.unwrap_err().is_cancelled());
        assert_eq!(slot.get(), None);
        assert_eq!(gate.state(), ConnectionState::Disconnected);
    }
}
