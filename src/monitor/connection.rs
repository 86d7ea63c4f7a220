//! Central-store reachability monitoring.
//!
//! A background loop probes the central store on a fixed interval and
//! maintains a four-state status: `unknown` before the first probe,
//! `connecting` while the first probe is in flight, then `online` or
//! `offline`. Every transition is appended to the durable connection
//! history and fanned out to subscriber callbacks in registration order.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::SyncConfig;
use crate::error::Result;
use crate::model::{ConnectionSample, ConnectionState};
use crate::store::{CentralStore, OperationLog};

/// Subscriber invoked with `(previous, current)` on every transition.
pub type ChangeCallback = Box<dyn Fn(ConnectionState, ConnectionState) + Send + Sync>;

/// Probes the central store and tracks its reachability.
pub struct ConnectionMonitor {
    central: Arc<dyn CentralStore>,
    oplog: OperationLog,
    config: SyncConfig,
    state: Arc<Mutex<ConnectionState>>,
    callbacks: Arc<Mutex<Vec<ChangeCallback>>>,
    shutdown: watch::Sender<bool>,
    handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionMonitor {
    #[must_use]
    pub fn new(central: Arc<dyn CentralStore>, oplog: OperationLog, config: SyncConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            central,
            oplog,
            config,
            state: Arc::new(Mutex::new(ConnectionState::Unknown)),
            callbacks: Arc::new(Mutex::new(Vec::new())),
            shutdown,
            handle: tokio::sync::Mutex::new(None),
        }
    }

    /// The state as of the most recent probe.
    #[must_use]
    pub fn current(&self) -> ConnectionState {
        *self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Recent transitions, newest first, from the durable history.
    pub fn history(&self, limit: usize) -> Result<Vec<ConnectionSample>> {
        self.oplog.connection_history(limit)
    }

    /// Register a transition callback. Callbacks run synchronously after
    /// each transition, in registration order; a panicking callback is
    /// contained and does not starve the ones after it.
    pub fn on_change(
        &self,
        callback: impl Fn(ConnectionState, ConnectionState) + Send + Sync + 'static,
    ) {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(callback));
    }

    /// Run one probe immediately and return the resulting state.
    pub async fn check_now(&self) -> ConnectionState {
        Self::probe_once(
            &self.central,
            &self.oplog,
            &self.state,
            &self.callbacks,
            &self.config,
        )
        .await
    }

    /// Spawn the probe loop. Idempotent.
    pub async fn start(&self) {
        let mut handle = self.handle.lock().await;
        if handle.is_some() {
            return;
        }

        let central = self.central.clone();
        let oplog = self.oplog.clone();
        let state = self.state.clone();
        let callbacks = self.callbacks.clone();
        let config = self.config.clone();
        let mut shutdown = self.shutdown.subscribe();

        *handle = Some(tokio::spawn(async move {
            Self::transition(
                &state,
                &callbacks,
                &oplog,
                ConnectionState::Connecting,
                Some("initial probe"),
            );
            loop {
                Self::probe_once(&central, &oplog, &state, &callbacks, &config).await;
                tokio::select! {
                    _ = shutdown.changed() => break,
                    () = tokio::time::sleep(config.probe_interval) => {}
                }
            }
            tracing::debug!("connection probe loop stopped");
        }));
    }

    /// Signal the loop to stop and wait for it to finish.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.handle.lock().await.take() {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "probe loop task ended abnormally");
            }
        }
    }

    async fn probe_once(
        central: &Arc<dyn CentralStore>,
        oplog: &OperationLog,
        state: &Arc<Mutex<ConnectionState>>,
        callbacks: &Arc<Mutex<Vec<ChangeCallback>>>,
        config: &SyncConfig,
    ) -> ConnectionState {
        match central.probe(config.probe_timeout).await {
            Ok(latency) => {
                let details = format!("probe {}ms", latency.as_millis());
                Self::transition(state, callbacks, oplog, ConnectionState::Online, Some(&details));
                ConnectionState::Online
            }
            Err(e) => {
                let details = e.to_string();
                Self::transition(state, callbacks, oplog, ConnectionState::Offline, Some(&details));
                ConnectionState::Offline
            }
        }
    }

    /// Swap the state and, on an actual change, persist the sample and
    /// notify subscribers.
    fn transition(
        state: &Arc<Mutex<ConnectionState>>,
        callbacks: &Arc<Mutex<Vec<ChangeCallback>>>,
        oplog: &OperationLog,
        new: ConnectionState,
        details: Option<&str>,
    ) {
        let old = {
            let mut guard = state.lock().unwrap_or_else(PoisonError::into_inner);
            let old = *guard;
            *guard = new;
            old
        };
        if old == new {
            return;
        }

        tracing::info!(from = %old, to = %new, "connection state changed");
        if let Err(e) = oplog.record_connection(new, details) {
            tracing::warn!(error = %e, "failed to persist connection sample");
        }

        let guard = callbacks.lock().unwrap_or_else(PoisonError::into_inner);
        for cb in guard.iter() {
            if std::panic::catch_unwind(AssertUnwindSafe(|| cb(old, new))).is_err() {
                tracing::warn!(from = %old, to = %new, "connection callback panicked");
            }
        }
    }
}
