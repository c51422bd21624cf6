//! The public watcher handle

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::error;

use driftsync_core::{SessionStatus, SyncError, WatchEvent, WatcherConfig};
use driftsync_transport::{Endpoint, ErrorSlot, LocalEndpoint, SftpEndpoint};

use crate::context::{SyncState, Worker};
use crate::driver;

type WorkerHandle = JoinHandle<(Box<dyn Endpoint>, SyncState)>;

/// One watcher instance: one remote root, one local root, one worker.
///
/// Lifecycle: [`new`](Watcher::new) validates the configuration,
/// [`connect`](Watcher::connect) establishes and authenticates the session,
/// [`start`](Watcher::start) spawns the worker and returns the event
/// receiver, [`stop`](Watcher::stop) joins the worker. The closing of the
/// event channel is the cleanup signal. A stopped watcher can be cleared
/// and restarted.
pub struct Watcher {
    config: Arc<WatcherConfig>,
    stop: Arc<AtomicBool>,
    status: Arc<AtomicU8>,
    fingerprint: Arc<Mutex<Option<Vec<u8>>>>,
    errors: ErrorSlot,
    remote: Option<Box<dyn Endpoint>>,
    state: Option<SyncState>,
    handle: Option<WorkerHandle>,
}

impl Watcher {
    /// Build a watcher talking SFTP to the configured host.
    ///
    /// # Errors
    /// Returns a configuration error when mandatory fields are missing or
    /// no authentication method is satisfied.
    pub fn new(config: WatcherConfig) -> Result<Self, SyncError> {
        config.validate()?;

        let config = Arc::new(config);
        let status = Arc::new(AtomicU8::new(SessionStatus::Disconnected.as_u8()));
        let fingerprint = Arc::new(Mutex::new(None));
        let errors = ErrorSlot::default();

        let remote = Box::new(SftpEndpoint::new(
            config.clone(),
            status.clone(),
            fingerprint.clone(),
            errors.clone(),
        ));

        Ok(Self::assemble(config, status, fingerprint, errors, remote))
    }

    /// Build a watcher around a caller-supplied remote endpoint.
    ///
    /// This is the seam for embedding and testing: any [`Endpoint`] works as
    /// the remote side, e.g. a [`LocalEndpoint`] over a scratch directory.
    ///
    /// # Errors
    /// Returns a configuration error as [`new`](Watcher::new) does.
    pub fn with_remote(
        config: WatcherConfig,
        remote: Box<dyn Endpoint>,
    ) -> Result<Self, SyncError> {
        config.validate()?;

        let config = Arc::new(config);
        let status = Arc::new(AtomicU8::new(SessionStatus::Disconnected.as_u8()));
        let fingerprint = Arc::new(Mutex::new(None));
        let errors = ErrorSlot::default();

        Ok(Self::assemble(config, status, fingerprint, errors, remote))
    }

    fn assemble(
        config: Arc<WatcherConfig>,
        status: Arc<AtomicU8>,
        fingerprint: Arc<Mutex<Option<Vec<u8>>>>,
        errors: ErrorSlot,
        remote: Box<dyn Endpoint>,
    ) -> Self {
        let state = SyncState::new(&config.local_path, &config.remote_path);
        Self {
            config,
            stop: Arc::new(AtomicBool::new(false)),
            status,
            fingerprint,
            errors,
            remote: Some(remote),
            state: Some(state),
            handle: None,
        }
    }

    /// Connect and authenticate the remote session. Idempotent relative to
    /// the session status.
    ///
    /// # Errors
    /// Returns the transport or session error that broke the attempt; the
    /// same error is readable through [`last_error`](Watcher::last_error).
    pub async fn connect(&mut self) -> Result<(), SyncError> {
        let remote = self
            .remote
            .as_mut()
            .ok_or_else(|| SyncError::custom(-3, "watcher is running"))?;
        remote.connect().await?;
        remote.authenticate().await
    }

    /// Disconnect the remote session. Only valid between runs.
    ///
    /// # Errors
    /// Returns an error when the worker is running.
    pub async fn disconnect(&mut self) -> Result<(), SyncError> {
        let remote = self
            .remote
            .as_mut()
            .ok_or_else(|| SyncError::custom(-3, "watcher is running"))?;
        remote.disconnect().await;
        Ok(())
    }

    /// Spawn the sync worker. Must follow a successful
    /// [`connect`](Watcher::connect); the worker validates both roots and
    /// reports through the returned channel.
    ///
    /// The channel is bounded at one event: the worker suspends until the
    /// host consumed the previous event. When the worker exits, the channel
    /// closes.
    ///
    /// # Errors
    /// Returns an error when the worker is already running.
    pub fn start(&mut self) -> Result<mpsc::Receiver<WatchEvent>, SyncError> {
        if self.handle.is_some() {
            return Err(SyncError::custom(-3, "watcher is already running"));
        }
        let remote = self
            .remote
            .take()
            .ok_or_else(|| SyncError::custom(-3, "watcher is already running"))?;
        let state = self
            .state
            .take()
            .ok_or_else(|| SyncError::custom(-3, "watcher is already running"))?;

        self.stop.store(false, Ordering::Release);
        let (events, receiver) = mpsc::channel(1);

        let local = Box::new(LocalEndpoint::new(
            self.config.local_path.clone(),
            self.errors.clone(),
        ));
        let mut worker = Worker {
            config: self.config.clone(),
            remote,
            local,
            state,
            events,
            stop: self.stop.clone(),
            errors: self.errors.clone(),
        };

        self.handle = Some(tokio::spawn(async move {
            driver::run(&mut worker).await;
            (worker.remote, worker.state)
        }));

        Ok(receiver)
    }

    /// Raise the stop flag and wait for the worker to finish. Idempotent;
    /// returns immediately when no worker is running.
    pub async fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            match handle.await {
                Ok((remote, state)) => {
                    self.remote = Some(remote);
                    self.state = Some(state);
                }
                Err(err) => error!(error = %err, "sync worker terminated abnormally"),
            }
        }
    }

    /// Reset snapshots and directory lists to the root pair and zero the
    /// error counter. Only valid between runs.
    ///
    /// # Errors
    /// Returns an error when the worker is running.
    pub fn clear(&mut self) -> Result<(), SyncError> {
        match self.state.as_mut() {
            Some(state) => {
                state.clear();
                Ok(())
            }
            None => Err(SyncError::custom(-3, "watcher is running")),
        }
    }

    /// The server's host-key fingerprint captured during the last
    /// handshake (SHA-256, 32 bytes).
    #[must_use]
    pub fn fingerprint(&self) -> Option<Vec<u8>> {
        self.fingerprint.lock().expect("fingerprint slot poisoned").clone()
    }

    /// Current session status
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        SessionStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// The most recent error recorded by any component
    #[must_use]
    pub fn last_error(&self) -> Option<SyncError> {
        self.errors.lock().expect("error slot poisoned").clone()
    }

    /// Whether the worker is currently running
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("host", &self.config.host)
            .field("remote_path", &self.config.remote_path)
            .field("local_path", &self.config.local_path)
            .field("status", &self.status())
            .field("running", &self.is_running())
            .finish()
    }
}
