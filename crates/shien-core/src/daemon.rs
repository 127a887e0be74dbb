//! Core daemon process: startup, serving, draining, and shutdown.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use shien_config::{AppConfig, ConfigError, DataDir};

use crate::dispatch::{CommandRegistry, DispatchContext, Dispatcher};
use crate::ipc::server::{self, AcceptFault};
use crate::ipc::ChannelError;
use crate::lifecycle::{DaemonState, Lifecycle, LifecycleError, LifecycleHandle};

/// The shien daemon.
///
/// Owns the lifecycle state and, while running, the control socket.
pub struct Daemon {
    config: AppConfig,
    socket_path: PathBuf,
    registry: Arc<CommandRegistry>,
    lifecycle: Lifecycle,
    handle_signals: bool,
}

impl Daemon {
    /// Create a daemon serving the built-in commands at `socket_path`.
    pub fn new(config: AppConfig, socket_path: impl Into<PathBuf>) -> Self {
        Self {
            config,
            socket_path: socket_path.into(),
            registry: Arc::new(CommandRegistry::with_builtins()),
            lifecycle: Lifecycle::new(),
            handle_signals: true,
        }
    }

    /// Create a daemon whose socket path comes from `config` and `data_dir`.
    pub fn from_config(config: AppConfig, data_dir: &DataDir) -> Result<Self, DaemonError> {
        let socket_path = config.socket_path(data_dir)?;
        Ok(Self::new(config, socket_path))
    }

    /// Replace the command registry. Only meaningful before [`Daemon::run`].
    pub fn with_registry(mut self, registry: CommandRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    /// Do not install SIGINT/SIGTERM handlers; shutdown then only happens
    /// through [`LifecycleHandle::request_shutdown`] or the `shutdown`
    /// command. Used when several daemons share one process.
    pub fn without_signal_handlers(mut self) -> Self {
        self.handle_signals = false;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn state(&self) -> DaemonState {
        self.lifecycle.state()
    }

    /// A handle for observing the daemon or requesting shutdown.
    pub fn handle(&self) -> LifecycleHandle {
        self.lifecycle.handle()
    }

    /// Request a graceful shutdown of the daemon.
    pub fn shutdown(&self) {
        self.lifecycle.handle().request_shutdown();
    }

    /// Run the daemon until a termination request, then drain and stop.
    ///
    /// Returns `Ok` for a clean stop. Startup failures and a broken accept
    /// loop return an error after the daemon has reached `Stopped`.
    pub async fn run(&self) -> Result<(), DaemonError> {
        let state = self.lifecycle.state();
        if state != DaemonState::Starting {
            return Err(LifecycleError::IllegalTransition {
                from: state,
                to: DaemonState::Ready,
            }
            .into());
        }

        info!(
            socket = %self.socket_path.display(),
            version = %crate::build_info::version_string(),
            commands = self.registry.len(),
            "shien daemon starting"
        );

        let listener = match server::listen(&self.socket_path).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(error = %e, "Failed to bind control socket");
                self.lifecycle.transition(DaemonState::Stopped)?;
                return Err(e.into());
            }
        };

        let ctx = DispatchContext::new(self.lifecycle.handle(), self.socket_path.clone());
        let dispatcher = Dispatcher::new(Arc::clone(&self.registry), ctx);
        let tracker = TaskTracker::new();
        let cancel = CancellationToken::new();

        self.lifecycle.transition(DaemonState::Ready)?;
        info!("Daemon ready");

        let handle = self.lifecycle.handle();
        let served = server::serve(
            &listener,
            &dispatcher,
            &handle,
            &tracker,
            &cancel,
            self.wait_for_termination(),
        )
        .await;

        if let Err(fault) = served {
            error!(error = %fault, "Control socket failed; stopping daemon");
            listener.close().remove();
            cancel.cancel();
            self.lifecycle.transition(DaemonState::Stopped)?;
            return Err(fault.into());
        }

        self.lifecycle.transition(DaemonState::Draining)?;
        let (queued, endpoint) = listener.close_draining();
        if !queued.is_empty() {
            debug!(queued = queued.len(), "Answering connections queued before draining");
        }
        for stream in queued {
            server::spawn_connection(stream, &dispatcher, &handle, &tracker, &cancel);
        }
        tracker.close();

        let grace = self.config.grace_period();
        info!(
            in_flight = tracker.len(),
            grace_secs = grace.as_secs(),
            "Draining in-flight requests"
        );
        if tokio::time::timeout(grace, tracker.wait()).await.is_err() {
            warn!(in_flight = tracker.len(), "Grace period elapsed, forcing stop");
            cancel.cancel();
        }

        endpoint.remove();
        self.lifecycle.transition(DaemonState::Stopped)?;
        info!("Daemon stopped");
        Ok(())
    }

    async fn wait_for_termination(&self) {
        tokio::select! {
            _ = self.lifecycle.shutdown_requested() => {
                info!("Shutdown requested");
            }
            signal = termination_signal(), if self.handle_signals => {
                warn!(signal, "Termination signal received, initiating graceful shutdown");
            }
        }
    }
}

/// Resolves with the name of the first SIGINT or SIGTERM received.
async fn termination_signal() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => Some(stream),
        Err(e) => {
            warn!(error = %e, "Cannot listen for SIGTERM");
            None
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => "SIGINT",
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGINT");
                std::future::pending().await
            }
        },
        Some(()) = async {
            match terminate.as_mut() {
                Some(stream) => stream.recv().await,
                None => std::future::pending().await,
            }
        } => "SIGTERM",
    }
}

/// Errors from the daemon runtime.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    AcceptLoop(#[from] AcceptFault),
}
