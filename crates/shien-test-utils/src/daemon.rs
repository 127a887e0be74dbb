//! Running-daemon fixture.
//!
//! [`TestDaemon`] starts a real [`Daemon`] on a socket inside its own temp
//! directory and waits until it is `Ready`. The directory, and with it the
//! socket, is removed when the fixture is dropped.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use shien_config::{AppConfig, DataDir};
use shien_core::{
    CommandRegistry, ControlClient, Daemon, DaemonError, DaemonState, LifecycleHandle,
};
use tempfile::TempDir;
use tokio::task::JoinHandle;

const READY_TIMEOUT: Duration = Duration::from_secs(5);

/// A daemon running on a background task for the duration of a test.
pub struct TestDaemon {
    daemon: Arc<Daemon>,
    task: Option<JoinHandle<Result<(), DaemonError>>>,
    data_dir: PathBuf,
    _temp_dir: TempDir,
}

impl TestDaemon {
    /// Start a daemon with the default config and built-in commands.
    pub async fn start() -> Self {
        Self::start_with(AppConfig::default(), CommandRegistry::with_builtins()).await
    }

    /// Start a daemon with `config` and the built-in commands.
    pub async fn with_config(config: AppConfig) -> Self {
        Self::start_with(config, CommandRegistry::with_builtins()).await
    }

    /// Start a daemon with `config` serving `registry`.
    pub async fn start_with(config: AppConfig, registry: CommandRegistry) -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let data_dir = temp_dir.path().to_path_buf();

        let daemon = Daemon::from_config(config, &DataDir::at(&data_dir))
            .expect("failed to resolve socket path")
            .with_registry(registry)
            .without_signal_handlers();
        let daemon = Arc::new(daemon);
        let handle = daemon.handle();

        let task = {
            let daemon = Arc::clone(&daemon);
            tokio::spawn(async move { daemon.run().await })
        };

        let reached = tokio::time::timeout(READY_TIMEOUT, handle.wait_for(DaemonState::Ready))
            .await
            .expect("daemon did not become ready in time");
        assert_eq!(reached, DaemonState::Ready, "daemon stopped during startup");

        Self {
            daemon,
            task: Some(task),
            data_dir,
            _temp_dir: temp_dir,
        }
    }

    pub fn socket_path(&self) -> &Path {
        self.daemon.socket_path()
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn state(&self) -> DaemonState {
        self.daemon.state()
    }

    pub fn handle(&self) -> LifecycleHandle {
        self.daemon.handle()
    }

    /// A client for this daemon using the configured timeout.
    pub fn client(&self) -> ControlClient {
        self.client_with_timeout(self.daemon.config().client_timeout())
    }

    pub fn client_with_timeout(&self, timeout: Duration) -> ControlClient {
        ControlClient::new(self.socket_path(), timeout)
    }

    /// Request shutdown and wait for the daemon task to finish.
    pub async fn shutdown(mut self) -> Result<(), DaemonError> {
        self.daemon.shutdown();
        self.join().await
    }

    /// Wait for the daemon task to finish without requesting shutdown.
    pub async fn join(&mut self) -> Result<(), DaemonError> {
        let task = self.task.take().expect("daemon already joined");
        task.await.expect("daemon task panicked")
    }
}

impl Drop for TestDaemon {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            self.daemon.shutdown();
            task.abort();
        }
    }
}
