//! Command registry and dispatcher.
//!
//! The registry is a static `name → Handler` map built once at startup and
//! never mutated afterwards, so lookups need no locking. Dispatch turns
//! every failure, including an unknown name, a bad argument list, a
//! handler error, or a handler panic, into an error [`CommandResponse`].
//! Nothing a command does can take the daemon down.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tracing::{debug, warn};

use crate::BoxFuture;
use crate::ipc::{CommandRequest, CommandResponse};
use crate::lifecycle::LifecycleHandle;

/// Name of the liveness probe.
pub const PING: &str = "ping";

/// Command-level failures. Always reported to the caller as an error
/// response, never as a transport failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("unknown command: {0}")]
    Unknown(String),

    #[error("invalid arguments for {command}: {reason}")]
    InvalidArguments { command: String, reason: String },

    #[error("malformed request: {0}")]
    Malformed(String),

    #[error("{0}")]
    Failed(String),

    #[error("command panicked: {0}")]
    Panicked(String),
}

/// A command implemented outside the built-in set.
///
/// Registered at startup through [`RegistryBuilder::custom`].
pub trait CommandHandler: Send + Sync {
    fn call<'a>(
        &'a self,
        ctx: &'a DispatchContext,
        args: &'a [String],
    ) -> BoxFuture<'a, Result<String, CommandError>>;
}

/// What a registry entry resolves to.
#[derive(Clone)]
pub enum Handler {
    /// Liveness probe. Always answers `pong`.
    Ping,
    /// One-line daemon status.
    Status,
    /// Build version.
    Version,
    /// Begin a graceful shutdown.
    Shutdown,
    Custom(Arc<dyn CommandHandler>),
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Handler::Ping => f.write_str("Ping"),
            Handler::Status => f.write_str("Status"),
            Handler::Version => f.write_str("Version"),
            Handler::Shutdown => f.write_str("Shutdown"),
            Handler::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl Handler {
    async fn invoke(
        &self,
        ctx: &DispatchContext,
        name: &str,
        args: &[String],
    ) -> Result<String, CommandError> {
        match self {
            Handler::Ping => {
                expect_no_args(name, args)?;
                Ok("pong".to_string())
            }
            Handler::Status => {
                expect_no_args(name, args)?;
                Ok(ctx.status_line())
            }
            Handler::Version => {
                expect_no_args(name, args)?;
                Ok(crate::build_info::version_string())
            }
            Handler::Shutdown => {
                expect_no_args(name, args)?;
                ctx.lifecycle.request_shutdown();
                Ok("shutting down".to_string())
            }
            Handler::Custom(handler) => handler.call(ctx, args).await,
        }
    }
}

fn expect_no_args(name: &str, args: &[String]) -> Result<(), CommandError> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(CommandError::InvalidArguments {
            command: name.to_string(),
            reason: format!("expected none, got {}", args.len()),
        })
    }
}

/// Immutable mapping from command name to handler.
#[derive(Debug, Clone, Default)]
pub struct CommandRegistry {
    commands: HashMap<String, Handler>,
}

impl CommandRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// A registry with only the built-in commands.
    pub fn with_builtins() -> Self {
        Self::builder().with_builtins().build()
    }

    /// Look up a command by its exact, case-sensitive name.
    pub fn get(&self, name: &str) -> Option<&Handler> {
        self.commands.get(name)
    }

    /// Registered command names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.commands.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Startup-time builder for a [`CommandRegistry`].
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    commands: HashMap<String, Handler>,
}

impl RegistryBuilder {
    /// Add `ping`, `status`, `version`, and `shutdown`.
    pub fn with_builtins(self) -> Self {
        self.register(PING, Handler::Ping)
            .register("status", Handler::Status)
            .register("version", Handler::Version)
            .register("shutdown", Handler::Shutdown)
    }

    /// Register `handler` under `name`, replacing any earlier entry.
    ///
    /// `ping` is the liveness probe and always answers `pong`; any other
    /// handler registered under that name is ignored.
    pub fn register(mut self, name: impl Into<String>, handler: Handler) -> Self {
        let name = name.into();
        if name == PING && !matches!(handler, Handler::Ping) {
            warn!(command = %name, "Refusing to replace the liveness probe");
            return self;
        }
        if self.commands.insert(name.clone(), handler).is_some() {
            debug!(command = %name, "Replacing registered command");
        }
        self
    }

    /// Register a custom handler under `name`.
    pub fn custom(self, name: impl Into<String>, handler: impl CommandHandler + 'static) -> Self {
        self.register(name, Handler::Custom(Arc::new(handler)))
    }

    pub fn build(self) -> CommandRegistry {
        CommandRegistry {
            commands: self.commands,
        }
    }
}

/// Read-only daemon facts available to every handler.
#[derive(Debug, Clone)]
pub struct DispatchContext {
    pub lifecycle: LifecycleHandle,
    pub socket_path: PathBuf,
    pub started_at: DateTime<Utc>,
    started: Instant,
}

impl DispatchContext {
    pub fn new(lifecycle: LifecycleHandle, socket_path: PathBuf) -> Self {
        Self {
            lifecycle,
            socket_path,
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    fn status_line(&self) -> String {
        format!(
            "state={} pid={} uptime={}s version={}",
            self.lifecycle.state(),
            std::process::id(),
            self.uptime_secs(),
            crate::build_info::VERSION,
        )
    }
}

/// Executes one request against the registry.
///
/// Holds no per-request state; every connection can share one dispatcher.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<CommandRegistry>,
    ctx: DispatchContext,
}

impl Dispatcher {
    pub fn new(registry: Arc<CommandRegistry>, ctx: DispatchContext) -> Self {
        Self { registry, ctx }
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    pub fn context(&self) -> &DispatchContext {
        &self.ctx
    }

    /// Run `request` and convert the outcome into a response.
    pub async fn dispatch(&self, request: &CommandRequest) -> CommandResponse {
        match self.execute(request).await {
            Ok(payload) => {
                debug!(command = %request.name, "Command succeeded");
                CommandResponse::ok(payload)
            }
            Err(err) => {
                match &err {
                    CommandError::Unknown(_) | CommandError::InvalidArguments { .. } => {
                        debug!(command = %request.name, error = %err, "Command rejected");
                    }
                    _ => warn!(command = %request.name, error = %err, "Command failed"),
                }
                CommandResponse::error(err.to_string())
            }
        }
    }

    async fn execute(&self, request: &CommandRequest) -> Result<String, CommandError> {
        if request.name.is_empty() {
            return Err(CommandError::Malformed("empty command name".to_string()));
        }
        let handler = self
            .registry
            .get(&request.name)
            .ok_or_else(|| CommandError::Unknown(request.name.clone()))?;

        AssertUnwindSafe(handler.invoke(&self.ctx, &request.name, &request.args))
            .catch_unwind()
            .await
            .map_err(|panic| CommandError::Panicked(panic_message(panic.as_ref())))?
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
