#![deny(unsafe_code)]

//! shien core daemon runtime.
//!
//! Provides the control channel, the command dispatcher, and the daemon
//! lifecycle. The `shien` binary runs a [`Daemon`]; the `shienctl` control
//! tool talks to it through [`ipc::ControlClient`].

use std::future::Future;
use std::pin::Pin;

/// A type-erased, `Send`-safe, boxed future. Command handlers return this
/// so they can live behind `dyn CommandHandler`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Compile-time build metadata (version, git hash, profile).
pub mod build_info;
/// Daemon runtime: bind, serve, drain, stop.
pub mod daemon;
/// Command registry and dispatcher.
pub mod dispatch;
/// Unix socket control channel.
pub mod ipc;
/// Daemon state machine.
pub mod lifecycle;
/// Log routing for the daemon and the control tool.
pub mod logging;

pub use daemon::{Daemon, DaemonError};
pub use dispatch::{
    CommandError, CommandHandler, CommandRegistry, DispatchContext, Dispatcher, RegistryBuilder,
};
pub use ipc::{ChannelError, CommandRequest, CommandResponse, ControlClient, Outcome};
pub use lifecycle::{DaemonState, Lifecycle, LifecycleError, LifecycleHandle};
