//! Transport-level failures of the control channel.

use std::path::PathBuf;
use std::time::Duration;

/// Errors from binding, connecting to, or exchanging frames over the
/// control socket.
///
/// These are fatal to the current operation and are never retried inside
/// the channel. Command-level failures are not represented here; they
/// travel back as an error [`CommandResponse`](super::CommandResponse).
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("control socket {path} is already in use by a running daemon")]
    Bind { path: PathBuf },

    #[error("{path} exists and is not a socket; refusing to replace it")]
    NotASocket { path: PathBuf },

    #[error("permission denied for control socket {path}: {source}")]
    Permission {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("no daemon listening at {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("no response from daemon within {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChannelError {
    /// Whether this error means no daemon could be reached at all, as
    /// opposed to a daemon that was reached but misbehaved.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, ChannelError::Connect { .. })
    }

    /// Classify a connect-time IO error for `path`.
    pub(crate) fn from_connect(path: PathBuf, source: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match source.kind() {
            ErrorKind::PermissionDenied => ChannelError::Permission { path, source },
            _ => ChannelError::Connect { path, source },
        }
    }
}
