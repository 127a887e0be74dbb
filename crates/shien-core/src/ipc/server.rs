//! Control channel, daemon side: bind the rendezvous socket, accept
//! connections, and answer one request per connection.

use std::future::Future;
use std::io::ErrorKind;
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::codec::{self, FramedStream};
use super::{ChannelError, CommandRequest, CommandResponse};
use crate::dispatch::{CommandError, Dispatcher};
use crate::lifecycle::{DaemonState, LifecycleHandle};

/// How long a probe connection to an existing socket file may take before
/// the file is considered stale.
const PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// How long an accepted connection may sit idle before its request arrives.
pub const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Consecutive transient accept failures tolerated before the listener is
/// declared broken.
pub const MAX_CONSECUTIVE_ACCEPT_ERRORS: u32 = 16;

/// Detail sent to clients whose request arrives after draining started.
pub const DRAINING_DETAIL: &str = "daemon is draining";

/// A bound control socket. Only the lifecycle owner holds one.
#[derive(Debug)]
pub struct ControlListener {
    listener: UnixListener,
    path: PathBuf,
}

/// Bind the control socket at `path`.
///
/// A leftover socket file from a crashed daemon is removed. A socket file
/// with a live daemon behind it is a [`ChannelError::Bind`].
pub async fn listen(path: &Path) -> Result<ControlListener, ChannelError> {
    let permission = |source: std::io::Error| ChannelError::Permission {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(|e| match e.kind() {
            ErrorKind::PermissionDenied => permission(e),
            _ => ChannelError::Io(e),
        })?;
    }

    if let Ok(meta) = tokio::fs::symlink_metadata(path).await {
        if !meta.file_type().is_socket() {
            return Err(ChannelError::NotASocket {
                path: path.to_path_buf(),
            });
        }
        let live = matches!(
            tokio::time::timeout(PROBE_TIMEOUT, UnixStream::connect(path)).await,
            Ok(Ok(_)) | Err(_)
        );
        if live {
            return Err(ChannelError::Bind {
                path: path.to_path_buf(),
            });
        }
        warn!(path = %path.display(), "Removing stale control socket");
        tokio::fs::remove_file(path).await.map_err(|e| match e.kind() {
            ErrorKind::PermissionDenied => permission(e),
            _ => ChannelError::Io(e),
        })?;
    }

    let listener = UnixListener::bind(path).map_err(|e| match e.kind() {
        ErrorKind::AddrInUse => ChannelError::Bind {
            path: path.to_path_buf(),
        },
        ErrorKind::PermissionDenied => permission(e),
        _ => ChannelError::Io(e),
    })?;

    if let Err(e) =
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await
    {
        drop(listener);
        let _ = std::fs::remove_file(path);
        return Err(permission(e));
    }

    info!(path = %path.display(), "Control socket listening");
    Ok(ControlListener {
        listener,
        path: path.to_path_buf(),
    })
}

impl ControlListener {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wait for the next client connection.
    pub async fn accept(&self) -> std::io::Result<UnixStream> {
        let (stream, _addr) = self.listener.accept().await?;
        Ok(stream)
    }

    /// Stop listening. New connection attempts are refused from here on,
    /// but the socket file stays until [`ReleasedEndpoint::remove`].
    pub fn close(self) -> ReleasedEndpoint {
        let ControlListener { listener, path } = self;
        drop(listener);
        debug!(path = %path.display(), "Control socket closed");
        ReleasedEndpoint { path }
    }

    /// Stop listening, first taking every connection the kernel has
    /// already queued. Those clients connected while the daemon was ready
    /// and are owed a response rather than a reset.
    pub fn close_draining(self) -> (Vec<UnixStream>, ReleasedEndpoint) {
        let ControlListener { listener, path } = self;
        let mut queued = Vec::new();

        match listener.into_std() {
            Ok(listener) => loop {
                match listener.accept() {
                    Ok((stream, _addr)) => {
                        let adopted = stream
                            .set_nonblocking(true)
                            .and_then(|()| UnixStream::from_std(stream));
                        match adopted {
                            Ok(stream) => queued.push(stream),
                            Err(e) => warn!(error = %e, "Dropping queued connection"),
                        }
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => {
                        warn!(error = %e, "Failed to accept queued connection");
                        break;
                    }
                }
            },
            Err(e) => warn!(error = %e, "Cannot take queued connections"),
        }

        debug!(path = %path.display(), queued = queued.len(), "Control socket closed");
        (queued, ReleasedEndpoint { path })
    }
}

/// The socket path of a listener that has stopped accepting.
#[derive(Debug)]
pub struct ReleasedEndpoint {
    path: PathBuf,
}

impl ReleasedEndpoint {
    /// Remove the socket file.
    pub fn remove(self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Control socket removed"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to remove control socket"
                );
            }
        }
    }
}

/// The accept loop broke in a way that leaves the daemon unpingable.
#[derive(Debug, thiserror::Error)]
#[error("control socket can no longer accept connections: {0}")]
pub struct AcceptFault(pub std::io::Error);

/// Accept connections until `stop` resolves.
///
/// Each connection is handled on its own task, registered with `tracker`
/// so the caller can wait for in-flight requests while draining. Tasks
/// abandon their work when `cancel` fires.
pub async fn serve(
    listener: &ControlListener,
    dispatcher: &Dispatcher,
    lifecycle: &LifecycleHandle,
    tracker: &TaskTracker,
    cancel: &CancellationToken,
    stop: impl Future<Output = ()>,
) -> Result<(), AcceptFault> {
    tokio::pin!(stop);
    let mut consecutive_errors = 0u32;

    loop {
        tokio::select! {
            biased;
            _ = &mut stop => {
                debug!("Accept loop stopping");
                return Ok(());
            }
            accepted = listener.accept() => match accepted {
                Ok(stream) => {
                    consecutive_errors = 0;
                    spawn_connection(stream, dispatcher, lifecycle, tracker, cancel);
                }
                Err(e) if is_transient(&e) => {
                    consecutive_errors += 1;
                    warn!(error = %e, consecutive_errors, "Accept failed");
                    if consecutive_errors >= MAX_CONSECUTIVE_ACCEPT_ERRORS {
                        error!(error = %e, "Too many consecutive accept failures");
                        return Err(AcceptFault(e));
                    }
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                Err(e) => {
                    error!(error = %e, "Accept failed fatally");
                    return Err(AcceptFault(e));
                }
            }
        }
    }
}

/// Handle `stream` on a task registered with `tracker`.
pub fn spawn_connection(
    stream: UnixStream,
    dispatcher: &Dispatcher,
    lifecycle: &LifecycleHandle,
    tracker: &TaskTracker,
    cancel: &CancellationToken,
) {
    let dispatcher = dispatcher.clone();
    let lifecycle = lifecycle.clone();
    let cancel = cancel.clone();
    tracker.spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {
                warn!("Connection abandoned by forced stop");
            }
            result = handle_connection(stream, &dispatcher, &lifecycle) => {
                if let Err(e) = result {
                    debug!(error = %e, "Connection ended with error");
                }
            }
        }
    });
}

fn is_transient(e: &std::io::Error) -> bool {
    // EMFILE / ENFILE: out of descriptors, may recover once connections close.
    matches!(e.raw_os_error(), Some(23) | Some(24))
        || matches!(
            e.kind(),
            ErrorKind::ConnectionAborted
                | ErrorKind::ConnectionReset
                | ErrorKind::Interrupted
                | ErrorKind::WouldBlock
                | ErrorKind::TimedOut
        )
}

/// Read one request, answer it, and close.
pub async fn handle_connection(
    stream: UnixStream,
    dispatcher: &Dispatcher,
    lifecycle: &LifecycleHandle,
) -> Result<(), ChannelError> {
    let mut framed = codec::framed(stream);

    let read = tokio::time::timeout(REQUEST_READ_TIMEOUT, codec::read_frame(&mut framed));
    let body = match read.await {
        Err(_) => {
            debug!("Client sent no request in time");
            return Err(ChannelError::Timeout(REQUEST_READ_TIMEOUT));
        }
        Ok(Ok(None)) => {
            debug!("Client disconnected without sending a request");
            return Ok(());
        }
        Ok(Ok(Some(body))) => body,
        Ok(Err(ChannelError::Protocol(reason))) => {
            let detail = CommandError::Malformed(reason).to_string();
            return respond(&mut framed, &CommandResponse::error(detail)).await;
        }
        Ok(Err(e)) => return Err(e),
    };

    let response = match codec::decode::<CommandRequest>(&body) {
        Err(e) => {
            debug!(error = %e, "Rejecting malformed request");
            CommandResponse::error(CommandError::Malformed(e.to_string()).to_string())
        }
        Ok(request) => match lifecycle.state() {
            DaemonState::Ready => {
                debug!(command = %request.name, args = request.args.len(), "Dispatching");
                dispatcher.dispatch(&request).await
            }
            state => {
                debug!(command = %request.name, %state, "Refusing request while not ready");
                CommandResponse::error(not_ready_detail(state))
            }
        },
    };

    respond(&mut framed, &response).await
}

fn not_ready_detail(state: DaemonState) -> String {
    match state {
        DaemonState::Draining => DRAINING_DETAIL.to_string(),
        other => format!("daemon is {other}"),
    }
}

async fn respond(
    framed: &mut FramedStream<UnixStream>,
    response: &CommandResponse,
) -> Result<(), ChannelError> {
    codec::write_message(framed, response).await
}
