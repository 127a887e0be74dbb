//! Control channel, client side.
//!
//! Every call opens a fresh connection, sends one framed request, waits
//! for one framed response within a deadline, and closes. Nothing is
//! retried: a daemon that is down or unresponsive is reported straight
//! back to the caller.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::net::UnixStream;
use tokio::time::Instant;
use tracing::debug;

use super::codec;
use super::{ChannelError, CommandRequest, CommandResponse};

/// Send `request` to the daemon listening at `endpoint` and wait up to
/// `timeout` for its response.
///
/// The deadline covers connecting, writing, and reading together.
pub async fn send_request(
    endpoint: &Path,
    request: &CommandRequest,
    timeout: Duration,
) -> Result<CommandResponse, ChannelError> {
    let deadline = Instant::now() + timeout;

    let stream = tokio::time::timeout_at(deadline, UnixStream::connect(endpoint))
        .await
        .map_err(|_| ChannelError::Timeout(timeout))?
        .map_err(|e| ChannelError::from_connect(endpoint.to_path_buf(), e))?;

    debug!(endpoint = %endpoint.display(), command = %request.name, "Sending request");

    let exchange = async {
        let mut framed = codec::framed(stream);
        codec::write_message(&mut framed, request).await?;
        let body = codec::read_frame(&mut framed).await?.ok_or_else(|| {
            ChannelError::Protocol("daemon closed the connection without responding".to_string())
        })?;
        codec::decode::<CommandResponse>(&body)
    };

    tokio::time::timeout_at(deadline, exchange)
        .await
        .map_err(|_| ChannelError::Timeout(timeout))?
}

/// Exit status of one `shienctl` invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The daemon answered OK.
    Success,
    /// The daemon answered ERROR (unknown command, bad arguments, handler failure).
    CommandFailed,
    /// No daemon is listening.
    Unreachable,
    /// The daemon accepted the connection but did not answer in time.
    TimedOut,
    /// Any other transport or protocol fault.
    ChannelFault,
}

impl Outcome {
    pub fn exit_code(self) -> u8 {
        match self {
            Outcome::Success => 0,
            Outcome::CommandFailed => 1,
            Outcome::Unreachable => 3,
            Outcome::TimedOut => 4,
            Outcome::ChannelFault => 5,
        }
    }
}

/// One-shot command submission for the control tool.
#[derive(Debug, Clone)]
pub struct ControlClient {
    endpoint: PathBuf,
    timeout: Duration,
}

impl ControlClient {
    pub fn new(endpoint: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout,
        }
    }

    pub fn endpoint(&self) -> &Path {
        &self.endpoint
    }

    /// Send one command and return the daemon's response.
    pub async fn call(
        &self,
        name: &str,
        args: Vec<String>,
    ) -> Result<CommandResponse, ChannelError> {
        send_request(&self.endpoint, &CommandRequest::new(name, args), self.timeout).await
    }

    /// Liveness probe.
    pub async fn ping(&self) -> Result<(), ChannelError> {
        let response = self.call("ping", Vec::new()).await?;
        match response.error_detail() {
            None => Ok(()),
            Some(detail) => Err(ChannelError::Protocol(format!("ping failed: {detail}"))),
        }
    }

    /// Run `name` with `args` and print a single-line result: the payload
    /// on `out` for success, a diagnostic on `err` otherwise.
    pub async fn run(
        &self,
        name: &str,
        args: Vec<String>,
        out: &mut impl Write,
        err: &mut impl Write,
    ) -> Outcome {
        let (outcome, written) = match self.call(name, args).await {
            Ok(response) => match response.error_detail() {
                None => (Outcome::Success, writeln!(out, "{}", response.payload())),
                Some(detail) => (Outcome::CommandFailed, writeln!(err, "error: {detail}")),
            },
            Err(e) => {
                let outcome = match &e {
                    ChannelError::Connect { .. } => Outcome::Unreachable,
                    ChannelError::Timeout(_) => Outcome::TimedOut,
                    _ => Outcome::ChannelFault,
                };
                (outcome, writeln!(err, "shienctl: {}", self.describe(&e)))
            }
        };
        if let Err(e) = written {
            debug!(error = %e, "Failed to write command output");
        }
        outcome
    }

    fn describe(&self, error: &ChannelError) -> String {
        match error {
            ChannelError::Connect { .. } => format!(
                "daemon unreachable (no daemon listening at {})",
                self.endpoint.display()
            ),
            ChannelError::Timeout(limit) => format!(
                "daemon did not respond within {}ms",
                limit.as_millis()
            ),
            other => other.to_string(),
        }
    }
}
