//! Request/response types exchanged over the control channel.
//!
//! Both the daemon and `shienctl` use these types. They travel as JSON
//! inside length-prefixed frames (see [`codec`](super::codec)).

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single command sent from the control client to the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRequest {
    /// Command name, matched case-sensitively against the registry.
    pub name: String,
    /// Positional arguments, in order.
    #[serde(default)]
    pub args: Vec<String>,
    /// When the client issued the request.
    pub issued_at: DateTime<Utc>,
}

impl CommandRequest {
    /// Build a request stamped with the current time.
    pub fn new(name: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            args,
            issued_at: Utc::now(),
        }
    }

    /// A `ping` liveness probe.
    pub fn ping() -> Self {
        Self::new("ping", Vec::new())
    }
}

/// Outcome of a dispatched command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Ok,
    Error,
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseStatus::Ok => f.write_str("OK"),
            ResponseStatus::Error => f.write_str("ERROR"),
        }
    }
}

/// The daemon's answer to a [`CommandRequest`].
///
/// `error` is present if and only if `status` is [`ResponseStatus::Error`].
/// The constructors uphold this, and decoding rejects bodies that break it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawResponse")]
pub struct CommandResponse {
    status: ResponseStatus,
    #[serde(default)]
    payload: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl CommandResponse {
    /// A successful response carrying `payload`.
    pub fn ok(payload: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Ok,
            payload: payload.into(),
            error: None,
        }
    }

    /// A failed response with a human-readable `detail`.
    pub fn error(detail: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Error,
            payload: String::new(),
            error: Some(detail.into()),
        }
    }

    pub fn status(&self) -> ResponseStatus {
        self.status
    }

    pub fn is_ok(&self) -> bool {
        self.status == ResponseStatus::Ok
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Error detail; `Some` exactly when the status is `Error`.
    pub fn error_detail(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

/// Unchecked wire shape, validated into a [`CommandResponse`].
#[derive(Deserialize)]
struct RawResponse {
    status: ResponseStatus,
    #[serde(default)]
    payload: String,
    #[serde(default)]
    error: Option<String>,
}

impl TryFrom<RawResponse> for CommandResponse {
    type Error = String;

    fn try_from(raw: RawResponse) -> Result<Self, Self::Error> {
        match (raw.status, &raw.error) {
            (ResponseStatus::Ok, Some(_)) => {
                Err("ok response must not carry an error detail".to_string())
            }
            (ResponseStatus::Error, None) => {
                Err("error response is missing its error detail".to_string())
            }
            _ => Ok(Self {
                status: raw.status,
                payload: raw.payload,
                error: raw.error,
            }),
        }
    }
}
