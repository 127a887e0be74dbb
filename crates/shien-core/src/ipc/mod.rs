//! Control channel: Unix domain socket transport between `shienctl` and
//! the daemon.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐      Unix socket       ┌──────────────┐
//! │ shienctl │───────────────────────▶│ Control      │
//! │          │  length-prefixed JSON  │ Channel      │
//! └──────────┘  one request/response  └──────┬───────┘
//!                 per connection             │
//!                                     ┌──────▼───────┐
//!                                     │  Dispatcher  │
//!                                     └──────────────┘
//! ```

pub mod client;
pub mod codec;
pub mod error;
pub mod server;
pub mod types;

pub use client::{ControlClient, Outcome, send_request};
pub use error::ChannelError;
pub use server::{ControlListener, listen};
pub use types::*;
