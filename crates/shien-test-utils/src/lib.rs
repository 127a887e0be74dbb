#![deny(unsafe_code)]

//! Shared test utilities for the shien workspace.
//!
//! Provides a throwaway running daemon, config builders, and tracing
//! helpers so that integration tests stay concise and consistent.
//!
//! Add this crate as a `[dev-dependency]` in any workspace member:
//!
//! ```toml
//! [dev-dependencies]
//! shien-test-utils = { workspace = true }
//! ```

pub mod config;
pub mod daemon;
pub mod tracing_setup;

pub use config::TestConfigBuilder;
pub use daemon::TestDaemon;
pub use tracing_setup::init_test_tracing;
