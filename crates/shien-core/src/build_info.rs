//! Build-time metadata embedded by the build script.

/// Short git commit hash, or `"unknown"` outside a checkout.
pub const GIT_HASH: &str = env!("SHIEN_GIT_HASH");

/// Build time as Unix epoch seconds.
pub const BUILD_TIMESTAMP: &str = env!("SHIEN_BUILD_TIMESTAMP");

/// Cargo profile the binary was built with (`debug` or `release`).
pub const BUILD_PROFILE: &str = env!("SHIEN_BUILD_PROFILE");

/// Package version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Human-readable version line, e.g. `"0.1.0 (abc1234, release)"`.
///
/// Answered by the `version` command and printed by `--version`.
pub fn version_string() -> String {
    if GIT_HASH == "unknown" {
        format!("{VERSION} ({BUILD_PROFILE})")
    } else {
        format!("{VERSION} ({GIT_HASH}, {BUILD_PROFILE})")
    }
}
