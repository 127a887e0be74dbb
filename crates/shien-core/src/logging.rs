//! Service log routing.
//!
//! A supervised daemon writes diagnostics to two append-only destinations:
//! normal output (INFO and below) and errors (WARN and ERROR). Each one is
//! a file supplied by the supervisor or, when no path is given, the
//! process's own stdout / stderr.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::filter::{LevelFilter, filter_fn};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Errors from logging setup.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("failed to open log file {path}: {source}")]
    Open { path: PathBuf, source: io::Error },

    #[error("invalid log filter {directive:?}: {reason}")]
    Filter { directive: String, reason: String },

    #[error("failed to install log subscriber: {0}")]
    Init(String),
}

/// Where one class of log events goes.
pub struct LogDestination {
    writer: BoxMakeWriter,
    ansi: bool,
    label: String,
}

impl LogDestination {
    pub fn stdout() -> Self {
        Self {
            writer: BoxMakeWriter::new(io::stdout),
            ansi: false,
            label: "stdout".to_string(),
        }
    }

    pub fn stderr() -> Self {
        Self {
            writer: BoxMakeWriter::new(io::stderr),
            ansi: false,
            label: "stderr".to_string(),
        }
    }

    /// Append to `path`, creating it and its parent directory if needed.
    pub fn append_file(path: &Path) -> Result<Self, LoggingError> {
        let open_err = |source| LoggingError::Open {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(open_err)?;
        }
        let file: File = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(open_err)?;
        Ok(Self {
            writer: BoxMakeWriter::new(Arc::new(file)),
            ansi: false,
            label: path.display().to_string(),
        })
    }

    /// A file when `path` is set, `fallback` otherwise.
    pub fn file_or(path: Option<&Path>, fallback: fn() -> Self) -> Result<Self, LoggingError> {
        match path {
            Some(path) => Self::append_file(path),
            None => Ok(fallback()),
        }
    }

    /// Any writer; used by tests to capture output.
    pub fn custom(writer: BoxMakeWriter, label: impl Into<String>) -> Self {
        Self {
            writer,
            ansi: false,
            label: label.into(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

/// Layers that route INFO/DEBUG/TRACE to `normal` and WARN/ERROR to
/// `errors`.
pub fn split_layers(
    normal: LogDestination,
    errors: LogDestination,
) -> Vec<Box<dyn Layer<Registry> + Send + Sync>> {
    let normal_layer = tracing_subscriber::fmt::layer()
        .with_writer(normal.writer)
        .with_ansi(normal.ansi)
        .with_target(true)
        .with_filter(filter_fn(|meta| *meta.level() > Level::WARN))
        .boxed();
    let error_layer = tracing_subscriber::fmt::layer()
        .with_writer(errors.writer)
        .with_ansi(errors.ansi)
        .with_target(true)
        .with_filter(LevelFilter::WARN)
        .boxed();
    vec![normal_layer, error_layer]
}

/// Build the level filter: `RUST_LOG` when set, otherwise `directive`.
pub fn env_filter(directive: &str) -> Result<EnvFilter, LoggingError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(directive).map_err(|e| LoggingError::Filter {
        directive: directive.to_string(),
        reason: e.to_string(),
    })
}

/// Install the daemon's global subscriber.
pub fn init_service_logging(
    directive: &str,
    stdout_log: Option<&Path>,
    stderr_log: Option<&Path>,
) -> Result<(), LoggingError> {
    let filter = env_filter(directive)?;
    let normal = LogDestination::file_or(stdout_log, LogDestination::stdout)?;
    let errors = LogDestination::file_or(stderr_log, LogDestination::stderr)?;
    let (normal_label, error_label) = (normal.label.clone(), errors.label.clone());

    tracing_subscriber::registry()
        .with(split_layers(normal, errors))
        .with(filter)
        .try_init()
        .map_err(|e| LoggingError::Init(e.to_string()))?;

    tracing::debug!(normal = %normal_label, errors = %error_label, "Logging initialised");
    Ok(())
}

/// Install the control tool's subscriber: everything to stderr, so stdout
/// carries nothing but the command result.
pub fn init_cli_logging(directive: &str) -> Result<(), LoggingError> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(env_filter(directive)?)
        .with_target(false)
        .without_time()
        .try_init()
        .map_err(|e| LoggingError::Init(e.to_string()))
}

/// Map a `-v` count onto a level directive, starting from `base`.
pub fn verbosity_directive(base: &str, verbose: u8) -> String {
    match verbose {
        0 => base.to_string(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Capture {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Capture {
        type Writer = Capture;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn test_events_split_by_level() {
        let normal = Capture::default();
        let errors = Capture::default();

        let layers = split_layers(
            LogDestination::custom(BoxMakeWriter::new(normal.clone()), "normal"),
            LogDestination::custom(BoxMakeWriter::new(errors.clone()), "errors"),
        );
        let _guard = tracing_subscriber::registry()
            .with(layers)
            .with(EnvFilter::new("trace"))
            .set_default();

        tracing::info!("daemon ready");
        tracing::debug!("dispatching ping");
        tracing::warn!("stale socket removed");
        tracing::error!("accept loop broke");

        let normal = normal.contents();
        let errors = errors.contents();
        assert!(normal.contains("daemon ready"));
        assert!(normal.contains("dispatching ping"));
        assert!(!normal.contains("stale socket removed"));
        assert!(errors.contains("stale socket removed"));
        assert!(errors.contains("accept loop broke"));
        assert!(!errors.contains("daemon ready"));
    }

    #[test]
    fn test_append_file_appends() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("logs/shien.log");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "previous run\n").unwrap();

        let dest = LogDestination::append_file(&path).unwrap();
        assert_eq!(dest.label(), path.display().to_string());

        let _guard = tracing_subscriber::registry()
            .with(split_layers(dest, LogDestination::custom(BoxMakeWriter::new(io::sink), "sink")))
            .set_default();
        tracing::info!("second run");

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("previous run\n"));
        assert!(contents.contains("second run"));
    }

    #[test]
    fn test_append_file_creates_parent() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a/b/shien.err.log");
        LogDestination::append_file(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_file_or_fallback() {
        let dest = LogDestination::file_or(None, LogDestination::stderr).unwrap();
        assert_eq!(dest.label(), "stderr");
    }

    #[test]
    fn test_verbosity_directive() {
        assert_eq!(verbosity_directive("info", 0), "info");
        assert_eq!(verbosity_directive("warn", 1), "debug");
        assert_eq!(verbosity_directive("info", 5), "trace");
    }
}
