//! Tracing setup and the spans that tie log lines to pipeline runs.
//!
//! Each binary logs compact lines to stdout and to `<paths.logs_dir>/<component>.log`, rotated
//! per `[logging].rotation`. Setting `DOCSAGE_LOG_FILE` appends to that path instead. The filter
//! comes from `RUST_LOG`, else `[logging].level`.
//!
//! Service calls run inside [`pipeline_span`], so every line emitted by a pipeline carries the
//! `pipeline` name, a per-call `run_id`, and the `session_id` once it is known.
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::OnceLock;

use thiserror::Error;
use tracing::Span;
use tracing::field::Empty;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use uuid::Uuid;

use crate::config::{LogRotation, Settings};

/// Environment variable naming an explicit log file.
pub const LOG_FILE_ENV: &str = "DOCSAGE_LOG_FILE";

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Failure to open the log file target.
#[derive(Debug, Error)]
pub enum LogSetupError {
    /// The explicit log file or the logs directory could not be created.
    #[error("failed to prepare log path {path}: {source}")]
    Io {
        /// Offending path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The rolling appender rejected its directory or file name.
    #[error("failed to start rolling log in {dir}: {source}")]
    Rolling {
        /// Logs directory.
        dir: PathBuf,
        /// Appender error.
        #[source]
        source: InitError,
    },
}

/// Where a component writes its log file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogTarget {
    /// Append to a fixed path.
    Explicit(PathBuf),
    /// `<dir>/<file_name>`, rotated on the configured cadence.
    Rolling {
        /// Logs directory.
        dir: PathBuf,
        /// File name, or prefix when rotating.
        file_name: String,
        /// Rotation cadence.
        rotation: LogRotation,
    },
}

impl LogTarget {
    /// Resolve the target for `component` from settings and an optional explicit override.
    pub fn resolve(settings: &Settings, component: &str, explicit: Option<PathBuf>) -> Self {
        match explicit {
            Some(path) => Self::Explicit(path),
            None => Self::Rolling {
                dir: settings.paths.logs_dir.clone(),
                file_name: format!("{component}.log"),
                rotation: settings.logging.rotation,
            },
        }
    }

    /// Open the target behind a non-blocking writer.
    pub fn open(&self) -> Result<(NonBlocking, WorkerGuard), LogSetupError> {
        match self {
            Self::Explicit(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent).map_err(|source| LogSetupError::Io {
                        path: parent.to_path_buf(),
                        source,
                    })?;
                }
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|source| LogSetupError::Io {
                        path: path.clone(),
                        source,
                    })?;
                Ok(tracing_appender::non_blocking(file))
            }
            Self::Rolling {
                dir,
                file_name,
                rotation,
            } => {
                std::fs::create_dir_all(dir).map_err(|source| LogSetupError::Io {
                    path: dir.clone(),
                    source,
                })?;
                let appender = RollingFileAppender::builder()
                    .rotation(rotation_for(*rotation))
                    .filename_prefix(file_name)
                    .build(dir)
                    .map_err(|source| LogSetupError::Rolling {
                        dir: dir.clone(),
                        source,
                    })?;
                Ok(tracing_appender::non_blocking(appender))
            }
        }
    }
}

fn rotation_for(rotation: LogRotation) -> Rotation {
    match rotation {
        LogRotation::Never => Rotation::NEVER,
        LogRotation::Daily => Rotation::DAILY,
        LogRotation::Hourly => Rotation::HOURLY,
    }
}

/// Install the global subscriber for `component` and flush deferred settings warnings.
///
/// A log file that cannot be opened is reported on stderr; stdout logging still starts.
pub fn init_tracing(settings: &Settings, component: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_layer = fmt::layer().with_target(false).compact();

    let explicit = std::env::var_os(LOG_FILE_ENV).map(PathBuf::from);
    let log_target = LogTarget::resolve(settings, component, explicit);
    let file_layer = match log_target.open() {
        Ok((writer, guard)) => {
            let _ = LOG_GUARD.set(guard);
            Some(
                fmt::layer()
                    .with_writer(writer)
                    .with_target(true)
                    .with_ansi(false)
                    .compact(),
            )
        }
        Err(err) => {
            eprintln!("File logging disabled: {err}");
            None
        }
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    settings.report_unresolved_placeholders();
    tracing::debug!(?log_target, "Logging initialized");
}

/// Span for one service call on `pipeline`.
///
/// `session_id` stays empty when the call creates its session; record it with
/// `span.record("session_id", id)` once the id exists.
pub fn pipeline_span(pipeline: &str, session_id: Option<&str>) -> Span {
    let span = tracing::info_span!(
        "pipeline",
        pipeline,
        run_id = %Uuid::new_v4(),
        session_id = Empty,
    );
    if let Some(session_id) = session_id {
        span.record("session_id", session_id);
    }
    span
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    /// In-memory log sink for asserting on formatted output.
    #[derive(Clone, Default)]
    pub(crate) struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl CapturedLogs {
        /// Subscriber writing every event at DEBUG and above into this buffer.
        pub(crate) fn subscriber(&self) -> impl tracing::Subscriber + Send + Sync + 'static {
            let sink = self.clone();
            tracing_subscriber::fmt()
                .with_ansi(false)
                .with_max_level(tracing::Level::DEBUG)
                .with_writer(move || sink.clone())
                .finish()
        }

        pub(crate) fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::CapturedLogs;
    use super::*;
    use crate::config::test_support::settings_with;

    #[test]
    fn target_follows_logs_dir_and_rotation() {
        let settings = settings_with(
            "[paths]\nlogs_dir = \"/var/log/docsage\"\n[logging]\nrotation = \"daily\"\n",
        );
        assert_eq!(
            LogTarget::resolve(&settings, "docsage-cli", None),
            LogTarget::Rolling {
                dir: PathBuf::from("/var/log/docsage"),
                file_name: "docsage-cli.log".into(),
                rotation: LogRotation::Daily,
            }
        );
        assert_eq!(
            LogTarget::resolve(&settings, "docsage", Some(PathBuf::from("/tmp/x.log"))),
            LogTarget::Explicit(PathBuf::from("/tmp/x.log"))
        );
    }

    #[test]
    fn unrotated_target_creates_component_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = LogTarget::Rolling {
            dir: dir.path().join("nested"),
            file_name: "docsage.log".into(),
            rotation: LogRotation::Never,
        };
        let (_writer, _guard) = target.open().unwrap();
        assert!(dir.path().join("nested").join("docsage.log").is_file());
    }

    #[test]
    fn explicit_target_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a").join("b.log");
        let (_writer, _guard) = LogTarget::Explicit(path.clone()).open().unwrap();
        assert!(path.is_file());
    }

    #[test]
    fn pipeline_span_tags_events() {
        let logs = CapturedLogs::default();
        tracing::subscriber::with_default(logs.subscriber(), || {
            let span = pipeline_span("document_analysis", None);
            span.in_scope(|| tracing::info!("before session"));
            span.record("session_id", "session-42");
            span.in_scope(|| tracing::info!("after session"));
        });
        let output = logs.contents();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2, "{output}");
        assert!(lines.iter().all(|line| line.contains("document_analysis")));
        assert!(lines.iter().all(|line| line.contains("run_id")));
        assert!(!lines[0].contains("session-42"));
        assert!(lines[1].contains("session-42"));
    }
}
