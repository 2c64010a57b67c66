//! Logging setup for `dishlab` invocations.
//!
//! Each run writes a log file named after its subcommand, for example
//! `dishlab_watch_2024-01-01_10-00-00.log`, and keeps a bounded number of files
//! per subcommand so a burst of `status` calls never evicts the log of a
//! long `train` run. The file always records at debug level for this crate;
//! the stderr layer follows `-v`/`-q`. `DISHLAB_LOG` (or `RUST_LOG`) replaces
//! both filters when set. Stdout stays reserved for command output.

use std::{
    fs::{self, OpenOptions},
    path::{Path, PathBuf},
    sync::OnceLock,
    time::SystemTime,
};

use time::{OffsetDateTime, UtcOffset, format_description::FormatItem, macros::format_description};
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*};

use crate::app_dirs;

/// Log files kept per subcommand.
const MAX_LOG_FILES_PER_COMMAND: usize = 5;
const LOG_FILE_PREFIX: &str = "dishlab";
const FILE_DIRECTIVES: &str = "info,dishlab=debug,ureq=info";

/// Environment variable consulted before `RUST_LOG` for the log filter.
pub const LOG_FILTER_ENV: &str = "DISHLAB_LOG";

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Console detail chosen on the command line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Verbosity {
    /// Warnings and errors only.
    Quiet,
    #[default]
    Normal,
    /// Debug output from `dishlab`, including every request.
    Verbose,
    Trace,
}

impl Verbosity {
    /// Map repeated `-v` flags and `-q` to a preset.
    pub fn from_flags(verbose: u8, quiet: bool) -> Self {
        match (quiet, verbose) {
            (true, _) => Self::Quiet,
            (false, 0) => Self::Normal,
            (false, 1) => Self::Verbose,
            (false, _) => Self::Trace,
        }
    }

    fn directives(self) -> &'static str {
        match self {
            Self::Quiet => "warn",
            Self::Normal => "info,ureq=warn",
            Self::Verbose => "info,dishlab=debug,ureq=info",
            Self::Trace => "trace",
        }
    }
}

/// What is being logged: the subcommand names the file.
#[derive(Clone, Copy, Debug)]
pub struct LogSession<'a> {
    pub command: &'a str,
    pub verbosity: Verbosity,
}

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Log directory unavailable: {0}")]
    Dir(#[from] app_dirs::AppDirError),
    #[error("Failed to read log directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to remove old log file {path}: {source}")]
    RemoveFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to format log filename time: {0}")]
    FormatTime(time::error::Format),
    #[error("Failed to install global tracing subscriber: {0}")]
    SetGlobal(tracing::subscriber::SetGlobalDefaultError),
    #[error("Failed to create log file at {path}: {source}")]
    CreateLogFile {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Install stderr and file logging for `session`, returning the log file path.
///
/// A second call returns an error from the global subscriber; callers may
/// ignore it.
pub fn init(session: &LogSession<'_>) -> Result<PathBuf, LoggingError> {
    let log_dir = app_dirs::logs_dir()?;
    let log_file_name = format_log_file_name(session.command, now_local_or_utc())?;
    let log_path = log_dir.join(&log_file_name);
    ensure_file_exists(&log_path)?;

    let file_appender = rolling::never(&log_dir, &log_file_name);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    prune_old_logs(
        &log_dir,
        &command_prefix(session.command),
        MAX_LOG_FILES_PER_COMMAND,
    )?;

    let timer = build_timer();
    let console_layer = fmt::layer()
        .with_timer(timer.clone())
        .with_writer(std::io::stderr)
        .with_filter(env_filter_or(session.verbosity.directives()));
    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_timer(timer)
        .with_writer(file_writer)
        .with_filter(env_filter_or(FILE_DIRECTIVES));

    let subscriber = Registry::default().with(console_layer).with(file_layer);
    tracing::subscriber::set_global_default(subscriber).map_err(LoggingError::SetGlobal)?;
    let _ = LOG_GUARD.set(guard);

    tracing::debug!(
        "dishlab {} `{}`; log file at {}",
        env!("CARGO_PKG_VERSION"),
        session.command,
        log_path.display()
    );
    Ok(log_path)
}

/// Install a stderr-only subscriber, used when the log directory is unusable.
pub fn init_console(verbosity: Verbosity) -> Result<(), LoggingError> {
    let subscriber = Registry::default().with(
        fmt::layer()
            .with_timer(build_timer())
            .with_writer(std::io::stderr)
            .with_filter(env_filter_or(verbosity.directives())),
    );
    tracing::subscriber::set_global_default(subscriber).map_err(LoggingError::SetGlobal)
}

fn env_filter_or(directives: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_FILTER_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(directives))
}

fn ensure_file_exists(path: &Path) -> Result<(), LoggingError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map(|_| ())
        .map_err(|source| LoggingError::CreateLogFile {
            path: path.to_path_buf(),
            source,
        })
}

/// `dishlab_<command>_`, with the command reduced to `[a-z0-9-]`.
fn command_prefix(command: &str) -> String {
    let slug: String = command
        .trim()
        .chars()
        .map(|ch| match ch.to_ascii_lowercase() {
            ch @ ('a'..='z' | '0'..='9') => ch,
            _ => '-',
        })
        .collect();
    let slug = slug.trim_matches('-');
    let slug = if slug.is_empty() { "run" } else { slug };
    format!("{LOG_FILE_PREFIX}_{slug}_")
}

/// Keep the newest `max_files` logs whose names start with `prefix`.
fn prune_old_logs(dir: &Path, prefix: &str, max_files: usize) -> Result<(), LoggingError> {
    let mut entries = fs::read_dir(dir)
        .map_err(|source| LoggingError::ReadDir {
            path: dir.to_path_buf(),
            source,
        })?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|ft| ft.is_file()).unwrap_or(false))
        .filter(|entry| {
            let path = entry.path();
            path.extension().and_then(|ext| ext.to_str()) == Some("log")
                && path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with(prefix))
        })
        .map(|entry| {
            let modified = entry
                .metadata()
                .and_then(|meta| meta.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (modified, entry.path())
        })
        .collect::<Vec<_>>();

    // Newest first; everything past the limit goes.
    entries.sort_by(|a, b| b.0.cmp(&a.0));
    for (_, path) in entries.into_iter().skip(max_files) {
        fs::remove_file(&path).map_err(|source| LoggingError::RemoveFile { path, source })?;
    }
    Ok(())
}

fn format_log_file_name(command: &str, now: OffsetDateTime) -> Result<String, LoggingError> {
    const NAME_FORMAT: &[FormatItem<'_>] =
        format_description!("[year]-[month]-[day]_[hour]-[minute]-[second]");
    let stamp = now.format(NAME_FORMAT).map_err(LoggingError::FormatTime)?;
    Ok(format!("{}{stamp}.log", command_prefix(command)))
}

fn build_timer() -> fmt::time::OffsetTime<time::format_description::BorrowedFormatItem<'static>> {
    const DISPLAY_FORMAT: &[FormatItem<'static>] =
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    fmt::time::OffsetTime::new(offset, DISPLAY_FORMAT.into())
}

fn now_local_or_utc() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}
