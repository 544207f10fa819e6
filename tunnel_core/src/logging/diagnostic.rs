//! Per-tunnel diagnostic log file.
//!
//! A [`DiagnosticLogger`] lazily opens one report file on external storage the
//! first time something is logged and appends one line per call. It is called
//! from the tunnel thread and from native engine threads at the same time, so
//! every failure is absorbed: once anything goes wrong the session is
//! deactivated and later calls return immediately.

use std::fmt::Write as _;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Local};
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use crate::clock::Clock;
use crate::logging::LogLevel;
use crate::storage::{ExternalStorage, StorageState};

/// Default capacity of the buffered log stream (128 KiB).
pub const DEFAULT_BUFFER_CAPACITY: usize = 128 * 1024;

const LINE_TIME_FORMAT: &str = "%H:%M:%S%.3f";
const HEADER_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f%z";

/// Reasons a diagnostic session stops recording.
#[derive(Debug, Error)]
pub enum LoggerError {
    /// External storage is read-only or missing
    #[error("external storage is not writable ({0})")]
    StorageUnavailable(StorageState),

    /// The files directory could not be resolved
    #[error("external files directory is unavailable")]
    StorageAccess,

    /// Opening the file or writing its header failed
    #[error("can't init logger: {0}")]
    Initialization(#[source] io::Error),

    /// Appending a line failed
    #[error("can't log a message: {0}")]
    Write(#[source] io::Error),
}

/// Logger construction options.
#[derive(Debug, Clone)]
pub struct DiagnosticOptions {
    /// Mirror every message to `tracing` regardless of session state
    pub console_echo: bool,

    /// Capacity of the buffered file stream
    pub buffer_capacity: usize,
}

impl Default for DiagnosticOptions {
    fn default() -> Self {
        DiagnosticOptions {
            console_echo: cfg!(debug_assertions),
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
        }
    }
}

/// Observable state of a logging session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Uninitialized,
    Active,
    Deactivated,
}

struct ActiveSession {
    path: PathBuf,
    writer: BufWriter<Box<dyn Write + Send>>,
}

enum SessionState {
    Uninitialized,
    Active(ActiveSession),
    Deactivated,
}

struct Session {
    state: SessionState,
    reason: Option<LoggerError>,
}

impl Session {
    /// Moves to `Deactivated`, releasing the stream if one is open.
    ///
    /// The first recorded reason wins; a failed final flush counts as one.
    fn deactivate(&mut self, tag: &str, reason: Option<LoggerError>) {
        if self.reason.is_none() {
            self.reason = reason;
        }
        let previous = std::mem::replace(&mut self.state, SessionState::Deactivated);
        if let SessionState::Active(mut active) = previous {
            if let Err(e) = active.writer.flush() {
                warn!(tag = %tag, error = %e, "Can't flush diagnostic log while closing");
                if self.reason.is_none() {
                    self.reason = Some(LoggerError::Write(e));
                }
            }
        }
    }
}

/// Reusable line buffer; formatting goes through here one caller at a time.
#[derive(Default)]
struct LineFormatter {
    buf: String,
}

impl LineFormatter {
    fn format_line(
        &mut self,
        now: &DateTime<Local>,
        level: i32,
        message: &str,
    ) -> Result<&[u8], std::fmt::Error> {
        self.buf.clear();
        writeln!(
            self.buf,
            "[{}] [level={}] {}",
            now.format(LINE_TIME_FORMAT),
            level,
            message
        )?;
        Ok(self.buf.as_bytes())
    }
}

/// File name of a report created at `epoch_millis` for `tunnel_id`.
pub fn log_file_name(epoch_millis: i64, tunnel_id: Option<&str>) -> String {
    format!("report-{}-({}).log", epoch_millis, tunnel_id.unwrap_or_default())
}

/// Fail-safe, thread-safe diagnostic log for a single tunnel.
pub struct DiagnosticLogger {
    tag: String,
    tunnel_id: Option<String>,
    storage: Arc<dyn ExternalStorage>,
    clock: Arc<dyn Clock>,
    options: DiagnosticOptions,
    session: Mutex<Session>,
    formatter: Mutex<LineFormatter>,
}

impl DiagnosticLogger {
    /// Create a logger. No storage is touched until the first message.
    pub fn new(
        tag: impl Into<String>,
        tunnel_id: Option<String>,
        storage: Arc<dyn ExternalStorage>,
        clock: Arc<dyn Clock>,
        options: DiagnosticOptions,
    ) -> Self {
        DiagnosticLogger {
            tag: tag.into(),
            tunnel_id,
            storage,
            clock,
            options,
            session: Mutex::new(Session {
                state: SessionState::Uninitialized,
                reason: None,
            }),
            formatter: Mutex::new(LineFormatter::default()),
        }
    }

    /// Record a message. Never fails and never panics.
    pub fn log(&self, level: LogLevel, message: &str) {
        self.record(level.code(), message);
    }

    /// Entry point for the native engine's log callback.
    ///
    /// Unknown level codes are written to the file as given but not mirrored.
    pub fn log_native(&self, level: i32, message: &str) {
        self.record(level, message);
    }

    /// Stop recording. Safe to call any number of times.
    pub fn close(&self) {
        let mut session = self.lock_session();
        if matches!(session.state, SessionState::Active(_)) {
            debug!(tag = %self.tag, "Closing diagnostic log");
        }
        session.deactivate(&self.tag, None);
    }

    /// Push buffered lines to the file. A failure deactivates the session.
    pub fn flush(&self) {
        let mut session = self.lock_session();
        let SessionState::Active(active) = &mut session.state else {
            return;
        };
        if let Err(e) = active.writer.flush() {
            error!(tag = %self.tag, error = %e, "Can't flush diagnostic log, closing the logger");
            session.deactivate(&self.tag, Some(LoggerError::Write(e)));
        }
    }

    pub fn status(&self) -> SessionStatus {
        match self.lock_session().state {
            SessionState::Uninitialized => SessionStatus::Uninitialized,
            SessionState::Active(_) => SessionStatus::Active,
            SessionState::Deactivated => SessionStatus::Deactivated,
        }
    }

    /// Path of the open report file, if the session is active.
    pub fn log_file(&self) -> Option<PathBuf> {
        match &self.lock_session().state {
            SessionState::Active(active) => Some(active.path.clone()),
            _ => None,
        }
    }

    /// Why the session was deactivated, if it failed.
    pub fn deactivation_reason(&self) -> Option<String> {
        self.lock_session().reason.as_ref().map(ToString::to_string)
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    fn record(&self, level: i32, message: &str) {
        if self.options.console_echo {
            self.echo(level, message);
        }

        let mut session = self.lock_session();
        if matches!(session.state, SessionState::Uninitialized) {
            self.initialize(&mut session);
        }

        let SessionState::Active(active) = &mut session.state else {
            return;
        };
        let result = self.append(active, level, message);
        if let Err(e) = result {
            error!(tag = %self.tag, error = %e, "Can't log a message, closing the logger");
            session.deactivate(&self.tag, Some(e));
        }
    }

    fn initialize(&self, session: &mut Session) {
        match self.open_session() {
            Ok(active) => {
                info!(tag = %self.tag, path = %active.path.display(), "Diagnostic log opened");
                session.state = SessionState::Active(active);
            }
            Err(e) => {
                error!(tag = %self.tag, error = %e, "Diagnostic logging disabled");
                session.deactivate(&self.tag, Some(e));
            }
        }
    }

    fn open_session(&self) -> Result<ActiveSession, LoggerError> {
        let state = self.storage.state();
        if !state.is_writable() {
            return Err(LoggerError::StorageUnavailable(state));
        }

        let dir = self.storage.files_dir().ok_or(LoggerError::StorageAccess)?;

        let now = self.clock.now();
        let path = dir.join(log_file_name(
            now.timestamp_millis(),
            self.tunnel_id.as_deref(),
        ));
        let stream = self
            .storage
            .open_report(&path)
            .map_err(LoggerError::Initialization)?;

        let mut writer = BufWriter::with_capacity(self.options.buffer_capacity, stream);
        let header = format!("Current date is {}\n", now.format(HEADER_TIME_FORMAT));
        writer
            .write_all(header.as_bytes())
            .map_err(LoggerError::Initialization)?;

        Ok(ActiveSession { path, writer })
    }

    fn append(
        &self,
        active: &mut ActiveSession,
        level: i32,
        message: &str,
    ) -> Result<(), LoggerError> {
        let now = self.clock.now();
        let mut formatter = self
            .formatter
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let line = formatter
            .format_line(&now, level, message)
            .map_err(|e| LoggerError::Write(io::Error::other(e)))?;
        active.writer.write_all(line).map_err(LoggerError::Write)
    }

    fn echo(&self, level: i32, message: &str) {
        let tag = self.tag.as_str();
        match LogLevel::from_code(level) {
            Some(LogLevel::Fatal | LogLevel::Error) => error!(tag = %tag, "{}", message),
            Some(LogLevel::Warn) => warn!(tag = %tag, "{}", message),
            Some(LogLevel::Info) => info!(tag = %tag, "{}", message),
            Some(LogLevel::Debug) => debug!(tag = %tag, "{}", message),
            Some(LogLevel::Verbose) => trace!(tag = %tag, "{}", message),
            // unknown codes are silently dropped
            None => {}
        }
    }

    fn lock_session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for DiagnosticLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiagnosticLogger")
            .field("tag", &self.tag)
            .field("tunnel_id", &self.tunnel_id)
            .field("status", &self.status())
            .finish()
    }
}
