use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use tempfile::tempdir;
use tunnel_core::clock::FixedClock;
use tunnel_core::logging::{
    DiagnosticLogger, DiagnosticOptions, LogLevel, SessionStatus, log_file_name,
};
use tunnel_core::storage::{DirectoryStorage, ExternalStorage, StorageState};

const T: i64 = 1_700_000_000_123;

/// Storage with a fixed state that counts how often it is consulted.
struct CountingStorage {
    state: StorageState,
    dir: Option<PathBuf>,
    state_calls: AtomicUsize,
    dir_calls: AtomicUsize,
}

impl CountingStorage {
    fn new(state: StorageState, dir: Option<&Path>) -> Self {
        CountingStorage {
            state,
            dir: dir.map(Path::to_path_buf),
            state_calls: AtomicUsize::new(0),
            dir_calls: AtomicUsize::new(0),
        }
    }
}

impl ExternalStorage for CountingStorage {
    fn state(&self) -> StorageState {
        self.state_calls.fetch_add(1, Ordering::SeqCst);
        self.state
    }

    fn files_dir(&self) -> Option<PathBuf> {
        self.dir_calls.fetch_add(1, Ordering::SeqCst);
        self.dir.clone()
    }
}

fn options() -> DiagnosticOptions {
    DiagnosticOptions {
        console_echo: false,
        ..Default::default()
    }
}

fn logger(storage: Arc<dyn ExternalStorage>, tunnel_id: Option<&str>) -> DiagnosticLogger {
    DiagnosticLogger::new(
        "OpenVpnTunnel (id=1)",
        tunnel_id.map(str::to_string),
        storage,
        Arc::new(FixedClock::from_millis(T).unwrap()),
        options(),
    )
}

fn is_well_formed(line: &str) -> bool {
    // [HH:MM:SS.mmm] [level=N] message
    let bytes = line.as_bytes();
    bytes.len() > 15
        && bytes[0] == b'['
        && bytes[13] == b']'
        && line[15..].starts_with("[level=")
}

#[test]
fn test_first_log_creates_report_file() {
    let dir = tempdir().unwrap();
    let logger = logger(Arc::new(DirectoryStorage::new(dir.path())), Some("abc-123"));

    logger.log(LogLevel::Info, "tunnel up");
    assert_eq!(logger.status(), SessionStatus::Active);

    let path = logger.log_file().unwrap();
    assert_eq!(path, dir.path().join(log_file_name(T, Some("abc-123"))));
    assert_eq!(
        path.file_name().unwrap().to_str().unwrap(),
        format!("report-{T}-(abc-123).log")
    );

    logger.close();
    let contents = fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("Current date is "));
    assert!(is_well_formed(lines[1]));
    assert!(lines[1].ends_with("[level=4] tunnel up"));
}

#[test]
fn test_unmounted_storage_deactivates_silently() {
    let storage = Arc::new(CountingStorage::new(StorageState::Unmounted, None));
    let logger = logger(storage.clone(), Some("abc-123"));

    logger.log(LogLevel::Error, "boom");
    logger.log(LogLevel::Error, "boom again");

    assert_eq!(logger.status(), SessionStatus::Deactivated);
    assert!(logger.log_file().is_none());
    assert!(logger.deactivation_reason().is_some());
    // never retried after the first failure
    assert_eq!(storage.state_calls.load(Ordering::SeqCst), 1);
    assert_eq!(storage.dir_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_read_only_storage_deactivates() {
    let dir = tempdir().unwrap();
    let storage = Arc::new(CountingStorage::new(
        StorageState::MountedReadOnly,
        Some(dir.path()),
    ));
    let logger = logger(storage, Some("abc-123"));

    logger.log(LogLevel::Warn, "ignored");

    assert_eq!(logger.status(), SessionStatus::Deactivated);
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn test_unresolvable_files_dir_deactivates() {
    let storage = Arc::new(CountingStorage::new(StorageState::Mounted, None));
    let logger = logger(storage.clone(), Some("abc-123"));

    logger.log(LogLevel::Info, "nowhere to go");
    logger.log(LogLevel::Info, "still nowhere");

    assert_eq!(logger.status(), SessionStatus::Deactivated);
    assert_eq!(storage.dir_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_open_failure_deactivates() {
    let dir = tempdir().unwrap();
    // a regular file where the files directory should be
    let blocker = dir.path().join("files");
    fs::write(&blocker, b"").unwrap();
    let storage = Arc::new(CountingStorage::new(StorageState::Mounted, Some(&blocker)));
    let logger = logger(storage, Some("abc-123"));

    logger.log(LogLevel::Info, "cannot open");

    assert_eq!(logger.status(), SessionStatus::Deactivated);
    assert!(
        logger
            .deactivation_reason()
            .unwrap()
            .starts_with("can't init logger")
    );
}

#[test]
fn test_concurrent_first_logs_initialize_once() {
    let dir = tempdir().unwrap();
    let storage = Arc::new(CountingStorage::new(StorageState::Mounted, Some(dir.path())));
    let logger = Arc::new(logger(storage.clone(), Some("abc-123")));
    assert_eq!(logger.status(), SessionStatus::Uninitialized);

    let handles: Vec<_> = (0..2)
        .map(|t| {
            let logger = Arc::clone(&logger);
            thread::spawn(move || {
                for i in 0..100 {
                    logger.log(LogLevel::Debug, &format!("thread {t} message {i}"));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(storage.state_calls.load(Ordering::SeqCst), 1);
    assert_eq!(storage.dir_calls.load(Ordering::SeqCst), 1);

    let path = logger.log_file().unwrap();
    logger.close();
    let contents = fs::read_to_string(path).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 201);
    assert!(lines[0].starts_with("Current date is "));
    assert!(lines[1..].iter().all(|line| is_well_formed(line)));
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[test]
fn test_native_levels_and_close() {
    let dir = tempdir().unwrap();
    let logger = logger(Arc::new(DirectoryStorage::new(dir.path())), None);

    logger.log_native(LogLevel::Fatal.code(), "native fatal");
    logger.log_native(42, "odd level");
    let path = logger.log_file().unwrap();
    assert_eq!(
        path.file_name().unwrap().to_str().unwrap(),
        format!("report-{T}-().log")
    );

    logger.close();
    logger.log(LogLevel::Info, "after close");
    logger.flush();
    assert_eq!(logger.status(), SessionStatus::Deactivated);
    assert!(logger.deactivation_reason().is_none());

    let contents = fs::read_to_string(path).unwrap();
    assert!(contents.contains("[level=7] native fatal\n"));
    assert!(contents.contains("[level=42] odd level\n"));
    assert!(!contents.contains("after close"));
}

#[test]
fn test_drop_flushes_buffered_lines() {
    let dir = tempdir().unwrap();
    let logger = logger(Arc::new(DirectoryStorage::new(dir.path())), Some("drop"));

    logger.log(LogLevel::Info, "buffered until drop");
    let path = logger.log_file().unwrap();
    drop(logger);

    let contents = fs::read_to_string(path).unwrap();
    assert!(contents.ends_with("[level=4] buffered until drop\n"));
}

#[test]
fn test_same_name_reports_are_appended() {
    let dir = tempdir().unwrap();
    let first = logger(Arc::new(DirectoryStorage::new(dir.path())), Some("dup"));
    let second = logger(Arc::new(DirectoryStorage::new(dir.path())), Some("dup"));

    first.log(LogLevel::Info, "from first");
    first.flush();
    second.log(LogLevel::Info, "from second");
    assert_eq!(first.log_file(), second.log_file());

    first.close();
    second.close();
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);

    let contents = fs::read_to_string(dir.path().join(log_file_name(T, Some("dup")))).unwrap();
    assert!(contents.contains("[level=4] from first\n"));
    assert!(contents.contains("[level=4] from second\n"));
    assert_eq!(contents.matches("Current date is ").count(), 2);
}

/// Writer that accepts a fixed number of writes and then fails.
struct FlakyWriter {
    writes_left: usize,
    fail_flush: bool,
    written: Arc<Mutex<Vec<u8>>>,
}

impl Write for FlakyWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.writes_left == 0 {
            return Err(io::Error::other("device gone"));
        }
        self.writes_left -= 1;
        self.written.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.fail_flush {
            return Err(io::Error::other("flush refused"));
        }
        Ok(())
    }
}

/// Mounted storage whose report stream is a [`FlakyWriter`].
struct FlakyStorage {
    dir: PathBuf,
    writes_allowed: usize,
    fail_flush: bool,
    written: Arc<Mutex<Vec<u8>>>,
}

impl FlakyStorage {
    fn new(dir: &Path, writes_allowed: usize, fail_flush: bool) -> Self {
        FlakyStorage {
            dir: dir.to_path_buf(),
            writes_allowed,
            fail_flush,
            written: Arc::default(),
        }
    }
}

impl ExternalStorage for FlakyStorage {
    fn state(&self) -> StorageState {
        StorageState::Mounted
    }

    fn files_dir(&self) -> Option<PathBuf> {
        Some(self.dir.clone())
    }

    fn open_report(&self, _path: &Path) -> io::Result<Box<dyn Write + Send>> {
        Ok(Box::new(FlakyWriter {
            writes_left: self.writes_allowed,
            fail_flush: self.fail_flush,
            written: Arc::clone(&self.written),
        }))
    }
}

fn unbuffered_logger(storage: Arc<dyn ExternalStorage>) -> DiagnosticLogger {
    DiagnosticLogger::new(
        "OpenVpnTunnel (id=1)",
        Some("flaky".to_string()),
        storage,
        Arc::new(FixedClock::from_millis(T).unwrap()),
        DiagnosticOptions {
            console_echo: false,
            // every line goes straight to the writer
            buffer_capacity: 1,
        },
    )
}

#[test]
fn test_write_failure_deactivates() {
    let dir = tempdir().unwrap();
    // the header gets through, the first line does not
    let storage = Arc::new(FlakyStorage::new(dir.path(), 1, false));
    let logger = unbuffered_logger(storage.clone());

    logger.log(LogLevel::Info, "lost");
    assert_eq!(logger.status(), SessionStatus::Deactivated);
    assert!(logger.log_file().is_none());
    assert!(
        logger
            .deactivation_reason()
            .unwrap()
            .starts_with("can't log a message")
    );

    logger.log(LogLevel::Error, "also lost");
    logger.flush();
    logger.close();
    assert_eq!(logger.status(), SessionStatus::Deactivated);

    let written = String::from_utf8(storage.written.lock().unwrap().clone()).unwrap();
    assert!(written.starts_with("Current date is "));
    assert!(!written.contains("lost"));
}

#[test]
fn test_failed_final_flush_is_recorded() {
    let dir = tempdir().unwrap();
    let storage = Arc::new(FlakyStorage::new(dir.path(), usize::MAX, true));
    let logger = DiagnosticLogger::new(
        "OpenVpnTunnel (id=1)",
        Some("flaky".to_string()),
        storage,
        Arc::new(FixedClock::from_millis(T).unwrap()),
        options(),
    );

    logger.log(LogLevel::Info, "buffered");
    assert_eq!(logger.status(), SessionStatus::Active);

    logger.close();
    assert_eq!(logger.status(), SessionStatus::Deactivated);
    assert!(
        logger
            .deactivation_reason()
            .unwrap()
            .starts_with("can't log a message")
    );
}
