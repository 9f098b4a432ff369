//! The logger front end
//!
//! [`Logger::log`] never blocks on disk: it captures the timestamp, sanitizes the text,
//! and enqueues a record for the writer thread. [`LogHandle`] is the cheap, cloneable
//! part of that path and is what interception hands to its writers and threads.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::clock::{Clock, SystemClock};
use super::intercept::{Intercepted, StdCapture};
use super::sanitize::sanitize;
use super::sink::{FileOpener, Record, RotatingSink, SinkOpener};
use super::writer::{Command, SharedPath, Writer, ERROR_CHANNEL_CAPACITY};
use crate::config::{LoggerConfig, LoggerOptions};
use crate::error::{LoggerError, Result};

/// Enqueues records for a logger's writer thread
#[derive(Clone)]
pub struct LogHandle {
    commands: mpsc::Sender<Command>,
    clock: Arc<dyn Clock>,
    dropped: Arc<AtomicU64>,
}

impl LogHandle {
    /// Log anything printable
    pub fn log(&self, data: impl fmt::Display) -> &Self {
        self.enqueue(&data.to_string());
        self
    }

    /// Log raw bytes; invalid UTF-8 is replaced
    pub fn log_bytes(&self, data: &[u8]) -> &Self {
        self.enqueue(&String::from_utf8_lossy(data));
        self
    }

    /// Records dropped because the queue was full or the writer had stopped
    pub fn dropped_records(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn enqueue(&self, text: &str) {
        // One instant for both the file name and the printed prefix
        let timestamp = self.clock.now();
        let record = Record {
            timestamp,
            message: sanitize(text),
        };
        // No diagnostics here: stderr may be routed back into this queue
        if self.commands.try_send(Command::Write(record)).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Append-only, date-rotated file logger
///
/// Dropping the logger restores intercepted streams, writes every record queued before
/// the drop, and closes the open file.
pub struct Logger {
    config: LoggerConfig,
    handle: LogHandle,
    current_path: SharedPath,
    errors: Option<mpsc::Receiver<LoggerError>>,
    capture: Option<StdCapture>,
    worker: Option<JoinHandle<()>>,
}

impl Logger {
    /// Merge `options` over the defaults and start logging
    ///
    /// Installs stdout/stderr interception when `log_all_std_output` is set.
    pub fn new(options: LoggerOptions) -> Result<Self> {
        Self::with_clock(options, Arc::new(SystemClock))
    }

    /// Like [`Logger::new`] with a custom time source
    pub fn with_clock(options: LoggerOptions, clock: Arc<dyn Clock>) -> Result<Self> {
        let config = LoggerConfig::merged(options);
        let opener = FileOpener::new(config.create_folder);
        Self::from_parts(config, clock, Box::new(opener))
    }

    /// Build from a resolved config, a clock, and a sink opener
    pub fn from_parts(
        config: LoggerConfig,
        clock: Arc<dyn Clock>,
        opener: Box<dyn SinkOpener>,
    ) -> Result<Self> {
        let (commands, queue) = mpsc::channel(config.queue_capacity.max(1));
        let (errors_tx, errors) = mpsc::channel(ERROR_CHANNEL_CAPACITY);
        let current_path = SharedPath::default();

        let sink = RotatingSink::new(&config, opener);
        let worker = Writer::new(sink, errors_tx, Arc::clone(&current_path)).spawn(queue)?;

        debug!(
            folder = %config.folder.display(),
            pattern = %config.filename,
            "Logger started"
        );

        let mut logger = Self {
            handle: LogHandle {
                commands,
                clock,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            config,
            current_path,
            errors: Some(errors),
            capture: None,
            worker: Some(worker),
        };

        if logger.config.log_all_std_output {
            logger.intercept_std()?;
        }

        Ok(logger)
    }

    /// Log one record; chainable
    pub fn log(&self, data: impl fmt::Display) -> &Self {
        self.handle.log(data);
        self
    }

    /// Log raw bytes; chainable
    pub fn log_bytes(&self, data: &[u8]) -> &Self {
        self.handle.log_bytes(data);
        self
    }

    /// A cloneable handle that logs through this logger
    pub fn handle(&self) -> LogHandle {
        self.handle.clone()
    }

    pub fn config(&self) -> &LoggerConfig {
        &self.config
    }

    /// Path of the open log file as of the writer's last batch
    pub fn current_path(&self) -> Option<PathBuf> {
        self.current_path.read().ok().and_then(|p| p.clone())
    }

    /// Records dropped because the queue was full or the writer had stopped
    pub fn dropped_records(&self) -> u64 {
        self.handle.dropped_records()
    }

    /// Take the receiver of write failures; only the first call gets it
    pub fn take_errors(&mut self) -> Option<mpsc::Receiver<LoggerError>> {
        self.errors.take()
    }

    /// Wait until every record logged so far is written and flushed
    ///
    /// Returns the first write failure since the previous flush.
    pub async fn flush(&self) -> Result<()> {
        let (reply, done) = oneshot::channel();
        self.handle
            .commands
            .send(Command::Flush(reply))
            .await
            .map_err(|_| LoggerError::WriterClosed)?;
        done.await.map_err(|_| LoggerError::WriterClosed)?
    }

    /// Blocking variant of [`Logger::flush`]
    ///
    /// Must not be called from within an async runtime.
    pub fn flush_blocking(&self) -> Result<()> {
        let (reply, done) = oneshot::channel();
        self.handle
            .commands
            .blocking_send(Command::Flush(reply))
            .map_err(|_| LoggerError::WriterClosed)?;
        done.blocking_recv()
            .map_err(|_| LoggerError::WriterClosed)?
    }

    /// A stdout writer whose output is also logged
    pub fn stdout(&self) -> Intercepted<io::Stdout> {
        Intercepted::new(io::stdout(), self.handle())
    }

    /// A stderr writer whose output is also logged
    pub fn stderr(&self) -> Intercepted<io::Stderr> {
        Intercepted::new(io::stderr(), self.handle())
    }

    /// Redirect the process's stdout/stderr through this logger
    pub fn intercept_std(&mut self) -> Result<()> {
        if self.capture.is_some() || StdCapture::is_installed() {
            return Err(LoggerError::AlreadyIntercepting);
        }
        self.capture = Some(StdCapture::install(self.handle())?);
        Ok(())
    }

    /// Restore stdout/stderr; a no-op when not intercepting
    pub fn release_std(&mut self) -> Result<()> {
        match self.capture.take() {
            Some(capture) => capture.uninstall(),
            None => Ok(()),
        }
    }

    pub fn is_intercepting(&self) -> bool {
        self.capture.is_some()
    }

    fn shutdown_writer(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        let mut command = Command::Shutdown;
        loop {
            match self.handle.commands.try_send(command) {
                Ok(()) => break,
                // The writer is draining; wait for room
                Err(mpsc::error::TrySendError::Full(c)) => {
                    command = c;
                    std::thread::yield_now();
                }
                Err(mpsc::error::TrySendError::Closed(_)) => break,
            }
        }

        if worker.join().is_err() {
            warn!("Log writer thread panicked");
        }
    }
}

impl Drop for Logger {
    fn drop(&mut self) {
        if let Err(e) = self.release_std() {
            warn!("Failed to restore standard streams: {}", e);
        }
        self.shutdown_writer();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::clock::ManualClock;
    use crate::logging::sink::test_support::MemoryOpener;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::path::Path;
    use tempfile::TempDir;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    fn options(dir: &TempDir) -> LoggerOptions {
        LoggerOptions::new()
            .folder(dir.path())
            .log_all_std_output(false)
    }

    fn read(dir: &TempDir, name: &str) -> String {
        std::fs::read_to_string(dir.path().join(name)).unwrap()
    }

    #[test]
    fn test_log_writes_timestamped_line() {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new(at(2024, 1, 15, 10, 0, 0));
        let logger = Logger::with_clock(options(&dir), Arc::new(clock)).unwrap();

        logger.log("hello");
        logger.flush_blocking().unwrap();

        assert_eq!(
            read(&dir, "2024-01-15.log"),
            "2024-01-15T10:00:00.000Z: hello\n"
        );
        assert_eq!(
            logger.current_path(),
            Some(dir.path().join("2024-01-15.log"))
        );
    }

    #[test]
    fn test_log_is_chainable() {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new(at(2024, 1, 15, 10, 0, 0));
        let logger = Logger::with_clock(options(&dir), Arc::new(clock)).unwrap();

        logger.log("one").log(2).log_bytes(b"three");
        logger.flush_blocking().unwrap();

        let contents = read(&dir, "2024-01-15.log");
        let messages: Vec<&str> = contents
            .lines()
            .map(|l| l.split_once(": ").unwrap().1)
            .collect();
        assert_eq!(messages, vec!["one", "2", "three"]);
    }

    #[test]
    fn test_empty_data_still_writes_line() {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new(at(2024, 1, 15, 10, 0, 0));
        let logger = Logger::with_clock(options(&dir), Arc::new(clock)).unwrap();

        logger.log("");
        logger.flush_blocking().unwrap();

        assert_eq!(read(&dir, "2024-01-15.log"), "2024-01-15T10:00:00.000Z: \n");
    }

    #[test]
    fn test_rotation_across_midnight() {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new(at(2024, 1, 15, 23, 59, 59));
        let logger = Logger::with_clock(options(&dir), Arc::new(clock.clone())).unwrap();

        logger.log("before");
        clock.advance(Duration::seconds(2));
        logger.log("after");
        logger.flush_blocking().unwrap();

        assert_eq!(
            read(&dir, "2024-01-15.log"),
            "2024-01-15T23:59:59.000Z: before\n"
        );
        assert_eq!(
            read(&dir, "2024-01-16.log"),
            "2024-01-16T00:00:01.000Z: after\n"
        );
    }

    #[test]
    fn test_timestamp_in_line_matches_file() {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new(at(2024, 3, 9, 17, 45, 12));
        let logger = Logger::with_clock(
            options(&dir).filename("yyyy-mm-dd_HH-MM-ss"),
            Arc::new(clock),
        )
        .unwrap();

        logger.log("x");
        logger.flush_blocking().unwrap();

        let contents = read(&dir, "2024-03-09_17-45-12.log");
        assert!(contents.starts_with("2024-03-09T17:45:12.000Z: "));
    }

    #[test]
    fn test_at_most_one_open_sink() {
        let config = LoggerConfig::merged(
            LoggerOptions::new()
                .folder("/logs")
                .filename("yyyy-mm-dd_HH")
                .log_all_std_output(false),
        );
        let clock = ManualClock::new(at(2024, 1, 15, 0, 0, 0));
        let opener = MemoryOpener::default();
        let logger = Logger::from_parts(
            config,
            Arc::new(clock.clone()),
            Box::new(opener.clone()),
        )
        .unwrap();

        for _ in 0..5 {
            logger.log("tick");
            clock.advance(Duration::minutes(30));
        }
        logger.flush_blocking().unwrap();
        drop(logger);

        assert_eq!(opener.open_count(), 3);
        assert_eq!(opener.max_live.load(Ordering::SeqCst), 1);
        assert_eq!(opener.live.load(Ordering::SeqCst), 0);
        assert_eq!(
            opener
                .contents(Path::new("/logs/2024-01-15_01.log"))
                .lines()
                .count(),
            2
        );
    }

    #[test]
    fn test_missing_folder_surfaces_on_flush() {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new(at(2024, 1, 15, 10, 0, 0));
        let mut logger = Logger::with_clock(
            options(&dir)
                .folder(dir.path().join("absent"))
                .create_folder(false),
            Arc::new(clock),
        )
        .unwrap();
        let mut errors = logger.take_errors().unwrap();
        assert!(logger.take_errors().is_none());

        logger.log("lost");
        let err = logger.flush_blocking().unwrap_err();
        assert_eq!(
            err.path(),
            Some(dir.path().join("absent").join("2024-01-15.log").as_path())
        );
        assert!(matches!(errors.try_recv(), Ok(LoggerError::Sink { .. })));
    }

    #[test]
    fn test_drop_writes_pending_records() {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new(at(2024, 1, 15, 10, 0, 0));
        let logger = Logger::with_clock(options(&dir), Arc::new(clock)).unwrap();

        for i in 0..100 {
            logger.log(i);
        }
        drop(logger);

        assert_eq!(read(&dir, "2024-01-15.log").lines().count(), 100);
    }

    #[test]
    fn test_handle_outliving_logger_counts_drops() {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new(at(2024, 1, 15, 10, 0, 0));
        let logger = Logger::with_clock(options(&dir), Arc::new(clock)).unwrap();
        let handle = logger.handle();
        drop(logger);

        handle.log("too late");
        assert_eq!(handle.dropped_records(), 1);
    }

    #[test]
    fn test_full_queue_drops_records() {
        struct Stalled(Arc<std::sync::Barrier>);
        impl SinkOpener for Stalled {
            fn open_append(&mut self, _path: &Path) -> io::Result<Box<dyn io::Write + Send>> {
                // Hold the writer until the test has filled the queue
                self.0.wait();
                Ok(Box::new(io::sink()))
            }
        }

        let barrier = Arc::new(std::sync::Barrier::new(2));
        let config = LoggerConfig::merged(
            LoggerOptions::new()
                .folder("/logs")
                .queue_capacity(2)
                .log_all_std_output(false),
        );
        let clock = ManualClock::new(at(2024, 1, 15, 10, 0, 0));
        let logger = Logger::from_parts(
            config,
            Arc::new(clock),
            Box::new(Stalled(Arc::clone(&barrier))),
        )
        .unwrap();

        // The first record is taken by the writer, which then stalls in open
        logger.log("first");
        while logger.handle.commands.capacity() < 2 {
            std::thread::yield_now();
        }
        logger.log("a").log("b").log("overflow");
        assert_eq!(logger.dropped_records(), 1);

        barrier.wait();
        logger.flush_blocking().unwrap();
    }

    #[tokio::test]
    async fn test_async_flush() {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new(at(2024, 1, 15, 10, 0, 0));
        let logger = Logger::with_clock(options(&dir), Arc::new(clock)).unwrap();

        logger.log("\x1b[31mred\x1b[0m");
        logger.flush().await.unwrap();

        assert_eq!(read(&dir, "2024-01-15.log"), "2024-01-15T10:00:00.000Z: red\n");
    }

    #[test]
    fn test_release_std_without_capture_is_noop() {
        let dir = TempDir::new().unwrap();
        let mut logger = Logger::new(options(&dir)).unwrap();
        assert!(!logger.is_intercepting());
        assert!(logger.release_std().is_ok());
    }
}
