//! Dedicated writer thread
//!
//! The writer is the only owner of the [`RotatingSink`]. Callers enqueue commands on a
//! bounded channel and return immediately; the writer applies them in order, so records
//! keep their enqueue order across rotations.

use std::io;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::thread::{self, JoinHandle};

use tokio::sync::{mpsc, oneshot};
use tracing::{error, info};

use super::sink::{Record, RotatingSink};
use crate::config::friendly_io_error_message;
use crate::error::{LoggerError, Result};

/// Capacity of the error side channel; older failures win when it is full
pub const ERROR_CHANNEL_CAPACITY: usize = 64;

/// Work items for the writer thread
pub(crate) enum Command {
    Write(Record),
    /// Flush the open file and reply with the first failure since the last flush
    Flush(oneshot::Sender<Result<()>>),
    Shutdown,
}

/// Path of the file the writer has open, readable from any thread
pub(crate) type SharedPath = Arc<RwLock<Option<PathBuf>>>;

pub(crate) struct Writer {
    sink: RotatingSink,
    errors: mpsc::Sender<LoggerError>,
    current_path: SharedPath,
    pending_error: Option<LoggerError>,
    healthy: bool,
}

impl Writer {
    pub(crate) fn new(
        sink: RotatingSink,
        errors: mpsc::Sender<LoggerError>,
        current_path: SharedPath,
    ) -> Self {
        Self {
            sink,
            errors,
            current_path,
            pending_error: None,
            healthy: true,
        }
    }

    /// Run the writer on its own named thread
    pub(crate) fn spawn(self, commands: mpsc::Receiver<Command>) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("stamplog-writer".to_string())
            .spawn(move || self.run(commands))
    }

    fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        'outer: while let Some(command) = commands.blocking_recv() {
            if !self.handle(command) {
                break;
            }
            // Apply whatever is already queued, then flush once for the batch
            while let Ok(command) = commands.try_recv() {
                if !self.handle(command) {
                    break 'outer;
                }
            }
            if let Err(e) = self.sink.flush() {
                self.report(e);
            }
            self.publish_path();
        }

        if let Err(e) = self.sink.close() {
            self.report(e);
        }
        self.publish_path();
    }

    /// Returns false once the writer should stop
    fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Write(record) => {
                let result = self.sink.write_record(&record);
                if let Some(e) = self.sink.take_close_error() {
                    self.report(e);
                }
                match result {
                    Ok(()) => self.mark_healthy(),
                    Err(e) => self.report(e),
                }
                true
            }
            Command::Flush(reply) => {
                if let Err(e) = self.sink.flush() {
                    self.report(e);
                }
                self.publish_path();
                let result = match self.pending_error.take() {
                    Some(e) => Err(e),
                    None => Ok(()),
                };
                // The caller may have stopped waiting
                let _ = reply.send(result);
                true
            }
            Command::Shutdown => false,
        }
    }

    fn publish_path(&self) {
        if let Ok(mut path) = self.current_path.write() {
            *path = self.sink.current_path().map(|p| p.to_path_buf());
        }
    }

    fn mark_healthy(&mut self) {
        if !self.healthy {
            self.healthy = true;
            info!("Log file writes recovered");
        }
    }

    /// Surface a failure without feeding an endless diagnostic loop
    ///
    /// Diagnostics go out only on the healthy to failing transition: stderr may itself be
    /// routed back into this writer.
    fn report(&mut self, err: LoggerError) {
        if self.healthy {
            self.healthy = false;
            match &err {
                LoggerError::Sink { path, source } => {
                    error!("{}", friendly_io_error_message(source, path))
                }
                other => error!("Log writer failure: {}", other),
            }
        }

        let _ = self.errors.try_send(replicate(&err));
        if self.pending_error.is_none() {
            self.pending_error = Some(err);
        }
    }
}

/// Copy an error for the side channel; `io::Error` is not `Clone`
fn replicate(err: &LoggerError) -> LoggerError {
    match err {
        LoggerError::Sink { path, source } => LoggerError::Sink {
            path: path.clone(),
            source: io::Error::new(source.kind(), source.to_string()),
        },
        LoggerError::Io(source) => LoggerError::Io(io::Error::new(source.kind(), source.to_string())),
        _ => LoggerError::WriterClosed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LoggerConfig, LoggerOptions};
    use crate::logging::sink::test_support::MemoryOpener;
    use chrono::{TimeZone, Utc};
    use std::path::Path;
    use std::sync::atomic::Ordering;

    struct Harness {
        commands: mpsc::Sender<Command>,
        errors: mpsc::Receiver<LoggerError>,
        current_path: SharedPath,
        opener: MemoryOpener,
        thread: JoinHandle<()>,
    }

    fn start() -> Harness {
        let config = LoggerConfig::merged(
            LoggerOptions::new()
                .folder("/logs")
                .log_all_std_output(false),
        );
        let opener = MemoryOpener::default();
        let sink = RotatingSink::new(&config, Box::new(opener.clone()));
        let (commands, rx) = mpsc::channel(16);
        let (errors_tx, errors) = mpsc::channel(ERROR_CHANNEL_CAPACITY);
        let current_path: SharedPath = Arc::default();
        let thread = Writer::new(sink, errors_tx, Arc::clone(&current_path))
            .spawn(rx)
            .unwrap();
        Harness {
            commands,
            errors,
            current_path,
            opener,
            thread,
        }
    }

    fn record(day: u32, message: &str) -> Record {
        Record {
            timestamp: Utc.with_ymd_and_hms(2024, 1, day, 12, 0, 0).unwrap(),
            message: message.to_string(),
        }
    }

    fn flush(commands: &mpsc::Sender<Command>) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        commands.blocking_send(Command::Flush(tx)).unwrap();
        rx.blocking_recv().unwrap()
    }

    #[test]
    fn test_writes_in_order_and_publishes_path() {
        let h = start();

        h.commands
            .blocking_send(Command::Write(record(15, "one\n")))
            .unwrap();
        h.commands
            .blocking_send(Command::Write(record(15, "two\n")))
            .unwrap();
        flush(&h.commands).unwrap();

        assert_eq!(
            h.current_path.read().unwrap().as_deref(),
            Some(Path::new("/logs/2024-01-15.log"))
        );
        assert_eq!(
            h.opener.contents(Path::new("/logs/2024-01-15.log")),
            "2024-01-15T12:00:00.000Z: one\n2024-01-15T12:00:00.000Z: two\n"
        );

        h.commands.blocking_send(Command::Shutdown).unwrap();
        h.thread.join().unwrap();
        assert!(h.current_path.read().unwrap().is_none());
        assert_eq!(h.opener.live.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_flush_reports_failure_once() {
        let mut h = start();
        h.opener.fail_writes.store(true, Ordering::SeqCst);

        h.commands
            .blocking_send(Command::Write(record(15, "lost\n")))
            .unwrap();
        let err = flush(&h.commands).unwrap_err();
        assert_eq!(err.path(), Some(Path::new("/logs/2024-01-15.log")));

        // Taken by the first flush
        assert!(flush(&h.commands).is_ok());

        let side = h.errors.try_recv().unwrap();
        assert!(matches!(side, LoggerError::Sink { .. }));

        h.commands.blocking_send(Command::Shutdown).unwrap();
        h.thread.join().unwrap();
    }

    #[test]
    fn test_stops_when_all_senders_dropped() {
        let h = start();
        h.commands
            .blocking_send(Command::Write(record(16, "last\n")))
            .unwrap();
        drop(h.commands);
        h.thread.join().unwrap();

        assert_eq!(
            h.opener.contents(Path::new("/logs/2024-01-16.log")),
            "2024-01-16T12:00:00.000Z: last\n"
        );
    }

    #[test]
    fn test_replicate_keeps_kind_and_path() {
        let original = LoggerError::Sink {
            path: PathBuf::from("/logs/x.log"),
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        };
        match replicate(&original) {
            LoggerError::Sink { path, source } => {
                assert_eq!(path, PathBuf::from("/logs/x.log"));
                assert_eq!(source.kind(), io::ErrorKind::PermissionDenied);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
