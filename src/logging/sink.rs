//! Date-named log files and the rotation decision
//!
//! [`RotatingSink`] keeps at most one append-mode file open. Every record resolves its
//! target path from its own timestamp; when that path differs from the open one, the old
//! file is flushed and released before the new one is opened.

use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::debug;

use super::pattern::FilenamePattern;
use crate::config::{LoggerConfig, Timezone};
use crate::error::{LoggerError, Result};

/// File extension appended to every formatted name
pub const LOG_EXTENSION: &str = "log";

/// One sanitized message with the instant it was logged at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Used both for the file name and the printed prefix
    pub timestamp: DateTime<Utc>,
    /// Escape-free text ending in exactly one newline
    pub message: String,
}

impl Record {
    /// `<ISO-8601 timestamp>: <message>`
    pub fn line(&self) -> String {
        format!(
            "{}: {}",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.message
        )
    }
}

/// Opens appendable byte sinks keyed by path
pub trait SinkOpener: Send {
    fn open_append(&mut self, path: &Path) -> io::Result<Box<dyn Write + Send>>;
}

/// Opens real files in append mode
#[derive(Debug, Clone, Copy)]
pub struct FileOpener {
    create_folder: bool,
}

impl FileOpener {
    pub fn new(create_folder: bool) -> Self {
        Self { create_folder }
    }
}

impl SinkOpener for FileOpener {
    fn open_append(&mut self, path: &Path) -> io::Result<Box<dyn Write + Send>> {
        if self.create_folder {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Box::new(BufWriter::new(file)))
    }
}

struct OpenSink {
    path: PathBuf,
    writer: Box<dyn Write + Send>,
}

/// Owns the single open log file and decides when to swap it
pub struct RotatingSink {
    folder: PathBuf,
    pattern: FilenamePattern,
    timezone: Timezone,
    opener: Box<dyn SinkOpener>,
    current: Option<OpenSink>,
    /// Flush failure of a file released during rotation
    close_error: Option<LoggerError>,
}

impl RotatingSink {
    pub fn new(config: &LoggerConfig, opener: Box<dyn SinkOpener>) -> Self {
        Self {
            folder: config.folder.clone(),
            pattern: FilenamePattern::parse(&config.filename),
            timezone: config.timezone,
            opener,
            current: None,
            close_error: None,
        }
    }

    /// `folder/<formatted timestamp>.log`
    pub fn resolve_path(&self, timestamp: &DateTime<Utc>) -> PathBuf {
        let name = self.pattern.format(timestamp, self.timezone);
        self.folder.join(format!("{}.{}", name, LOG_EXTENSION))
    }

    /// Path of the open file, if any
    pub fn current_path(&self) -> Option<&Path> {
        self.current.as_ref().map(|open| open.path.as_path())
    }

    /// Write one record, rotating first if its path differs from the open file
    ///
    /// On failure the open file is released so the next record retries opening.
    pub fn write_record(&mut self, record: &Record) -> Result<()> {
        let path = self.resolve_path(&record.timestamp);
        let line = record.line();

        let open = self.ensure_open(path)?;
        if let Err(source) = open.writer.write_all(line.as_bytes()) {
            let path = open.path.clone();
            self.current = None;
            return Err(LoggerError::Sink { path, source });
        }
        Ok(())
    }

    /// Flush the open file
    pub fn flush(&mut self) -> Result<()> {
        let Some(open) = self.current.as_mut() else {
            return Ok(());
        };
        if let Err(source) = open.writer.flush() {
            let path = open.path.clone();
            self.current = None;
            return Err(LoggerError::Sink { path, source });
        }
        Ok(())
    }

    /// Flush and release the open file
    pub fn close(&mut self) -> Result<()> {
        match self.current.take() {
            Some(mut open) => open
                .writer
                .flush()
                .map_err(|source| LoggerError::Sink {
                    path: open.path.clone(),
                    source,
                }),
            None => Ok(()),
        }
    }

    /// Error from releasing the previous file during the last rotation
    pub fn take_close_error(&mut self) -> Option<LoggerError> {
        self.close_error.take()
    }

    fn ensure_open(&mut self, path: PathBuf) -> Result<&mut OpenSink> {
        let stale = match &self.current {
            Some(open) => open.path != path,
            None => true,
        };

        if stale {
            if let Some(previous) = self.current_path() {
                debug!(from = %previous.display(), to = %path.display(), "Rotating log file");
            }
            if let Err(e) = self.close() {
                self.close_error = Some(e);
            }

            let writer = match self.opener.open_append(&path) {
                Ok(writer) => writer,
                Err(source) => return Err(LoggerError::Sink { path, source }),
            };
            self.current = Some(OpenSink { path, writer });
        }

        // Populated just above when it was missing
        self.current.as_mut().ok_or(LoggerError::WriterClosed)
    }
}

impl Drop for RotatingSink {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
