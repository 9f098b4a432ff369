//! Error types for stamplog

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by the logger
#[derive(Debug, Error)]
pub enum LoggerError {
    /// Generic I/O failure (fd duplication, thread spawn, config read)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file could not be parsed
    #[error("Failed to parse config file: {0}")]
    Config(#[from] toml::de::Error),

    /// Opening or writing a log file failed
    #[error("Failed to write log file {}: {source}", .path.display())]
    Sink {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Standard streams are already being captured in this process
    #[error("Standard streams are already intercepted")]
    AlreadyIntercepting,

    /// Global interception is not available on this platform
    #[error("Standard stream interception is not supported on this platform")]
    InterceptUnsupported,

    /// The writer thread has stopped and no longer accepts commands
    #[error("Log writer is closed")]
    WriterClosed,
}

impl LoggerError {
    /// Path of the log file involved, if any
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            LoggerError::Sink { path, .. } => Some(path),
            _ => None,
        }
    }
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, LoggerError>;
