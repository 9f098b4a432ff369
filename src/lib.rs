//! stamplog - append-only, date-rotated file logger
//!
//! Every record is written as `<ISO-8601 timestamp>: <message>` to
//! `<folder>/<formatted date>.log`, with terminal escape sequences removed. The file is
//! swapped whenever the formatted name changes. Standard output and error can be
//! mirrored into the same log.

pub mod config;
pub mod error;
pub mod logging;

pub use config::{LoggerConfig, LoggerOptions, Timezone};
pub use error::{LoggerError, Result};
pub use logging::{LogHandle, Logger};
