//! Logging system for stamplog
//!
//! Date-rotated file writing fed by a bounded queue, ANSI cleanup of incoming text, and
//! optional mirroring of the process's standard streams.

mod clock;
mod intercept;
mod logger;
mod pattern;
mod sanitize;
mod sink;
mod writer;

pub use clock::{Clock, SystemClock};
pub use intercept::{Intercepted, StdCapture, StdStream};
pub use logger::{LogHandle, Logger};
pub use pattern::FilenamePattern;
pub use sanitize::{sanitize, strip_ansi};
pub use sink::{FileOpener, Record, RotatingSink, SinkOpener, LOG_EXTENSION};
pub use writer::ERROR_CHANNEL_CAPACITY;
