//! Standard stream interception
//!
//! Two ways to mirror output into the log:
//!
//! - [`Intercepted`] wraps any writer and is composed where output is produced. It logs
//!   the bytes and then delegates to the wrapped writer, returning its result unchanged.
//! - [`StdCapture`] redirects the process-wide stdout/stderr file descriptors through a
//!   pipe, so output from anything in the process (including child processes inheriting
//!   the descriptors) is logged and then forwarded to the original destination.

use std::fmt;
use std::io::{self, Write};

use super::logger::LogHandle;

/// A writer that copies everything it is given into the log
pub struct Intercepted<W> {
    inner: W,
    handle: LogHandle,
}

impl<W: Write> Intercepted<W> {
    pub fn new(inner: W, handle: LogHandle) -> Self {
        Self { inner, handle }
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for Intercepted<W> {
    /// Only the bytes the inner writer accepted are logged, so a caller retrying a short
    /// write never duplicates text in the log
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        if written > 0 {
            self.handle.log_bytes(&buf[..written]);
        }
        Ok(written)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.handle.log_bytes(buf);
        self.inner.write_all(buf)
    }

    /// One formatted call is one record, not one per formatting fragment
    fn write_fmt(&mut self, args: fmt::Arguments<'_>) -> io::Result<()> {
        let text = fmt::format(args);
        self.handle.log(&text);
        self.inner.write_all(text.as_bytes())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// One of the two process-wide output channels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdStream {
    Stdout,
    Stderr,
}

impl StdStream {
    pub fn name(&self) -> &'static str {
        match self {
            StdStream::Stdout => "stdout",
            StdStream::Stderr => "stderr",
        }
    }

    /// Push Rust's own buffered output down to the descriptor
    fn flush_buffered(&self) {
        let _ = match self {
            StdStream::Stdout => io::stdout().flush(),
            StdStream::Stderr => io::stderr().flush(),
        };
    }
}

#[cfg(unix)]
pub use self::unix::StdCapture;

#[cfg(not(unix))]
pub use self::unsupported::StdCapture;

#[cfg(unix)]
mod unix {
    use std::fs::File;
    use std::io::{self, Read, Write};
    use std::os::fd::{AsRawFd, FromRawFd, RawFd};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread::{self, JoinHandle};

    use tracing::{debug, warn};

    use super::StdStream;
    use crate::error::{LoggerError, Result};
    use crate::logging::logger::LogHandle;

    const READ_CHUNK: usize = 8 * 1024;

    /// Longest unterminated run held back waiting for a newline
    const MAX_PENDING: usize = 64 * 1024;

    /// Process-wide guard: descriptors can only be redirected by one capture at a time
    static INSTALLED: AtomicBool = AtomicBool::new(false);

    impl StdStream {
        fn fd(&self) -> RawFd {
            match self {
                StdStream::Stdout => libc::STDOUT_FILENO,
                StdStream::Stderr => libc::STDERR_FILENO,
            }
        }
    }

    /// Duplicate a descriptor into an owned `File`
    fn dup_file(fd: RawFd) -> io::Result<File> {
        // SAFETY: dup returns a fresh descriptor that we exclusively own
        let copy = unsafe { libc::dup(fd) };
        if copy < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(unsafe { File::from_raw_fd(copy) })
    }

    fn redirect(from: RawFd, onto: RawFd) -> io::Result<()> {
        // SAFETY: both descriptors are open for the duration of the call
        if unsafe { libc::dup2(from, onto) } < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Splits captured bytes into one record per line
    ///
    /// Pipe reads carry no write boundaries: one read can hold many writes and one write
    /// can span reads. The unterminated tail is held until its newline arrives.
    #[derive(Debug, Default)]
    struct LineFramer {
        pending: Vec<u8>,
    }

    impl LineFramer {
        fn push(&mut self, bytes: &[u8], mut emit: impl FnMut(&[u8])) {
            self.pending.extend_from_slice(bytes);

            let mut start = 0;
            while let Some(pos) = self.pending[start..].iter().position(|&b| b == b'\n') {
                let end = start + pos + 1;
                emit(&self.pending[start..end]);
                start = end;
            }
            if self.pending.len() - start > MAX_PENDING {
                let end = start + char_boundary(&self.pending[start..]);
                emit(&self.pending[start..end]);
                start = end;
            }
            self.pending.drain(..start);
        }

        /// Emit whatever is left once the stream has ended
        fn finish(&mut self, mut emit: impl FnMut(&[u8])) {
            if !self.pending.is_empty() {
                emit(&self.pending);
                self.pending.clear();
            }
        }
    }

    /// Length of `bytes` minus a trailing incomplete UTF-8 sequence
    fn char_boundary(bytes: &[u8]) -> usize {
        let len = bytes.len();
        for back in 1..=len.min(4) {
            let b = bytes[len - back];
            if b & 0xC0 == 0x80 {
                continue;
            }
            let width = match b {
                0xF0..=0xFF => 4,
                0xE0..=0xEF => 3,
                0xC0..=0xDF => 2,
                _ => 1,
            };
            return if width > back { len - back } else { len };
        }
        len
    }

    /// One redirected descriptor and the thread draining its pipe
    struct CapturedStream {
        stream: StdStream,
        /// The descriptor's original target, used to restore it
        original: File,
        reader: Option<JoinHandle<()>>,
    }

    impl CapturedStream {
        fn install(stream: StdStream, handle: LogHandle) -> io::Result<Self> {
            stream.flush_buffered();

            let original = dup_file(stream.fd())?;
            let forward = original.try_clone()?;
            let (mut pipe_reader, pipe_writer) = os_pipe::pipe()?;

            redirect(pipe_writer.as_raw_fd(), stream.fd())?;
            // The descriptor now holds the only write end we keep
            drop(pipe_writer);

            let reader = thread::Builder::new()
                .name(format!("stamplog-{}", stream.name()))
                .spawn(move || {
                    let mut framer = LineFramer::default();
                    let mut forward = Some(forward);
                    let mut buf = [0u8; READ_CHUNK];
                    loop {
                        let n = match pipe_reader.read(&mut buf) {
                            Ok(0) => break,
                            Ok(n) => n,
                            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                            Err(_) => break,
                        };
                        framer.push(&buf[..n], |line| {
                            handle.log_bytes(line);
                        });

                        let Some(target) = forward.as_mut() else {
                            continue;
                        };
                        if let Err(e) = target.write_all(&buf[..n]) {
                            // Writers must see the destination's error themselves
                            let _ = redirect(target.as_raw_fd(), stream.fd());
                            warn!(
                                "Forwarding {} failed, handing the descriptor back: {}",
                                stream.name(),
                                e
                            );
                            forward = None;
                        }
                    }
                    framer.finish(|line| {
                        handle.log_bytes(line);
                    });
                });

            let reader = match reader {
                Ok(reader) => reader,
                Err(e) => {
                    let _ = redirect(original.as_raw_fd(), stream.fd());
                    return Err(e);
                }
            };

            Ok(Self {
                stream,
                original,
                reader: Some(reader),
            })
        }

        /// Point the descriptor back at its original target and drain the pipe
        ///
        /// Blocks until every process holding the pipe's write end (e.g. children that
        /// inherited the descriptor) has closed it.
        fn restore(&mut self) -> io::Result<()> {
            let Some(reader) = self.reader.take() else {
                return Ok(());
            };
            self.stream.flush_buffered();
            redirect(self.original.as_raw_fd(), self.stream.fd())?;
            if reader.join().is_err() {
                warn!("{} capture thread panicked", self.stream.name());
            }
            Ok(())
        }
    }

    /// Process-wide stdout/stderr redirection through the logger
    ///
    /// Dropping the capture restores both descriptors.
    pub struct StdCapture {
        streams: Vec<CapturedStream>,
    }

    impl StdCapture {
        /// Redirect stdout and stderr; fails if another capture is active
        pub fn install(handle: LogHandle) -> Result<Self> {
            if INSTALLED
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return Err(LoggerError::AlreadyIntercepting);
            }

            let mut capture = Self {
                streams: Vec::with_capacity(2),
            };
            for stream in [StdStream::Stdout, StdStream::Stderr] {
                match CapturedStream::install(stream, handle.clone()) {
                    Ok(captured) => capture.streams.push(captured),
                    Err(e) => {
                        let _ = capture.restore_all();
                        return Err(e.into());
                    }
                }
            }

            debug!("Intercepting stdout and stderr");
            Ok(capture)
        }

        /// Whether any capture is active in this process
        pub fn is_installed() -> bool {
            INSTALLED.load(Ordering::SeqCst)
        }

        /// Restore both descriptors, reporting the first failure
        pub fn uninstall(mut self) -> Result<()> {
            self.restore_all()
        }

        fn restore_all(&mut self) -> Result<()> {
            let mut first_error = None;
            // Reverse install order
            while let Some(mut captured) = self.streams.pop() {
                if let Err(e) = captured.restore() {
                    first_error.get_or_insert(e);
                }
            }
            INSTALLED.store(false, Ordering::SeqCst);
            match first_error {
                Some(e) => Err(e.into()),
                None => Ok(()),
            }
        }
    }

    impl Drop for StdCapture {
        fn drop(&mut self) {
            if !self.streams.is_empty() {
                let _ = self.restore_all();
            }
        }
    }

}

#[cfg(not(unix))]
mod unsupported {
    use crate::error::{LoggerError, Result};
    use crate::logging::logger::LogHandle;

    /// Descriptor-level capture is only implemented on Unix
    pub struct StdCapture {
        _private: (),
    }

    impl StdCapture {
        pub fn install(_handle: LogHandle) -> Result<Self> {
            Err(LoggerError::InterceptUnsupported)
        }

        pub fn is_installed() -> bool {
            false
        }

        pub fn uninstall(self) -> Result<()> {
            Ok(())
        }
    }
}
