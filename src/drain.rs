//! Drain loops: one thread per readable stream, forwarding every chunk to the
//! handler currently registered for that stream.

use crate::config::OutputHandler;
use crate::pty::set_cloexec;
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::os::fd::{AsFd, OwnedFd};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, trace};

/// Largest chunk handed to a handler in one call
pub const READ_CHUNK_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// PTY master; carries the child's merged stdout and stderr
    Pty,
    Stdout,
    Stderr,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamKind::Pty => "pty",
            StreamKind::Stdout => "stdout",
            StreamKind::Stderr => "stderr",
        };
        f.write_str(name)
    }
}

/// Where drain loops look up their handlers. Implementations must return the
/// value registered at call time; loops query once per chunk.
pub trait HandlerSlots: Send + Sync + 'static {
    fn output_handler(&self) -> Option<OutputHandler>;
    fn error_handler(&self) -> Option<OutputHandler>;
}

/// Write end of the wake pipe. Dropping it wakes every listener.
#[derive(Debug)]
pub struct StopTrigger(OwnedFd);

impl StopTrigger {
    pub fn fire(self) {
        drop(self.0);
    }
}

/// Read end of the wake pipe, shared by the drain loops of one process
#[derive(Debug, Clone)]
pub struct StopListener(Arc<OwnedFd>);

/// Create a connected stop trigger/listener pair
pub fn stop_signal() -> io::Result<(StopTrigger, StopListener)> {
    let (read_end, write_end) = nix::unistd::pipe()?;
    set_cloexec(&read_end)?;
    set_cloexec(&write_end)?;
    Ok((StopTrigger(write_end), StopListener(Arc::new(read_end))))
}

enum Readiness {
    Stream,
    Stop,
}

/// Start a drain loop for `stream` on its own thread
pub fn spawn_drain_loop<S: HandlerSlots>(
    stream: File,
    kind: StreamKind,
    stop: StopListener,
    slots: Arc<S>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("pipeit-drain-{}", kind))
        .spawn(move || drain(stream, kind, &stop, slots.as_ref()))
}

fn drain<S: HandlerSlots>(mut stream: File, kind: StreamKind, stop: &StopListener, slots: &S) {
    debug!(stream = %kind, "drain loop started");
    let mut buf = [0u8; READ_CHUNK_SIZE];

    loop {
        match wait_readable(&stream, stop) {
            Ok(Readiness::Stream) => {}
            Ok(Readiness::Stop) => {
                debug!(stream = %kind, "drain loop stopped on request");
                return;
            }
            Err(e) => {
                report_error(kind, &e, slots);
                return;
            }
        }

        match stream.read(&mut buf) {
            Ok(0) => {
                debug!(stream = %kind, "drain loop reached end of stream");
                return;
            }
            Ok(n) => {
                trace!(stream = %kind, bytes = n, "chunk read");
                // Handlers own their chunk; the read buffer is reused.
                let chunk = buf[..n].to_vec();
                let handler = match kind {
                    StreamKind::Pty | StreamKind::Stdout => slots.output_handler(),
                    StreamKind::Stderr => slots.error_handler(),
                };
                if let Some(handler) = handler {
                    handler(chunk);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if is_end_of_stream(kind, &e) => {
                debug!(stream = %kind, "PTY slave closed");
                return;
            }
            Err(e) => {
                report_error(kind, &e, slots);
                return;
            }
        }
    }
}

/// Block until the stream has something to report or a stop was requested.
/// A pending stop wins over pending data.
fn wait_readable(stream: &File, stop: &StopListener) -> io::Result<Readiness> {
    let mut fds = [
        PollFd::new(stream.as_fd(), PollFlags::POLLIN),
        PollFd::new(stop.0.as_fd(), PollFlags::POLLIN),
    ];

    loop {
        match poll(&mut fds, PollTimeout::NONE) {
            Ok(_) => break,
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(e.into()),
        }
    }

    let stop_requested = fds[1].revents().map_or(false, |r| !r.is_empty());
    if stop_requested {
        Ok(Readiness::Stop)
    } else {
        Ok(Readiness::Stream)
    }
}

/// EIO on a PTY master means every slave descriptor is gone, i.e. the child
/// has exited. That is the PTY's normal end of stream.
pub fn is_end_of_stream(kind: StreamKind, err: &io::Error) -> bool {
    kind == StreamKind::Pty && err.raw_os_error() == Some(libc::EIO)
}

pub fn format_read_error(kind: StreamKind, err: &io::Error) -> String {
    match kind {
        StreamKind::Pty => format!("\n[Read Error]: {}\n", err),
        StreamKind::Stdout | StreamKind::Stderr => format!("[Read Error]: {}\n", err),
    }
}

fn report_error<S: HandlerSlots>(kind: StreamKind, err: &io::Error, slots: &S) {
    debug!(stream = %kind, error = %err, "drain loop failed");
    if let Some(handler) = slots.error_handler() {
        handler(format_read_error(kind, err).into_bytes());
    }
}
