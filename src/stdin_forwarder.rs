//! stdin forwarder - copies host input into the managed process
//!
//! Runs on its own thread so the main loop can keep watching signals and the
//! child's exit.

use crate::keys::KEY_CTRL_D;
use crate::manager::{ProcessManager, Transport};
use std::io::{self, Read};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::debug;

const STDIN_CHUNK_SIZE: usize = 1024;

/// Why the forwarding loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardEnd {
    /// Input reached end-of-file and the child was told so
    Eof,
    /// The child no longer accepts input
    InputClosed,
    /// Reading the input failed
    ReadError,
}

/// stdin forwarder
pub struct StdinForwarder {
    handle: JoinHandle<ForwardEnd>,
}

impl StdinForwarder {
    /// Start forwarding the host's stdin to `pm`
    pub fn spawn(pm: Arc<ProcessManager>) -> io::Result<Self> {
        Self::spawn_with_reader(io::stdin(), pm)
    }

    /// Start forwarding an arbitrary reader to `pm`
    pub fn spawn_with_reader<R>(reader: R, pm: Arc<ProcessManager>) -> io::Result<Self>
    where
        R: Read + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name("pipeit-stdin".to_string())
            .spawn(move || forward(reader, &pm))?;
        Ok(Self { handle })
    }

    /// Wait for the forwarding loop to end
    pub fn join(self) -> Option<ForwardEnd> {
        self.handle.join().ok()
    }
}

/// Copy `reader` into the process until either side closes
pub fn forward<R: Read>(mut reader: R, pm: &ProcessManager) -> ForwardEnd {
    let mut buffer = vec![0u8; STDIN_CHUNK_SIZE];

    loop {
        match reader.read(&mut buffer) {
            Ok(0) => {
                debug!("stdin EOF");
                signal_eof(pm);
                return ForwardEnd::Eof;
            }
            Ok(n) => {
                if let Err(e) = pm.write(&buffer[..n]) {
                    debug!(error = %e, "stopped forwarding stdin");
                    return ForwardEnd::InputClosed;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!(error = %e, "stdin read error");
                return ForwardEnd::ReadError;
            }
        }
    }
}

/// Pass end-of-input on: close the pipe, or type Ctrl-D into the terminal
fn signal_eof(pm: &ProcessManager) {
    let result = match pm.transport() {
        Transport::Pty => pm.write_str(KEY_CTRL_D),
        Transport::Pipes | Transport::Unset => pm.close_input(),
    };
    if let Err(e) = result {
        debug!(error = %e, "could not pass stdin EOF to child");
    }
}
