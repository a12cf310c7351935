//! The process manager: one child process, one transport, asynchronous output
//! handlers and synchronous input.

use crate::config::{ManagerConfig, OutputHandler};
use crate::drain::{spawn_drain_loop, stop_signal, HandlerSlots, StopTrigger, StreamKind};
use crate::error::{PipeError, Result};
use crate::process::{ChildProcess, ExitStatus, PipeChild, PtyChild};
use crate::pty;
use nix::errno::Errno;
use std::fmt;
use std::fs::File;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

/// The I/O mechanism chosen for a process; fixed once the process starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Unset,
    Pty,
    Pipes,
}

/// Set once by `stop`; a start attempted afterwards is refused.
#[derive(Debug, Clone, Default)]
struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct State {
    transport: Transport,
    /// PTY master or stdin pipe, whichever transport is active
    input: Option<Arc<File>>,
    pty_master: Option<Arc<File>>,
    on_output: Option<OutputHandler>,
    on_error: Option<OutputHandler>,
    running: bool,
    child: Option<ChildProcess>,
    exit_status: Option<ExitStatus>,
    stop_trigger: Option<StopTrigger>,
    drain_loops: Vec<JoinHandle<()>>,
}

struct Shared {
    config: ManagerConfig,
    cancel: CancellationToken,
    state: Mutex<State>,
}

impl Shared {
    // Handlers never run under this lock, so a poisoned guard still holds
    // consistent fields.
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl HandlerSlots for Shared {
    fn output_handler(&self) -> Option<OutputHandler> {
        self.lock().on_output.clone()
    }

    fn error_handler(&self) -> Option<OutputHandler> {
        self.lock().on_error.clone()
    }
}

/// Manages the lifecycle and I/O of a single child process.
///
/// All methods take `&self`; share the manager through an `Arc` to write from
/// one thread while another waits or stops it.
///
/// ```no_run
/// use pipeit::ProcessManager;
///
/// # fn main() -> pipeit::Result<()> {
/// let pm = ProcessManager::new("bash", ["--norc"]);
/// pm.set_output_handler(|data| print!("{}", String::from_utf8_lossy(&data)));
/// pm.start_with_pty()?;
/// pm.writeln("echo 'Hello World'")?;
/// pm.writeln("exit")?;
/// pm.wait()?;
/// # Ok(())
/// # }
/// ```
pub struct ProcessManager {
    shared: Arc<Shared>,
}

impl ProcessManager {
    /// Create a manager for `command` with the inherited environment and no
    /// handlers. Nothing is spawned until one of the `start_*` methods runs.
    pub fn new<I, S>(command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_config(ManagerConfig::new(command).args(args))
    }

    /// Create a manager from a full configuration, pre-registering its
    /// handlers
    pub fn with_config(mut config: ManagerConfig) -> Self {
        let on_output = config.on_output.take();
        let on_error = config.on_error.take();

        Self {
            shared: Arc::new(Shared {
                config,
                cancel: CancellationToken::default(),
                state: Mutex::new(State {
                    transport: Transport::Unset,
                    input: None,
                    pty_master: None,
                    on_output,
                    on_error,
                    running: false,
                    child: None,
                    exit_status: None,
                    stop_trigger: None,
                    drain_loops: Vec::new(),
                }),
            }),
        }
    }

    /// Replace the output handler. Takes effect from the next chunk read.
    pub fn set_output_handler<F>(&self, handler: F)
    where
        F: Fn(Vec<u8>) + Send + Sync + 'static,
    {
        self.shared.lock().on_output = Some(Arc::new(handler));
    }

    /// Discard output from now on
    pub fn clear_output_handler(&self) {
        self.shared.lock().on_output = None;
    }

    /// Replace the error handler. With the pipe transport it receives the
    /// child's stderr; with the PTY transport stderr is merged into the
    /// output stream and this handler only receives read-failure diagnostics.
    pub fn set_error_handler<F>(&self, handler: F)
    where
        F: Fn(Vec<u8>) + Send + Sync + 'static,
    {
        self.shared.lock().on_error = Some(Arc::new(handler));
    }

    /// Discard stderr data and read-failure diagnostics from now on
    pub fn clear_error_handler(&self) {
        self.shared.lock().on_error = None;
    }

    /// Start the process attached to a pseudo-terminal (PTY).
    ///
    /// Required for interactive programs such as shells and REPLs. The child's
    /// stdout and stderr both arrive at the output handler; the error handler
    /// only hears about failures reading the terminal itself.
    pub fn start_with_pty(&self) -> Result<()> {
        let mut state = self.shared.lock();
        let launched = self.launch_pty(&mut state);
        drop(state);
        launched.map_err(StartFailure::abandon)
    }

    fn launch_pty(&self, state: &mut State) -> std::result::Result<(), StartFailure> {
        self.check_startable(state)?;

        let (trigger, listener) =
            stop_signal().map_err(|e| PipeError::transport("create stop signal", e))?;
        let PtyChild { child, master } = ChildProcess::spawn_pty(&self.shared.config)?;

        let reader = master.try_clone().map_err(|e| {
            StartFailure::with_child(PipeError::transport("duplicate PTY master", e), child)
        })?;
        let drain = spawn_drain_loop(reader, StreamKind::Pty, listener, self.shared.clone())
            .map_err(|e| {
                StartFailure::with_child(PipeError::transport("start PTY reader", e), child)
            })?;

        let master = Arc::new(master);
        state.transport = Transport::Pty;
        state.input = Some(Arc::clone(&master));
        state.pty_master = Some(master);
        state.child = Some(child);
        state.stop_trigger = Some(trigger);
        state.drain_loops.push(drain);
        state.running = true;

        info!(pid = %child.pid(), command = %self.shared.config.command, "process started on PTY");
        Ok(())
    }

    /// Start the process using standard OS pipes for stdin, stdout and stderr.
    ///
    /// Suitable for non-interactive batch commands. Stdout feeds the output
    /// handler and stderr the error handler, each from its own thread.
    pub fn start_with_pipes(&self) -> Result<()> {
        let mut state = self.shared.lock();
        let launched = self.launch_pipes(&mut state);
        drop(state);
        launched.map_err(StartFailure::abandon)
    }

    fn launch_pipes(&self, state: &mut State) -> std::result::Result<(), StartFailure> {
        self.check_startable(state)?;

        let (trigger, listener) =
            stop_signal().map_err(|e| PipeError::transport("create stop signal", e))?;
        let PipeChild {
            child,
            stdin,
            stdout,
            stderr,
        } = ChildProcess::spawn_pipes(&self.shared.config)?;

        let stdout_drain = spawn_drain_loop(
            stdout,
            StreamKind::Stdout,
            listener.clone(),
            self.shared.clone(),
        )
        .map_err(|e| StartFailure::with_child(PipeError::transport("start stdout reader", e), child))?;

        let stderr_drain =
            match spawn_drain_loop(stderr, StreamKind::Stderr, listener, self.shared.clone()) {
                Ok(handle) => handle,
                Err(e) => {
                    // Wakes the stdout loop as well
                    trigger.fire();
                    return Err(StartFailure::with_child(
                        PipeError::transport("start stderr reader", e),
                        child,
                    ));
                }
            };

        state.transport = Transport::Pipes;
        state.input = Some(Arc::new(stdin));
        state.child = Some(child);
        state.stop_trigger = Some(trigger);
        state.drain_loops.push(stdout_drain);
        state.drain_loops.push(stderr_drain);
        state.running = true;

        info!(pid = %child.pid(), command = %self.shared.config.command, "process started on pipes");
        Ok(())
    }

    fn check_startable(&self, state: &State) -> Result<()> {
        if state.transport != Transport::Unset {
            return Err(PipeError::AlreadyStarted);
        }
        if self.shared.cancel.is_cancelled() {
            return Err(PipeError::Cancelled);
        }
        Ok(())
    }

    /// Send raw bytes to the process's input.
    ///
    /// Returns the number of bytes written, which is always `data.len()` on
    /// success.
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        // Clone the sink so the lock is not held while the write blocks
        let sink = self
            .shared
            .lock()
            .input
            .clone()
            .ok_or(PipeError::NoInputAvailable)?;

        let mut writer: &File = &sink;
        writer.write_all(data)?;
        Ok(data.len())
    }

    /// Send a string to the process's input
    pub fn write_str(&self, s: &str) -> Result<()> {
        self.write(s.as_bytes()).map(drop)
    }

    /// Format and send a string, e.g. `pm.write_fmt(format_args!("{}\r", cmd))`
    pub fn write_fmt(&self, args: fmt::Arguments<'_>) -> Result<()> {
        self.write_str(&args.to_string())
    }

    /// Send a string followed by a newline
    pub fn writeln(&self, s: &str) -> Result<()> {
        self.write_str(&format!("{}\n", s))
    }

    /// Release the manager's input end without stopping the process. With the
    /// pipe transport the child sees end-of-file on stdin; with the PTY the
    /// terminal stays open (send [`KEY_CTRL_D`](crate::keys::KEY_CTRL_D)
    /// instead). Later writes fail with `NoInputAvailable`.
    pub fn close_input(&self) -> Result<()> {
        let mut state = self.shared.lock();
        match state.input.take() {
            Some(_) => {
                debug!(transport = ?state.transport, "input closed");
                Ok(())
            }
            None => Err(PipeError::NoInputAvailable),
        }
    }

    /// Whether the process was started and has neither been stopped nor been
    /// observed to exit by `wait`/`try_wait`
    pub fn is_running(&self) -> bool {
        self.shared.lock().running
    }

    /// OS process id, or -1 before the process is spawned
    pub fn pid(&self) -> i32 {
        self.shared
            .lock()
            .child
            .map_or(-1, |child| child.pid().as_raw())
    }

    pub fn transport(&self) -> Transport {
        self.shared.lock().transport
    }

    /// A duplicate handle to the PTY master for advanced terminal control, or
    /// `None` with the pipe transport or after `stop`
    pub fn session(&self) -> Result<Option<File>> {
        let state = self.shared.lock();
        let session = state
            .pty_master
            .as_ref()
            .map(|master| master.try_clone())
            .transpose()?;
        Ok(session)
    }

    /// Set the terminal window size of the PTY
    pub fn set_window_size(&self, rows: u16, cols: u16) -> Result<()> {
        let state = self.shared.lock();
        let master = state.pty_master.as_ref().ok_or(PipeError::NoPtySession)?;
        pty::set_winsize(&**master, rows, cols)?;
        debug!(rows, cols, "PTY window size set");
        Ok(())
    }

    /// Whether every drain loop has finished delivering output
    pub fn output_drained(&self) -> bool {
        self.shared
            .lock()
            .drain_loops
            .iter()
            .all(|handle| handle.is_finished())
    }

    /// Terminate the process and close the PTY or stdin pipe.
    ///
    /// Drain loops are woken and exit without delivering further chunks. An
    /// error means the kill request failed, e.g. because the process already
    /// exited; it is informational. Calling `stop` again is safe and reports
    /// the outcome of the repeated kill.
    pub fn stop(&self) -> Result<()> {
        let mut state = self.shared.lock();
        let Some(child) = self.release(&mut state) else {
            return Ok(());
        };

        // A reaped pid may already belong to another process
        if state.exit_status.is_some() {
            return Err(PipeError::ProcessTermination(Errno::ESRCH));
        }

        debug!(pid = %child.pid(), "killing process");
        child.kill().map_err(|e| {
            warn!(pid = %child.pid(), error = %e, "failed to kill process");
            e
        })
    }

    /// Cancel future starts, wake the drain loops and close the transport.
    /// Returns the child, if one was spawned.
    fn release(&self, state: &mut State) -> Option<ChildProcess> {
        self.shared.cancel.cancel();
        state.running = false;

        if let Some(trigger) = state.stop_trigger.take() {
            trigger.fire();
        }
        state.pty_master = None;
        state.input = None;

        state.child
    }

    /// Block until the process exits and return its status. Once the exit has
    /// been observed `is_running` reports false. Any number of threads may
    /// wait at once; all of them get the same status.
    pub fn wait(&self) -> Result<ExitStatus> {
        loop {
            let child = {
                let mut state = self.shared.lock();
                if let Some(status) = state.exit_status {
                    return Ok(status);
                }
                let child = state.child.ok_or(PipeError::NotStarted)?;

                // Reaping and recording happen under the same lock, so `stop`
                // never sees a reaped pid without its status.
                if let Some(status) = child.try_wait()? {
                    record_exit(&mut state, child, status);
                    return Ok(status);
                }
                child
            };

            child.wait_exited()?;
        }
    }

    /// Check for exit without blocking
    pub fn try_wait(&self) -> Result<Option<ExitStatus>> {
        let mut state = self.shared.lock();
        if let Some(status) = state.exit_status {
            return Ok(Some(status));
        }
        let child = state.child.ok_or(PipeError::NotStarted)?;

        let status = child.try_wait()?;
        if let Some(status) = status {
            record_exit(&mut state, child, status);
        }
        Ok(status)
    }
}

fn record_exit(state: &mut State, child: ChildProcess, status: ExitStatus) {
    info!(pid = %child.pid(), %status, "process exited");
    state.exit_status = Some(status);
    state.running = false;
}

/// A start attempt that failed, possibly after the child was spawned
struct StartFailure {
    error: PipeError,
    child: Option<ChildProcess>,
}

impl StartFailure {
    fn with_child(error: PipeError, child: ChildProcess) -> Self {
        Self {
            error,
            child: Some(child),
        }
    }

    /// Kill and reap the half-started child. Called with the state lock
    /// released.
    fn abandon(self) -> PipeError {
        if let Some(child) = self.child {
            if let Err(e) = child.kill() {
                warn!(pid = %child.pid(), error = %e, "failed to kill abandoned process");
            }
            let _ = child.wait();
        }
        self.error
    }
}

impl From<PipeError> for StartFailure {
    fn from(error: PipeError) -> Self {
        Self { error, child: None }
    }
}

impl Drop for ProcessManager {
    fn drop(&mut self) {
        let child = {
            let mut state = self.shared.lock();
            match self.release(&mut state) {
                Some(child) if state.exit_status.is_none() => child,
                _ => return,
            }
        };

        // No one can wait on the child once the manager is gone
        debug!(pid = %child.pid(), "killing process on drop");
        if let Err(e) = child.kill() {
            debug!(pid = %child.pid(), error = %e, "kill on drop failed");
        }
        if let Err(e) = child.wait() {
            debug!(pid = %child.pid(), error = %e, "reap on drop failed");
        }
    }
}

impl fmt::Debug for ProcessManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("ProcessManager")
            .field("command", &self.shared.config.command)
            .field("args", &self.shared.config.args)
            .field("transport", &state.transport)
            .field("pid", &state.child.map(|c| c.pid()))
            .field("running", &state.running)
            .field("exit_status", &state.exit_status)
            .finish()
    }
}
