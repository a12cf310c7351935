use pipeit::cli::Cli;
use pipeit::error::{PipeError, Result};
use pipeit::logging::init_logging;
use pipeit::signal::{handle_window_resize, setup_signal_handlers, SignalFlags};
use pipeit::stdin_forwarder::StdinForwarder;
use pipeit::ProcessManager;
use std::io::{self, Write};
use std::sync::mpsc::{channel, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How often the main loop checks signal flags while the child runs
const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// How long to let trailing output drain after the child exits
const DRAIN_GRACE: Duration = Duration::from_millis(500);

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let args = Cli::parse_args();
    init_logging(args.verbose);

    if let Err(e) = args.validate() {
        eprintln!("pipeit: {}", e);
        eprintln!("Use \"pipeit --help\" to get help");
        return e.exit_code();
    }

    let signal_flags = match setup_signal_handlers() {
        Ok(flags) => flags,
        Err(e) => {
            eprintln!("pipeit: Failed to setup signal handlers: {}", e);
            return e.exit_code();
        }
    };

    match run_program(&args, signal_flags) {
        Ok(exit_code) => {
            debug!(exit_code, "child finished");
            exit_code
        }
        Err(e) => {
            eprintln!("pipeit: {}", e);
            e.exit_code()
        }
    }
}

/// Start the child, forward I/O and signals, and return the exit code
fn run_program(args: &Cli, signal_flags: SignalFlags) -> Result<i32> {
    let config = args
        .to_config()
        .on_output(|data| {
            let mut stdout = io::stdout().lock();
            let _ = stdout.write_all(&data);
            let _ = stdout.flush();
        })
        .on_error(|data| {
            let _ = io::stderr().lock().write_all(&data);
        });

    let pm = Arc::new(ProcessManager::with_config(config));
    if args.pipes {
        pm.start_with_pipes()?;
    } else {
        pm.start_with_pty()?;
    }
    info!(pid = pm.pid(), transport = ?pm.transport(), "command started");

    // An explicit --rows/--cols wins over the host terminal size
    if args.window_size().is_none() {
        if let Err(e) = handle_window_resize(&pm) {
            warn!(error = %e, "failed to set initial window size");
        }
    }

    let _forwarder = StdinForwarder::spawn(Arc::clone(&pm))?;

    let (exit_tx, exit_rx) = channel();
    let waiter = Arc::clone(&pm);
    thread::Builder::new()
        .name("pipeit-wait".to_string())
        .spawn(move || {
            let _ = exit_tx.send(waiter.wait());
        })?;

    let mut terminated_by = None;
    let status = loop {
        if signal_flags.check_and_clear_sigwinch() {
            if let Err(e) = handle_window_resize(&pm) {
                warn!(error = %e, "failed to handle window resize");
            }
        }

        if terminated_by.is_none() {
            if let Some(sig) = signal_flags.get_term_signal() {
                info!(signal = %sig, "stopping command");
                if let Err(e) = pm.stop() {
                    debug!(error = %e, "stop reported an error");
                }
                terminated_by = Some(sig);
            }
        }

        match exit_rx.recv_timeout(POLL_INTERVAL) {
            Ok(result) => break result?,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                return Err(PipeError::Io(io::Error::new(
                    io::ErrorKind::Other,
                    "wait thread ended without a status",
                )));
            }
        }
    };

    if let Some(sig) = terminated_by {
        return Ok(128 + sig as i32);
    }

    let deadline = Instant::now() + DRAIN_GRACE;
    while !pm.output_drained() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    let _ = io::stdout().flush();

    Ok(status.as_exit_code())
}
