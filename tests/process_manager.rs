use pipeit::keys::KEY_ENTER;
use pipeit::{ExitStatus, ManagerConfig, PipeError, ProcessManager, Transport};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

const TIMEOUT: Duration = Duration::from_secs(10);

fn forwarding(tx: Sender<Vec<u8>>) -> impl Fn(Vec<u8>) + Send + Sync + 'static {
    let tx = Mutex::new(tx);
    move |chunk| {
        let _ = tx.lock().unwrap().send(chunk);
    }
}

/// Collect chunks until `needle` shows up or the timeout expires
fn recv_until(rx: &Receiver<Vec<u8>>, needle: &str) -> String {
    let deadline = Instant::now() + TIMEOUT;
    let mut seen = Vec::new();
    while Instant::now() < deadline {
        if let Ok(chunk) = rx.recv_timeout(Duration::from_millis(100)) {
            seen.extend_from_slice(&chunk);
            if String::from_utf8_lossy(&seen).contains(needle) {
                break;
            }
        }
    }
    String::from_utf8_lossy(&seen).into_owned()
}

fn wait_drained(pm: &ProcessManager) {
    let deadline = Instant::now() + TIMEOUT;
    while !pm.output_drained() {
        assert!(Instant::now() < deadline, "drain loops did not finish");
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn pty_shell_echoes_command_output() {
    let (tx, rx) = channel();
    let pm = ProcessManager::new("sh", Vec::<String>::new());
    pm.set_output_handler(forwarding(tx));
    pm.start_with_pty().unwrap();
    assert_eq!(pm.transport(), Transport::Pty);
    assert!(pm.is_running());

    pm.write_str("echo $((40 + 2))").unwrap();
    pm.write_str(KEY_ENTER).unwrap();

    // The terminal echoes the command line, only the shell produces 42
    let output = recv_until(&rx, "42");
    assert!(output.contains("42"), "unexpected output: {:?}", output);

    pm.stop().unwrap();
    assert!(!pm.is_running());
    let _ = pm.wait();
}

#[test]
fn pty_merges_stderr_into_output() {
    let (out_tx, out_rx) = channel();
    let (err_tx, err_rx) = channel();
    let pm = ProcessManager::with_config(
        ManagerConfig::new("sh")
            .args(["-c", "echo to-stderr >&2"])
            .on_output(forwarding(out_tx))
            .on_error(forwarding(err_tx)),
    );
    pm.start_with_pty().unwrap();

    assert!(pm.wait().unwrap().success());
    wait_drained(&pm);

    let output: Vec<u8> = out_rx.try_iter().flatten().collect();
    assert!(String::from_utf8_lossy(&output).contains("to-stderr"));
    // The child's departure (EIO) is not an error
    assert!(err_rx.try_iter().next().is_none());
}

#[test]
fn pipes_deliver_stdout_in_order() {
    let (tx, rx) = channel();
    let pm = ProcessManager::with_config(
        ManagerConfig::new("sh")
            .args(["-c", "i=0; while [ $i -lt 2000 ]; do echo line-$i; i=$((i+1)); done"])
            .on_output(forwarding(tx)),
    );
    pm.start_with_pipes().unwrap();
    assert!(pm.wait().unwrap().success());
    wait_drained(&pm);

    let chunks: Vec<Vec<u8>> = rx.try_iter().collect();
    assert!(chunks.iter().all(|c| c.len() <= pipeit::drain::READ_CHUNK_SIZE));

    let expected: String = (0..2000).map(|i| format!("line-{}\n", i)).collect();
    assert_eq!(String::from_utf8(chunks.concat()).unwrap(), expected);
}

#[test]
fn pipes_route_stderr_to_error_handler_only() {
    let (out_tx, out_rx) = channel();
    let (err_tx, err_rx) = channel();
    let pm = ProcessManager::new("sh", ["-c", "printf oops >&2"]);
    pm.set_output_handler(forwarding(out_tx));
    pm.set_error_handler(forwarding(err_tx));
    pm.start_with_pipes().unwrap();

    pm.wait().unwrap();
    wait_drained(&pm);

    assert!(out_rx.try_iter().next().is_none());
    let errors: Vec<u8> = err_rx.try_iter().flatten().collect();
    assert_eq!(errors, b"oops");
}

#[test]
fn pipes_echo_written_input() {
    let (tx, rx) = channel();
    let pm = ProcessManager::new("cat", Vec::<String>::new());
    pm.set_output_handler(forwarding(tx));
    pm.start_with_pipes().unwrap();

    assert_eq!(pm.write(b"abc\n").unwrap(), 4);
    pm.write_fmt(format_args!("{}-{}\n", "x", 42)).unwrap();
    pm.writeln("done").unwrap();
    assert_eq!(recv_until(&rx, "done\n"), "abc\nx-42\ndone\n");

    pm.close_input().unwrap();
    assert!(matches!(pm.write(b"late"), Err(PipeError::NoInputAvailable)));
    assert!(pm.wait().unwrap().success());
}

#[test]
fn handler_swap_takes_effect_on_next_chunk() {
    let (a_tx, a_rx) = channel();
    let (b_tx, b_rx) = channel();
    let pm = ProcessManager::new("cat", Vec::<String>::new());
    pm.set_output_handler(forwarding(a_tx));
    pm.start_with_pipes().unwrap();

    pm.writeln("first").unwrap();
    assert_eq!(recv_until(&a_rx, "first\n"), "first\n");

    pm.set_output_handler(forwarding(b_tx));
    pm.writeln("second").unwrap();
    assert_eq!(recv_until(&b_rx, "second\n"), "second\n");
    assert!(a_rx.try_iter().next().is_none());

    pm.clear_output_handler();
    pm.writeln("dropped").unwrap();
    pm.close_input().unwrap();
    pm.wait().unwrap();
    wait_drained(&pm);
    assert!(b_rx.try_iter().next().is_none());
}

#[test]
fn write_after_stop_fails() {
    let pm = ProcessManager::new("cat", Vec::<String>::new());
    assert!(matches!(pm.write(b"x"), Err(PipeError::NoInputAvailable)));

    pm.start_with_pipes().unwrap();
    pm.write(b"x").unwrap();
    pm.stop().unwrap();

    assert!(matches!(pm.write(b"x"), Err(PipeError::NoInputAvailable)));
    assert!(matches!(pm.write_str("x"), Err(PipeError::NoInputAvailable)));
    let _ = pm.wait();
}

#[test]
fn window_size_requires_pty() {
    let pm = ProcessManager::new("cat", Vec::<String>::new());
    assert!(matches!(pm.set_window_size(24, 80), Err(PipeError::NoPtySession)));

    pm.start_with_pipes().unwrap();
    assert!(matches!(pm.set_window_size(24, 80), Err(PipeError::NoPtySession)));
    assert!(pm.session().unwrap().is_none());
    pm.stop().unwrap();
    let _ = pm.wait();
}

#[test]
fn stop_twice_reports_second_outcome() {
    let pm = ProcessManager::new("sleep", ["30"]);
    pm.start_with_pty().unwrap();
    let pid = pm.pid();
    assert!(pid > 0);

    pm.stop().unwrap();
    // Still unreaped: killing the zombie again is allowed to fail, but only
    // as a termination error
    let second = pm.stop();
    assert!(
        matches!(second, Ok(()) | Err(PipeError::ProcessTermination(_))),
        "unexpected second stop result: {:?}",
        second
    );

    assert_eq!(
        pm.wait().unwrap(),
        ExitStatus::Signaled(nix::sys::signal::Signal::SIGKILL)
    );
    assert!(matches!(pm.stop(), Err(PipeError::ProcessTermination(_))));
    assert_eq!(pm.pid(), pid);
}

#[test]
fn stop_unblocks_drain_loops() {
    // The grandchild keeps stdout open after its parent is killed
    let pm = ProcessManager::new("sh", ["-c", "sleep 30 & wait"]);
    pm.start_with_pipes().unwrap();
    pm.stop().unwrap();
    wait_drained(&pm);
    let _ = pm.wait();
}

#[test]
fn immediate_exit_returns_status_and_finishes_drains() {
    let pm = ProcessManager::new("sh", ["-c", "exit 3"]);
    pm.start_with_pipes().unwrap();

    let started = Instant::now();
    let status = pm.wait().unwrap();
    assert!(started.elapsed() < TIMEOUT);
    assert_eq!(status.code(), Some(3));
    assert!(!status.success());
    assert!(!pm.is_running());
    wait_drained(&pm);
}

#[test]
fn missing_executable_is_transport_error() {
    let pm = ProcessManager::new("/nonexistent/pipeit-missing", Vec::<String>::new());
    let err = pm.start_with_pipes().unwrap_err();
    assert!(matches!(err, PipeError::Transport { .. }));
    assert_eq!(pm.pid(), -1);
    assert!(!pm.is_running());

    // Manager stays in its created state; another transport may be tried
    assert!(matches!(pm.start_with_pty(), Err(PipeError::Transport { .. })));
}

#[test]
fn config_env_and_cwd_reach_child() {
    let (tx, rx) = channel();
    let pm = ProcessManager::with_config(
        ManagerConfig::new("sh")
            .args(["-c", "echo \"$MY_VAR:$(pwd)\""])
            .env("MY_VAR", "value")
            .current_dir("/")
            .on_output(forwarding(tx)),
    );
    pm.start_with_pipes().unwrap();
    pm.wait().unwrap();
    wait_drained(&pm);

    let output: Vec<u8> = rx.try_iter().flatten().collect();
    assert_eq!(output, b"value:/\n");
}

#[test]
fn manager_is_shareable_across_threads() {
    let (tx, rx) = channel();
    let pm = Arc::new(ProcessManager::new("cat", Vec::<String>::new()));
    pm.set_output_handler(forwarding(tx));
    pm.start_with_pipes().unwrap();

    let writers: Vec<_> = (0..4)
        .map(|i| {
            let pm = Arc::clone(&pm);
            thread::spawn(move || pm.writeln(&format!("w{}", i)).unwrap())
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    let deadline = Instant::now() + TIMEOUT;
    let mut all = String::new();
    while (0..4).any(|i| !all.contains(&format!("w{}\n", i))) && Instant::now() < deadline {
        if let Ok(chunk) = rx.recv_timeout(Duration::from_millis(100)) {
            all.push_str(&String::from_utf8_lossy(&chunk));
        }
    }
    for i in 0..4 {
        assert!(all.contains(&format!("w{}\n", i)));
    }

    pm.stop().unwrap();
    let _ = pm.wait();
}

#[test]
fn concurrent_waiters_share_one_status() {
    for _ in 0..200 {
        let pm = Arc::new(ProcessManager::new("true", Vec::<String>::new()));
        pm.start_with_pipes().unwrap();

        let waiters: Vec<_> = (0..2)
            .map(|_| {
                let pm = Arc::clone(&pm);
                thread::spawn(move || pm.wait())
            })
            .collect();
        for waiter in waiters {
            assert_eq!(waiter.join().unwrap().unwrap(), ExitStatus::Exited(0));
        }

        // The pid has been reaped, so it must never be signalled
        assert!(matches!(pm.stop(), Err(PipeError::ProcessTermination(_))));
    }
}

#[test]
fn stop_during_wait_signals_only_live_child() {
    for _ in 0..50 {
        let pm = Arc::new(ProcessManager::new("true", Vec::<String>::new()));
        pm.start_with_pipes().unwrap();

        let waiter = {
            let pm = Arc::clone(&pm);
            thread::spawn(move || pm.wait())
        };
        let stopped = pm.stop();
        let status = waiter.join().unwrap().unwrap();

        // Either the kill raced ahead of the exit, or the status was already
        // recorded and no signal was sent
        match stopped {
            Ok(()) => assert!(matches!(
                status,
                ExitStatus::Exited(0) | ExitStatus::Signaled(nix::sys::signal::Signal::SIGKILL)
            )),
            Err(PipeError::ProcessTermination(_)) => assert_eq!(status, ExitStatus::Exited(0)),
            Err(e) => panic!("unexpected stop error: {}", e),
        }
    }
}

#[test]
fn dropping_started_manager_ends_child_and_drains() {
    let (tx, rx) = channel();
    let pm = ProcessManager::new("cat", Vec::<String>::new());
    pm.set_output_handler(forwarding(tx));
    pm.start_with_pipes().unwrap();
    let pid = nix::unistd::Pid::from_raw(pm.pid());

    drop(pm);

    // Killed and reaped during drop, so the pid no longer exists
    assert_eq!(
        nix::sys::signal::kill(pid, None),
        Err(nix::errno::Errno::ESRCH)
    );

    // The handler is released once every drain loop has exited
    let deadline = Instant::now() + TIMEOUT;
    loop {
        match rx.recv_timeout(Duration::from_millis(100)) {
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
            _ => assert!(Instant::now() < deadline, "drain loops outlived the manager"),
        }
    }
}

#[test]
fn dropping_exited_manager_is_quiet() {
    let pm = ProcessManager::new("true", Vec::<String>::new());
    pm.start_with_pty().unwrap();
    assert!(pm.wait().unwrap().success());
    drop(pm);
}
