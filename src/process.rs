use crate::config::ManagerConfig;
use crate::error::{PipeError, Result};
use crate::pty::Pty;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{setsid, Pid};
use std::fmt;
use std::fs::File;
use std::io;
use std::os::fd::OwnedFd;
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use tracing::debug;

nix::ioctl_write_int_bad!(tiocsctty, libc::TIOCSCTTY);

/// How a child process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Exited(i32),
    Signaled(Signal),
}

impl ExitStatus {
    /// Exit code if the process exited normally
    pub fn code(&self) -> Option<i32> {
        match self {
            ExitStatus::Exited(code) => Some(*code),
            ExitStatus::Signaled(_) => None,
        }
    }

    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Exited(0))
    }

    /// Shell-style exit code: the exit code, or 128 + signal number
    pub fn as_exit_code(&self) -> i32 {
        match self {
            ExitStatus::Exited(code) => *code,
            ExitStatus::Signaled(sig) => 128 + *sig as i32,
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Exited(code) => write!(f, "exit status: {}", code),
            ExitStatus::Signaled(sig) => write!(f, "signal: {}", sig),
        }
    }
}

/// Handle to a spawned child. Reaping and termination go through `waitpid`
/// and `kill` on the pid so they never need exclusive access to the handle.
#[derive(Debug, Clone, Copy)]
pub struct ChildProcess {
    pid: Pid,
}

/// Child attached to a PTY slave, with the master end for the parent
pub struct PtyChild {
    pub child: ChildProcess,
    pub master: File,
}

/// Child attached to three pipes
pub struct PipeChild {
    pub child: ChildProcess,
    pub stdin: File,
    pub stdout: File,
    pub stderr: File,
}

impl ChildProcess {
    /// Spawn the configured command with a new PTY as its controlling terminal
    pub fn spawn_pty(config: &ManagerConfig) -> Result<PtyChild> {
        let pty = Pty::open(config.window_size)?;
        let (master, slave) = pty.into_parts();

        let stdin = dup_slave(&slave)?;
        let stdout = dup_slave(&slave)?;

        let mut cmd = build_command(config);
        cmd.stdin(Stdio::from(stdin))
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(slave));

        unsafe {
            cmd.pre_exec(attach_controlling_terminal);
        }

        let spawned = cmd
            .spawn()
            .map_err(|e| PipeError::transport("start PTY", e))?;

        // The parent must not hold the slave open, otherwise the master never
        // sees the child's departure.
        drop(cmd);

        let child = ChildProcess::from_std(&spawned);
        debug!(pid = %child.pid, command = %config.command, "spawned child on PTY");

        Ok(PtyChild { child, master })
    }

    /// Spawn the configured command with piped stdin, stdout and stderr
    pub fn spawn_pipes(config: &ManagerConfig) -> Result<PipeChild> {
        let mut cmd = build_command(config);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // std creates the pipes inside spawn and closes every one of them if
        // any later step fails.
        let mut spawned = cmd
            .spawn()
            .map_err(|e| PipeError::transport("start command", e))?;

        let child = ChildProcess::from_std(&spawned);

        let (Some(stdin), Some(stdout), Some(stderr)) = (
            spawned.stdin.take(),
            spawned.stdout.take(),
            spawned.stderr.take(),
        ) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(PipeError::transport(
                "create pipes",
                io::Error::new(io::ErrorKind::BrokenPipe, "child stdio was not piped"),
            ));
        };

        debug!(pid = %child.pid, command = %config.command, "spawned child on pipes");

        Ok(PipeChild {
            child,
            stdin: File::from(OwnedFd::from(stdin)),
            stdout: File::from(OwnedFd::from(stdout)),
            stderr: File::from(OwnedFd::from(stderr)),
        })
    }

    fn from_std(child: &std::process::Child) -> Self {
        Self {
            pid: Pid::from_raw(child.id() as i32),
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Wait for the child process without blocking
    ///
    /// Returns Some(status) if the process has exited, None if still running
    pub fn try_wait(&self) -> Result<Option<ExitStatus>> {
        loop {
            match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::Exited(_, code)) => return Ok(Some(ExitStatus::Exited(code))),
                Ok(WaitStatus::Signaled(_, sig, _)) => return Ok(Some(ExitStatus::Signaled(sig))),
                Ok(_) => return Ok(None),
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(PipeError::Wait(e)),
            }
        }
    }

    /// Wait for the child process to exit (blocking)
    pub fn wait(&self) -> Result<ExitStatus> {
        loop {
            match waitpid(self.pid, None) {
                Ok(WaitStatus::Exited(_, code)) => return Ok(ExitStatus::Exited(code)),
                Ok(WaitStatus::Signaled(_, sig, _)) => return Ok(ExitStatus::Signaled(sig)),
                // Stop/continue notifications; the process is still alive
                Ok(_) => continue,
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(PipeError::Wait(e)),
            }
        }
    }

    /// Block until the child has terminated without reaping it, so the
    /// status can still be collected with `try_wait`
    #[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
    pub fn wait_exited(&self) -> Result<()> {
        use nix::sys::wait::{waitid, Id};

        loop {
            match waitid(Id::Pid(self.pid), WaitPidFlag::WEXITED | WaitPidFlag::WNOWAIT) {
                Ok(_) => return Ok(()),
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(PipeError::Wait(e)),
            }
        }
    }

    /// No `waitid` here; callers re-check with `try_wait` after a short pause
    #[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
    pub fn wait_exited(&self) -> Result<()> {
        std::thread::sleep(std::time::Duration::from_millis(10));
        Ok(())
    }

    /// Forcefully terminate the child process
    pub fn kill(&self) -> Result<()> {
        kill(self.pid, Signal::SIGKILL).map_err(PipeError::ProcessTermination)
    }
}

fn build_command(config: &ManagerConfig) -> Command {
    let mut cmd = Command::new(&config.command);
    cmd.args(&config.args);

    // Extra entries override inherited ones with the same key
    for (key, value) in &config.env {
        cmd.env(key, value);
    }

    if let Some(ref dir) = config.current_dir {
        cmd.current_dir(dir);
    }

    cmd
}

fn dup_slave(slave: &OwnedFd) -> Result<OwnedFd> {
    slave
        .try_clone()
        .map_err(|e| PipeError::transport("duplicate PTY slave", e))
}

/// Runs in the forked child before exec: start a new session and make the
/// PTY slave (already on stdin) its controlling terminal.
fn attach_controlling_terminal() -> io::Result<()> {
    setsid()?;
    unsafe { tiocsctty(libc::STDIN_FILENO, 0) }?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_exit_status_codes() {
        assert!(ExitStatus::Exited(0).success());
        assert_eq!(ExitStatus::Exited(3).code(), Some(3));
        assert_eq!(ExitStatus::Signaled(Signal::SIGKILL).code(), None);
        assert_eq!(ExitStatus::Signaled(Signal::SIGKILL).as_exit_code(), 137);
    }

    #[test]
    fn test_pipe_child_exit_code() {
        let config = ManagerConfig::new("sh").args(["-c", "printf out; exit 7"]);
        let mut spawned = ChildProcess::spawn_pipes(&config).unwrap();

        let mut out = String::new();
        spawned.stdout.read_to_string(&mut out).unwrap();
        assert_eq!(out, "out");
        assert_eq!(spawned.child.wait().unwrap(), ExitStatus::Exited(7));
    }

    #[test]
    fn test_spawn_missing_executable() {
        let config = ManagerConfig::new("/nonexistent/pipeit-test-binary");
        let err = ChildProcess::spawn_pipes(&config).err().unwrap();
        assert!(matches!(err, PipeError::Transport { .. }));
    }

    #[test]
    fn test_pty_child_has_terminal() {
        let config = ManagerConfig::new("sh").args(["-c", "test -t 0 && echo tty"]);
        let mut spawned = ChildProcess::spawn_pty(&config).unwrap();

        let mut out = Vec::new();
        let mut buf = [0u8; 256];
        // EIO marks the slave closing once the child is gone
        while let Ok(n) = spawned.master.read(&mut buf) {
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        assert!(String::from_utf8_lossy(&out).contains("tty"));
        assert!(spawned.child.wait().unwrap().success());
    }

    #[test]
    fn test_wait_exited_leaves_status_to_collect() {
        let config = ManagerConfig::new("sh").args(["-c", "exit 4"]);
        let spawned = ChildProcess::spawn_pipes(&config).unwrap();

        spawned.child.wait_exited().unwrap();
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        let status = loop {
            if let Some(status) = spawned.child.try_wait().unwrap() {
                break status;
            }
            assert!(std::time::Instant::now() < deadline, "child never exited");
            spawned.child.wait_exited().unwrap();
        };
        assert_eq!(status, ExitStatus::Exited(4));
    }

    #[test]
    fn test_kill_running_child() {
        let config = ManagerConfig::new("sleep").args(["10"]);
        let spawned = ChildProcess::spawn_pipes(&config).unwrap();

        spawned.child.kill().unwrap();
        assert_eq!(
            spawned.child.wait().unwrap(),
            ExitStatus::Signaled(Signal::SIGKILL)
        );
    }
}
