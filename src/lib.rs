//! pipeit - drive a child process over a pseudo-terminal or plain pipes.
//!
//! A [`ProcessManager`] owns one child process. Output is delivered
//! asynchronously, chunk by chunk, to caller-supplied handlers running on
//! dedicated drain threads; input is written synchronously.
//!
//! ```no_run
//! use pipeit::{keys, ManagerConfig, ProcessManager};
//!
//! # fn main() -> pipeit::Result<()> {
//! let pm = ProcessManager::with_config(
//!     ManagerConfig::new("python3")
//!         .arg("-q")
//!         .env("PYTHONUNBUFFERED", "1")
//!         .on_output(|data| print!("{}", String::from_utf8_lossy(&data))),
//! );
//! pm.start_with_pty()?;
//! pm.set_window_size(24, 80)?;
//! pm.write_str("print('Hello from Python!')")?;
//! pm.write_str(keys::KEY_ENTER)?;
//! pm.writeln("exit()")?;
//! pm.wait()?;
//! # Ok(())
//! # }
//! ```

// Platform-specific compilation guard
#[cfg(not(unix))]
compile_error!("pipeit requires a Unix-like operating system with PTY support.");

pub mod cli;
pub mod config;
pub mod drain;
pub mod error;
pub mod keys;
pub mod logging;
pub mod manager;
pub mod process;
pub mod pty;
pub mod signal;
pub mod stdin_forwarder;

pub use config::{ManagerConfig, OutputHandler};
pub use error::{PipeError, Result};
pub use manager::{ProcessManager, Transport};
pub use process::ExitStatus;
