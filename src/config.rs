//! Process manager configuration

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Callback receiving one chunk of raw output.
///
/// Each invocation gets a freshly allocated buffer that the handler owns.
/// Handlers run on the drain-loop thread of the stream they are attached to.
pub type OutputHandler = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

/// Configuration for a [`ProcessManager`](crate::ProcessManager)
#[derive(Clone, Default)]
pub struct ManagerConfig {
    /// Executable name or path
    pub command: String,
    /// Command arguments
    pub args: Vec<String>,
    /// Extra environment entries, applied on top of the inherited environment
    pub env: Vec<(String, String)>,
    /// Working directory (None = current dir)
    pub current_dir: Option<PathBuf>,
    /// Initial PTY size as (rows, cols); ignored for the pipe transport
    pub window_size: Option<(u16, u16)>,
    /// Initial output handler
    pub on_output: Option<OutputHandler>,
    /// Initial error handler
    pub on_error: Option<OutputHandler>,
}

impl ManagerConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    /// Set command arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Append a single argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Add several environment variables
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Set working directory
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Set the PTY size applied when the terminal is allocated
    pub fn window_size(mut self, rows: u16, cols: u16) -> Self {
        self.window_size = Some((rows, cols));
        self
    }

    pub fn on_output<F>(mut self, handler: F) -> Self
    where
        F: Fn(Vec<u8>) + Send + Sync + 'static,
    {
        self.on_output = Some(Arc::new(handler));
        self
    }

    pub fn on_error<F>(mut self, handler: F) -> Self
    where
        F: Fn(Vec<u8>) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(handler));
        self
    }
}

impl fmt::Debug for ManagerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagerConfig")
            .field("command", &self.command)
            .field("args", &self.args)
            .field("env", &self.env)
            .field("current_dir", &self.current_dir)
            .field("window_size", &self.window_size)
            .field("on_output", &self.on_output.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Parse a `KEY=VALUE` environment entry.
pub fn parse_env_entry(entry: &str) -> Option<(String, String)> {
    let (key, value) = entry.split_once('=')?;
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), value.to_string()))
}
