use crate::config::{parse_env_entry, ManagerConfig};
use crate::error::PipeError;
use clap::Parser;
use std::path::PathBuf;

/// pipeit - run a command and pipe its terminal through this one
///
/// Host stdin is forwarded to the command, its output is written to stdout,
/// and read failures (or stderr, with --pipes) go to stderr.
#[derive(Parser, Debug)]
#[command(
    name = "pipeit",
    version,
    about = "Run a command over a pseudo-terminal or pipes and forward its I/O",
    long_about = "Runs COMMAND attached to a pseudo-terminal (default) or to plain pipes,\n\
                  forwarding stdin to it and its output to stdout. SIGINT, SIGTERM and\n\
                  SIGHUP stop the command; SIGWINCH resizes its terminal."
)]
pub struct Cli {
    /// Use plain pipes instead of a pseudo-terminal
    #[arg(long = "pipes")]
    pub pipes: bool,

    /// Extra environment variable for the command (repeatable)
    #[arg(short = 'e', long = "env", value_name = "KEY=VALUE")]
    pub env: Vec<String>,

    /// Working directory for the command
    #[arg(short = 'C', long = "cwd", value_name = "dir")]
    pub cwd: Option<PathBuf>,

    /// Initial terminal rows (PTY only)
    #[arg(long = "rows", value_name = "rows", requires = "cols")]
    pub rows: Option<u16>,

    /// Initial terminal columns (PTY only)
    #[arg(long = "cols", value_name = "cols", requires = "rows")]
    pub cols: Option<u16>,

    /// Be verbose about what you're doing
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Command and its arguments to execute
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Validate the parsed arguments
    pub fn validate(&self) -> Result<(), PipeError> {
        if self.command.is_empty() {
            return Err(PipeError::InvalidArguments(
                "No command specified".to_string(),
            ));
        }

        if let Some(bad) = self.env.iter().find(|e| parse_env_entry(e).is_none()) {
            return Err(PipeError::InvalidArguments(format!(
                "Environment entry must be KEY=VALUE: {}",
                bad
            )));
        }

        if let Some(ref dir) = self.cwd {
            if !dir.is_dir() {
                return Err(PipeError::InvalidArguments(format!(
                    "Working directory does not exist: {}",
                    dir.display()
                )));
            }
        }

        if let Some((rows, cols)) = self.window_size() {
            if self.pipes {
                return Err(PipeError::InvalidArguments(
                    "--rows/--cols require a PTY and cannot be combined with --pipes".to_string(),
                ));
            }
            if rows == 0 || cols == 0 {
                return Err(PipeError::InvalidArguments(
                    "Terminal size must be non-zero".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Requested initial terminal size as (rows, cols)
    pub fn window_size(&self) -> Option<(u16, u16)> {
        self.rows.zip(self.cols)
    }

    /// Build the manager configuration; call after `validate`
    pub fn to_config(&self) -> ManagerConfig {
        let (command, args) = match self.command.split_first() {
            Some((command, args)) => (command.clone(), args.to_vec()),
            None => (String::new(), Vec::new()),
        };

        let mut config = ManagerConfig::new(command)
            .args(args)
            .envs(self.env.iter().filter_map(|e| parse_env_entry(e)));

        if let Some(ref dir) = self.cwd {
            config = config.current_dir(dir);
        }
        if let Some((rows, cols)) = self.window_size() {
            config = config.window_size(rows, cols);
        }
        config
    }
}
