//! Shell configuration.
//!
//! [`ShellConfig`] carries everything the supervisor needs to spawn and drive
//! the interpreter: where the executable lives, where scratch files go, the
//! per-command timeout, and which of the two file-backed streams (Verbose,
//! Debug) are collected.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default per-command timeout (10 minutes).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(600_000);

/// Default interpreter executable on Windows.
pub const DEFAULT_EXE_WINDOWS: &str = "powershell";

/// Default interpreter executable elsewhere.
pub const DEFAULT_EXE_OTHER: &str = "pwsh";

/// Configuration for a [`Shell`](crate::Shell).
///
/// Construct with [`ShellConfig::default`] and adjust fields, or use the
/// fluent [`ShellBuilder`](crate::ShellBuilder).
#[derive(Debug, Clone)]
pub struct ShellConfig {
    /// Directory for the two per-child scratch files. Default: current
    /// directory.
    pub tmp_dir: PathBuf,
    /// Interpreter executable. Default: `powershell` on Windows, `pwsh`
    /// elsewhere.
    pub exe_path: PathBuf,
    /// Per-command timeout. Default: 600 000 ms.
    pub timeout: Duration,
    /// Collect the Verbose stream into its scratch file. Default: true.
    pub verbose: bool,
    /// Collect the Debug stream into its scratch file. Default: true.
    pub debug: bool,
}

impl ShellConfig {
    /// Create a configuration with all defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Platform-dependent default executable name.
    pub fn default_exe() -> &'static Path {
        if cfg!(windows) {
            Path::new(DEFAULT_EXE_WINDOWS)
        } else {
            Path::new(DEFAULT_EXE_OTHER)
        }
    }

    /// The configured timeout in whole milliseconds, as reported in
    /// [`ShellError::Timeout`](crate::ShellError::Timeout).
    pub fn timeout_millis(&self) -> u64 {
        self.timeout.as_millis() as u64
    }
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            tmp_dir: PathBuf::from("."),
            exe_path: Self::default_exe().to_path_buf(),
            timeout: DEFAULT_TIMEOUT,
            verbose: true,
            debug: true,
        }
    }
}
