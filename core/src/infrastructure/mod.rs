//! Process capabilities used by the server bootstrap.
//!
//! `ServerLauncher` starts and stops the shared server process and
//! `ReadinessCheck` reports whether it is reachable yet. `process` holds the
//! production implementations; `mock` holds test doubles that record calls
//! instead of spawning anything.

pub mod mock;
pub mod process;

use std::path::PathBuf;

use crate::error::Result;
use crate::transport::Endpoint;


/// A fully resolved command line for the server process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Where stdout/stderr go. `None` discards them.
    pub log_file: Option<PathBuf>,
}


impl LaunchCommand {
    /// Render as a single shell-like line, for logs.
    pub fn display_line(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}


/// Starts and stops detached server processes.
pub trait ServerLauncher: Send {
    /// Spawn the process without waiting for it. Returns its pid.
    fn launch(&mut self, command: &LaunchCommand) -> Result<u32>;

    /// Send a termination signal to a previously launched process.
    fn terminate(&mut self, pid: u32) -> Result<()>;
}


/// Reports whether a server endpoint is ready for connections.
pub trait ReadinessCheck: Send {
    fn is_ready(&self, endpoint: &Endpoint) -> bool;
}
