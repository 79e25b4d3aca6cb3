//! Production process capabilities: real spawning and signalling.

use std::collections::HashMap;
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};

use super::{LaunchCommand, ReadinessCheck, ServerLauncher};
use crate::error::{RegisterError, Result};
use crate::transport::Endpoint;


/// Spawns the server as a detached background process.
///
/// The child gets its own process group so signals aimed at the engine's
/// group do not reach it. Children are kept so they can be reaped after
/// termination.
#[derive(Default)]
pub struct ProcessLauncher {
    children: HashMap<u32, Child>,
}


impl ProcessLauncher {
    pub fn new() -> Self {
        Self::default()
    }
}


impl ServerLauncher for ProcessLauncher {
    fn launch(&mut self, command: &LaunchCommand) -> Result<u32> {
        let (stdout, stderr) = match &command.log_file {
            Some(path) => {
                let log = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)?;
                let log_err = log.try_clone()?;
                (Stdio::from(log), Stdio::from(log_err))
            }
            None => (Stdio::null(), Stdio::null()),
        };

        let child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .process_group(0)
            .spawn()
            .map_err(|e| {
                RegisterError::Config(format!(
                    "cannot spawn register server {}: {}",
                    command.program.display(),
                    e
                ))
            })?;

        let pid = child.id();
        self.children.insert(pid, child);
        Ok(pid)
    }

    fn terminate(&mut self, pid: u32) -> Result<()> {
        let ret = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if ret != 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ESRCH) {
                return Err(err.into());
            }
        }
        if let Some(mut child) = self.children.remove(&pid) {
            let _ = child.wait();
        }
        Ok(())
    }
}


/// UNIX-domain servers are ready once their socket path exists. TCP servers
/// have no readiness signal and are always reported ready.
pub struct SocketPathCheck;


impl ReadinessCheck for SocketPathCheck {
    fn is_ready(&self, endpoint: &Endpoint) -> bool {
        match endpoint {
            Endpoint::Unix(path) => path.exists(),
            Endpoint::Tcp { .. } => true,
        }
    }
}
