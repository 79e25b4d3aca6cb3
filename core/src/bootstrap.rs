//! SingletonBootstrap — launching the shared register server.
//!
//! Exactly one process per namespace is configured as master. The master
//! stages the server artifact, launches it detached, and waits briefly for
//! it to come up. Followers never touch the server process; they only
//! connect to it.
//!
//! # States
//!
//! ```text
//! NotStarted ──start()──► Launching ──► Ready ──terminate()──► Terminated
//! ```
//!
//! # Readiness race
//!
//! For UNIX-domain servers the readiness gate polls for the socket path,
//! `READINESS_ATTEMPTS` times at `READINESS_INTERVAL` (about 100ms total).
//! When the budget runs out the bootstrap proceeds anyway. The path existing
//! also does not prove the server is accepting yet, so a follower that
//! connects right after setup can still lose the race against the server's
//! bind; that shows up later as a connect error on first use. TCP servers
//! have no readiness signal and are considered ready once launched.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RegisterError, Result};
use crate::infrastructure::process::{ProcessLauncher, SocketPathCheck};
use crate::infrastructure::{LaunchCommand, ReadinessCheck, ServerLauncher};
use crate::transport::Endpoint;


/// How many times the readiness check is polled before giving up.
pub const READINESS_ATTEMPTS: u32 = 1000;

/// Pause between readiness polls.
pub const READINESS_INTERVAL: Duration = Duration::from_micros(100);


/// Transport the server is launched with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerKind {
    Unix,
    Tcp,
}


impl ServerKind {
    /// Parse a transport kind. Unknown kinds are a configuration error.
    pub fn parse(s: &str) -> Result<ServerKind> {
        match s {
            "unix" => Ok(ServerKind::Unix),
            "inet" | "tcp" => Ok(ServerKind::Tcp),
            other => Err(RegisterError::Config(format!(
                "unknown server transport kind '{}' (expected 'unix' or 'inet')",
                other
            ))),
        }
    }

    /// The kind as passed on the server's command line.
    pub fn as_arg(self) -> &'static str {
        match self {
            ServerKind::Unix => "unix",
            ServerKind::Tcp => "inet",
        }
    }
}


/// Everything the master needs to launch the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerLaunch {
    /// `unix` or `inet`.
    pub transport: String,
    /// Socket path for `unix`, host for `inet`.
    pub address: String,
    #[serde(default)]
    pub port: u16,
    /// Server executable.
    pub artifact: PathBuf,
    /// If set, the artifact is copied here and launched from the copy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}


impl ServerLaunch {
    pub fn kind(&self) -> Result<ServerKind> {
        ServerKind::parse(&self.transport)
    }

    pub fn endpoint(&self) -> Result<Endpoint> {
        Ok(match self.kind()? {
            ServerKind::Unix => Endpoint::Unix(PathBuf::from(&self.address)),
            ServerKind::Tcp => Endpoint::Tcp {
                host: self.address.clone(),
                port: self.port,
            },
        })
    }

    /// Server arguments: `{kind} {address} [port] [extra...]`.
    pub fn server_args(&self) -> Result<Vec<String>> {
        let kind = self.kind()?;
        let mut args = vec![kind.as_arg().to_string(), self.address.clone()];
        if kind == ServerKind::Tcp {
            args.push(self.port.to_string());
        }
        args.extend(self.extra_args.iter().cloned());
        Ok(args)
    }
}


/// Whether this process owns the server lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Master(ServerLaunch),
    Follower,
}


impl Role {
    pub fn is_master(&self) -> bool {
        matches!(self, Role::Master(_))
    }
}


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    NotStarted,
    Launching,
    Ready,
    Terminated,
}


/// Launches the shared server on the master and stops it again on teardown.
pub struct SingletonBootstrap {
    launch: ServerLaunch,
    launcher: Box<dyn ServerLauncher>,
    check: Box<dyn ReadinessCheck>,
    state: BootstrapState,
    pid: Option<u32>,
    attempts: u32,
    interval: Duration,
}


impl SingletonBootstrap {
    pub fn new(
        launch: ServerLaunch,
        launcher: Box<dyn ServerLauncher>,
        check: Box<dyn ReadinessCheck>,
    ) -> Self {
        SingletonBootstrap {
            launch,
            launcher,
            check,
            state: BootstrapState::NotStarted,
            pid: None,
            attempts: READINESS_ATTEMPTS,
            interval: READINESS_INTERVAL,
        }
    }

    /// Bootstrap that spawns real processes and checks the socket path.
    pub fn for_process(launch: ServerLaunch) -> Self {
        Self::new(launch, Box::new(ProcessLauncher::new()), Box::new(SocketPathCheck))
    }

    /// Override the readiness poll budget.
    pub fn with_readiness(mut self, attempts: u32, interval: Duration) -> Self {
        self.attempts = attempts;
        self.interval = interval;
        self
    }

    pub fn state(&self) -> BootstrapState {
        self.state
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Launch the server and wait (best effort) for it to become reachable.
    pub fn start(&mut self) -> Result<()> {
        if self.state != BootstrapState::NotStarted {
            tracing::debug!("register server bootstrap already in state {:?}", self.state);
            return Ok(());
        }

        let kind = self.launch.kind()?;
        let endpoint = self.launch.endpoint()?;
        let command = LaunchCommand {
            program: self.stage()?,
            args: self.launch.server_args()?,
            log_file: self.launch.log_file.clone(),
        };

        if let Endpoint::Unix(path) = &endpoint {
            remove_stale_socket(path)?;
        }

        self.state = BootstrapState::Launching;
        tracing::info!("launching register server: {}", command.display_line());
        let pid = match self.launcher.launch(&command) {
            Ok(pid) => pid,
            Err(e) => {
                self.state = BootstrapState::NotStarted;
                return Err(e);
            }
        };
        self.pid = Some(pid);

        if kind == ServerKind::Unix && !self.wait_ready(&endpoint) {
            tracing::warn!(
                "register server {} not ready after {} polls, continuing anyway",
                endpoint,
                self.attempts
            );
        }

        self.state = BootstrapState::Ready;
        tracing::info!("register server pid {} at {}", pid, endpoint);
        Ok(())
    }

    /// Send the termination signal to the launched server. Idempotent.
    pub fn terminate(&mut self) -> Result<()> {
        if let Some(pid) = self.pid.take() {
            tracing::info!("terminating register server pid {}", pid);
            self.launcher.terminate(pid)?;
        }
        self.state = BootstrapState::Terminated;
        Ok(())
    }

    fn wait_ready(&self, endpoint: &Endpoint) -> bool {
        for _ in 0..self.attempts {
            if self.check.is_ready(endpoint) {
                return true;
            }
            std::thread::sleep(self.interval);
        }
        false
    }

    /// Copy the artifact into the staging directory, if one is configured.
    fn stage(&self) -> Result<PathBuf> {
        let artifact = &self.launch.artifact;
        let Some(dir) = &self.launch.stage_dir else {
            return Ok(artifact.clone());
        };
        let file_name = artifact.file_name().ok_or_else(|| {
            RegisterError::Config(format!("server artifact {} has no file name", artifact.display()))
        })?;
        if !artifact.is_file() {
            return Err(RegisterError::Config(format!(
                "server artifact {} not found",
                artifact.display()
            )));
        }
        std::fs::create_dir_all(dir)?;
        let staged = dir.join(file_name);
        std::fs::copy(artifact, &staged)?;
        make_executable(&staged)?;
        tracing::debug!("staged {} to {}", artifact.display(), staged.display());
        Ok(staged)
    }
}


/// A killed server leaves its socket file behind. It has to go before the
/// launch, or the readiness check would see it immediately.
fn remove_stale_socket(path: &Path) -> Result<()> {
    use std::os::unix::fs::FileTypeExt;
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => {
            std::fs::remove_file(path)?;
            tracing::debug!("removed stale register socket {}", path.display());
            Ok(())
        }
        Ok(_) => Err(RegisterError::Config(format!(
            "register socket path {} exists and is not a socket",
            path.display()
        ))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}


fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(perms.mode() | 0o755);
    std::fs::set_permissions(path, perms)?;
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mock::{MockLauncher, MockCheck};

    fn unix_launch(path: &str) -> ServerLaunch {
        ServerLaunch {
            transport: "unix".into(),
            address: path.into(),
            port: 0,
            artifact: PathBuf::from("/opt/sreg/sreg-server"),
            stage_dir: None,
            extra_args: Vec::new(),
            log_file: None,
        }
    }

    fn bootstrap(
        launch: ServerLaunch,
        launcher: &MockLauncher,
        check: &MockCheck,
    ) -> SingletonBootstrap {
        SingletonBootstrap::new(launch, Box::new(launcher.clone()), Box::new(check.clone()))
            .with_readiness(10, Duration::from_micros(1))
    }

    #[test]
    fn kind_parsing() {
        assert_eq!(ServerKind::parse("unix").unwrap(), ServerKind::Unix);
        assert_eq!(ServerKind::parse("inet").unwrap(), ServerKind::Tcp);
        assert_eq!(ServerKind::parse("tcp").unwrap(), ServerKind::Tcp);
        assert!(matches!(ServerKind::parse("udp"), Err(RegisterError::Config(_))));
    }

    #[test]
    fn unix_args_have_no_port() {
        let mut launch = unix_launch("/nonexistent/sreg.sock");
        launch.extra_args = vec!["--verbose".into()];
        assert_eq!(launch.server_args().unwrap(), vec!["unix", "/nonexistent/sreg.sock", "--verbose"]);
    }

    #[test]
    fn tcp_args_include_port() {
        let launch = ServerLaunch {
            transport: "inet".into(),
            address: "127.0.0.1".into(),
            port: 8686,
            ..unix_launch("")
        };
        assert_eq!(launch.server_args().unwrap(), vec!["inet", "127.0.0.1", "8686"]);
        assert_eq!(
            launch.endpoint().unwrap(),
            Endpoint::Tcp { host: "127.0.0.1".into(), port: 8686 }
        );
    }

    #[test]
    fn start_launches_and_waits_for_socket() {
        let launcher = MockLauncher::new();
        let check = MockCheck::ready_after(3);
        let mut boot = bootstrap(unix_launch("/nonexistent/sreg.sock"), &launcher, &check);
        assert_eq!(boot.state(), BootstrapState::NotStarted);

        boot.start().unwrap();
        assert_eq!(boot.state(), BootstrapState::Ready);
        assert_eq!(check.polls(), 4);

        let launches = launcher.launches();
        assert_eq!(launches.len(), 1);
        assert_eq!(launches[0].program, PathBuf::from("/opt/sreg/sreg-server"));
        assert_eq!(launches[0].args, vec!["unix", "/nonexistent/sreg.sock"]);
    }

    #[test]
    fn readiness_exhaustion_proceeds() {
        let launcher = MockLauncher::new();
        let check = MockCheck::never();
        let mut boot = bootstrap(unix_launch("/nonexistent/sreg.sock"), &launcher, &check);
        boot.start().unwrap();
        assert_eq!(boot.state(), BootstrapState::Ready);
        assert_eq!(check.polls(), 10);
    }

    #[test]
    fn tcp_does_not_poll() {
        let launcher = MockLauncher::new();
        let check = MockCheck::never();
        let launch = ServerLaunch {
            transport: "inet".into(),
            address: "127.0.0.1".into(),
            port: 9001,
            ..unix_launch("")
        };
        let mut boot = bootstrap(launch, &launcher, &check);
        boot.start().unwrap();
        assert_eq!(check.polls(), 0);
        assert_eq!(boot.state(), BootstrapState::Ready);
    }

    #[test]
    fn unknown_kind_is_fatal_before_launch() {
        let launcher = MockLauncher::new();
        let check = MockCheck::ready_after(0);
        let launch = ServerLaunch { transport: "pipe".into(), ..unix_launch("/nonexistent/sreg.sock") };
        let mut boot = bootstrap(launch, &launcher, &check);
        let err = boot.start().unwrap_err();
        assert!(matches!(err, RegisterError::Config(_)));
        assert!(launcher.launches().is_empty());
        assert_eq!(boot.state(), BootstrapState::NotStarted);
    }

    #[test]
    fn failed_launch_stays_not_started() {
        let launcher = MockLauncher::failing("exec format error");
        let check = MockCheck::ready_after(0);
        let mut boot = bootstrap(unix_launch("/nonexistent/sreg.sock"), &launcher, &check);
        assert!(boot.start().is_err());
        assert_eq!(boot.state(), BootstrapState::NotStarted);
        assert_eq!(boot.pid(), None);
    }

    #[test]
    fn stale_socket_is_removed_before_launch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.sock");
        drop(std::os::unix::net::UnixListener::bind(&path).unwrap());
        assert!(path.exists());

        let launcher = MockLauncher::new();
        let mut boot = SingletonBootstrap::new(
            unix_launch(&path.display().to_string()),
            Box::new(launcher.clone()),
            Box::new(SocketPathCheck),
        )
        .with_readiness(5, Duration::from_micros(1));
        boot.start().unwrap();

        // The mock never binds, so a leftover file would have passed the gate.
        assert!(!path.exists());
        assert_eq!(launcher.launches().len(), 1);
        assert_eq!(boot.state(), BootstrapState::Ready);
    }

    #[test]
    fn regular_file_at_socket_path_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.sock");
        std::fs::write(&path, b"not a socket").unwrap();

        let launcher = MockLauncher::new();
        let check = MockCheck::ready_after(0);
        let mut boot = bootstrap(unix_launch(&path.display().to_string()), &launcher, &check);
        assert!(matches!(boot.start(), Err(RegisterError::Config(_))));
        assert!(launcher.launches().is_empty());
        assert!(path.exists());
    }

    #[test]
    fn terminate_signals_once() {
        let launcher = MockLauncher::new();
        let check = MockCheck::ready_after(0);
        let mut boot = bootstrap(unix_launch("/nonexistent/sreg.sock"), &launcher, &check);
        boot.start().unwrap();
        let pid = boot.pid().unwrap();

        boot.terminate().unwrap();
        boot.terminate().unwrap();
        assert_eq!(boot.state(), BootstrapState::Terminated);
        assert_eq!(launcher.terminated(), vec![pid]);
    }

    #[test]
    fn start_twice_launches_once() {
        let launcher = MockLauncher::new();
        let check = MockCheck::ready_after(0);
        let mut boot = bootstrap(unix_launch("/nonexistent/sreg.sock"), &launcher, &check);
        boot.start().unwrap();
        boot.start().unwrap();
        assert_eq!(launcher.launches().len(), 1);
    }

    #[test]
    fn staging_copies_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("sreg-server");
        std::fs::write(&artifact, b"#!/bin/sh\n").unwrap();
        let stage = dir.path().join("stage");

        let launch = ServerLaunch {
            artifact: artifact.clone(),
            stage_dir: Some(stage.clone()),
            ..unix_launch("/nonexistent/sreg.sock")
        };
        let launcher = MockLauncher::new();
        let check = MockCheck::ready_after(0);
        let mut boot = bootstrap(launch, &launcher, &check);
        boot.start().unwrap();

        let staged = stage.join("sreg-server");
        assert!(staged.is_file());
        assert_eq!(launcher.launches()[0].program, staged);
    }

    #[test]
    fn staging_missing_artifact_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let launch = ServerLaunch {
            artifact: dir.path().join("missing"),
            stage_dir: Some(dir.path().join("stage")),
            ..unix_launch("/nonexistent/sreg.sock")
        };
        let launcher = MockLauncher::new();
        let check = MockCheck::ready_after(0);
        let mut boot = bootstrap(launch, &launcher, &check);
        assert!(matches!(boot.start(), Err(RegisterError::Config(_))));
    }
}
