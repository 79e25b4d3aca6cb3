//! Test doubles for the bootstrap capabilities.
//!
//! Both mocks share their recorded state through an `Arc`, so a test can keep
//! a clone for inspection after moving the mock into the bootstrap.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use super::{LaunchCommand, ReadinessCheck, ServerLauncher};
use crate::error::{RegisterError, Result};
use crate::transport::Endpoint;


#[derive(Debug, Default)]
struct LauncherLog {
    launches: Vec<LaunchCommand>,
    terminated: Vec<u32>,
    next_pid: u32,
    fail_launch: Option<String>,
}


/// Records launches and terminations instead of running processes.
#[derive(Debug, Clone, Default)]
pub struct MockLauncher {
    log: Arc<Mutex<LauncherLog>>,
}


impl MockLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// A launcher whose every launch fails with the given message.
    pub fn failing(message: &str) -> Self {
        let launcher = Self::new();
        if let Ok(mut log) = launcher.log.lock() {
            log.fail_launch = Some(message.to_string());
        }
        launcher
    }

    pub fn launches(&self) -> Vec<LaunchCommand> {
        self.log.lock().map(|l| l.launches.clone()).unwrap_or_default()
    }

    pub fn terminated(&self) -> Vec<u32> {
        self.log.lock().map(|l| l.terminated.clone()).unwrap_or_default()
    }
}


impl ServerLauncher for MockLauncher {
    fn launch(&mut self, command: &LaunchCommand) -> Result<u32> {
        let mut log = self
            .log
            .lock()
            .map_err(|_| RegisterError::Config("mock launcher poisoned".into()))?;
        if let Some(message) = &log.fail_launch {
            return Err(RegisterError::Config(message.clone()));
        }
        log.launches.push(command.clone());
        log.next_pid += 1;
        Ok(1000 + log.next_pid)
    }

    fn terminate(&mut self, pid: u32) -> Result<()> {
        let mut log = self
            .log
            .lock()
            .map_err(|_| RegisterError::Config("mock launcher poisoned".into()))?;
        log.terminated.push(pid);
        Ok(())
    }
}


/// Reports ready after a fixed number of polls.
#[derive(Debug, Clone)]
pub struct MockCheck {
    ready_after: u32,
    polls: Arc<AtomicU32>,
}


impl MockCheck {
    pub fn ready_after(polls: u32) -> Self {
        MockCheck {
            ready_after: polls,
            polls: Arc::new(AtomicU32::new(0)),
        }
    }

    /// A check that never reports ready.
    pub fn never() -> Self {
        Self::ready_after(u32::MAX)
    }

    pub fn polls(&self) -> u32 {
        self.polls.load(Ordering::SeqCst)
    }
}


impl ReadinessCheck for MockCheck {
    fn is_ready(&self, _endpoint: &Endpoint) -> bool {
        let seen = self.polls.fetch_add(1, Ordering::SeqCst);
        seen >= self.ready_after
    }
}
