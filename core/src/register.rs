//! Register — the contract every backend implements.
//!
//! An engine process calls `setup()` once, then `begin_cycle()`, any number
//! of operations and `end_cycle()` on every iteration of its control loop,
//! and finally `tear_down()`. The socket and storage backends behave the
//! same from the caller's point of view.

use crate::alert::{Alert, AlertRecord};
use crate::codec::Payload;
use crate::error::Result;


/// Status name a storage-backed process uses to announce it is alive.
pub const ALIVE_STATUS: &str = "@SPS";

/// Command name carrying a pending stop request.
pub const STOP_COMMAND: &str = "@SPS_STOP";


/// Shared process register: commands, values, status flags and alerts.
pub trait Register: Send {
    /// Identifier of this engine instance within the namespace.
    fn identifier(&self) -> &str;

    fn setup(&mut self) -> Result<()>;

    fn tear_down(&mut self) -> Result<()>;

    /// Per-cycle hook. On the namespace's main process a pending stop
    /// request aborts with `RegisterError::Control`. Afterwards locally
    /// raised alerts are reconciled against the backend.
    fn begin_cycle(&mut self, main_process: bool) -> Result<()>;

    fn end_cycle(&mut self) -> Result<()>;

    /// Ask the main process to stop at its next cycle.
    fn stop_engine(&mut self, code: i32, reason: &str) -> Result<bool>;

    /// Detached processes run alone in their cycle, so this does nothing.
    fn stop_cycle(&mut self, code: i32, reason: &str) -> Result<()> {
        tracing::debug!("stop_cycle({}, {}) ignored by {}", code, reason, self.identifier());
        Ok(())
    }

    /// Store a command, replacing any previous one with the same name.
    fn put_command(&mut self, name: &str, payload: Payload) -> Result<bool>;

    /// `None` asks whether any command is pending.
    fn has_command(&mut self, name: Option<&str>) -> Result<bool>;

    fn get_command(&mut self, name: &str) -> Result<Option<Payload>>;

    /// `None` clears every command.
    fn clear_command(&mut self, name: Option<&str>) -> Result<bool>;

    /// Store a value under `(domain, key)`. `merge` overlays object values
    /// onto an existing one where the backend supports it.
    fn put_value(&mut self, value: Payload, key: &str, domain: &str, merge: bool) -> Result<bool>;

    fn has_value(&mut self, domain: &str, key: Option<&str>) -> Result<bool>;

    /// With a key, the stored value. Without one, an object mapping every
    /// key of the domain to its value.
    fn fetch_value(&mut self, domain: &str, key: Option<&str>) -> Result<Option<Payload>>;

    fn set_status(&mut self, status: i64, plugin: &str) -> Result<bool>;

    fn get_status(&mut self, plugin: &str) -> Result<Option<i64>>;

    /// Submit an alert. An alert with id 0 gets the id assigned by the
    /// backend written back into it; a non-zero id is kept, and an id
    /// already taken leaves the alert untracked.
    fn trigger_alert(&mut self, alert: &mut Alert) -> Result<()>;

    fn acknowledge_alert(&mut self, id: u64) -> Result<bool>;

    fn get_alerts(&mut self) -> Result<Vec<AlertRecord>>;

    /// Unacknowledged alerts of this identifier, as of the last `begin_cycle`.
    fn pendent_alert_count(&self) -> usize;
}
