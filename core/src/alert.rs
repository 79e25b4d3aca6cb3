//! Alerts — operator-facing notices raised by engine processes.
//!
//! An alert is created locally, submitted through `Register::trigger_alert`,
//! and receives its id from the backend. Acknowledgement happens elsewhere
//! (an operator, another process) and is detected during `begin_cycle`.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};


/// Callback invoked once when a critical alert is acknowledged.
pub type RecoveryFn = Arc<dyn Fn() + Send + Sync>;


/// Severity stored alongside every alert. Numeric values are part of the
/// wire and storage format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum AlertLevel {
    Notice = 1,
    Warning = 2,
    Critical = 3,
}


impl From<AlertLevel> for u8 {
    fn from(level: AlertLevel) -> u8 {
        level as u8
    }
}


impl TryFrom<u8> for AlertLevel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(AlertLevel::Notice),
            2 => Ok(AlertLevel::Warning),
            3 => Ok(AlertLevel::Critical),
            other => Err(format!("unknown alert level {}", other)),
        }
    }
}


/// What kind of alert this is. The level is derived from the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    Notice,
    Warning,
    Critical,
}


impl AlertKind {
    pub fn level(self) -> AlertLevel {
        match self {
            AlertKind::Notice => AlertLevel::Notice,
            AlertKind::Warning => AlertLevel::Warning,
            AlertKind::Critical => AlertLevel::Critical,
        }
    }
}


/// A locally raised alert.
///
/// `id` is 0 until the backend assigns one in `trigger_alert`.
#[derive(Clone)]
pub struct Alert {
    pub id: u64,
    pub code: i64,
    pub message: String,
    pub kind: AlertKind,
    pub timestamp: DateTime<Utc>,
    pub affected_plugin: Option<String>,
    recovery: Option<RecoveryFn>,
}


impl Alert {
    pub fn new(kind: AlertKind, code: i64, message: &str) -> Self {
        Alert {
            id: 0,
            code,
            message: message.to_string(),
            kind,
            timestamp: Utc::now(),
            affected_plugin: None,
            recovery: None,
        }
    }

    pub fn notice(code: i64, message: &str) -> Self {
        Self::new(AlertKind::Notice, code, message)
    }

    pub fn warning(code: i64, message: &str) -> Self {
        Self::new(AlertKind::Warning, code, message)
    }

    pub fn critical(code: i64, message: &str) -> Self {
        Self::new(AlertKind::Critical, code, message)
    }

    /// Name the plugin this alert is about.
    pub fn with_plugin(mut self, plugin: &str) -> Self {
        self.affected_plugin = Some(plugin.to_string());
        self
    }

    /// Register a recovery callback. Only critical alerts ever call it.
    pub fn with_recovery<F>(mut self, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.recovery = Some(Arc::new(callback));
        self
    }

    /// Pre-assign an id. The backend keeps non-zero ids as given.
    pub fn with_id(mut self, id: u64) -> Self {
        self.id = id;
        self
    }

    pub fn level(&self) -> AlertLevel {
        self.kind.level()
    }

    pub fn is_critical(&self) -> bool {
        self.kind == AlertKind::Critical
    }

    /// Run the recovery callback if this is a critical alert that has one.
    /// Returns true if a callback ran.
    pub(crate) fn recover(&self) -> bool {
        match (&self.kind, &self.recovery) {
            (AlertKind::Critical, Some(callback)) => {
                callback();
                true
            }
            _ => false,
        }
    }
}


impl fmt::Debug for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Alert")
            .field("id", &self.id)
            .field("code", &self.code)
            .field("message", &self.message)
            .field("kind", &self.kind)
            .field("timestamp", &self.timestamp)
            .field("affected_plugin", &self.affected_plugin)
            .field("recovery", &self.recovery.is_some())
            .finish()
    }
}


/// An alert as reported by the backend through `get_alerts`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertRecord {
    /// Identifier of the engine instance that raised the alert.
    pub namespace: String,
    pub id: u64,
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,
    pub level: AlertLevel,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged: Option<DateTime<Utc>>,
}


/// Receiver of "alert dispatched" notifications (the engine's alert manager).
pub trait AlertSink: Send {
    fn dispatch(&mut self, alert: &Alert);
}
