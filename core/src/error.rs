//! Error types for register operations.
//!
//! Failures fall into four groups: transport-fatal (`Connect`, `Unreachable`),
//! configuration-fatal (`Config`), backend failures (`Storage`, `Io`), and the
//! `Control` signal, which is not a failure at all but the way a pending stop
//! request aborts the current engine cycle.

use std::fmt;

use thiserror::Error;

use crate::transport::Endpoint;


/// Control-flow conditions raised out of `begin_cycle`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineControl {
    /// Another process asked the engine to stop.
    StopEngine { code: i32, reason: String },
}


impl fmt::Display for EngineControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineControl::StopEngine { code, reason } => {
                write!(f, "engine stop requested (code {}): {}", code, reason)
            }
        }
    }
}


/// Main error type for register operations.
#[derive(Debug, Error)]
pub enum RegisterError {
    #[error("cannot connect to register server at {endpoint}: {source}")]
    Connect {
        endpoint: Endpoint,
        #[source]
        source: std::io::Error,
    },

    #[error("register server unreachable: {0}")]
    Unreachable(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("cannot encode request: {0}")]
    Codec(String),

    #[error("operation not supported by this backend: {0}")]
    Unsupported(&'static str),

    #[error("{0}")]
    Control(EngineControl),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}


impl RegisterError {
    /// True for control-flow signals, false for real failures.
    pub fn is_control(&self) -> bool {
        matches!(self, RegisterError::Control(_))
    }

    /// The `(code, reason)` pair carried by a stop signal.
    pub fn stop_request(&self) -> Option<(i32, &str)> {
        match self {
            RegisterError::Control(EngineControl::StopEngine { code, reason }) => {
                Some((*code, reason.as_str()))
            }
            _ => None,
        }
    }
}


/// Result alias for register operations.
pub type Result<T> = std::result::Result<T, RegisterError>;
