//! Shared register — a cross-process store of commands, values, status
//! flags and operator alerts for engine processes of one installation.
//!
//! Every engine process holds a [`Register`] client. Two backends implement
//! the same contract and are picked at construction time from a
//! [`config::RegisterConfig`]:
//!
//! - [`socket`] — talks to a shared register server over a UNIX or TCP
//!   socket. One process per namespace is the master and launches the server
//!   through [`bootstrap`].
//! - [`storage`] — reads and writes shared SQLite tables directly.
//!
//! # Modules
//!
//! - [`alert`] — Alerts, levels and the alert sink
//! - [`bootstrap`] — Singleton server launch and readiness wait
//! - [`codec`] — Wire tokens, payload encoding and framing
//! - [`config`] — YAML configuration and backend selection
//! - [`error`] — Error type and the stop-engine control signal
//! - [`infrastructure`] — Process launcher and readiness check capabilities
//! - [`register`] — The register contract
//! - [`server`] — In-memory register server
//! - [`tracker`] — Alert tracking and per-cycle reconciliation
//! - [`transport`] — Persistent socket connection to the server

pub mod alert;
pub mod bootstrap;
pub mod codec;
pub mod config;
pub mod error;
pub mod infrastructure;
pub mod register;
pub mod server;
pub mod socket;
pub mod storage;
pub mod tracker;
pub mod transport;

pub use alert::{Alert, AlertKind, AlertLevel, AlertRecord, AlertSink};
pub use bootstrap::{Role, ServerKind, ServerLaunch, SingletonBootstrap};
pub use codec::Payload;
pub use config::{open_register, RegisterConfig};
pub use error::{EngineControl, RegisterError, Result};
pub use register::Register;
pub use server::RegisterServer;
pub use socket::SocketRegister;
pub use storage::StorageRegister;
pub use transport::Endpoint;
