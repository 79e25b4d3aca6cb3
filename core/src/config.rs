//! Register configuration, read from YAML.
//!
//! ```yaml
//! identifier: boiler-room
//! main_process: true
//! backend:
//!   type: socket
//!   transport: unix
//!   address: /tmp/sreg.sock
//!   master: true
//!   server:
//!     artifact: /usr/local/bin/sreg-server
//!     log_file: /var/log/sreg-server.log
//! ```
//!
//! or, for the storage backend:
//!
//! ```yaml
//! identifier: boiler-room
//! backend:
//!   type: storage
//!   path: /var/lib/sreg/register.db
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::bootstrap::{Role, ServerKind, ServerLaunch};
use crate::error::{RegisterError, Result};
use crate::register::Register;
use crate::socket::SocketRegister;
use crate::storage::StorageRegister;
use crate::transport::Endpoint;


#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterConfig {
    /// Engine instance name, unique within the namespace.
    pub identifier: String,
    /// Whether this process honours stop requests in `begin_cycle`.
    #[serde(default)]
    pub main_process: bool,
    pub backend: BackendConfig,
}


#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    Socket(SocketConfig),
    Storage { path: PathBuf },
}


#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketConfig {
    /// `unix` or `inet`.
    pub transport: String,
    /// Socket path for `unix`, host for `inet`.
    pub address: String,
    #[serde(default)]
    pub port: u16,
    /// The master launches and owns the server process.
    #[serde(default)]
    pub master: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerSettings>,
}


/// How the master starts the server. Ignored by followers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSettings {
    pub artifact: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}


impl SocketConfig {
    pub fn endpoint(&self) -> Result<Endpoint> {
        Ok(match ServerKind::parse(&self.transport)? {
            ServerKind::Unix => Endpoint::Unix(PathBuf::from(&self.address)),
            ServerKind::Tcp => Endpoint::Tcp {
                host: self.address.clone(),
                port: self.port,
            },
        })
    }

    pub fn role(&self) -> Result<Role> {
        if !self.master {
            return Ok(Role::Follower);
        }
        let server = self.server.as_ref().ok_or_else(|| {
            RegisterError::Config("a master needs a 'server' section with the artifact to launch".into())
        })?;
        Ok(Role::Master(ServerLaunch {
            transport: self.transport.clone(),
            address: self.address.clone(),
            port: self.port,
            artifact: server.artifact.clone(),
            stage_dir: server.stage_dir.clone(),
            extra_args: server.extra_args.clone(),
            log_file: server.log_file.clone(),
        }))
    }
}


/// Parse a configuration document.
pub fn parse(text: &str) -> Result<RegisterConfig> {
    let config: RegisterConfig =
        serde_yaml::from_str(text).map_err(|e| RegisterError::Config(e.to_string()))?;
    if config.identifier.trim().is_empty() {
        return Err(RegisterError::Config("identifier must not be empty".into()));
    }
    Ok(config)
}


/// Read and parse a configuration file.
pub fn load(path: &Path) -> Result<RegisterConfig> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        RegisterError::Config(format!("cannot read {}: {}", path.display(), e))
    })?;
    let config = parse(&text)?;
    tracing::debug!("loaded register config for '{}' from {}", config.identifier, path.display());
    Ok(config)
}


/// Build the register client the configuration selects. Nothing is
/// connected or launched until the client is used.
pub fn open_register(config: &RegisterConfig) -> Result<Box<dyn Register>> {
    match &config.backend {
        BackendConfig::Socket(socket) => {
            let endpoint = socket.endpoint()?;
            let role = socket.role()?;
            tracing::debug!(
                "{} uses register server at {} as {}",
                config.identifier,
                endpoint,
                if role.is_master() { "master" } else { "follower" }
            );
            Ok(Box::new(SocketRegister::new(&config.identifier, endpoint, role)))
        }
        BackendConfig::Storage { path } => {
            tracing::debug!("{} uses register storage {}", config.identifier, path.display());
            Ok(Box::new(StorageRegister::open(&config.identifier, path.clone())))
        }
    }
}
