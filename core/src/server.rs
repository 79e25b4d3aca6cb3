//! Reference register server.
//!
//! An in-memory implementation of the server side of the wire protocol. It
//! is what `sreg-server` runs when a master bootstraps the namespace, and it
//! is what the socket backend's tests talk to.
//!
//! Each accepted connection gets its own thread and stays open until the
//! client sends `exit` or hangs up. All connections share one
//! `RegisterState` behind a mutex, so every request is atomic.

use std::collections::{BTreeMap, HashMap};
use std::net::TcpListener;
use std::os::unix::net::UnixListener;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};

use crate::alert::{AlertLevel, AlertRecord};
use crate::codec::{self, Payload, Token};
use crate::error::Result;
use crate::transport::{Endpoint, Stream};


/// Everything the server knows.
#[derive(Debug, Default)]
pub struct RegisterState {
    commands: HashMap<String, Payload>,
    values: HashMap<String, Map<String, Payload>>,
    statuses: HashMap<String, i64>,
    /// Alert ids are unique across identifiers.
    alerts: BTreeMap<u64, AlertRecord>,
    last_alert_id: u64,
    stop: Option<(i64, String)>,
}


impl RegisterState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Execute one request. `None` is sent back as an empty response.
    pub fn handle(&mut self, token: &str, args: &[Payload]) -> Option<Payload> {
        let Some(token) = Token::parse(token) else {
            tracing::warn!("unknown register token '{}'", token);
            return None;
        };
        match token {
            Token::PutValue => {
                let value = arg(args, 0).clone();
                let key = arg_str(args, 1)?;
                let domain = arg_str(args, 2)?;
                let merge = arg(args, 3).as_bool().unwrap_or(false);
                let entries = self.values.entry(domain.to_string()).or_default();
                if merge {
                    if let (Some(Value::Object(existing)), Value::Object(overlay)) =
                        (entries.get_mut(key), &value)
                    {
                        existing.extend(overlay.clone());
                        return Some(json!(true));
                    }
                }
                entries.insert(key.to_string(), value);
                Some(json!(true))
            }
            Token::GetValue => {
                let domain = arg_str(args, 0)?;
                match arg_str(args, 1) {
                    Some(key) => self.values.get(domain)?.get(key).cloned(),
                    None => Some(Value::Object(
                        self.values.get(domain).cloned().unwrap_or_default(),
                    )),
                }
            }
            Token::HasValue => {
                let domain = arg_str(args, 0)?;
                let entries = self.values.get(domain);
                let found = match arg_str(args, 1) {
                    Some(key) => entries.is_some_and(|e| e.contains_key(key)),
                    None => entries.is_some_and(|e| !e.is_empty()),
                };
                Some(json!(found))
            }
            Token::PutStatus => {
                let status = arg(args, 0).as_i64()?;
                let plugin = arg_str(args, 1)?;
                self.statuses.insert(plugin.to_string(), status);
                Some(json!(true))
            }
            Token::GetStatus => {
                let plugin = arg_str(args, 0)?;
                self.statuses.get(plugin).map(|s| json!(s))
            }
            Token::PutCommand => {
                let name = arg_str(args, 0)?;
                self.commands.insert(name.to_string(), arg(args, 1).clone());
                Some(json!(true))
            }
            Token::HasCommand => {
                let found = match arg_str(args, 0) {
                    Some(name) => self.commands.contains_key(name),
                    None => !self.commands.is_empty(),
                };
                Some(json!(found))
            }
            Token::GetCommand => {
                let name = arg_str(args, 0)?;
                self.commands.get(name).cloned()
            }
            Token::ClearCommand => {
                match arg_str(args, 0) {
                    Some(name) => {
                        self.commands.remove(name);
                    }
                    None => self.commands.clear(),
                }
                Some(json!(true))
            }
            Token::Alert => self.raise_alert(args),
            Token::AcknowledgeAlert => {
                let id = arg(args, 0).as_u64()?;
                let hit = match self.alerts.get_mut(&id) {
                    Some(record) if record.acknowledged.is_none() => {
                        record.acknowledged = Some(Utc::now());
                        true
                    }
                    _ => false,
                };
                Some(json!(hit))
            }
            Token::GetAlerts => {
                let mut open: Vec<&AlertRecord> = self
                    .alerts
                    .values()
                    .filter(|r| r.acknowledged.is_none())
                    .collect();
                open.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
                serde_json::to_value(open).ok()
            }
            Token::UnacknowledgedAlerts => {
                let identifier = arg_str(args, 0)?;
                let keys: Vec<String> = self
                    .alerts
                    .values()
                    .filter(|r| r.namespace == identifier && r.acknowledged.is_none())
                    .map(|r| format!("{}::{}", r.namespace, r.id))
                    .collect();
                Some(json!(keys))
            }
            Token::Stop => {
                let code = arg(args, 0).as_i64().unwrap_or(0);
                let reason = arg_str(args, 1).unwrap_or("").to_string();
                self.stop = Some((code, reason));
                Some(json!(true))
            }
            Token::Stopped => self.stop.take().map(|(code, reason)| json!([code, reason])),
            Token::EndCycle => Some(json!(true)),
            Token::Exit => None,
        }
    }

    /// `alrt [identifier, id, code, message, timestamp, plugin, level]`
    fn raise_alert(&mut self, args: &[Payload]) -> Option<Payload> {
        let namespace = arg_str(args, 0)?.to_string();
        let mut id = arg(args, 1).as_u64().unwrap_or(0);
        if id == 0 {
            self.last_alert_id += 1;
            id = self.last_alert_id;
        } else if self.alerts.get(&id).is_some_and(|r| r.namespace != namespace) {
            tracing::warn!("alert id {} from {} already belongs to another identifier", id, namespace);
            return None;
        } else {
            self.last_alert_id = self.last_alert_id.max(id);
        }
        let timestamp = arg_str(args, 4)
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        let level = arg(args, 6)
            .as_u64()
            .and_then(|l| AlertLevel::try_from(l as u8).ok())
            .unwrap_or(AlertLevel::Critical);

        let record = AlertRecord {
            namespace: namespace.clone(),
            id,
            code: arg(args, 2).as_i64().unwrap_or(0),
            message: arg_str(args, 3).unwrap_or("").to_string(),
            plugin: arg_str(args, 5).map(str::to_string),
            level,
            timestamp,
            acknowledged: None,
        };
        self.alerts.insert(id, record);
        Some(json!(id))
    }
}


fn arg(args: &[Payload], index: usize) -> &Payload {
    args.get(index).unwrap_or(&Value::Null)
}


fn arg_str(args: &[Payload], index: usize) -> Option<&str> {
    arg(args, index).as_str()
}


enum Listener {
    Unix(UnixListener, PathBuf),
    Tcp(TcpListener),
}


/// Stops a running `RegisterServer::serve` loop from another thread.
#[derive(Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
    endpoint: Endpoint,
}


impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.flag.store(true, Ordering::SeqCst);
        // Wake the blocking accept.
        match &self.endpoint {
            Endpoint::Unix(path) => {
                let _ = std::os::unix::net::UnixStream::connect(path);
            }
            Endpoint::Tcp { host, port } => {
                let _ = std::net::TcpStream::connect((host.as_str(), *port));
            }
        }
    }
}


/// Listening register server.
pub struct RegisterServer {
    listener: Listener,
    endpoint: Endpoint,
    state: Arc<Mutex<RegisterState>>,
    shutdown: Arc<AtomicBool>,
}


impl RegisterServer {
    /// Bind to the endpoint. A stale UNIX socket file is removed first.
    pub fn bind(endpoint: &Endpoint) -> Result<RegisterServer> {
        let (listener, endpoint) = match endpoint {
            Endpoint::Unix(path) => {
                if path.exists() {
                    std::fs::remove_file(path)?;
                }
                let listener = UnixListener::bind(path)?;
                (Listener::Unix(listener, path.clone()), endpoint.clone())
            }
            Endpoint::Tcp { host, port } => {
                let listener = TcpListener::bind((host.as_str(), *port))?;
                let bound = listener.local_addr()?;
                let endpoint = Endpoint::Tcp {
                    host: host.clone(),
                    port: bound.port(),
                };
                (Listener::Tcp(listener), endpoint)
            }
        };
        tracing::info!("register server listening on {}", endpoint);
        Ok(RegisterServer {
            listener,
            endpoint,
            state: Arc::new(Mutex::new(RegisterState::new())),
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// The bound endpoint. For TCP port 0 this carries the real port.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            flag: self.shutdown.clone(),
            endpoint: self.endpoint.clone(),
        }
    }

    /// Accept connections until shut down.
    pub fn serve(&self) -> Result<()> {
        loop {
            let accepted = match &self.listener {
                Listener::Unix(listener, _) => listener
                    .accept()
                    .map(|(s, _)| Box::new(s) as Box<dyn Stream>),
                Listener::Tcp(listener) => listener.accept().map(|(s, _)| {
                    let _ = s.set_nodelay(true);
                    Box::new(s) as Box<dyn Stream>
                }),
            };
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            match accepted {
                Ok(stream) => {
                    let state = self.state.clone();
                    std::thread::spawn(move || serve_connection(stream, state));
                }
                Err(e) => tracing::error!("accept failed on {}: {}", self.endpoint, e),
            }
        }
        tracing::info!("register server on {} stopped", self.endpoint);
        Ok(())
    }
}


impl Drop for RegisterServer {
    fn drop(&mut self) {
        if let Listener::Unix(_, path) = &self.listener {
            let _ = std::fs::remove_file(path);
        }
    }
}


/// Answer requests on one connection until `exit` or hangup.
fn serve_connection(mut stream: Box<dyn Stream>, state: Arc<Mutex<RegisterState>>) {
    loop {
        let frame = match codec::read_frame(&mut stream) {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                tracing::debug!("register connection dropped: {}", e);
                break;
            }
        };
        let reply = match codec::decode_request(&frame) {
            Some((token, _)) if token == Token::Exit.as_str() => break,
            Some((token, args)) => {
                let mut state = state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                state.handle(&token, &args)
            }
            None => {
                tracing::warn!("malformed register request ({} bytes)", frame.len());
                None
            }
        };
        if let Err(e) = codec::write_frame(&mut stream, &codec::encode_response(reply.as_ref())) {
            tracing::debug!("register reply failed: {}", e);
            break;
        }
    }
}
