//! SocketRegister — the register contract over the shared server.
//!
//! Every operation is one request on the client's `SocketTransport`. The
//! master additionally owns the server process through a
//! `SingletonBootstrap`: it launches it in `setup()` and terminates it in
//! `tear_down()`.


use chrono::SecondsFormat;
use serde_json::{json, Value};

use crate::alert::{Alert, AlertRecord, AlertSink};
use crate::bootstrap::{Role, SingletonBootstrap};
use crate::codec::{is_truthy, Payload, Token};
use crate::error::Result;
use crate::register::Register;
use crate::tracker::{self, AlertTracker, CycleQueries, QueryPolicy, StopRequest, UnackedAlerts};
use crate::transport::{Endpoint, SocketTransport};


/// Key under which the server may report bookkeeping in alert listings.
const META_KEY: &str = "#";


/// Register client backed by the shared register server.
pub struct SocketRegister {
    identifier: String,
    transport: SocketTransport,
    role: Role,
    bootstrap: Option<SingletonBootstrap>,
    tracker: AlertTracker,
    sink: Option<Box<dyn AlertSink>>,
}


impl SocketRegister {
    pub fn new(identifier: &str, endpoint: Endpoint, role: Role) -> Self {
        SocketRegister {
            identifier: identifier.to_string(),
            transport: SocketTransport::new(endpoint),
            role,
            bootstrap: None,
            tracker: AlertTracker::new(),
            sink: None,
        }
    }

    /// Use this bootstrap instead of spawning a real process when master.
    pub fn with_bootstrap(mut self, bootstrap: SingletonBootstrap) -> Self {
        self.bootstrap = Some(bootstrap);
        self
    }

    /// Forward every triggered alert to the engine's alert manager.
    pub fn with_alert_sink(mut self, sink: Box<dyn AlertSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn bootstrap(&self) -> Option<&SingletonBootstrap> {
        self.bootstrap.as_ref()
    }

    /// Alerts raised here and not yet seen acknowledged.
    pub fn tracked_alerts(&self) -> Vec<u64> {
        self.tracker.ids()
    }

    fn call(&mut self, token: Token, args: &[Payload]) -> Result<Option<Payload>> {
        self.transport.request(token, args)
    }

    fn call_bool(&mut self, token: Token, args: &[Payload]) -> Result<bool> {
        let reply = self.transport.request(token, args)?;
        Ok(is_truthy(reply.as_ref()))
    }
}


/// Cycle queries routed through the server.
struct ServerQueries<'a> {
    transport: &'a mut SocketTransport,
    identifier: &'a str,
}


impl CycleQueries for ServerQueries<'_> {
    fn stop_request(&mut self) -> Result<Option<StopRequest>> {
        let reply = self.transport.request(Token::Stopped, &[])?;
        Ok(reply.and_then(|v| StopRequest::from_payload(&v)))
    }

    fn unacknowledged(&mut self, _tracked: &[u64]) -> Result<Option<UnackedAlerts>> {
        let reply = self
            .transport
            .request(Token::UnacknowledgedAlerts, &[json!(self.identifier)])?;
        Ok(reply.map(|v| parse_unacked(&v, self.identifier)))
    }
}


/// The server lists unacknowledged alerts as `"<identifier>::<id>"` keys,
/// either as an array or as the keys of an object.
fn parse_unacked(value: &Value, identifier: &str) -> UnackedAlerts {
    let keys: Vec<&str> = match value {
        Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
        Value::Object(map) => map.keys().map(String::as_str).collect(),
        _ => Vec::new(),
    };
    let mut unacked = UnackedAlerts::default();
    for key in keys.into_iter().filter(|k| *k != META_KEY) {
        unacked.total += 1;
        if let Some((owner, id)) = key.split_once("::") {
            if owner == identifier {
                if let Ok(id) = id.parse::<u64>() {
                    unacked.ids.insert(id);
                }
            }
        }
    }
    unacked
}


fn parse_alerts(value: Value) -> Vec<AlertRecord> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        _ => Vec::new(),
    }
}


impl Register for SocketRegister {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn setup(&mut self) -> Result<()> {
        let Role::Master(launch) = &self.role else {
            return Ok(());
        };
        if self.bootstrap.is_none() {
            self.bootstrap = Some(SingletonBootstrap::for_process(launch.clone()));
        }
        if let Some(bootstrap) = self.bootstrap.as_mut() {
            bootstrap.start()?;
        }
        Ok(())
    }

    fn tear_down(&mut self) -> Result<()> {
        self.transport.close();
        if self.role.is_master() {
            if let Some(bootstrap) = self.bootstrap.as_mut() {
                bootstrap.terminate()?;
            }
        }
        Ok(())
    }

    fn begin_cycle(&mut self, main_process: bool) -> Result<()> {
        let mut queries = ServerQueries {
            transport: &mut self.transport,
            identifier: &self.identifier,
        };
        tracker::begin_cycle(&mut queries, &mut self.tracker, main_process, QueryPolicy::SkipWhenEmpty)
    }

    fn end_cycle(&mut self) -> Result<()> {
        self.call(Token::EndCycle, &[])?;
        Ok(())
    }

    fn stop_engine(&mut self, code: i32, reason: &str) -> Result<bool> {
        self.call_bool(Token::Stop, &[json!(code), json!(reason)])
    }

    fn put_command(&mut self, name: &str, payload: Payload) -> Result<bool> {
        self.call_bool(Token::PutCommand, &[json!(name), payload])
    }

    fn has_command(&mut self, name: Option<&str>) -> Result<bool> {
        self.call_bool(Token::HasCommand, &[json!(name)])
    }

    fn get_command(&mut self, name: &str) -> Result<Option<Payload>> {
        self.call(Token::GetCommand, &[json!(name)])
    }

    fn clear_command(&mut self, name: Option<&str>) -> Result<bool> {
        self.call_bool(Token::ClearCommand, &[json!(name)])
    }

    fn put_value(&mut self, value: Payload, key: &str, domain: &str, merge: bool) -> Result<bool> {
        self.call_bool(Token::PutValue, &[value, json!(key), json!(domain), json!(merge)])
    }

    fn has_value(&mut self, domain: &str, key: Option<&str>) -> Result<bool> {
        self.call_bool(Token::HasValue, &[json!(domain), json!(key)])
    }

    fn fetch_value(&mut self, domain: &str, key: Option<&str>) -> Result<Option<Payload>> {
        self.call(Token::GetValue, &[json!(domain), json!(key)])
    }

    fn set_status(&mut self, status: i64, plugin: &str) -> Result<bool> {
        self.call_bool(Token::PutStatus, &[json!(status), json!(plugin)])
    }

    fn get_status(&mut self, plugin: &str) -> Result<Option<i64>> {
        let reply = self.call(Token::GetStatus, &[json!(plugin)])?;
        Ok(reply.and_then(|v| v.as_i64()))
    }

    fn trigger_alert(&mut self, alert: &mut Alert) -> Result<()> {
        let info = [
            json!(self.identifier),
            json!(alert.id),
            json!(alert.code),
            json!(alert.message),
            json!(alert.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)),
            json!(alert.affected_plugin),
            json!(u8::from(alert.level())),
        ];
        let reply = self.call(Token::Alert, &info)?;
        // The server answers with the id it stored the alert under.
        match reply.and_then(|v| v.as_u64()).filter(|id| *id != 0) {
            Some(id) => {
                alert.id = id;
                tracing::info!(
                    "alert {} raised by {} (code {}, level {:?}): {}",
                    alert.id,
                    self.identifier,
                    alert.code,
                    alert.level(),
                    alert.message
                );
                self.tracker.track(alert.clone());
            }
            None => tracing::warn!(
                "register server returned no id for alert (code {}) from {}, not tracking it",
                alert.code,
                self.identifier
            ),
        }

        if let Some(sink) = self.sink.as_mut() {
            sink.dispatch(alert);
        }
        Ok(())
    }

    fn acknowledge_alert(&mut self, id: u64) -> Result<bool> {
        self.call_bool(Token::AcknowledgeAlert, &[json!(id)])
    }

    fn get_alerts(&mut self) -> Result<Vec<AlertRecord>> {
        let reply = self.call(Token::GetAlerts, &[])?;
        Ok(reply.map(parse_alerts).unwrap_or_default())
    }

    fn pendent_alert_count(&self) -> usize {
        self.tracker.pending_count()
    }
}
