//! StorageRegister — the register contract directly against shared tables.
//!
//! Every client of a namespace opens the same database. There is no server
//! and no bootstrap; SQLite's own locking serializes writers. Payloads are
//! stored as JSON text.
//!
//! The first connection of a process performs a crash-recovery reset: the
//! `@SPS` alive status and any leftover `@SPS_STOP` command from a previous
//! run are removed and `@SPS` is set to 1.

pub mod schema;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};

use crate::alert::{Alert, AlertLevel, AlertRecord};
use crate::codec::Payload;
use crate::error::{RegisterError, Result};
use crate::register::{Register, ALIVE_STATUS, STOP_COMMAND};
use crate::tracker::{self, AlertTracker, CycleQueries, QueryPolicy, StopRequest, UnackedAlerts};


/// How long a writer waits for a competing lock before giving up.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);


/// Opens connections to the shared database.
pub trait ConnectionFactory: Send {
    fn connect(&self) -> rusqlite::Result<Connection>;
}


/// Production factory: a SQLite file, schema created on demand.
#[derive(Debug, Clone)]
pub struct SqliteFactory {
    path: PathBuf,
    busy_timeout: Duration,
}


impl SqliteFactory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SqliteFactory {
            path: path.into(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}


impl ConnectionFactory for SqliteFactory {
    fn connect(&self) -> rusqlite::Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(self.busy_timeout)?;
        schema::ensure_schema(&conn)?;
        Ok(conn)
    }
}


/// Lazily opened connection. The crash-recovery reset runs on the first
/// connect of the process only, even if the connection is later reopened.
struct Session {
    factory: Box<dyn ConnectionFactory>,
    conn: Option<Connection>,
    reset_done: bool,
}


impl Session {
    fn open(&mut self, identifier: &str) -> Result<&mut Connection> {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => {
                let mut conn = self.factory.connect()?;
                if self.reset_done {
                    tracing::debug!("{} reconnected to register storage", identifier);
                } else {
                    reset_alive(&mut conn)?;
                    self.reset_done = true;
                    tracing::info!("{} connected to register storage, marked alive", identifier);
                }
                conn
            }
        };
        Ok(self.conn.insert(conn))
    }
}


/// Register client backed by the shared relational store.
pub struct StorageRegister {
    identifier: String,
    session: Session,
    tracker: AlertTracker,
}


impl StorageRegister {
    pub fn new(identifier: &str, factory: Box<dyn ConnectionFactory>) -> Self {
        StorageRegister {
            identifier: identifier.to_string(),
            session: Session {
                factory,
                conn: None,
                reset_done: false,
            },
            tracker: AlertTracker::new(),
        }
    }

    /// Storage register on a SQLite file.
    pub fn open(identifier: &str, path: impl Into<PathBuf>) -> Self {
        Self::new(identifier, Box::new(SqliteFactory::new(path)))
    }

    pub fn is_connected(&self) -> bool {
        self.session.conn.is_some()
    }

    /// Alerts raised here and not yet seen acknowledged.
    pub fn tracked_alerts(&self) -> Vec<u64> {
        self.tracker.ids()
    }

    fn connection(&mut self) -> Result<&mut Connection> {
        self.session.open(&self.identifier)
    }
}


/// Clear what a crashed predecessor may have left and mark this process alive.
fn reset_alive(conn: &mut Connection) -> rusqlite::Result<()> {
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM STATUS_REGISTER WHERE reg_brick = ?1", params![ALIVE_STATUS])?;
    tx.execute("DELETE FROM COMMAND_REGISTER WHERE reg_command = ?1", params![STOP_COMMAND])?;
    tx.execute(
        "INSERT INTO STATUS_REGISTER (reg_brick, reg_status) VALUES (?1, 1)",
        params![ALIVE_STATUS],
    )?;
    tx.commit()
}


fn encode(payload: &Payload) -> Result<String> {
    serde_json::to_string(payload).map_err(|e| RegisterError::Codec(e.to_string()))
}


/// Undecodable rows read as absent, like an undecodable socket reply.
fn decode(text: Option<String>) -> Option<Payload> {
    text.and_then(|t| serde_json::from_str(&t).ok())
}


fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}


fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}


fn upsert_command(conn: &mut Connection, name: &str, data: &str) -> rusqlite::Result<()> {
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM COMMAND_REGISTER WHERE reg_command = ?1", params![name])?;
    tx.execute(
        "INSERT INTO COMMAND_REGISTER (reg_command, reg_info) VALUES (?1, ?2)",
        params![name, data],
    )?;
    tx.commit()
}


fn read_command(conn: &Connection, name: &str) -> rusqlite::Result<Option<Option<String>>> {
    conn.query_row(
        "SELECT reg_info FROM COMMAND_REGISTER WHERE reg_command = ?1 LIMIT 1",
        params![name],
        |row| row.get(0),
    )
    .optional()
}


/// Cycle queries answered from the tables.
struct TableQueries<'a> {
    conn: &'a Connection,
    identifier: &'a str,
}


impl CycleQueries for TableQueries<'_> {
    fn stop_request(&mut self) -> Result<Option<StopRequest>> {
        let info = read_command(self.conn, STOP_COMMAND)?;
        Ok(decode(info.flatten()).and_then(|v| StopRequest::from_payload(&v)))
    }

    fn unacknowledged(&mut self, _tracked: &[u64]) -> Result<Option<UnackedAlerts>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id FROM ALERT_REGISTER WHERE reg_id = ?1 AND acknowledged IS NULL",
        )?;
        let ids = stmt
            .query_map(params![self.identifier], |row| row.get::<_, i64>(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        let total = ids.len();
        let ids: HashSet<u64> = ids.into_iter().map(|id| id as u64).collect();
        Ok(Some(UnackedAlerts { ids, total }))
    }
}


impl Register for StorageRegister {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    /// The connection is opened on first use.
    fn setup(&mut self) -> Result<()> {
        Ok(())
    }

    fn tear_down(&mut self) -> Result<()> {
        if let Some(conn) = self.session.conn.take() {
            conn.execute(
                "UPDATE STATUS_REGISTER SET reg_status = 0 WHERE reg_brick = ?1",
                params![ALIVE_STATUS],
            )?;
            tracing::info!("{} marked not alive in register storage", self.identifier);
        }
        Ok(())
    }

    fn begin_cycle(&mut self, main_process: bool) -> Result<()> {
        let conn = self.session.open(&self.identifier)?;
        let mut queries = TableQueries {
            conn,
            identifier: &self.identifier,
        };
        tracker::begin_cycle(&mut queries, &mut self.tracker, main_process, QueryPolicy::AlwaysQuery)
    }

    fn end_cycle(&mut self) -> Result<()> {
        Ok(())
    }

    fn stop_engine(&mut self, code: i32, reason: &str) -> Result<bool> {
        let stop = StopRequest { code, reason: reason.to_string() };
        let data = encode(&stop.to_payload())?;
        upsert_command(self.connection()?, STOP_COMMAND, &data)?;
        tracing::warn!("{} requested engine stop (code {}): {}", self.identifier, code, reason);
        Ok(true)
    }

    fn put_command(&mut self, name: &str, payload: Payload) -> Result<bool> {
        let data = encode(&payload)?;
        upsert_command(self.connection()?, name, &data)?;
        Ok(true)
    }

    fn has_command(&mut self, name: Option<&str>) -> Result<bool> {
        let conn = self.connection()?;
        let count: i64 = match name {
            Some(name) => conn.query_row(
                "SELECT count(*) FROM COMMAND_REGISTER WHERE reg_command = ?1",
                params![name],
                |row| row.get(0),
            )?,
            None => conn.query_row("SELECT count(*) FROM COMMAND_REGISTER", [], |row| row.get(0))?,
        };
        Ok(count > 0)
    }

    fn get_command(&mut self, name: &str) -> Result<Option<Payload>> {
        let info = read_command(self.connection()?, name)?;
        Ok(decode(info.flatten()))
    }

    fn clear_command(&mut self, name: Option<&str>) -> Result<bool> {
        let conn = self.connection()?;
        match name {
            Some(name) => conn.execute("DELETE FROM COMMAND_REGISTER WHERE reg_command = ?1", params![name])?,
            None => conn.execute("DELETE FROM COMMAND_REGISTER", [])?,
        };
        Ok(true)
    }

    fn put_value(&mut self, value: Payload, key: &str, domain: &str, merge: bool) -> Result<bool> {
        if merge {
            return Err(RegisterError::Unsupported("merge puts on the storage backend"));
        }
        let data = encode(&value)?;
        let tx = self.connection()?.transaction()?;
        tx.execute(
            "DELETE FROM VALUE_REGISTER WHERE reg_domain = ?1 AND reg_key = ?2",
            params![domain, key],
        )?;
        tx.execute(
            "INSERT INTO VALUE_REGISTER (reg_domain, reg_key, reg_data) VALUES (?1, ?2, ?3)",
            params![domain, key, data],
        )?;
        tx.commit()?;
        Ok(true)
    }

    fn has_value(&mut self, domain: &str, key: Option<&str>) -> Result<bool> {
        let conn = self.connection()?;
        let count: i64 = match key {
            Some(key) => conn.query_row(
                "SELECT count(*) FROM VALUE_REGISTER WHERE reg_domain = ?1 AND reg_key = ?2",
                params![domain, key],
                |row| row.get(0),
            )?,
            None => conn.query_row(
                "SELECT count(*) FROM VALUE_REGISTER WHERE reg_domain = ?1",
                params![domain],
                |row| row.get(0),
            )?,
        };
        Ok(count > 0)
    }

    fn fetch_value(&mut self, domain: &str, key: Option<&str>) -> Result<Option<Payload>> {
        let conn = self.connection()?;
        if let Some(key) = key {
            let data: Option<Option<String>> = conn
                .query_row(
                    "SELECT reg_data FROM VALUE_REGISTER WHERE reg_domain = ?1 AND reg_key = ?2 LIMIT 1",
                    params![domain, key],
                    |row| row.get(0),
                )
                .optional()?;
            return Ok(decode(data.flatten()));
        }

        let mut stmt = conn.prepare_cached(
            "SELECT reg_key, reg_data FROM VALUE_REGISTER WHERE reg_domain = ?1",
        )?;
        let rows = stmt.query_map(params![domain], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
        })?;
        let mut values = Map::new();
        for row in rows {
            let (key, data) = row?;
            values.insert(key, decode(data).unwrap_or(Value::Null));
        }
        Ok(Some(Value::Object(values)))
    }

    fn set_status(&mut self, status: i64, plugin: &str) -> Result<bool> {
        let tx = self.connection()?.transaction()?;
        tx.execute("DELETE FROM STATUS_REGISTER WHERE reg_brick = ?1", params![plugin])?;
        tx.execute(
            "INSERT INTO STATUS_REGISTER (reg_brick, reg_status) VALUES (?1, ?2)",
            params![plugin, status],
        )?;
        tx.commit()?;
        Ok(true)
    }

    fn get_status(&mut self, plugin: &str) -> Result<Option<i64>> {
        let status = self
            .connection()?
            .query_row(
                "SELECT reg_status FROM STATUS_REGISTER WHERE reg_brick = ?1 LIMIT 1",
                params![plugin],
                |row| row.get(0),
            )
            .optional()?;
        Ok(status)
    }

    fn trigger_alert(&mut self, alert: &mut Alert) -> Result<()> {
        let identifier = self.identifier.clone();
        let date = timestamp(&alert.timestamp);
        let level = u8::from(alert.level());
        let plugin = alert.affected_plugin.clone().unwrap_or_default();
        let conn = self.connection()?;
        if alert.id == 0 {
            conn.execute(
                "INSERT INTO ALERT_REGISTER (reg_id, date, code, level, message, brick) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![identifier, date, alert.code, level, alert.message, plugin],
            )?;
            alert.id = conn.last_insert_rowid() as u64;
        } else {
            // A pre-assigned id already in use fails on the primary key.
            conn.execute(
                "INSERT INTO ALERT_REGISTER (id, reg_id, date, code, level, message, brick) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![alert.id as i64, identifier, date, alert.code, level, alert.message, plugin],
            )?;
        }

        tracing::info!(
            "{} raised alert {} (code {}, level {:?}): {}",
            identifier,
            alert.id,
            alert.code,
            alert.level(),
            alert.message
        );
        self.tracker.track(alert.clone());
        Ok(())
    }

    /// Rows are kept; only the acknowledgement time is set.
    fn acknowledge_alert(&mut self, id: u64) -> Result<bool> {
        let changed = self.connection()?.execute(
            "UPDATE ALERT_REGISTER SET acknowledged = ?1 WHERE id = ?2 AND acknowledged IS NULL",
            params![timestamp(&Utc::now()), id as i64],
        )?;
        Ok(changed > 0)
    }

    fn get_alerts(&mut self) -> Result<Vec<AlertRecord>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare_cached(
            "SELECT reg_id, id, code, message, brick, date, level FROM ALERT_REGISTER \
             WHERE acknowledged IS NULL ORDER BY date DESC, id DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, u8>(6)?,
            ))
        })?;

        let mut alerts = Vec::new();
        for row in rows {
            let (namespace, id, code, message, brick, date, level) = row?;
            let Some(timestamp) = parse_timestamp(&date) else {
                tracing::warn!("skipping alert {} with unreadable date '{}'", id, date);
                continue;
            };
            let level = AlertLevel::try_from(level).unwrap_or(AlertLevel::Critical);
            alerts.push(AlertRecord {
                namespace,
                id: id as u64,
                code,
                message,
                plugin: (!brick.is_empty()).then_some(brick),
                level,
                timestamp,
                acknowledged: None,
            });
        }
        Ok(alerts)
    }

    fn pendent_alert_count(&self) -> usize {
        self.tracker.pending_count()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn shared_db() -> (TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("register.db");
        (dir, path)
    }

    fn raw(path: &Path) -> Connection {
        SqliteFactory::new(path).connect().unwrap()
    }

    struct FailingFactory;

    impl ConnectionFactory for FailingFactory {
        fn connect(&self) -> rusqlite::Result<Connection> {
            Err(rusqlite::Error::InvalidPath(PathBuf::from("/nowhere/register.db")))
        }
    }

    #[test]
    fn first_connection_resets_leftovers() {
        let (_dir, path) = shared_db();
        {
            let conn = raw(&path);
            conn.execute("INSERT INTO STATUS_REGISTER (reg_brick, reg_status) VALUES ('@SPS', 0)", [])
                .unwrap();
            conn.execute(
                "INSERT INTO COMMAND_REGISTER (reg_command, reg_info) VALUES ('@SPS_STOP', '[1,\"old\"]')",
                [],
            )
            .unwrap();
        }

        let mut reg = StorageRegister::open("engine", &path);
        assert!(!reg.is_connected());
        assert_eq!(reg.get_status(ALIVE_STATUS).unwrap(), Some(1));
        assert!(!reg.has_command(Some(STOP_COMMAND)).unwrap());

        let rows: i64 = raw(&path)
            .query_row("SELECT count(*) FROM STATUS_REGISTER WHERE reg_brick = '@SPS'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn last_writer_wins_across_clients() {
        let (_dir, path) = shared_db();
        let mut a = StorageRegister::open("a", &path);
        let mut b = StorageRegister::open("b", &path);

        assert!(a.set_status(3, "pump").unwrap());
        assert!(b.set_status(5, "pump").unwrap());
        assert_eq!(a.get_status("pump").unwrap(), Some(5));
        assert_eq!(a.get_status("valve").unwrap(), None);

        a.put_command("open", json!({"valve": 1})).unwrap();
        b.put_command("open", json!({"valve": 2})).unwrap();
        assert_eq!(a.get_command("open").unwrap(), Some(json!({"valve": 2})));

        let count: i64 = raw(&path)
            .query_row("SELECT count(*) FROM COMMAND_REGISTER WHERE reg_command = 'open'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn commands_clear_individually_or_all() {
        let (_dir, path) = shared_db();
        let mut reg = StorageRegister::open("engine", &path);
        assert!(!reg.has_command(None).unwrap());

        reg.put_command("a", json!(1)).unwrap();
        reg.put_command("b", json!(null)).unwrap();
        assert!(reg.has_command(None).unwrap());

        reg.clear_command(Some("a")).unwrap();
        assert!(!reg.has_command(Some("a")).unwrap());
        assert!(reg.has_command(Some("b")).unwrap());

        reg.clear_command(None).unwrap();
        assert!(!reg.has_command(None).unwrap());
        assert_eq!(reg.get_command("b").unwrap(), None);
    }

    #[test]
    fn values_by_key_and_domain() {
        let (_dir, path) = shared_db();
        let mut reg = StorageRegister::open("engine", &path);

        reg.put_value(json!(21.5), "temp", "sensors", false).unwrap();
        reg.put_value(json!([1, 2]), "levels", "sensors", false).unwrap();
        reg.put_value(json!(22.0), "temp", "sensors", false).unwrap();

        assert!(reg.has_value("sensors", None).unwrap());
        assert!(reg.has_value("sensors", Some("temp")).unwrap());
        assert!(!reg.has_value("sensors", Some("humidity")).unwrap());
        assert!(!reg.has_value("actuators", None).unwrap());

        assert_eq!(reg.fetch_value("sensors", Some("temp")).unwrap(), Some(json!(22.0)));
        assert_eq!(
            reg.fetch_value("sensors", None).unwrap(),
            Some(json!({"temp": 22.0, "levels": [1, 2]}))
        );
        assert_eq!(reg.fetch_value("actuators", None).unwrap(), Some(json!({})));
        assert_eq!(reg.fetch_value("sensors", Some("humidity")).unwrap(), None);
    }

    #[test]
    fn merge_is_unsupported() {
        let (_dir, path) = shared_db();
        let mut reg = StorageRegister::open("engine", &path);
        let err = reg.put_value(json!({"a": 1}), "k", "d", true).unwrap_err();
        assert!(matches!(err, RegisterError::Unsupported(_)));
        assert!(!reg.has_value("d", Some("k")).unwrap());
    }

    #[test]
    fn stop_reaches_main_process_and_persists() {
        let (_dir, path) = shared_db();
        let mut main = StorageRegister::open("main", &path);
        let mut plugin = StorageRegister::open("plugin", &path);
        // Connect the main process first so its reset does not eat the request.
        main.begin_cycle(true).unwrap();

        assert!(plugin.stop_engine(3, "maintenance").unwrap());
        plugin.begin_cycle(false).unwrap();

        let err = main.begin_cycle(true).unwrap_err();
        assert_eq!(err.stop_request(), Some((3, "maintenance")));
        let again = main.begin_cycle(true).unwrap_err();
        assert!(again.is_control());
    }

    #[test]
    fn acknowledged_critical_runs_recovery_once() {
        let (_dir, path) = shared_db();
        let mut engine = StorageRegister::open("engine", &path);
        let mut operator = StorageRegister::open("operator", &path);

        let hits = Arc::new(AtomicU32::new(0));
        let h = hits.clone();
        let mut alert = Alert::critical(42, "pressure high")
            .with_plugin("pump")
            .with_recovery(move || {
                h.fetch_add(1, Ordering::SeqCst);
            });
        engine.trigger_alert(&mut alert).unwrap();
        assert!(alert.id > 0);
        assert_eq!(engine.tracked_alerts(), vec![alert.id]);

        engine.begin_cycle(false).unwrap();
        assert_eq!(engine.pendent_alert_count(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        assert!(operator.acknowledge_alert(alert.id).unwrap());
        assert!(!operator.acknowledge_alert(alert.id).unwrap());

        engine.begin_cycle(false).unwrap();
        engine.begin_cycle(false).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(engine.pendent_alert_count(), 0);
        assert!(engine.tracked_alerts().is_empty());

        // The row stays as an audit entry.
        let acked: Option<String> = raw(&path)
            .query_row("SELECT acknowledged FROM ALERT_REGISTER WHERE id = ?1", params![alert.id as i64], |r| {
                r.get(0)
            })
            .unwrap();
        assert!(acked.is_some());
        assert!(engine.get_alerts().unwrap().is_empty());
    }

    #[test]
    fn pending_count_includes_earlier_runs() {
        let (_dir, path) = shared_db();
        {
            let mut previous = StorageRegister::open("engine", &path);
            previous.trigger_alert(&mut Alert::warning(7, "left over")).unwrap();
        }
        let mut other = StorageRegister::open("other", &path);
        other.trigger_alert(&mut Alert::notice(1, "not ours")).unwrap();

        let mut engine = StorageRegister::open("engine", &path);
        engine.begin_cycle(false).unwrap();
        assert_eq!(engine.pendent_alert_count(), 1);
    }

    #[test]
    fn alerts_listed_newest_first() {
        let (_dir, path) = shared_db();
        let mut reg = StorageRegister::open("engine", &path);

        let mut old = Alert::warning(1, "old");
        old.timestamp = Utc::now() - chrono::Duration::minutes(5);
        let mut new = Alert::notice(2, "new").with_plugin("valve");
        reg.trigger_alert(&mut new).unwrap();
        reg.trigger_alert(&mut old).unwrap();

        let alerts = reg.get_alerts().unwrap();
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].message, "new");
        assert_eq!(alerts[0].plugin.as_deref(), Some("valve"));
        assert_eq!(alerts[0].level, AlertLevel::Notice);
        assert_eq!(alerts[0].namespace, "engine");
        assert_eq!(alerts[1].id, old.id);
        assert_eq!(alerts[1].plugin, None);
    }

    #[test]
    fn tear_down_marks_not_alive() {
        let (_dir, path) = shared_db();
        let mut reg = StorageRegister::open("engine", &path);
        reg.set_status(1, "pump").unwrap();
        reg.tear_down().unwrap();
        assert!(!reg.is_connected());

        let alive: i64 = raw(&path)
            .query_row("SELECT reg_status FROM STATUS_REGISTER WHERE reg_brick = '@SPS'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(alive, 0);
    }

    #[test]
    fn reconnect_after_tear_down_keeps_pending_stop() {
        let (_dir, path) = shared_db();
        let mut reg = StorageRegister::open("engine", &path);
        reg.set_status(1, "pump").unwrap();
        reg.tear_down().unwrap();

        raw(&path)
            .execute(
                "INSERT INTO COMMAND_REGISTER (reg_command, reg_info) VALUES ('@SPS_STOP', '[3,\"late\"]')",
                [],
            )
            .unwrap();

        assert_eq!(reg.get_status(ALIVE_STATUS).unwrap(), Some(0));
        assert!(reg.is_connected());
        assert!(reg.has_command(Some(STOP_COMMAND)).unwrap());
        let err = reg.begin_cycle(true).unwrap_err();
        assert_eq!(err.stop_request(), Some((3, "late")));
    }

    #[test]
    fn pre_assigned_alert_id_is_kept() {
        let (_dir, path) = shared_db();
        let mut reg = StorageRegister::open("engine", &path);

        let mut fixed = Alert::warning(4, "fixed").with_id(500);
        reg.trigger_alert(&mut fixed).unwrap();
        assert_eq!(fixed.id, 500);

        let mut next = Alert::notice(5, "next");
        reg.trigger_alert(&mut next).unwrap();
        assert_eq!(next.id, 501);
        assert_eq!(reg.tracked_alerts(), vec![500, 501]);

        let ids: Vec<u64> = reg.get_alerts().unwrap().iter().map(|a| a.id).collect();
        assert!(ids.contains(&500));
        assert!(ids.contains(&501));

        let mut other = StorageRegister::open("other", &path);
        let mut clash = Alert::warning(6, "clash").with_id(500);
        let err = other.trigger_alert(&mut clash).unwrap_err();
        assert!(matches!(err, RegisterError::Storage(_)));
        assert!(other.tracked_alerts().is_empty());
    }

    #[test]
    fn tear_down_without_connection_touches_nothing() {
        let (_dir, path) = shared_db();
        let mut reg = StorageRegister::open("engine", &path);
        reg.setup().unwrap();
        reg.tear_down().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn connection_failure_is_a_storage_error() {
        let mut reg = StorageRegister::new("engine", Box::new(FailingFactory));
        let err = reg.get_status("pump").unwrap_err();
        assert!(matches!(err, RegisterError::Storage(_)));
        assert!(!reg.is_connected());
    }
}
