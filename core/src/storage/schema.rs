//! Table layout shared by every storage-backed register client.

use rusqlite::Connection;


/// Create the four register tables if they do not exist yet.
pub fn ensure_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS COMMAND_REGISTER (
            reg_command TEXT NOT NULL,
            reg_info TEXT
        );

        CREATE TABLE IF NOT EXISTS VALUE_REGISTER (
            reg_domain TEXT NOT NULL,
            reg_key TEXT NOT NULL,
            reg_data TEXT
        );

        CREATE TABLE IF NOT EXISTS STATUS_REGISTER (
            reg_brick TEXT NOT NULL,
            reg_status INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS ALERT_REGISTER (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            reg_id TEXT NOT NULL,
            date TEXT NOT NULL,
            code INTEGER NOT NULL DEFAULT 0,
            level INTEGER NOT NULL DEFAULT 3,
            message TEXT NOT NULL DEFAULT '',
            brick TEXT NOT NULL DEFAULT '',
            acknowledged TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_command_name ON COMMAND_REGISTER(reg_command);
        CREATE INDEX IF NOT EXISTS idx_value_key ON VALUE_REGISTER(reg_domain, reg_key);
        CREATE INDEX IF NOT EXISTS idx_status_brick ON STATUS_REGISTER(reg_brick);
        CREATE INDEX IF NOT EXISTS idx_alert_owner ON ALERT_REGISTER(reg_id, acknowledged);
        "#,
    )
}
