//! sreg — operator access to a shared register.
//!
//! # Usage
//!
//! ```text
//! sreg --config register.yaml status get pump
//! sreg --config register.yaml status set pump 2
//! sreg --config register.yaml value put sensors temp 21.5
//! sreg --config register.yaml value get sensors
//! sreg --config register.yaml command put open '{"valve": 3}'
//! sreg --config register.yaml alerts
//! sreg --config register.yaml ack 12
//! sreg --config register.yaml stop 0 "maintenance window"
//! ```
//!
//! The register server itself is the separate `sreg-server` binary.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use shared_register_core::config;
use shared_register_core::{Payload, Register, RegisterError, Result};


#[derive(Parser, Debug)]
#[command(name = "sreg")]
#[command(about = "Inspect and drive a shared process register")]
struct Cli {
    /// Register configuration file
    #[arg(short, long, env = "SREG_CONFIG", default_value = "register.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Op,
}


#[derive(Subcommand, Debug)]
enum Op {
    /// Read or write a status flag
    Status {
        #[command(subcommand)]
        op: StatusOp,
    },
    /// Read or write values
    Value {
        #[command(subcommand)]
        op: ValueOp,
    },
    /// Read, post or clear commands
    Command {
        #[command(subcommand)]
        op: CommandOp,
    },
    /// List unacknowledged alerts, newest first
    Alerts,
    /// Acknowledge an alert
    Ack { id: u64 },
    /// Ask the main engine process to stop
    Stop { code: i32, reason: String },
}


#[derive(Subcommand, Debug)]
enum StatusOp {
    Get { plugin: String },
    Set { plugin: String, status: i64 },
}


#[derive(Subcommand, Debug)]
enum ValueOp {
    /// Without a key, prints the whole domain
    Get { domain: String, key: Option<String> },
    Put {
        domain: String,
        key: String,
        /// JSON; anything that does not parse is stored as a string
        value: String,
        #[arg(long)]
        merge: bool,
    },
}


#[derive(Subcommand, Debug)]
enum CommandOp {
    Get { name: String },
    /// Without a name, reports whether any command is pending
    Has { name: Option<String> },
    Put { name: String, payload: Option<String> },
    /// Without a name, clears every command
    Clear { name: Option<String> },
}


fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("shared_register_core=info,sreg=info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(output) => {
            if !output.is_empty() {
                println!("{}", output);
            }
        }
        Err(e) => {
            eprintln!("sreg: {}", e);
            process::exit(1);
        }
    }
}


fn run(cli: Cli) -> Result<String> {
    let config = config::load(&cli.config)?;
    let mut register = config::open_register(&config)?;
    execute(register.as_mut(), cli.command)
}


fn execute(register: &mut dyn Register, op: Op) -> Result<String> {
    match op {
        Op::Status { op: StatusOp::Get { plugin } } => Ok(match register.get_status(&plugin)? {
            Some(status) => status.to_string(),
            None => String::new(),
        }),
        Op::Status { op: StatusOp::Set { plugin, status } } => {
            done(register.set_status(status, &plugin)?)
        }
        Op::Value { op: ValueOp::Get { domain, key } } => {
            render(register.fetch_value(&domain, key.as_deref())?)
        }
        Op::Value { op: ValueOp::Put { domain, key, value, merge } } => {
            done(register.put_value(parse_payload(&value), &key, &domain, merge)?)
        }
        Op::Command { op: CommandOp::Get { name } } => render(register.get_command(&name)?),
        Op::Command { op: CommandOp::Has { name } } => {
            Ok(register.has_command(name.as_deref())?.to_string())
        }
        Op::Command { op: CommandOp::Put { name, payload } } => {
            let payload = payload.as_deref().map(parse_payload).unwrap_or(Value::Null);
            done(register.put_command(&name, payload)?)
        }
        Op::Command { op: CommandOp::Clear { name } } => {
            done(register.clear_command(name.as_deref())?)
        }
        Op::Alerts => {
            let alerts = register.get_alerts()?;
            let lines: Vec<String> = alerts
                .iter()
                .map(|a| {
                    format!(
                        "{:>6}  {}  {:?}  {}/{}  code {}  {}",
                        a.id,
                        a.timestamp.format("%d.%m.%Y %H:%M"),
                        a.level,
                        a.namespace,
                        a.plugin.as_deref().unwrap_or("-"),
                        a.code,
                        a.message
                    )
                })
                .collect();
            Ok(lines.join("\n"))
        }
        Op::Ack { id } => Ok(if register.acknowledge_alert(id)? {
            format!("alert {} acknowledged", id)
        } else {
            format!("alert {} not pending", id)
        }),
        Op::Stop { code, reason } => done(register.stop_engine(code, &reason)?),
    }
}


/// Command-line payloads are JSON; bare words are taken as strings.
fn parse_payload(text: &str) -> Payload {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}


fn render(payload: Option<Payload>) -> Result<String> {
    match payload {
        Some(value) => serde_json::to_string_pretty(&value).map_err(|e| RegisterError::Codec(e.to_string())),
        None => Ok(String::new()),
    }
}


fn done(accepted: bool) -> Result<String> {
    Ok(if accepted { "ok" } else { "rejected" }.to_string())
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared_register_core::StorageRegister;

    fn storage() -> (tempfile::TempDir, StorageRegister) {
        let dir = tempfile::tempdir().unwrap();
        let register = StorageRegister::open("sreg-test", dir.path().join("r.db"));
        (dir, register)
    }

    #[test]
    fn payload_parsing() {
        assert_eq!(parse_payload("21.5"), json!(21.5));
        assert_eq!(parse_payload("{\"a\": [1]}"), json!({"a": [1]}));
        assert_eq!(parse_payload("open"), json!("open"));
    }

    #[test]
    fn parses_nested_subcommands() {
        let cli = Cli::try_parse_from(["sreg", "-c", "r.yaml", "value", "put", "d", "k", "1", "--merge"])
            .unwrap();
        assert_eq!(cli.config, PathBuf::from("r.yaml"));
        assert!(matches!(cli.command, Op::Value { op: ValueOp::Put { merge: true, .. } }));

        let cli = Cli::try_parse_from(["sreg", "command", "clear"]).unwrap();
        assert!(matches!(cli.command, Op::Command { op: CommandOp::Clear { name: None } }));

        assert!(Cli::try_parse_from(["sreg", "ack", "nope"]).is_err());
    }

    #[test]
    fn executes_against_a_register() {
        let (_dir, mut register) = storage();
        let put = Op::Value {
            op: ValueOp::Put { domain: "d".into(), key: "k".into(), value: "[1,2]".into(), merge: false },
        };
        assert_eq!(execute(&mut register, put).unwrap(), "ok");

        let get = Op::Value { op: ValueOp::Get { domain: "d".into(), key: Some("k".into()) } };
        assert_eq!(execute(&mut register, get).unwrap(), "[\n  1,\n  2\n]");

        let missing = Op::Status { op: StatusOp::Get { plugin: "pump".into() } };
        assert_eq!(execute(&mut register, missing).unwrap(), "");
    }

    #[test]
    fn merge_error_surfaces() {
        let (_dir, mut register) = storage();
        let put = Op::Value {
            op: ValueOp::Put { domain: "d".into(), key: "k".into(), value: "{}".into(), merge: true },
        };
        assert!(matches!(execute(&mut register, put), Err(RegisterError::Unsupported(_))));
    }
}
