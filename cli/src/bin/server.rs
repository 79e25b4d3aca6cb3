//! sreg-server — the shared register server.
//!
//! Launched by the master engine process with the arguments
//! `{kind} {address} [port] [extra...]`:
//!
//! ```text
//! sreg-server unix /tmp/sreg.sock
//! sreg-server inet 127.0.0.1 8686
//! ```
//!
//! A stale socket file left by a killed server is replaced on start.

use std::process;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use shared_register_core::{Endpoint, RegisterError, RegisterServer, Result, ServerKind};


#[derive(Parser, Debug)]
#[command(name = "sreg-server")]
#[command(about = "Shared process register server")]
struct Args {
    /// `unix` or `inet`
    kind: String,

    /// Socket path for `unix`, host for `inet`
    address: String,

    /// Port for `inet`, followed by any extra arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    rest: Vec<String>,
}


impl Args {
    fn endpoint(&self) -> Result<(Endpoint, &[String])> {
        match ServerKind::parse(&self.kind)? {
            ServerKind::Unix => Ok((Endpoint::Unix(self.address.clone().into()), &self.rest)),
            ServerKind::Tcp => {
                let (port, extra) = self
                    .rest
                    .split_first()
                    .ok_or_else(|| RegisterError::Config("inet server needs a port".into()))?;
                let port = port
                    .parse::<u16>()
                    .map_err(|_| RegisterError::Config(format!("invalid port '{}'", port)))?;
                Ok((Endpoint::Tcp { host: self.address.clone(), port }, extra))
            }
        }
    }
}


fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("shared_register_core=info,sreg_server=info")),
        )
        .init();

    let args = Args::parse();
    if let Err(e) = run(&args) {
        eprintln!("sreg-server: {}", e);
        process::exit(1);
    }
}


fn run(args: &Args) -> Result<()> {
    let (endpoint, extra) = args.endpoint()?;
    if !extra.is_empty() {
        tracing::debug!("ignoring extra server arguments {:?}", extra);
    }
    let server = RegisterServer::bind(&endpoint)?;
    tracing::info!("sreg-server pid {} ready on {}", process::id(), server.endpoint());
    server.serve()
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn unix_arguments() {
        let args = Args::try_parse_from(["sreg-server", "unix", "/tmp/s.sock", "--verbose"]).unwrap();
        let (endpoint, extra) = args.endpoint().unwrap();
        assert_eq!(endpoint, Endpoint::Unix(PathBuf::from("/tmp/s.sock")));
        assert_eq!(extra, ["--verbose".to_string()]);
    }

    #[test]
    fn inet_arguments() {
        let args = Args::try_parse_from(["sreg-server", "inet", "127.0.0.1", "8686"]).unwrap();
        let (endpoint, extra) = args.endpoint().unwrap();
        assert_eq!(endpoint, Endpoint::Tcp { host: "127.0.0.1".into(), port: 8686 });
        assert!(extra.is_empty());
    }

    #[test]
    fn inet_needs_a_port() {
        let args = Args::try_parse_from(["sreg-server", "inet", "127.0.0.1"]).unwrap();
        assert!(matches!(args.endpoint(), Err(RegisterError::Config(_))));

        let args = Args::try_parse_from(["sreg-server", "inet", "127.0.0.1", "http"]).unwrap();
        assert!(matches!(args.endpoint(), Err(RegisterError::Config(_))));

        let args = Args::try_parse_from(["sreg-server", "pipe", "x"]).unwrap();
        assert!(args.endpoint().is_err());
    }
}
