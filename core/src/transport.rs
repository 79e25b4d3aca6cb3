//! SocketTransport — one persistent connection to the register server.
//!
//! The connection is opened lazily on the first request and kept for the
//! lifetime of the client. There are no retries: if the first connect fails
//! the transport is marked failed and every later request reports the server
//! as unreachable. A write or read failure on an open connection does the same.

use std::fmt;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;

use crate::codec::{self, Payload, Token};
use crate::error::{RegisterError, Result};


/// Where the register server listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Unix(PathBuf),
    Tcp { host: String, port: u16 },
}


impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Unix(path) => write!(f, "unix://{}", path.display()),
            Endpoint::Tcp { host, port } => write!(f, "tcp://{}:{}", host, port),
        }
    }
}


/// Byte stream the codec can frame over.
pub(crate) trait Stream: Read + Write + Send {}

impl<T: Read + Write + Send> Stream for T {}


enum Link {
    Idle,
    Connected(Box<dyn Stream>),
    Failed,
}


/// Request/response transport over a UNIX-domain or TCP socket.
pub struct SocketTransport {
    endpoint: Endpoint,
    link: Link,
}


impl SocketTransport {
    pub fn new(endpoint: Endpoint) -> Self {
        SocketTransport {
            endpoint,
            link: Link::Idle,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.link, Link::Connected(_))
    }

    /// True once the transport has given up on the server.
    pub fn is_failed(&self) -> bool {
        matches!(self.link, Link::Failed)
    }

    /// Send one request and wait for its response.
    ///
    /// An empty or undecodable response is `Ok(None)`.
    pub fn request(&mut self, token: Token, args: &[Payload]) -> Result<Option<Payload>> {
        let payload = codec::encode_request(token, args)?;
        let mut stream = self.take_stream()?;

        if let Err(e) = codec::write_frame(&mut stream, &payload) {
            return Err(self.fail(format!("write of '{}' failed: {}", token.as_str(), e)));
        }
        match codec::read_frame(&mut stream) {
            Ok(Some(bytes)) => {
                self.link = Link::Connected(stream);
                Ok(codec::decode_response(&bytes))
            }
            Ok(None) => Err(self.fail(format!(
                "connection closed while waiting for '{}'",
                token.as_str()
            ))),
            Err(e) => Err(self.fail(format!("read of '{}' failed: {}", token.as_str(), e))),
        }
    }

    /// Tell the server we are leaving and drop the connection.
    pub fn close(&mut self) {
        if let Link::Connected(mut stream) = std::mem::replace(&mut self.link, Link::Idle) {
            if let Ok(payload) = codec::encode_request(Token::Exit, &[]) {
                let _ = codec::write_frame(&mut stream, &payload);
            }
            tracing::debug!("closed register connection to {}", self.endpoint);
        }
    }

    fn take_stream(&mut self) -> Result<Box<dyn Stream>> {
        match std::mem::replace(&mut self.link, Link::Failed) {
            Link::Connected(stream) => Ok(stream),
            Link::Failed => Err(RegisterError::Unreachable(format!(
                "no connection to {}",
                self.endpoint
            ))),
            Link::Idle => match connect(&self.endpoint) {
                Ok(stream) => {
                    tracing::debug!("connected to register server at {}", self.endpoint);
                    Ok(stream)
                }
                Err(source) => {
                    tracing::error!("cannot connect to register server at {}: {}", self.endpoint, source);
                    Err(RegisterError::Connect {
                        endpoint: self.endpoint.clone(),
                        source,
                    })
                }
            },
        }
    }

    fn fail(&mut self, message: String) -> RegisterError {
        self.link = Link::Failed;
        tracing::error!("register server at {} has gone: {}", self.endpoint, message);
        RegisterError::Unreachable(message)
    }
}


impl Drop for SocketTransport {
    fn drop(&mut self) {
        self.close();
    }
}


fn connect(endpoint: &Endpoint) -> std::io::Result<Box<dyn Stream>> {
    match endpoint {
        Endpoint::Unix(path) => Ok(Box::new(UnixStream::connect(path)?)),
        Endpoint::Tcp { host, port } => {
            let stream = TcpStream::connect((host.as_str(), *port))?;
            stream.set_nodelay(true)?;
            Ok(Box::new(stream))
        }
    }
}
