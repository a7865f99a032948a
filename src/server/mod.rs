//! Forking TCP server for message connections.
//!
//! A single accept loop hands every connection to a fresh handler process
//! and goes straight back to `accept`. Exited handlers are reaped from a
//! `SIGCHLD` handler, so the loop never waits on them.

mod dispatch;
pub mod reaper;

pub use dispatch::Dispatcher;

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use tracing::{debug, info, warn};

/// Server instance
pub struct Server {
    listener: TcpListener,
    dispatcher: Dispatcher,
}

impl Server {
    /// Bind the listening socket described by `config`.
    pub fn bind(config: &ServerConfig) -> Result<Self> {
        let listener = bind_listener(&config.host, config.port)?;
        let dispatcher = Dispatcher::new(config.handler.clone(), config.handler_args.clone());

        Ok(Server {
            listener,
            dispatcher,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until a fatal error.
    pub fn run(&self) -> Result<()> {
        reaper::install().map_err(Error::Signal)?;

        info!(
            address = %self.local_addr()?,
            handler = %self.dispatcher.program().display(),
            "Server listening"
        );

        loop {
            let (stream, peer) = match self.listener.accept() {
                Ok(conn) => conn,
                Err(e) if is_retryable(&e) => {
                    debug!(error = %e, "Retrying accept");
                    continue;
                }
                Err(e) => return Err(Error::Accept(e)),
            };
            debug!(peer = %peer, "Accepted connection");

            match self.dispatcher.dispatch(stream, peer) {
                Ok(pid) => debug!(
                    peer = %peer,
                    pid,
                    reaped = reaper::reaped_count(),
                    "Handler started"
                ),
                Err(e) => warn!(error = %e, "Dropping connection"),
            }
        }
    }
}

/// Accept errors that leave the listening socket usable.
fn is_retryable(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::ConnectionAborted
    )
}

/// Bind the first candidate address for `host`/`port` that accepts.
fn bind_listener(host: &str, port: u16) -> Result<TcpListener> {
    let target = format!("{host}:{port}");
    let addrs = (host, port)
        .to_socket_addrs()
        .map_err(|source| Error::Bind {
            target: target.clone(),
            source,
        })?;

    let mut last_error = None;
    for addr in addrs {
        match listen_on(addr) {
            Ok(listener) => {
                debug!(address = %addr, "Bound");
                return Ok(listener);
            }
            Err(e) => {
                warn!(address = %addr, error = %e, "Bind failed");
                last_error = Some(e);
            }
        }
    }

    Err(Error::Bind {
        target,
        source: last_error.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::AddrNotAvailable, "no address to bind")
        }),
    })
}

/// Create a reusable listening socket with the platform's maximum backlog.
fn listen_on(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;

    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(libc::SOMAXCONN)?;

    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpStream;

    fn config(host: &str, port: u16) -> ServerConfig {
        ServerConfig {
            host: host.to_string(),
            port,
            handler: "/bin/true".into(),
            handler_args: Vec::new(),
            log_level: "info".to_string(),
        }
    }

    #[test]
    fn test_bind_ephemeral() {
        let server = Server::bind(&config("127.0.0.1", 0)).unwrap();
        let addr = server.local_addr().unwrap();
        assert!(addr.ip().is_loopback());
        assert_ne!(addr.port(), 0);
        TcpStream::connect(addr).unwrap();
    }

    #[test]
    fn test_rebind_after_close() {
        let addr = {
            let server = Server::bind(&config("127.0.0.1", 0)).unwrap();
            let addr = server.local_addr().unwrap();
            let _client = TcpStream::connect(addr).unwrap();
            addr
        };
        Server::bind(&config("127.0.0.1", addr.port())).unwrap();
    }

    #[test]
    fn test_bind_port_in_use() {
        let first = Server::bind(&config("127.0.0.1", 0)).unwrap();
        let port = first.local_addr().unwrap().port();
        match Server::bind(&config("127.0.0.1", port)) {
            Err(Error::Bind { target, .. }) => assert_eq!(target, format!("127.0.0.1:{port}")),
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("second bind succeeded"),
        }
    }

    #[test]
    fn test_bind_unresolvable_host() {
        assert!(matches!(
            Server::bind(&config("host.invalid", 7000)),
            Err(Error::Bind { .. })
        ));
    }

    #[test]
    fn test_is_retryable() {
        assert!(is_retryable(&io::Error::from(io::ErrorKind::WouldBlock)));
        assert!(is_retryable(&io::Error::from(io::ErrorKind::Interrupted)));
        assert!(is_retryable(&io::Error::from(io::ErrorKind::ConnectionAborted)));
        assert!(!is_retryable(&io::Error::from(io::ErrorKind::PermissionDenied)));
    }
}
