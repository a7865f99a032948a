//! Hands each accepted connection to its own handler process.
//!
//! The handler reads the request from stdin and writes the reply to
//! stdout; both are the connection. The listener keeps no copy of the
//! connection once the handler is running and never waits for it.

use super::reaper;
use crate::error::{Error, Result};
use std::net::{SocketAddr, TcpStream};
use std::os::fd::OwnedFd;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::trace;

/// Spawns the configured handler program per connection.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    program: PathBuf,
    args: Vec<String>,
}

impl Dispatcher {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Start a handler bound to `stream` and return its process id.
    ///
    /// The connection is closed on return either way; on failure the peer
    /// sees an empty response.
    pub fn dispatch(&self, stream: TcpStream, peer: SocketAddr) -> Result<u32> {
        let fail = |source| Error::Dispatch { peer, source };

        let input = stream.try_clone().map_err(fail)?;

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::from(OwnedFd::from(input)))
            .stdout(Stdio::from(OwnedFd::from(stream)))
            .stderr(Stdio::inherit());

        let child = {
            let _deferred = reaper::defer().map_err(fail)?;
            command.spawn().map_err(fail)?
        };
        let pid = child.id();
        trace!(peer = %peer, pid, "Handler spawned");

        // Dropping the command closes the listener's copies of the
        // connection. The child is left to the reaper.
        drop(command);
        drop(child);

        Ok(pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;

    fn connected_pair() -> (TcpStream, TcpStream, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, peer) = listener.accept().unwrap();
        (client, server, peer)
    }

    #[test]
    fn test_spawn_failure_closes_connection() {
        let (mut client, server, peer) = connected_pair();
        let dispatcher = Dispatcher::new("/nonexistent/simple_message_handler", Vec::new());

        match dispatcher.dispatch(server, peer) {
            Err(Error::Dispatch { peer: p, .. }) => assert_eq!(p, peer),
            other => panic!("unexpected: {:?}", other),
        }

        let mut buf = Vec::new();
        assert_eq!(client.read_to_end(&mut buf).unwrap(), 0);
    }
}
