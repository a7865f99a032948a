//! Error types shared by the client and the server.
//!
//! Client-side variants abort the current exchange. On the server only
//! `Dispatch` is recovered locally; everything else stops the accept loop.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced by the message client and server.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Host or port could not be resolved into socket addresses.
    #[error("could not resolve {target}: {source}")]
    Resolution {
        target: String,
        #[source]
        source: io::Error,
    },

    /// Every resolved address refused or failed the connect attempt.
    #[error("could not connect to {target}")]
    Connection { target: String },

    /// A read, write, flush or shutdown failed mid-exchange.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// A response line had the wrong key or an unparsable value.
    #[error("malformed response line (expected {expected}): {line:?}")]
    MalformedLine {
        expected: &'static str,
        line: String,
    },

    /// A `file=` value reached the file name bound.
    #[error("file name too long ({len} bytes, limit {limit})")]
    NameTooLong { len: usize, limit: usize },

    /// The stream ended before the response was complete.
    #[error("response interrupted: {0}")]
    TruncatedResponse(String),

    /// More bytes arrived for a file than its `len=` header declared.
    #[error("file {name} bigger than expected ({received} of {declared} bytes)")]
    OversizedPayload {
        name: String,
        declared: u64,
        received: u64,
    },

    /// The server closed the connection without sending a status line.
    #[error("got an empty response")]
    EmptyResponse,

    /// A destination file could not be created or written.
    #[error("cannot write {}: {source}", path.display())]
    Destination {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Request fields violate the wire format.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// No candidate listen address could be bound.
    #[error("could not bind {target}: {source}")]
    Bind {
        target: String,
        #[source]
        source: io::Error,
    },

    /// `accept` failed with a non-retryable error.
    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),

    /// The handler process for one connection could not be started.
    #[error("could not start handler for {peer}: {source}")]
    Dispatch {
        peer: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// Installing the child exit handler failed.
    #[error("could not install SIGCHLD handler: {0}")]
    Signal(#[source] io::Error),
}
