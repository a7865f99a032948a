//! Message client.
//!
//! One exchange per invocation: resolve the server, connect to the first
//! address that accepts, send the request, half-close, then parse the
//! reply until the server closes its side.

mod response;

pub use response::{FileBlock, ResponseParser, ResponseResult};

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::protocol::Request;
use std::ffi::{CStr, CString};
use std::io::{self, Write};
use std::mem;
use std::net::{Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, SocketAddrV4, SocketAddrV6, TcpStream};
use std::ptr;
use tracing::{debug, info};

/// Resolve `host` and `port` into every address the resolver reports,
/// in resolver order.
///
/// `port` is either a decimal port or a service name such as `http`,
/// looked up the same way as the host.
pub fn resolve(host: &str, port: &str) -> Result<Vec<SocketAddr>> {
    let target = format!("{host}:{port}");
    let resolution = |source| Error::Resolution {
        target: target.clone(),
        source,
    };
    let c_host = CString::new(host)
        .map_err(|_| resolution(io::Error::new(io::ErrorKind::InvalidInput, "NUL in host")))?;
    let c_port = CString::new(port)
        .map_err(|_| resolution(io::Error::new(io::ErrorKind::InvalidInput, "NUL in port")))?;

    // SAFETY: an all-zero addrinfo is a valid "no hints" value.
    let mut hints: libc::addrinfo = unsafe { mem::zeroed() };
    hints.ai_family = libc::AF_UNSPEC;
    hints.ai_socktype = libc::SOCK_STREAM;

    let mut list: *mut libc::addrinfo = ptr::null_mut();
    // SAFETY: both strings are NUL terminated and outlive the call.
    let rc = unsafe { libc::getaddrinfo(c_host.as_ptr(), c_port.as_ptr(), &hints, &mut list) };
    if rc != 0 {
        return Err(resolution(gai_error(rc)));
    }

    let mut addrs = Vec::new();
    let mut cursor = list;
    while !cursor.is_null() {
        // SAFETY: cursor walks the list getaddrinfo returned, which is
        // freed only after the loop.
        let info = unsafe { &*cursor };
        if let Some(addr) = unsafe { socket_addr(info) } {
            addrs.push(addr);
        }
        cursor = info.ai_next;
    }
    // SAFETY: list came from a successful getaddrinfo and is freed once.
    unsafe { libc::freeaddrinfo(list) };

    debug!(target = %target, count = addrs.len(), "Resolved");
    Ok(addrs)
}

/// Resolver diagnostic for a nonzero `getaddrinfo` return.
fn gai_error(rc: libc::c_int) -> io::Error {
    if rc == libc::EAI_SYSTEM {
        return io::Error::last_os_error();
    }
    // SAFETY: gai_strerror returns a static NUL-terminated string.
    let message = unsafe { CStr::from_ptr(libc::gai_strerror(rc)) };
    io::Error::new(io::ErrorKind::NotFound, message.to_string_lossy().into_owned())
}

/// Convert an IPv4 or IPv6 `addrinfo` entry; other families are skipped.
///
/// # Safety
///
/// `info` must come from `getaddrinfo`, so `ai_addr` matches `ai_family`.
unsafe fn socket_addr(info: &libc::addrinfo) -> Option<SocketAddr> {
    if info.ai_addr.is_null() {
        return None;
    }
    match info.ai_family {
        libc::AF_INET => {
            let sin = &*(info.ai_addr as *const libc::sockaddr_in);
            Some(SocketAddr::V4(SocketAddrV4::new(
                Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr)),
                u16::from_be(sin.sin_port),
            )))
        }
        libc::AF_INET6 => {
            let sin6 = &*(info.ai_addr as *const libc::sockaddr_in6);
            Some(SocketAddr::V6(SocketAddrV6::new(
                Ipv6Addr::from(sin6.sin6_addr.s6_addr),
                u16::from_be(sin6.sin6_port),
                sin6.sin6_flowinfo,
                sin6.sin6_scope_id,
            )))
        }
        _ => None,
    }
}

/// Connect to the first address in `addrs` that accepts.
///
/// Addresses are tried one after another in the given order.
pub fn connect(addrs: &[SocketAddr]) -> Result<TcpStream> {
    for addr in addrs {
        match TcpStream::connect(addr) {
            Ok(stream) => {
                debug!(peer = %addr, "Connected");
                return Ok(stream);
            }
            Err(e) => {
                debug!(peer = %addr, error = %e, "Connect failed, trying next address");
            }
        }
    }

    let target = addrs
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    Err(Error::Connection { target })
}

/// Write the request, flush, and shut down the write direction.
///
/// The read direction stays open for the reply.
pub fn send_request(stream: &mut TcpStream, request: &Request) -> Result<()> {
    let wire = request.encode();
    debug!(bytes = wire.len(), user = request.user(), "Sending request");

    stream.write_all(&wire)?;
    stream.flush()?;
    stream.shutdown(Shutdown::Write)?;
    Ok(())
}

/// Client instance
pub struct Client {
    config: ClientConfig,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        Client { config }
    }

    /// Run one request/response exchange.
    pub fn run(&self) -> Result<ResponseResult> {
        let addrs = resolve(&self.config.server, &self.config.port)?;
        let mut stream = connect(&addrs)?;

        send_request(&mut stream, &self.config.request)?;

        let parser = ResponseParser::new(&self.config.output_dir)
            .remove_partial(self.config.remove_partial);
        let result = parser.parse(&stream)?;

        info!(
            status = result.status,
            files = result.files_written.len(),
            "Response received"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_resolve_numeric() {
        let addrs = resolve("127.0.0.1", "7000").unwrap();
        assert_eq!(addrs, vec!["127.0.0.1:7000".parse::<SocketAddr>().unwrap()]);
    }

    #[test]
    fn test_resolve_service_name() {
        let addrs = resolve("127.0.0.1", "http").unwrap();
        assert_eq!(addrs, vec!["127.0.0.1:80".parse::<SocketAddr>().unwrap()]);
    }

    #[test]
    fn test_resolve_ipv6_literal() {
        let addrs = resolve("::1", "7000").unwrap();
        assert_eq!(addrs, vec!["[::1]:7000".parse::<SocketAddr>().unwrap()]);
    }

    #[test]
    fn test_resolve_unknown_service() {
        match resolve("127.0.0.1", "no-such-service") {
            Err(Error::Resolution { target, source }) => {
                assert_eq!(target, "127.0.0.1:no-such-service");
                assert!(!source.to_string().is_empty());
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_resolve_nul_in_port() {
        assert!(matches!(
            resolve("127.0.0.1", "70\000"),
            Err(Error::Resolution { .. })
        ));
    }

    #[test]
    fn test_resolve_unknown_host() {
        let err = resolve("host.invalid", "7000").unwrap_err();
        assert!(matches!(err, Error::Resolution { .. }));
        assert!(err.to_string().starts_with("could not resolve host.invalid:7000: "));
    }

    #[test]
    fn test_connect_skips_dead_addresses() {
        let dead = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
        let live = TcpListener::bind("127.0.0.1:0").unwrap();
        let live_addr = live.local_addr().unwrap();

        let stream = connect(&[dead, live_addr]).unwrap();
        assert_eq!(stream.peer_addr().unwrap(), live_addr);
    }

    #[test]
    fn test_connect_prefers_first_working_address() {
        let first = TcpListener::bind("127.0.0.1:0").unwrap();
        let second = TcpListener::bind("127.0.0.1:0").unwrap();
        let first_addr = first.local_addr().unwrap();

        let stream = connect(&[first_addr, second.local_addr().unwrap()]).unwrap();
        assert_eq!(stream.peer_addr().unwrap(), first_addr);
    }

    #[test]
    fn test_connect_exhausted() {
        let dead = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
        assert!(matches!(connect(&[dead]), Err(Error::Connection { .. })));
        assert!(matches!(connect(&[]), Err(Error::Connection { .. })));
    }
}
