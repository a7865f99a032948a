//! Client exchanges against a scripted server on loopback.

use simple_message::client::{self, Client, ResponseParser};
use simple_message::config::ClientConfig;
use simple_message::protocol::{Request, ResponseWriter};
use simple_message::Error;
use std::fs;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener};
use std::path::Path;
use std::thread::{self, JoinHandle};

/// Accept one connection, read the request until the client half-closes,
/// then send `reply` in pieces of `chunk` bytes. Yields the raw request.
fn serve_once(reply: Vec<u8>, chunk: usize) -> (SocketAddr, JoinHandle<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut request = Vec::new();
        stream.read_to_end(&mut request).unwrap();
        for piece in reply.chunks(chunk.max(1)) {
            stream.write_all(piece).unwrap();
            stream.flush().unwrap();
        }
        request
    });

    (addr, handle)
}

fn client_config(addr: SocketAddr, request: Request, output_dir: &Path) -> ClientConfig {
    ClientConfig {
        server: addr.ip().to_string(),
        port: addr.port().to_string(),
        request,
        output_dir: output_dir.to_path_buf(),
        remove_partial: false,
        log_level: "warn".to_string(),
    }
}

#[test]
fn test_exchange_with_files() {
    let dir = tempfile::tempdir().unwrap();
    let mut reply = ResponseWriter::new(0);
    reply.file("reply.html", b"<p>hi\n</p>\n").unwrap();
    reply.file("img.png", &[0x89, b'P', b'N', b'G', b'\n', 0, 0xff]).unwrap();
    let (addr, server) = serve_once(reply.finish().to_vec(), 4096);

    let request = Request::new("alice", "hello\nthere", Some("cat.png".to_string())).unwrap();
    let result = Client::new(client_config(addr, request.clone(), dir.path()))
        .run()
        .unwrap();

    assert_eq!(result.status, 0);
    assert_eq!(result.files_written, vec!["reply.html", "img.png"]);
    assert_eq!(
        fs::read(dir.path().join("reply.html")).unwrap(),
        b"<p>hi\n</p>\n"
    );
    assert_eq!(
        fs::read(dir.path().join("img.png")).unwrap(),
        [0x89, b'P', b'N', b'G', b'\n', 0, 0xff]
    );

    let sent = server.join().unwrap();
    assert_eq!(sent, b"user=alice\nimg=cat.png\nhello\nthere");
    assert_eq!(Request::decode(&sent).unwrap(), request);
}

#[test]
fn test_large_file_in_small_segments() {
    let dir = tempfile::tempdir().unwrap();
    let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 11) as u8 + b'\n').collect();
    let mut reply = ResponseWriter::new(7);
    reply.file("big.bin", &payload).unwrap();
    let (addr, server) = serve_once(reply.finish().to_vec(), 997);

    let request = Request::new("bob", "send it", None).unwrap();
    let result = Client::new(client_config(addr, request, dir.path()))
        .run()
        .unwrap();

    assert_eq!(result.status, 7);
    assert_eq!(fs::read(dir.path().join("big.bin")).unwrap(), payload);
    server.join().unwrap();
}

#[test]
fn test_truncated_reply() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, server) = serve_once(b"status=0\nfile=a.txt\nlen=10\nhello".to_vec(), 4096);

    let request = Request::new("carol", "hi", None).unwrap();
    let err = Client::new(client_config(addr, request, dir.path()))
        .run()
        .unwrap_err();

    assert!(matches!(err, Error::TruncatedResponse(_)), "{err}");
    assert_eq!(fs::read(dir.path().join("a.txt")).unwrap(), b"hello");
    server.join().unwrap();
}

#[test]
fn test_empty_reply() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, server) = serve_once(Vec::new(), 1);

    let request = Request::new("dave", "hi", None).unwrap();
    let err = Client::new(client_config(addr, request, dir.path()))
        .run()
        .unwrap_err();

    assert!(matches!(err, Error::EmptyResponse), "{err}");
    server.join().unwrap();
}

#[test]
fn test_connection_refused() {
    let dir = tempfile::tempdir().unwrap();
    let addr = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();

    let request = Request::new("erin", "hi", None).unwrap();
    let err = Client::new(client_config(addr, request, dir.path()))
        .run()
        .unwrap_err();

    assert!(matches!(err, Error::Connection { .. }), "{err}");
}

#[test]
fn test_building_blocks() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, server) = serve_once(b"status=2\n".to_vec(), 1);

    let addrs = client::resolve("127.0.0.1", &addr.port().to_string()).unwrap();
    let mut stream = client::connect(&addrs).unwrap();
    let request = Request::new("frank", "ping", None).unwrap();
    client::send_request(&mut stream, &request).unwrap();

    let result = ResponseParser::new(dir.path()).parse(&stream).unwrap();
    assert_eq!(result.status, 2);
    assert!(result.files_written.is_empty());
    assert_eq!(server.join().unwrap(), b"user=frank\nping");
}
