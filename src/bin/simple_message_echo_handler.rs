//! simple_message_echo_handler: a minimal handler for simple_message_server.
//!
//! Reads the request from stdin and answers on stdout with status 0 and a
//! single file, `message.txt`, echoing what was sent. An undecodable
//! request gets status 1 and no files.

use simple_message::protocol::{Request, ResponseWriter};
use std::io::{self, Read, Write};
use std::process::ExitCode;
use tracing::{debug, warn};

const REPLY_FILE: &str = "message.txt";

fn main() -> ExitCode {
    simple_message::init_logging("warn");

    match handle() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            warn!(error = %e, "Handler failed");
            ExitCode::FAILURE
        }
    }
}

fn handle() -> io::Result<()> {
    let mut input = Vec::new();
    io::stdin().lock().read_to_end(&mut input)?;

    let response = match Request::decode(&input) {
        Ok(request) => {
            debug!(user = request.user(), "Request decoded");
            let mut body = format!("{}: {}\n", request.user(), request.message());
            if let Some(img) = request.image_reference() {
                body.push_str(&format!("img={img}\n"));
            }

            let mut response = ResponseWriter::new(0);
            response
                .file(REPLY_FILE, body.as_bytes())
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
            response
        }
        Err(e) => {
            warn!(error = %e, "Undecodable request");
            ResponseWriter::new(1)
        }
    };

    let mut stdout = io::stdout().lock();
    stdout.write_all(&response.finish())?;
    stdout.flush()
}
