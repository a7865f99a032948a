//! simple_message_client: send one message and store the reply's files.
//!
//! Exits with the status the server reported, or 1 if the exchange failed.

use simple_message::client::Client;
use simple_message::config::ClientConfig;
use std::process::ExitCode;
use tracing::{debug, error};

fn main() -> ExitCode {
    let config = match ClientConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("simple_message_client: {e}");
            return ExitCode::FAILURE;
        }
    };

    simple_message::init_logging(&config.log_level);

    debug!(
        server = %config.server,
        port = %config.port,
        user = config.request.user(),
        image = ?config.request.image_reference(),
        "Starting client"
    );

    match Client::new(config).run() {
        Ok(result) => {
            debug!(status = result.status, "Terminating normally");
            ExitCode::from(result.status as u8)
        }
        Err(e) => {
            error!(error = %e, "Exchange failed");
            ExitCode::FAILURE
        }
    }
}
