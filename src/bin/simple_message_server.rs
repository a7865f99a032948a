//! simple_message_server: accept connections and run a handler per connection.

use simple_message::config::ServerConfig;
use simple_message::server::Server;
use std::process::ExitCode;
use tracing::{error, info};

fn main() -> ExitCode {
    let config = match ServerConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("simple_message_server: {e}");
            return ExitCode::FAILURE;
        }
    };

    simple_message::init_logging(&config.log_level);

    info!(
        host = %config.host,
        port = config.port,
        handler = %config.handler.display(),
        "Starting simple_message_server"
    );

    let server = match Server::bind(&config) {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "Startup failed");
            return ExitCode::FAILURE;
        }
    };

    // run() only returns on a fatal error
    if let Err(e) = server.run() {
        error!(error = %e, "Server stopped");
    }
    ExitCode::FAILURE
}
