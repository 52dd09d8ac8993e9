use std::sync::Arc;

use anyhow::{Context, Result};

use onehttpd::access::Htaccess;
use onehttpd::config::Config;
use onehttpd::files::StaticFiles;
use onehttpd::handler::ConnectionHandler;
use onehttpd::log::{AccessLog, LogSink};
use onehttpd::resource::DocumentRoot;
use onehttpd::response::ServerId;
use onehttpd::server;

fn main() -> Result<()> {
    println!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    // Diagnostics go to stderr; stdout may be carrying the access log.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .init();

    let config = Config::from_command_line()?;

    let log_sink = match config.log_file() {
        Some(path) => LogSink::file(&path)?,
        None => LogSink::Stdout,
    };
    let server_id = if config.no_server_id {
        ServerId::hidden()
    } else {
        ServerId::new()
    };

    let resolver = DocumentRoot::new(&config.wwwroot)
        .index_name(config.index_name.clone())
        .access_file_name(config.access_file_name.clone());
    let responder = StaticFiles::new(server_id.clone(), config.mime_map.clone())
        .no_listing(config.no_listing)
        .access_file_name(config.access_file_name.clone());
    let handler = ConnectionHandler::new(
        resolver,
        Htaccess,
        responder,
        AccessLog::new(log_sink),
        server_id,
    );

    let socket_addr = config.socket_addr().context("malformed --addr argument")?;
    let listener = server::create_listener(socket_addr)?;
    tracing::info!(root = %config.wwwroot.display(), "serving");
    server::run(listener, Arc::new(handler))
}
