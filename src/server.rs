//! The accept loop: one thread per connection.

use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};

use crate::handler::ConnectionHandler;

/// Initialize the TcpListener. This is the socket that we accept connections from.
pub fn create_listener(socket_addr: SocketAddr) -> Result<TcpListener> {
    // Sets `SO_REUSEADDR` implicitly.
    let listener = TcpListener::bind(socket_addr)
        .with_context(|| format!("failed to create listening socket for {}", socket_addr))?;
    let local_addr = listener.local_addr().unwrap_or(socket_addr);
    tracing::info!("listening on: http://{}/", local_addr);
    Ok(listener)
}

/// Accept connections forever, handing each to its own thread.
pub fn run(listener: TcpListener, handler: Arc<ConnectionHandler>) -> Result<()> {
    for stream in listener.incoming() {
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!("accept failed: {}", e);
                continue;
            }
        };
        let handler = Arc::clone(&handler);
        let spawned = thread::Builder::new()
            .name("connection".to_string())
            .spawn(move || {
                if let Err(e) = handler.serve(stream) {
                    tracing::warn!("connection aborted: {:#}", e);
                }
            });
        if let Err(e) = spawned {
            tracing::warn!("failed to spawn connection thread: {}", e);
        }
    }
    Ok(())
}
