//! Listener lifecycle: bind, accept, spawn a session per connection.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::Result;
use crate::config::Config;
use crate::directory::Directory;
use crate::session::handle_connection;

/// The directory service. Bind with [`Server::bind`], then drive it with
/// [`Server::run`]; the paired [`ServerHandle`] stops the listener.
pub struct Server {
    listener: TcpListener,
    directory: Arc<Directory>,
    config: Config,
    shutdown: oneshot::Receiver<()>,
}

/// Stops the listener. Already-accepted sessions are left to drain naturally;
/// only new connections are refused. Dropping the handle without calling
/// [`ServerHandle::shutdown`] also stops the listener, so keep it alive for
/// the lifetime of the service.
pub struct ServerHandle {
    tx: oneshot::Sender<()>,
}

impl ServerHandle {
    pub fn shutdown(self) {
        let _ = self.tx.send(());
    }
}

impl Server {
    /// Bind the listening socket. A bind failure is fatal: the service does
    /// not start.
    pub async fn bind(config: Config) -> Result<(Self, ServerHandle)> {
        let listener = TcpListener::bind(config.bind_addr()).await?;
        let (tx, rx) = oneshot::channel();
        Ok((
            Self {
                listener,
                directory: Arc::new(Directory::new()),
                config,
                shutdown: rx,
            },
            ServerHandle { tx },
        ))
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn directory(&self) -> Arc<Directory> {
        self.directory.clone()
    }

    /// Accept connections until the paired handle fires. Each connection gets
    /// its own task; one connection's failure never reaches the others or the
    /// accept loop.
    pub async fn run(mut self) -> Result<()> {
        info!(addr = %self.listener.local_addr()?, "listening");

        loop {
            tokio::select! {
                _ = &mut self.shutdown => {
                    info!("listener stopped, draining remaining sessions");
                    return Ok(());
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            let directory = self.directory.clone();
                            let config = self.config.clone();
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, addr, directory, config).await {
                                    warn!(%addr, error = %e, "session ended with error");
                                }
                            });
                        }
                        Err(e) => warn!(error = %e, "accept failed"),
                    }
                }
            }
        }
    }
}
