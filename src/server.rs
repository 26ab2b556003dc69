use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use crate::commands::Context;
use crate::connection::Connection;
use crate::frame::{OpReply, Request};
use crate::handler::{self, Action};
use crate::store::Store;
use crate::{Error, Result};

/// The server owns the listener and the store, and coordinates shutdown: the
/// `shutdown` admin command or a fatal accept error cancels the token, every
/// connection task observes it at the top of its read loop, and the
/// supervisor drains them before `wait` returns.
pub struct Server {
    store: Store,
    local_addr: Option<SocketAddr>,
    shutdown: CancellationToken,
    listener: Option<TcpListener>,
    supervisor: Option<JoinHandle<Result<()>>>,
}

impl Server {
    /// Builds a server over an already-bound listener; useful with ephemeral
    /// ports in tests.
    pub fn new(listener: TcpListener) -> Server {
        Server {
            store: Store::new(),
            local_addr: listener.local_addr().ok(),
            shutdown: CancellationToken::new(),
            listener: Some(listener),
            supervisor: None,
        }
    }

    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Server> {
        Ok(Server::new(TcpListener::bind(addr).await?))
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Launches the supervisor and accept loop. Calling it twice is a no-op.
    pub fn start(&mut self) {
        let Some(listener) = self.listener.take() else {
            return;
        };
        info!("server listening on {:?}", self.local_addr);
        self.supervisor = Some(tokio::spawn(run(
            listener,
            self.store.clone(),
            self.shutdown.clone(),
        )));
    }

    /// Blocks until the server has shut down, returning the fatal cause if
    /// the accept loop failed.
    pub async fn wait(&mut self) -> Result<()> {
        let Some(supervisor) = self.supervisor.take() else {
            return Ok(());
        };
        supervisor.await.map_err(|e| -> Error { Box::new(e) })?
    }

    /// Requests shutdown and waits for every task to finish.
    pub async fn stop(&mut self) -> Result<()> {
        self.shutdown.cancel();
        self.wait().await
    }
}

async fn run(listener: TcpListener, store: Store, shutdown: CancellationToken) -> Result<()> {
    let mut connections = JoinSet::new();
    let mut fatal: Option<Error> = None;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((socket, client_addr)) => {
                    info!("accepted connection from {:?}", client_addr);
                    let store = store.clone();
                    let shutdown = shutdown.clone();
                    connections.spawn(async move {
                        if let Err(e) = handle_connection(socket, client_addr, store, shutdown).await {
                            error!("connection error: {e}");
                        }
                    });
                }
                Err(e) => {
                    // A failing accept loop takes the whole server down.
                    shutdown.cancel();
                    fatal = Some(e.into());
                    break;
                }
            }
        }
    }

    // Closing the listener first means no connection can arrive while the
    // existing ones drain.
    drop(listener);
    while connections.join_next().await.is_some() {}

    match fatal {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

#[instrument(name = "connection", skip_all, fields(client_addr = %client_addr))]
async fn handle_connection(
    stream: TcpStream,
    client_addr: SocketAddr,
    store: Store,
    shutdown: CancellationToken,
) -> Result<()> {
    let mut conn = Connection::new(stream, client_addr);

    loop {
        let raw = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            read = conn.read_message() => match read? {
                Some(raw) => raw,
                None => return Ok(()),
            },
        };

        let request_id = raw.header.request_id;
        let request = match Request::try_from(raw) {
            Ok(request) => request,
            Err(err) => {
                // An undecodable body or unsupported opcode leaves the
                // stream's framing untrustworthy: answer and close.
                let reply = OpReply::new(request_id, vec![handler::error_reply(&err)]);
                let _ = conn.write_reply(&reply).await;
                return Err(err.into());
            }
        };

        let ctx = Context {
            store: &store,
            client_addr: conn.client_addr,
            shutdown: &shutdown,
        };

        match request {
            Request::Query(query) => match handler::handle_query(&ctx, &query) {
                Ok(Action::Reply(docs)) => {
                    conn.write_reply(&OpReply::new(query.request_id, docs)).await?;
                }
                Ok(Action::Shutdown) => return Ok(()),
                Err(err) => {
                    error!("{err}");
                    let reply = OpReply::new(query.request_id, vec![handler::error_reply(&err)]);
                    conn.write_reply(&reply).await?;
                }
            },
            // Inserts and updates are fire-and-forget on the wire: no reply
            // on success, an error reply on failure, and the loop continues.
            Request::Insert(insert) => {
                if let Err(err) = handler::handle_insert(&ctx, &insert) {
                    error!("{err}");
                    let reply = OpReply::new(insert.request_id, vec![handler::error_reply(&err)]);
                    conn.write_reply(&reply).await?;
                }
            }
            Request::Update(update) => {
                if let Err(err) = handler::handle_update(&ctx, &update) {
                    error!("{err}");
                    let reply = OpReply::new(update.request_id, vec![handler::error_reply(&err)]);
                    conn.write_reply(&reply).await?;
                }
            }
        }
    }
}
