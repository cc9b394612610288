use std::future::Future;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{self, JoinSet};
use tracing::{debug, error, info, instrument, warn};

use crate::config::Config;
use crate::connection::Connection;
use crate::frame::{self, Frame};
use crate::session::{Clients, Session};
use crate::store::Store;
use crate::Error;

pub async fn run(config: Config) -> Result<(), Error> {
    let _ = tracing_subscriber::fmt()
        .try_init()
        .map_err(|e| debug!("Failed to initialize global tracing: {}", e));

    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    let store = Store::open(&config.store)?;

    serve(listener, store, shutdown_signal()).await
}

/// Accepts connections on `listener` until `shutdown` completes. Open connections are then
/// dropped and the store is closed.
pub async fn serve(
    listener: TcpListener,
    store: Store,
    shutdown: impl Future<Output = ()>,
) -> Result<(), Error> {
    info!("Redis server listening on {}", listener.local_addr()?);

    let clients = Clients::new();
    let mut connections = JoinSet::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (socket, client_address) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!(%e, "Failed to accept connection");
                        continue;
                    }
                };
                info!("Accepted connection from {:?}", client_address);

                let store = store.clone();
                let clients = clients.clone();
                connections.spawn(async move {
                    if let Err(e) = handle_connection(socket, client_address, store, clients).await {
                        error!(%e, "Connection failed");
                    }
                });
            }
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            _ = &mut shutdown => {
                info!("Shutting down");
                break;
            }
        }
    }

    connections.shutdown().await;
    task::spawn_blocking(move || store.close()).await?;

    Ok(())
}

#[instrument(
    name = "connection",
    skip(stream, store, clients),
    fields(connection_id, client_address)
)]
async fn handle_connection(
    stream: TcpStream,
    client_address: SocketAddr,
    store: Store,
    clients: Clients,
) -> Result<(), Error> {
    let mut conn = Connection::new(stream);
    let mut session = Session::new(client_address, clients);

    tracing::Span::current()
        .record("connection_id", conn.id.to_string())
        .record("client_address", client_address.to_string());

    let res = loop {
        let frame = match conn.read_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => break Ok(()),
            Err(frame::Error::Io(e)) => break Err(e.into()),
            Err(e) => {
                warn!(%e, "Closing connection after a protocol error");
                // The peer may already be gone.
                let _ = conn.write_frame(Frame::Error(e.to_string())).await;
                break Err(e.into());
            }
        };

        debug!("Received frame from client: {:?}", frame);
        let (returned, res) = run_blocking(session, &store, move |session, store| {
            session.dispatch(store, frame)
        })
        .await?;
        session = returned;
        debug!("Sending response to client: {:?}", res);

        // The next request is only read once this reply is flushed.
        if let Err(e) = conn.write_frame(res).await {
            break Err(e.into());
        }
    };

    run_blocking(session, &store, |session, store| session.close(store)).await?;

    info!("Connection closed");
    res
}

/// Runs `f` on the blocking thread pool so that waiting on the store lock, or on LMDB flushing to
/// disk, never stalls the other connections scheduled on this worker. The session is moved to
/// the pool and handed back with the result.
async fn run_blocking<T, F>(
    mut session: Session,
    store: &Store,
    f: F,
) -> Result<(Session, T), Error>
where
    F: FnOnce(&mut Session, &Store) -> T + Send + 'static,
    T: Send + 'static,
{
    let store = store.clone();
    let out = task::spawn_blocking(move || {
        let out = f(&mut session, &store);
        (session, out)
    })
    .await?;

    Ok(out)
}

/// Completes on Ctrl-C, or on SIGTERM where there is such a thing.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(%e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(%e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
