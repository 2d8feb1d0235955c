use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tracing::{debug, error, info, instrument, warn};

use crate::codec::FrameCodec;
use crate::commands::executable::Executable;
use crate::commands::Command;
use crate::config::Config;
use crate::connection::Connection;
use crate::frame::Frame;
use crate::store::Store;
use crate::Error;

pub async fn run(config: Config) -> Result<(), Error> {
    let _ = tracing_subscriber::fmt()
        .try_init()
        .map_err(|e| debug!("Failed to initialize global tracing: {}", e));

    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;

    serve(listener, Store::new(), config.max_frame_size).await
}

/// Accepts connections forever, each one handled on its own task against the shared store.
pub async fn serve(listener: TcpListener, store: Store, max_frame_size: usize) -> Result<(), Error> {
    info!("Redis server listening on {}", listener.local_addr()?);

    loop {
        let (socket, client_address) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("Failed to accept connection: {}", e);
                continue;
            }
        };
        let store = store.clone();
        info!("Accepted connection from {:?}", client_address);

        tokio::spawn(async move {
            let conn = Connection::with_codec(socket, FrameCodec::new(max_frame_size));
            if let Err(e) = handle_connection(conn, client_address, store).await {
                error!("Connection terminated: {}", e);
            }
        });
    }
}

/// Serves one client until it disconnects or sends something that cannot be framed.
///
/// Command errors are answered and the loop continues. A framing error is answered with a
/// protocol error and ends the connection. The stream is closed when `conn` is dropped, on every
/// return path.
#[instrument(
    name = "connection",
    skip(conn, store),
    fields(connection_id, client_address)
)]
pub async fn handle_connection<S>(
    mut conn: Connection<S>,
    client_address: SocketAddr,
    store: Store,
) -> Result<(), Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    tracing::Span::current()
        .record("connection_id", conn.id.to_string())
        .record("client_address", client_address.to_string());

    let res = serve_frames(&mut conn, &store).await;
    info!("Connection closed");
    res
}

async fn serve_frames<S>(conn: &mut Connection<S>, store: &Store) -> Result<(), Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let frame = match conn.read_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) if e.is_protocol() => {
                warn!("Protocol error: {}", e);
                // The connection is dropped either way, so a failed write changes nothing.
                let _ = conn
                    .write_frame(Frame::Error(format!("ERR Protocol error: {}", e)))
                    .await;
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        };

        debug!("Received frame from client: {}", frame);
        let res = process_frame(frame, store);
        debug!("Sending response to client: {}", res);

        conn.write_frame(res).await?;
    }

    Ok(())
}

/// Interprets one request frame, runs it against the store and returns the reply frame.
/// Every failure past framing becomes an error reply.
pub fn process_frame(frame: Frame, store: &Store) -> Frame {
    let cmd = match Command::try_from(frame) {
        Ok(cmd) => cmd,
        Err(e) => {
            debug!("Rejected command: {}", e);
            return Frame::Error(e.to_string());
        }
    };

    match cmd.exec(store.clone()) {
        Ok(res) => res,
        Err(e) => {
            debug!("Command failed: {}", e);
            Frame::Error(e.to_string())
        }
    }
}
