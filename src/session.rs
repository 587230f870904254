//! Per-connection session handling.
//!
//! Each accepted connection runs one reader loop plus one spawned writer task
//! draining the session's outbound channel. The first line is the handshake
//! (a bare node identifier); after registration the server sends the
//! `welcome`/`ip` preamble and enters the message loop. Any exit path removes
//! the session from the directory before returning; file-ownership entries
//! are left untouched.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::BytesMut;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::directory::{Directory, Registration, SessionHandle, next_connection_id};
use crate::protocol::{self, NodeMessage, ServerMessage};
use crate::router;
use crate::{Error, Result};

pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    directory: Arc<Directory>,
    config: Config,
) -> Result<()> {
    stream.set_nodelay(true)?;
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    let (tx, mut rx) = mpsc::unbounded_channel::<BytesMut>();
    let conn_id = next_connection_id();
    let started = Instant::now();

    // Writer task: the only place this connection is written to.
    let write_handle = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if write_half.write_all(&frame).await.is_err() {
                break;
            }
        }
    });

    // Handshake: exactly one bare identifier line.
    let node_id = match lines.next_line().await? {
        Some(line) => line.trim().to_string(),
        None => {
            write_handle.abort();
            return Err(Error::ConnectionClosed);
        }
    };

    if !protocol::valid_node_id(&node_id) {
        write_handle.abort();
        return Err(Error::InvalidNodeId(node_id));
    }

    let handle = SessionHandle::new(node_id.clone(), conn_id, addr, tx.clone());
    match directory.register_node(handle, config.max_nodes).await {
        Registration::New => {}
        Registration::Evicted(old) => {
            warn!(node = %node_id, "identifier already live, evicting previous session");
            if let Ok(frame) = protocol::encode_frame(&ServerMessage::Error {
                message: "session replaced by a new connection".to_string(),
            }) {
                let _ = old.send(frame);
            }
        }
        Registration::Full => {
            let frame = protocol::encode_frame(&ServerMessage::Error {
                message: "server is full".to_string(),
            })?;
            let _ = tx.send(frame);
            drop(tx);
            // Let the writer drain the rejection before the socket closes.
            let _ = write_handle.await;
            return Err(Error::Rejected(format!("server full, node {node_id} turned away")));
        }
    }

    info!(node = %node_id, %addr, "node connected");
    let nodes = directory.snapshot_connected_nodes().await;
    debug!(?nodes, "connected nodes");

    let _ = tx.send(protocol::encode_frame(&ServerMessage::Welcome)?);
    let _ = tx.send(protocol::encode_frame(&ServerMessage::Ip {
        ip: addr.ip().to_string(),
    })?);

    let result = message_loop(&mut lines, &directory, &node_id).await;

    // Synchronous deregistration; holder entries survive on purpose.
    if directory.unregister_node(&node_id, conn_id).await {
        info!(node = %node_id, elapsed = ?started.elapsed(), "node disconnected");
    }
    write_handle.abort();

    result
}

/// Read framed messages until the peer closes or a frame fails to decode.
/// A decode failure terminates only this session.
async fn message_loop(
    lines: &mut Lines<BufReader<OwnedReadHalf>>,
    directory: &Directory,
    node_id: &str,
) -> Result<()> {
    while let Some(line) = lines.next_line().await? {
        let message: NodeMessage = protocol::decode_line(&line)?;
        if let Err(e) = router::dispatch(directory, node_id, message).await {
            warn!(node = node_id, error = %e, "handler error");
        }
    }
    Ok(())
}
