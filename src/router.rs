//! Protocol dispatch: one directory mutation and zero or more outbound
//! writes per inbound message.
//!
//! The directory records only claims of possession; file bytes pass through
//! here transiently while a broadcast or relay frame is built, and are never
//! stored. A failed write to one target is logged and skipped without
//! aborting delivery to the rest.

use tracing::{debug, info, warn};

use crate::Result;
use crate::directory::Directory;
use crate::protocol::{NodeMessage, ServerMessage};

/// Handle one decoded message from node `from`.
pub async fn dispatch(directory: &Directory, from: &str, message: NodeMessage) -> Result<()> {
    match message {
        NodeMessage::Have { file } => {
            directory.record_holder(&file, from).await;
            info!(node = from, file, "announced file");
            Ok(())
        }

        NodeMessage::Share { file, content } => handle_share(directory, from, file, content).await,

        NodeMessage::ShareOne { file, content, to } => {
            directory.record_holder(&file, from).await;
            let frame = crate::protocol::encode_frame(&ServerMessage::File {
                file: file.clone(),
                content,
            })?;

            let delivered = match directory.live_session_of(&to).await {
                Some(target) => target.send(frame),
                None => false,
            };
            if delivered {
                info!(node = from, file, to, "file sent to target");
                Ok(())
            } else {
                info!(node = from, file, to, "share target not connected");
                reply_error(directory, from, format!("node {to} is not connected")).await
            }
        }

        NodeMessage::Get { file, from: requester } => {
            handle_get(directory, &file, &requester).await
        }

        NodeMessage::FileTo { file, content, to } => {
            let frame = crate::protocol::encode_frame(&ServerMessage::File {
                file: file.clone(),
                content,
            })?;

            let delivered = match directory.live_session_of(&to).await {
                Some(target) => target.send(frame),
                None => false,
            };
            if delivered {
                // The receiving node now holds a copy.
                directory.record_holder(&file, &to).await;
                info!(node = from, file, to, "file relayed");
                Ok(())
            } else {
                info!(node = from, file, to, "relay target not connected");
                reply_error(directory, from, format!("node {to} is not connected")).await
            }
        }
    }
}

/// Broadcast `file` to every other connected node.
async fn handle_share(
    directory: &Directory,
    from: &str,
    file: String,
    content: Vec<u8>,
) -> Result<()> {
    directory.record_holder(&file, from).await;

    let frame = crate::protocol::encode_frame(&ServerMessage::File {
        file: file.clone(),
        content,
    })?;

    let targets = directory.snapshot_sessions().await;
    let mut delivered = 0usize;
    for target in targets.iter().filter(|t| t.node_id != from) {
        if target.send(frame.clone()) {
            delivered += 1;
        } else {
            warn!(file, to = %target.node_id, "broadcast target unreachable, skipping");
        }
    }

    info!(node = from, file, delivered, "file broadcast");
    Ok(())
}

/// Pick the first live holder of `file` (skipping the requester) and ask it
/// to push the content to the requester.
async fn handle_get(directory: &Directory, file: &str, requester: &str) -> Result<()> {
    let holders = directory.holders_of(file).await;

    for holder in holders.iter().filter(|h| *h != requester) {
        let Some(session) = directory.live_session_of(holder).await else {
            debug!(file, holder, "holder not connected, trying next");
            continue;
        };

        let frame = crate::protocol::encode_frame(&ServerMessage::SendFile {
            file: file.to_string(),
            to: requester.to_string(),
        })?;

        if session.send(frame) {
            info!(file, holder, requester, "transfer arranged");
            return Ok(());
        }
        warn!(file, holder, "write to holder failed, trying next");
    }

    info!(file, requester, "no live holder");
    reply_error(directory, requester, format!("no connected node has the file {file}")).await
}

/// Best-effort `error` reply to a node; a vanished recipient is only logged.
async fn reply_error(directory: &Directory, to: &str, message: String) -> Result<()> {
    let frame = crate::protocol::encode_frame(&ServerMessage::Error { message })?;
    let delivered = directory
        .live_session_of(to)
        .await
        .map(|session| session.send(frame))
        .unwrap_or(false);
    if !delivered {
        warn!(to, "could not deliver error reply");
    }
    Ok(())
}
