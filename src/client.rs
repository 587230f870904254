//! Node-side connection to the directory service.
//!
//! [`NodeClient::connect`] performs the handshake and consumes the
//! `welcome`/`ip` preamble. For concurrent use (a receive loop in one task,
//! commands in another) split the client into its two halves.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};

use crate::protocol::{self, NodeMessage, ServerMessage};
use crate::{Error, Result};

pub struct NodeClient {
    events: NodeEvents,
    sender: NodeSender,
    public_ip: String,
}

/// Receive half: decoded server messages in arrival order.
pub struct NodeEvents {
    lines: Lines<BufReader<OwnedReadHalf>>,
}

/// Send half: one method per node-to-server message.
pub struct NodeSender {
    node_id: String,
    write: OwnedWriteHalf,
}

impl NodeClient {
    /// Connect, handshake as `node_id`, and wait for the server preamble.
    pub async fn connect<A: ToSocketAddrs>(addr: A, node_id: &str) -> Result<Self> {
        if !protocol::valid_node_id(node_id) {
            return Err(Error::InvalidNodeId(node_id.to_string()));
        }

        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (read_half, mut write_half) = stream.into_split();

        write_half.write_all(format!("{node_id}\n").as_bytes()).await?;

        let mut events = NodeEvents {
            lines: BufReader::new(read_half).lines(),
        };

        match events.next().await?.ok_or(Error::ConnectionClosed)? {
            ServerMessage::Welcome => {}
            ServerMessage::Error { message } => return Err(Error::Rejected(message)),
            other => {
                return Err(Error::Protocol(format!("expected welcome, got {other:?}")));
            }
        }

        let public_ip = match events.next().await?.ok_or(Error::ConnectionClosed)? {
            ServerMessage::Ip { ip } => ip,
            other => {
                return Err(Error::Protocol(format!("expected ip, got {other:?}")));
            }
        };

        Ok(Self {
            events,
            sender: NodeSender {
                node_id: node_id.to_string(),
                write: write_half,
            },
            public_ip,
        })
    }

    pub fn node_id(&self) -> &str {
        &self.sender.node_id
    }

    /// The peer address the server observed for this connection.
    pub fn public_ip(&self) -> &str {
        &self.public_ip
    }

    /// Next server message, or `None` once the server closes the connection.
    pub async fn recv(&mut self) -> Result<Option<ServerMessage>> {
        self.events.next().await
    }

    pub async fn have(&mut self, file: &str) -> Result<()> {
        self.sender.have(file).await
    }

    pub async fn share(&mut self, file: &str, content: Vec<u8>) -> Result<()> {
        self.sender.share(file, content).await
    }

    pub async fn share_one(&mut self, file: &str, content: Vec<u8>, to: &str) -> Result<()> {
        self.sender.share_one(file, content, to).await
    }

    pub async fn get(&mut self, file: &str) -> Result<()> {
        self.sender.get(file).await
    }

    pub async fn file_to(&mut self, file: &str, content: Vec<u8>, to: &str) -> Result<()> {
        self.sender.file_to(file, content, to).await
    }

    pub fn split(self) -> (NodeEvents, NodeSender) {
        (self.events, self.sender)
    }
}

impl NodeEvents {
    pub async fn next(&mut self) -> Result<Option<ServerMessage>> {
        match self.lines.next_line().await? {
            Some(line) => Ok(Some(protocol::decode_line(&line)?)),
            None => Ok(None),
        }
    }
}

impl NodeSender {
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    async fn send(&mut self, message: &NodeMessage) -> Result<()> {
        let frame = protocol::encode_frame(message)?;
        self.write.write_all(&frame).await?;
        Ok(())
    }

    /// Announce possession of `file` without sending content.
    pub async fn have(&mut self, file: &str) -> Result<()> {
        self.send(&NodeMessage::Have { file: file.to_string() }).await
    }

    /// Push `file` to every other connected node.
    pub async fn share(&mut self, file: &str, content: Vec<u8>) -> Result<()> {
        self.send(&NodeMessage::Share { file: file.to_string(), content }).await
    }

    /// Push `file` to the single node `to`.
    pub async fn share_one(&mut self, file: &str, content: Vec<u8>, to: &str) -> Result<()> {
        self.send(&NodeMessage::ShareOne {
            file: file.to_string(),
            content,
            to: to.to_string(),
        })
        .await
    }

    /// Ask the server to arrange delivery of `file` to this node.
    pub async fn get(&mut self, file: &str) -> Result<()> {
        let from = self.node_id.clone();
        self.send(&NodeMessage::Get { file: file.to_string(), from }).await
    }

    /// Relay `file` to node `to`, typically answering a `send_file`.
    pub async fn file_to(&mut self, file: &str, content: Vec<u8>, to: &str) -> Result<()> {
        self.send(&NodeMessage::FileTo {
            file: file.to_string(),
            content,
            to: to.to_string(),
        })
        .await
    }
}
