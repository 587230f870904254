//! Wire protocol for the filehub directory service.
//!
//! Messages travel as newline-delimited JSON records, one self-describing
//! record per line. Every record carries a `type` discriminator; the record
//! kinds form two closed sets, one per direction. File content rides inside
//! records as standard base64 text.
//!
//! The handshake is the one exception to the framing: the first line a node
//! sends on a fresh connection is its bare identifier, not a JSON record.

use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Longest accepted node identifier, in bytes.
pub const MAX_NODE_ID_LEN: usize = 64;

/// Messages a node sends to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeMessage {
    /// Announce possession of a file without transferring content.
    Have { file: String },

    /// Push a file to every other connected node.
    Share {
        file: String,
        #[serde(with = "content_b64")]
        content: Vec<u8>,
    },

    /// Push a file to a single named node.
    ShareOne {
        file: String,
        #[serde(with = "content_b64")]
        content: Vec<u8>,
        to: String,
    },

    /// Ask the server to arrange delivery of a file to `from`.
    Get { file: String, from: String },

    /// Relay a file to a named node, typically answering a `send_file`.
    FileTo {
        file: String,
        #[serde(with = "content_b64")]
        content: Vec<u8>,
        to: String,
    },
}

/// Messages the server sends to a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Handshake accepted.
    Welcome,

    /// The peer address the server observed for this node.
    Ip { ip: String },

    /// File content delivered to this node.
    File {
        file: String,
        #[serde(with = "content_b64")]
        content: Vec<u8>,
    },

    /// Instruction to push the named file to node `to` via `file_to`.
    SendFile { file: String, to: String },

    /// A request could not be satisfied.
    Error { message: String },
}

/// Base64 transport encoding for the `content` field.
mod content_b64 {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text.as_bytes()).map_err(serde::de::Error::custom)
    }
}

/// Encode a message as one newline-terminated frame.
pub fn encode_frame<M: Serialize>(message: &M) -> Result<BytesMut> {
    let json = serde_json::to_vec(message)?;
    let mut frame = BytesMut::with_capacity(json.len() + 1);
    frame.put_slice(&json);
    frame.put_u8(b'\n');
    Ok(frame)
}

/// Decode one line into a message. Unknown `type` values and missing
/// required fields are decode errors.
pub fn decode_line<'a, M: Deserialize<'a>>(line: &'a str) -> Result<M> {
    Ok(serde_json::from_str(line.trim())?)
}

/// Check a handshake identifier: non-empty, bounded, and printable with no
/// whitespace, so identifiers are safe to embed in log lines and JSON.
pub fn valid_node_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_NODE_ID_LEN
        && id.chars().all(|c| !c.is_whitespace() && !c.is_control())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_have_wire_format() {
        let msg = NodeMessage::Have {
            file: "report.pdf".to_string(),
        };
        let frame = encode_frame(&msg).unwrap();
        let text = std::str::from_utf8(&frame).unwrap();
        assert_eq!(text, "{\"type\":\"have\",\"file\":\"report.pdf\"}\n");
    }

    #[test]
    fn test_content_is_base64_text() {
        let msg = NodeMessage::Share {
            file: "logo.png".to_string(),
            content: vec![0xde, 0xad, 0xbe, 0xef],
        };
        let frame = encode_frame(&msg).unwrap();
        let text = std::str::from_utf8(&frame).unwrap();
        assert!(text.contains("\"content\":\"3q2+7w==\""));

        let back: NodeMessage = decode_line(text).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_server_message_tags() {
        let frame = encode_frame(&ServerMessage::Welcome).unwrap();
        assert_eq!(std::str::from_utf8(&frame).unwrap(), "{\"type\":\"welcome\"}\n");

        let msg: ServerMessage =
            decode_line("{\"type\":\"send_file\",\"file\":\"a.txt\",\"to\":\"B\"}").unwrap();
        assert_eq!(
            msg,
            ServerMessage::SendFile {
                file: "a.txt".to_string(),
                to: "B".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_type_is_error() {
        let result: crate::Result<NodeMessage> = decode_line("{\"type\":\"steal\",\"file\":\"x\"}");
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_field_is_error() {
        let result: crate::Result<NodeMessage> = decode_line("{\"type\":\"get\",\"file\":\"x\"}");
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_base64_is_error() {
        let result: crate::Result<NodeMessage> =
            decode_line("{\"type\":\"share\",\"file\":\"x\",\"content\":\"!!!\"}");
        assert!(result.is_err());
    }

    #[test]
    fn test_node_id_validation() {
        assert!(valid_node_id("vm-alpha"));
        assert!(valid_node_id("A"));
        assert!(!valid_node_id(""));
        assert!(!valid_node_id("two words"));
        assert!(!valid_node_id("tab\tseparated"));
        assert!(!valid_node_id(&"x".repeat(MAX_NODE_ID_LEN + 1)));
    }
}
