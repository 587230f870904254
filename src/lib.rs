//! # filehub
//!
//! A central directory service for file exchange between nodes.
//!
//! Nodes hold one persistent TCP connection each and speak a newline-delimited
//! JSON protocol to announce files (`have`), push them to everyone (`share`)
//! or to one peer (`share_one`), request them (`get`), and relay content
//! (`file_to`). The server keeps an in-memory, best-effort index of which
//! nodes claim which files and routes requests to the first live holder; it
//! relays content without ever persisting it.

pub mod client;
pub mod config;
pub mod directory;
pub mod error;
pub mod protocol;
pub mod router;
pub mod server;
pub mod session;

pub use client::NodeClient;
pub use config::Config;
pub use error::{Error, Result};
pub use server::{Server, ServerHandle};
