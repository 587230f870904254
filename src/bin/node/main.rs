//! filehub-node: an interactive node client.
//!
//! Keeps a quota-bounded local store, announces its files to the directory
//! server, and answers `send_file` instructions by relaying content to the
//! requesting node. Commands are read from stdin; incoming files are handled
//! in the background.

mod store;

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use filehub::NodeClient;
use filehub::client::{NodeEvents, NodeSender};
use filehub::protocol::ServerMessage;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use store::Store;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut args = std::env::args().skip(1);
    let name = args.next().context("usage: filehub-node <name> [quota-mb]")?;
    let quota_mb: u64 = match args.next() {
        Some(raw) => raw.parse().context("quota must be a whole number of megabytes")?,
        None => 500,
    };

    let server_addr =
        std::env::var("FILEHUB_SERVER").unwrap_or_else(|_| "127.0.0.1:7000".to_string());

    let store = Store::open(format!("node_{name}"), quota_mb)?;
    println!(
        "store: {} ({} files, {} of {} bytes used)",
        store.root().display(),
        store.list()?.len(),
        store.used(),
        store.quota()
    );

    let client = NodeClient::connect(&server_addr, &name)
        .await
        .with_context(|| format!("connecting to {server_addr}"))?;
    println!("connected to {server_addr} as {name} (address seen by server: {})", client.public_ip());

    let (events, sender) = client.split();
    let store = Arc::new(Mutex::new(store));
    let sender = Arc::new(tokio::sync::Mutex::new(sender));

    announce_existing(&store, &sender).await?;

    let incoming = tokio::spawn(incoming_loop(events, store.clone(), sender.clone()));

    command_loop(store, sender).await?;

    incoming.abort();
    Ok(())
}

/// Tell the server about every file already in the store.
async fn announce_existing(
    store: &Arc<Mutex<Store>>,
    sender: &Arc<tokio::sync::Mutex<NodeSender>>,
) -> Result<()> {
    let files = {
        let store = store.lock().unwrap();
        store.list()?
    };
    let mut sender = sender.lock().await;
    for (file, _) in &files {
        sender.have(file).await?;
    }
    if !files.is_empty() {
        println!("announced {} existing file(s)", files.len());
    }
    Ok(())
}

/// Handle server messages until the connection closes.
async fn incoming_loop(
    mut events: NodeEvents,
    store: Arc<Mutex<Store>>,
    sender: Arc<tokio::sync::Mutex<NodeSender>>,
) {
    loop {
        let message = match events.next().await {
            Ok(Some(message)) => message,
            Ok(None) => {
                println!("server closed the connection");
                return;
            }
            Err(e) => {
                eprintln!("receive error: {e}");
                return;
            }
        };

        match message {
            ServerMessage::File { file, content } => {
                let saved = {
                    let mut store = store.lock().unwrap();
                    store.save(&file, &content)
                };
                match saved {
                    Ok(_) => {
                        println!("received {file} ({} bytes)", content.len());
                        // The copy is local now, so advertise it.
                        if let Err(e) = sender.lock().await.have(&file).await {
                            eprintln!("announce failed: {e}");
                        }
                    }
                    Err(e) => eprintln!("could not store {file}: {e}"),
                }
            }

            ServerMessage::SendFile { file, to } => {
                println!("server asked us to send {file} to {to}");
                let content = {
                    let store = store.lock().unwrap();
                    store.read(&file)
                };
                match content {
                    Ok(content) => {
                        if let Err(e) = sender.lock().await.file_to(&file, content, &to).await {
                            eprintln!("relay failed: {e}");
                        } else {
                            println!("sent {file} to {to}");
                        }
                    }
                    Err(e) => eprintln!("cannot serve {file}: {e}"),
                }
            }

            ServerMessage::Error { message } => eprintln!("server error: {message}"),

            // Preamble repeats are not expected mid-session; ignore them.
            ServerMessage::Welcome | ServerMessage::Ip { .. } => {}
        }
    }
}

const HELP: &str = "commands:
  have <file>         announce a stored file
  share <file>        push a stored file to every other node
  send <file> <node>  push a stored file to one node
  get <file>          request a file from the network
  ls                  list stored files
  info                show store usage
  quit                disconnect and exit";

async fn command_loop(
    store: Arc<Mutex<Store>>,
    sender: Arc<tokio::sync::Mutex<NodeSender>>,
) -> Result<()> {
    println!("{HELP}");

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = input.next_line().await? {
        let mut parts = line.split_whitespace();
        let Some(command) = parts.next() else {
            continue;
        };

        match (command, parts.next(), parts.next()) {
            ("have", Some(file), None) => {
                if !store.lock().unwrap().contains(file) {
                    println!("{file} is not in the store");
                    continue;
                }
                sender.lock().await.have(file).await?;
                println!("announced {file}");
            }

            ("share", Some(file), None) => {
                let content = {
                    let store = store.lock().unwrap();
                    store.read(file)
                };
                match content {
                    Ok(content) => {
                        sender.lock().await.share(file, content).await?;
                        println!("shared {file} with every connected node");
                    }
                    Err(e) => println!("cannot share {file}: {e}"),
                }
            }

            ("send", Some(file), Some(to)) => {
                let content = {
                    let store = store.lock().unwrap();
                    store.read(file)
                };
                match content {
                    Ok(content) => {
                        sender.lock().await.share_one(file, content, to).await?;
                        println!("sent {file} to {to}");
                    }
                    Err(e) => println!("cannot send {file}: {e}"),
                }
            }

            ("get", Some(file), None) => {
                sender.lock().await.get(file).await?;
                println!("requested {file}");
            }

            ("ls", None, None) => {
                let files = store.lock().unwrap().list()?;
                if files.is_empty() {
                    println!("store is empty");
                }
                for (file, size) in files {
                    println!("  {file} ({size} bytes)");
                }
            }

            ("info", None, None) => {
                let store = store.lock().unwrap();
                println!(
                    "{}: {} of {} bytes used",
                    store.root().display(),
                    store.used(),
                    store.quota()
                );
            }

            ("quit" | "exit", None, None) => break,

            ("help", None, None) => println!("{HELP}"),

            _ => println!("unrecognized command, try `help`"),
        }
    }

    Ok(())
}
