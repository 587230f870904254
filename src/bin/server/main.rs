//! filehub-server: the central file directory service.
//!
//! Nodes connect over TCP, hand over an identifier, and exchange files
//! through the server's announce/share/request/relay protocol.

use anyhow::Result;
use filehub::{Config, Server};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load_or_default("filehub.toml")?;

    println!("╔════════════════════════════════════════╗");
    println!("║        filehub directory server        ║");
    println!("╠════════════════════════════════════════╣");
    println!("║ Bind: {:<33}║", config.bind_addr());
    println!("║ Max nodes: {:<28}║", config.max_nodes);
    println!("╚════════════════════════════════════════╝");

    let (server, handle) = Server::bind(config).await?;
    println!("Listening on {}", server.local_addr()?);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("shutting down, draining sessions");
            handle.shutdown();
        }
    });

    server.run().await?;
    Ok(())
}
