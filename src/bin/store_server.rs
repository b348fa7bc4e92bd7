//! Standalone store server.
//!
//! Runs the hosted JSON store that `WsChannel` clients connect to.
//! Bind address comes from `SHAREROOM_BIND` (default `127.0.0.1:9800`).

use shareroom::{ServerConfig, StoreServer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut config = ServerConfig::default();
    if let Ok(bind_addr) = std::env::var("SHAREROOM_BIND") {
        config.bind_addr = bind_addr;
    }

    log::info!("starting store server on {}", config.bind_addr);
    let server = StoreServer::new(config);
    server.run().await?;
    Ok(())
}
