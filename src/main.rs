//! cixd: the cix file transfer server.
//!
//! Listens on one port and serves `ls`, `get`, `put` and `rm` requests, one
//! worker task per connection. Runs until killed.

use cix::config::Config;
use cix::logging;
use cix::server::Server;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    logging::init(&config.log_level, false);

    info!(
        listen = %config.listen,
        port = config.port,
        root = %config.root.display(),
        max_workers = config.max_workers,
        "Starting cixd"
    );

    let server = match Server::bind(&config).await {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "cannot start server");
            return Err(e.into());
        }
    };

    server.run().await?;
    info!("finishing");
    Ok(())
}
