//! cix: interactive client for the cix file transfer server.
//!
//! Reads commands from stdin (`help`, `ls`, `get`, `put`, `rm`, `exit`);
//! end of input is the same as `exit`.

use cix::client::{self, Session};
use cix::config::ClientArgs;
use cix::logging;
use clap::Parser;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = ClientArgs::parse();

    logging::init(&args.log_level, true);

    info!(host = %args.host, port = args.port, "connecting");
    let stream = TcpStream::connect((args.host.as_str(), args.port)).await?;
    info!(peer = %stream.peer_addr()?, "connected");

    let mut session = Session::new(stream, &args.dir);
    let stdin = BufReader::new(tokio::io::stdin());

    if let Err(e) = client::run(&mut session, stdin, tokio::io::stdout()).await {
        error!(error = %e, "session ended");
    }
    Ok(())
}
