mod client_manager;
mod network;
mod relay;

use clap::Parser;
use log::info;
use network::Server;
use relay::RelayHandler;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server port to listen on
    #[arg(short, long, default_value = "9000")]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let mut server = Server::new(RelayHandler::new());
    server.start(args.port)?;

    info!("Relay server running on port {}", args.port);

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down");

    server.stop()?;

    Ok(())
}
