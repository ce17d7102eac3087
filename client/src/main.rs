mod connection;
mod game;

use clap::Parser;
use connection::Connection;
use game::GameScene;
use log::{debug, info};
use rand::Rng;
use shared::creator;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server host to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1")]
    server: String,

    /// Server port
    #[arg(short, long, default_value = "9000")]
    port: u16,

    /// Display name announced to the other players
    #[arg(short, long, default_value = "player")]
    name: String,

    /// Window width
    #[arg(short = 'w', long, default_value = "800")]
    width: u32,

    /// Window height (no short flag to avoid conflict with --help)
    #[arg(long, default_value = "600")]
    height: u32,
}

/// Headless demo client: joins the server, wanders randomly and logs the
/// replicated roster. A real frontend would render the scene instead.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Connecting to {}:{}", args.server, args.port);

    let mut conn = Connection::new();
    conn.start(&args.server, args.port)?;

    let mut scene = GameScene::new(&args.name, args.width, args.height);
    conn.send(creator::init(&scene.local_params(), args.width, args.height)?)?;

    let mut rng = rand::thread_rng();
    let mut tick: u64 = 0;

    while conn.is_connected() {
        scene.drain_events(&mut conn);

        // wander a little every tick so there is something to relay
        let dx = rng.gen_range(-2.0..2.0);
        let dy = rng.gen_range(-2.0..2.0);
        if conn.send(creator::mov(dx, dy)?).is_ok() {
            scene.apply(shared::Message::Move {
                dx,
                dy,
                id: shared::MYSELF,
            });
        }

        // fresh colors now and then, like mashing the randomize key
        if tick % 600 == 300 {
            let packet = scene.randomize_colors()?;
            let _ = conn.send(packet);
        }

        if tick % 120 == 0 {
            let me = scene.me();
            debug!(
                "tick {}: {} player(s), me at ({:.1}, {:.1})",
                tick,
                scene.player_count(),
                me.x,
                me.y
            );
        }

        tick += 1;
        std::thread::sleep(Duration::from_millis(16));
    }

    info!("Disconnected, shutting down");
    conn.stop();

    Ok(())
}
