//! Local arena server for trying the Rally client.
//!
//! Speaks both inbound conventions the client understands:
//! - typed `{"type": ...}` frames (default)
//! - legacy `otherPlayers[...]` / `player{...}` text with `--format legacy`
//!
//! Run it, then point a bot at it:
//!   cargo run -p rally-demo-arena -- --port 8080 --start-at 2
//!   cargo run -p rally-demo-bot -- --login alice --group g1
//!   cargo run -p rally-demo-bot -- --login bob --group g1

mod arena;
mod protocol;
mod server;

use clap::Parser;
use protocol::WireFormat;
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct CliArgs {
    /// The port to listen on.
    #[clap(short, long, default_value_t = 8080, env = "RALLY_ARENA_PORT")]
    port: u16,

    /// Inbound frame convention to send.
    #[clap(long, value_enum, default_value = "typed")]
    format: WireFormat,

    /// Announce the game once a group has this many players.
    #[clap(long)]
    start_at: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("rally_demo_arena=info".parse()?))
        .init();

    let args = CliArgs::parse();
    let addr: SocketAddr = ([127, 0, 0, 1], args.port).into();

    server::run(server::ServerOptions {
        addr,
        format: args.format,
        start_at: args.start_at,
    })
    .await
}
