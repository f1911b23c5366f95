//! Headless Rally client.
//!
//! Joins a group, walks its avatar in a circle and logs what the server
//! reports about everyone else. Ctrl-C disconnects.
//!
//!   cargo run -p rally-demo-bot -- --login alice --group g1
//!   cargo run -p rally-demo-bot -- --config bot.toml --login bob --menu

use anyhow::Context;
use clap::Parser;
use rally_client::{
    game_route, menu_route, spawn_position_stream, ClientConfig, ConnectionManager, PlayerPosition,
};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to a TOML client configuration.
    #[clap(long, env = "RALLY_CONFIG")]
    config: Option<PathBuf>,

    /// Player login announced to the server.
    #[clap(long, env = "RALLY_LOGIN")]
    login: String,

    /// Group to join.
    #[clap(long, default_value = "g1")]
    group: String,

    /// Listen for lobby notifications instead of joining a game.
    #[clap(long)]
    menu: bool,

    /// Overrides `base_url` from the configuration.
    #[clap(long, env = "RALLY_BASE_URL")]
    base_url: Option<String>,

    /// Radius of the walking circle.
    #[clap(long, default_value_t = 40.0)]
    radius: f32,
}

fn load_config(args: &CliArgs) -> anyhow::Result<ClientConfig> {
    let mut config = match &args.config {
        Some(path) => ClientConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ClientConfig::default(),
    };
    if let Some(base_url) = &args.base_url {
        config.base_url = base_url.clone();
    }
    Ok(config)
}

/// Move the avatar one step around a circle centred on its spawn point.
fn walk(positions: watch::Sender<PlayerPosition>, radius: f32) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let (cx, cy) = {
            let p = positions.borrow();
            (p.x, p.y)
        };
        let mut ticker = tokio::time::interval(Duration::from_millis(100));
        let mut angle: f32 = 0.0;
        loop {
            ticker.tick().await;
            angle += 0.1;
            positions.send_modify(|p| {
                p.x = cx + radius * angle.cos();
                p.y = cy + radius * angle.sin();
            });
            if positions.is_closed() {
                break;
            }
        }
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("rally_demo_bot=info".parse()?)
                .add_directive("rally_client=info".parse()?),
        )
        .init();

    let args = CliArgs::parse();
    let config = load_config(&args)?;
    let interval = config.send_interval();
    let manager = ConnectionManager::new(config)?;

    let mut state = manager.state();
    let mut others = manager.other_players();
    let mut own = manager.own_position();
    let mut started = manager.game_started();

    let route = if args.menu {
        menu_route(&args.login)
    } else {
        game_route(&args.login, &args.group)
    };
    let start = PlayerPosition::spawn(args.login.as_str());
    if let Err(e) = manager.connect(&route, start.clone()).await {
        if !manager.is_reconnecting() {
            return Err(e.into());
        }
        tracing::warn!(error = %e, "Initial connect failed, retrying");
    }

    let (positions, rx) = watch::channel(start);
    let stream = if args.menu {
        None
    } else {
        Some(spawn_position_stream(manager.clone(), rx, interval))
    };
    let walker = walk(positions, args.radius);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            Ok(()) = state.changed() => {
                let state = state.borrow_and_update().clone();
                tracing::info!(
                    %state,
                    attempt = manager.reconnect_attempt(),
                    max = manager.max_reconnect_attempts(),
                    "Connection state"
                );
            }
            Ok(()) = others.changed() => {
                let logins: Vec<String> = others
                    .borrow_and_update()
                    .iter()
                    .map(|p| format!("{}@({:.0},{:.0})", p.login(), p.x, p.y))
                    .collect();
                tracing::info!(count = logins.len(), players = %logins.join(" "), "Other players");
            }
            Ok(()) = own.changed() => {
                if let Some(p) = own.borrow_and_update().as_ref() {
                    tracing::debug!(x = p.x, y = p.y, "Server echoed our position");
                }
            }
            event = started.recv() => match event {
                Ok(event) => tracing::info!(group = %event.group_id, "Game started: {}", event.message),
                Err(broadcast::error::RecvError::Lagged(n)) => tracing::warn!(skipped = n, "Missed game events"),
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    walker.abort();
    if let Some(stream) = stream {
        stream.abort();
    }
    manager.disconnect().await;
    Ok(())
}
