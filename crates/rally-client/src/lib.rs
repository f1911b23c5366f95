//! Client-side connection handling for Rally.
//!
//! [`ConnectionManager`] keeps one WebSocket session to the game server,
//! routes inbound frames through [`rally_core::decode`] and a
//! [`rally_core::Roster`], and retries with exponential backoff when the
//! transport fails.

mod channels;
mod config;
mod connection;
mod error;
mod policy;
mod reconnect;
mod routes;
mod stream;

pub use config::{ClientConfig, ConfigError, WatchdogConfig};
pub use connection::{ConnectionManager, PLAYER_ACTION};
pub use error::{ClientError, Result};
pub use policy::ReconnectPolicy;
pub use reconnect::{ReconnectCallback, ReconnectFuture, Reconnector};
pub use routes::{game_route, menu_route, MENU_GROUP};
pub use stream::spawn_position_stream;

pub use rally_core::{ConnectionState, GameStarted, InboundMessage, PlayerPosition};
