//! Connection manager.
//!
//! [`ConnectionManager`] owns at most one WebSocket session. A reader task
//! handles inbound frames strictly in arrival order: each text frame is
//! decoded, folded into the [`Roster`] and published on the output channels.
//! When the transport fails the manager starts the retry loop; when the
//! server closes the session cleanly it does not.
//!
//! # Example
//!
//! ```rust,ignore
//! let manager = ConnectionManager::new(ClientConfig::default())?;
//! let mut others = manager.other_players();
//!
//! manager
//!     .connect(&game_route("alice", "g1"), PlayerPosition::spawn("alice"))
//!     .await?;
//!
//! while others.changed().await.is_ok() {
//!     println!("{} other players", others.borrow().len());
//! }
//! ```

use crate::channels::Outputs;
use crate::config::{ClientConfig, ConfigError, WatchdogConfig};
use crate::error::{ClientError, Result};
use crate::reconnect::{ReconnectCallback, Reconnector};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{FutureExt, SinkExt, StreamExt};
use rally_core::{ConnectionState, GameStarted, PlayerPosition, Roster};
use std::future::Future;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// Tracing target for player actions (connect, move, disconnect).
pub const PLAYER_ACTION: &str = "rally::player_action";

/// How long `disconnect` waits for the close handshake.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Handle to one logical game connection. Cheap to clone; all clones share
/// the same session.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: ClientConfig,
    outputs: Outputs,
    reconnector: Reconnector,
    roster: Mutex<Roster>,
    link: tokio::sync::Mutex<Link>,
    target: Mutex<Option<Target>>,
}

/// Session slot. Every install and every disconnect bumps `generation`, so a
/// stale reader or a setup that raced a disconnect can tell it lost.
#[derive(Default)]
struct Link {
    session: Option<Session>,
    generation: u64,
}

struct Session {
    generation: u64,
    sink: Arc<tokio::sync::Mutex<WsSink>>,
    reader: JoinHandle<()>,
}

/// What `reconnect` re-establishes.
#[derive(Debug, Clone)]
struct Target {
    route: String,
    position: PlayerPosition,
}

/// Whether a failed `establish` starts the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Retry {
    OnTransportError,
    /// The caller is the retry loop itself.
    Never,
}

/// How a reader task finished.
enum SessionEnd {
    Closed(Option<String>),
    Failed(String),
}

impl ConnectionManager {
    /// Build a manager for `config`, which is validated first.
    pub fn new(config: ClientConfig) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let outputs = Outputs::new(config.event_capacity);
        let reconnector = Reconnector::new(config.reconnect.clone(), outputs.state.clone());
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                outputs,
                reconnector,
                roster: Mutex::new(Roster::default()),
                link: tokio::sync::Mutex::new(Link::default()),
                target: Mutex::new(None),
            }),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Open a session on `route` and send `initial` as the first frame.
    ///
    /// Fails with [`ClientError::AlreadyConnected`] if a session is active.
    /// Any retry loop still running from an earlier session is cancelled
    /// first. A transport failure is returned to the caller and also starts
    /// the retry loop on this route.
    pub async fn connect(&self, route: &str, initial: PlayerPosition) -> Result<()> {
        if self.inner.link.lock().await.session.is_some() {
            tracing::debug!(route, "Already connected");
            return Err(ClientError::AlreadyConnected);
        }
        self.inner.reconnector.stop().await;

        tracing::info!(
            target: PLAYER_ACTION,
            login = initial.login(),
            action = "CONNECT",
            route
        );

        if let Ok(mut roster) = self.inner.roster.lock() {
            roster.set_local_login(initial.login());
            roster.clear();
        }
        self.inner.outputs.reset_others(Vec::new());
        self.set_target(route, &initial);

        self.establish(route, &initial, Retry::OnTransportError).await
    }

    /// Store the callback the retry loop invokes on each attempt. Last write
    /// wins. Without a callback the loop calls [`ConnectionManager::reconnect`].
    ///
    /// The callback runs on the retry task and must not call `connect` or
    /// `disconnect`; use `reconnect` to re-open the session.
    pub fn register_reconnect_callback<F, Fut>(&self, callback: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.inner
            .reconnector
            .set_callback(Arc::new(move || callback().boxed()));
    }

    /// Re-open a session on the last `connect` route, announcing the last
    /// position sent.
    pub async fn reconnect(&self) -> Result<()> {
        let target = self
            .inner
            .target
            .lock()
            .ok()
            .and_then(|target| target.clone())
            .ok_or(ClientError::NoTarget)?;
        self.establish(&target.route, &target.position, Retry::Never).await
    }

    /// Cancel any retry loop and close the session. Calling it again is a
    /// no-op. No frame is handled after this returns.
    pub async fn disconnect(&self) {
        let mut link = self.inner.link.lock().await;
        link.generation += 1;
        let session = link.session.take();
        let was_reconnecting = self.inner.reconnector.is_reconnecting();
        self.inner.reconnector.stop().await;

        if let Some(session) = session {
            session.reader.abort();
            let _ = session.reader.await;
            let mut sink = session.sink.lock().await;
            if tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await.is_err() {
                tracing::debug!("Close handshake timed out");
            }

            let login = self.local_login();
            tracing::info!(target: PLAYER_ACTION, login = %login, action = "DISCONNECT");
            tracing::info!("Connection closed");
        } else if was_reconnecting {
            tracing::info!("Reconnect cancelled by disconnect");
        }

        if let Ok(mut roster) = self.inner.roster.lock() {
            roster.clear();
        }
        self.inner.outputs.clear_positions();
        self.inner.outputs.set_state(ConnectionState::Disconnected);
        drop(link);
    }

    /// Send one position frame. Failures are returned to the caller and never
    /// trigger reconnection.
    pub async fn send_position(&self, position: &PlayerPosition) -> Result<()> {
        let sink = {
            let link = self.inner.link.lock().await;
            link.session
                .as_ref()
                .map(|session| session.sink.clone())
                .ok_or(ClientError::NotConnected)?
        };

        let payload = serde_json::to_string(position)?;
        sink.lock()
            .await
            .send(Message::Text(payload.into()))
            .await
            .map_err(ClientError::Send)?;

        tracing::trace!(
            target: PLAYER_ACTION,
            login = position.login(),
            action = "MOVE",
            x = position.x,
            y = position.y
        );
        if let Ok(mut target) = self.inner.target.lock()
            && let Some(target) = target.as_mut()
        {
            target.position = position.clone();
        }
        Ok(())
    }

    /// Change the identity used to tell self-echoes from other players.
    pub fn set_local_login(&self, login: impl Into<String>) {
        if let Ok(mut roster) = self.inner.roster.lock() {
            roster.set_local_login(login);
            self.inner.outputs.reset_others(roster.others().to_vec());
        }
    }

    pub fn local_login(&self) -> String {
        self.inner
            .roster
            .lock()
            .map(|roster| roster.local_login().to_string())
            .unwrap_or_default()
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.outputs.subscribe_state()
    }

    pub fn current_state(&self) -> ConnectionState {
        self.inner.outputs.state.borrow().clone()
    }

    /// Server echoes of the local player's own position.
    pub fn own_position(&self) -> watch::Receiver<Option<PlayerPosition>> {
        self.inner.outputs.subscribe_own()
    }

    /// Current list of other players.
    pub fn other_players(&self) -> watch::Receiver<Vec<PlayerPosition>> {
        self.inner.outputs.subscribe_others()
    }

    pub fn game_started(&self) -> broadcast::Receiver<GameStarted> {
        self.inner.outputs.subscribe_game_started()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.outputs.state.borrow().is_connected()
    }

    pub fn is_reconnecting(&self) -> bool {
        self.inner.reconnector.is_reconnecting()
    }

    pub fn reconnect_attempt(&self) -> u32 {
        self.inner.reconnector.current_attempt()
    }

    pub fn max_reconnect_attempts(&self) -> u32 {
        self.inner.reconnector.max_attempts()
    }

    fn set_target(&self, route: &str, position: &PlayerPosition) {
        if let Ok(mut target) = self.inner.target.lock() {
            *target = Some(Target {
                route: route.to_string(),
                position: position.clone(),
            });
        }
    }

    /// Open the socket, send the first frame and install the session.
    ///
    /// State changes are published only while the attempt is still current,
    /// so a `disconnect` that lands mid-handshake keeps its `Disconnected`.
    async fn establish(&self, route: &str, initial: &PlayerPosition, retry: Retry) -> Result<()> {
        let url = self.inner.config.endpoint(route);
        let generation = {
            let link = self.inner.link.lock().await;
            if link.session.is_some() {
                return Err(ClientError::AlreadyConnected);
            }
            self.inner.outputs.set_state(ConnectionState::Connecting);
            link.generation
        };
        tracing::info!(%url, login = initial.login(), "Connecting");

        let sink_and_source = match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((ws, _response)) => open_session(ws, initial).await,
            Err(e) => Err(ClientError::Transport(e)),
        };
        let (mut sink, source) = match sink_and_source {
            Ok(parts) => parts,
            Err(e) => {
                let link = self.inner.link.lock().await;
                if link.generation != generation {
                    tracing::debug!(%url, error = %e, "Connection attempt outlived a disconnect");
                    return Err(ClientError::Cancelled);
                }
                tracing::warn!(%url, error = %e, "Connection failed");
                self.inner.outputs.set_state(ConnectionState::Error(e.to_string()));
                if retry == Retry::OnTransportError && matches!(e, ClientError::Transport(_)) {
                    self.inner.reconnector.start(self.fallback());
                }
                drop(link);
                return Err(e);
            }
        };

        let mut link = self.inner.link.lock().await;
        if link.generation != generation || link.session.is_some() {
            drop(link);
            tracing::debug!(%url, "Discarding session opened during disconnect");
            let _ = tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await;
            return Err(ClientError::Cancelled);
        }

        link.generation += 1;
        let generation = link.generation;
        let reader = tokio::spawn(read_loop(
            Arc::downgrade(&self.inner),
            generation,
            source,
            self.inner.config.watchdog.clone(),
        ));
        link.session = Some(Session {
            generation,
            sink: Arc::new(tokio::sync::Mutex::new(sink)),
            reader,
        });
        self.inner.outputs.set_state(ConnectionState::Connected);
        tracing::info!(%url, "Connected");
        Ok(())
    }

    /// Called by the reader task when its session ends on its own.
    async fn session_ended(&self, generation: u64, end: SessionEnd) {
        let mut link = self.inner.link.lock().await;
        let current = matches!(&link.session, Some(session) if session.generation == generation);
        if !current {
            tracing::debug!(generation, "Ignoring end of a replaced session");
            return;
        }
        link.session = None;

        match end {
            SessionEnd::Closed(reason) => {
                tracing::info!(reason = reason.as_deref().unwrap_or(""), "Server closed the session");
                self.inner.outputs.set_state(ConnectionState::Disconnected);
            }
            SessionEnd::Failed(cause) => {
                tracing::warn!(%cause, "Session lost");
                self.inner.outputs.set_state(ConnectionState::Error(cause));
                if !self.inner.reconnector.start(self.fallback()) {
                    tracing::debug!("Session lost while already reconnecting");
                }
            }
        }
    }

    /// Retry action used when no callback is registered.
    fn fallback(&self) -> ReconnectCallback {
        let manager = self.clone();
        Arc::new(move || {
            let manager = manager.clone();
            async move { manager.reconnect().await }.boxed()
        })
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("base_url", &self.inner.config.base_url)
            .field("state", &*self.inner.outputs.state.borrow())
            .field("reconnecting", &self.is_reconnecting())
            .finish()
    }
}

impl Inner {
    fn handle_text(&self, text: &str) {
        tracing::debug!(len = text.len(), "Frame received");
        let message = rally_core::decode(text);
        let routed = match self.roster.lock() {
            Ok(mut roster) => roster.apply(message),
            Err(_) => return,
        };
        self.outputs.publish(routed);
    }
}

async fn open_session(ws: WsStream, initial: &PlayerPosition) -> Result<(WsSink, WsSource)> {
    let (mut sink, source) = ws.split();
    let payload = serde_json::to_string(initial)?;
    sink.send(Message::Text(payload.into()))
        .await
        .map_err(ClientError::Transport)?;
    tracing::debug!(login = initial.login(), "Initial position sent");
    Ok((sink, source))
}

async fn read_loop(inner: Weak<Inner>, generation: u64, mut source: WsSource, watchdog: WatchdogConfig) {
    let period = watchdog.check_interval();
    let mut check = tokio::time::interval_at(Instant::now() + period, period);
    check.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_frame = Instant::now();
    let mut frames: u64 = 0;

    let end = loop {
        tokio::select! {
            frame = source.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        frames += 1;
                        last_frame = Instant::now();
                        let Some(inner) = inner.upgrade() else { return };
                        inner.handle_text(text.as_str());
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break SessionEnd::Closed(frame.map(|f| f.reason.as_str().to_string()));
                    }
                    Some(Ok(other)) => {
                        last_frame = Instant::now();
                        tracing::trace!(len = other.len(), "Skipping non-text frame");
                    }
                    Some(Err(e)) => break SessionEnd::Failed(e.to_string()),
                    None => break SessionEnd::Failed("stream ended without close frame".to_string()),
                }
            }
            _ = check.tick() => {
                let silent = last_frame.elapsed();
                if silent >= watchdog.silence_warning() {
                    tracing::warn!(silent_ms = silent.as_millis() as u64, frames, "No frames from server");
                } else {
                    tracing::debug!(frames, "Session alive");
                }
            }
        }
    };

    if let Some(inner) = inner.upgrade() {
        ConnectionManager { inner }.session_ended(generation, end).await;
    }
}
