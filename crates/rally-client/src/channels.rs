//! Output channels fed by the reader task.

use rally_core::{ConnectionState, GameStarted, PlayerPosition, Routed};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

/// Publishers for everything a session produces.
///
/// State-like outputs (connection state, own position, other players) are
/// `watch` channels so late subscribers see the latest value. Game-started
/// notifications are events and go through a `broadcast` channel.
pub(crate) struct Outputs {
    pub(crate) state: Arc<watch::Sender<ConnectionState>>,
    own: watch::Sender<Option<PlayerPosition>>,
    others: watch::Sender<Vec<PlayerPosition>>,
    game_started: broadcast::Sender<GameStarted>,
}

impl Outputs {
    pub(crate) fn new(event_capacity: usize) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (own, _) = watch::channel(None);
        let (others, _) = watch::channel(Vec::new());
        let (game_started, _) = broadcast::channel(event_capacity.max(1));
        Self {
            state: Arc::new(state),
            own,
            others,
            game_started,
        }
    }

    pub(crate) fn publish(&self, routed: Routed) {
        match routed {
            Routed::OwnPosition(position) => {
                self.own.send_replace(Some(position));
            }
            Routed::OtherPlayers(players) => {
                self.others.send_replace(players);
            }
            Routed::GameStarted(started) => {
                tracing::info!(group_id = %started.group_id, "Game started");
                // No subscribers is fine.
                let _ = self.game_started.send(started);
            }
            Routed::Ignored => {}
        }
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }

    pub(crate) fn reset_others(&self, players: Vec<PlayerPosition>) {
        self.others.send_replace(players);
    }

    /// Forget every position published by the last session.
    pub(crate) fn clear_positions(&self) {
        self.own.send_replace(None);
        self.others.send_replace(Vec::new());
    }

    pub(crate) fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub(crate) fn subscribe_own(&self) -> watch::Receiver<Option<PlayerPosition>> {
        self.own.subscribe()
    }

    pub(crate) fn subscribe_others(&self) -> watch::Receiver<Vec<PlayerPosition>> {
        self.others.subscribe()
    }

    pub(crate) fn subscribe_game_started(&self) -> broadcast::Receiver<GameStarted> {
        self.game_started.subscribe()
    }
}
