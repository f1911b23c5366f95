//! Other-players state and routing of decoded messages.

use crate::{GameStarted, InboundMessage, PlayerPosition};

/// Where a decoded message ends up.
#[derive(Debug, Clone, PartialEq)]
pub enum Routed {
    /// The server echoed the local player's own position.
    OwnPosition(PlayerPosition),
    /// The other-players view changed; carries the full current list.
    OtherPlayers(Vec<PlayerPosition>),
    GameStarted(GameStarted),
    /// Nothing to publish.
    Ignored,
}

/// The other players in one session, keyed by login, in arrival order.
///
/// The local player is never part of the list: updates carrying the local
/// login are routed as [`Routed::OwnPosition`] instead.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    local_login: String,
    others: Vec<PlayerPosition>,
}

impl Roster {
    pub fn new(local_login: impl Into<String>) -> Self {
        Self {
            local_login: local_login.into(),
            others: Vec::new(),
        }
    }

    pub fn local_login(&self) -> &str {
        &self.local_login
    }

    /// Change the local identity. Any entry for the new login is dropped
    /// from the other-players list.
    pub fn set_local_login(&mut self, login: impl Into<String>) {
        self.local_login = login.into();
        let local = self.local_login.as_str();
        self.others.retain(|p| p.login() != local);
    }

    pub fn others(&self) -> &[PlayerPosition] {
        &self.others
    }

    pub fn clear(&mut self) {
        self.others.clear();
    }

    /// Fold one decoded message into the roster.
    pub fn apply(&mut self, message: InboundMessage) -> Routed {
        match message {
            InboundMessage::PlayerUpdate(position) => {
                if position.login() == self.local_login {
                    return Routed::OwnPosition(position);
                }
                match self
                    .others
                    .iter_mut()
                    .find(|p| p.login() == position.login())
                {
                    Some(existing) => existing.move_to(&position),
                    None => self.others.push(position),
                }
                Routed::OtherPlayers(self.others.clone())
            }
            InboundMessage::PlayersList(players) => {
                let local = self.local_login.as_str();
                self.others = players
                    .into_iter()
                    .filter(|p| p.login() != local)
                    .collect();
                Routed::OtherPlayers(self.others.clone())
            }
            InboundMessage::GameStarted(started) => Routed::GameStarted(started),
            InboundMessage::Unrecognized(_) => Routed::Ignored,
        }
    }
}
