//! Protocol messages.
//!
//! Servers speak two conventions: a `type`-tagged JSON envelope and an older
//! untagged form where a string prefix names the payload. Both decode into
//! [`InboundMessage`].

use crate::PlayerPosition;
use serde::{Deserialize, Serialize};

/// Notification that a group's game has begun.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameStarted {
    #[serde(rename = "groupId")]
    pub group_id: String,
    pub message: String,
}

/// One decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Full list of players in the session.
    PlayersList(Vec<PlayerPosition>),
    /// A single player's new position.
    PlayerUpdate(PlayerPosition),
    /// The group's game has started.
    GameStarted(GameStarted),
    /// Anything that did not decode; carries the raw frame.
    Unrecognized(String),
}

impl InboundMessage {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            InboundMessage::PlayersList(_) => "players_list",
            InboundMessage::PlayerUpdate(_) => "player_update",
            InboundMessage::GameStarted(_) => "game_started",
            InboundMessage::Unrecognized(_) => "unrecognized",
        }
    }
}

/// The tagged envelope, as sent by current servers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum TaggedFrame {
    PlayersList {
        data: Vec<PlayerPosition>,
    },
    PlayerUpdate {
        data: PlayerPosition,
    },
    GameStarted {
        #[serde(rename = "groupId")]
        group_id: String,
        message: String,
    },
}

impl TaggedFrame {
    pub(crate) const KNOWN_TYPES: [&'static str; 3] =
        ["players_list", "player_update", "game_started"];
}

impl From<TaggedFrame> for InboundMessage {
    fn from(frame: TaggedFrame) -> Self {
        match frame {
            TaggedFrame::PlayersList { data } => InboundMessage::PlayersList(data),
            TaggedFrame::PlayerUpdate { data } => InboundMessage::PlayerUpdate(data),
            TaggedFrame::GameStarted { group_id, message } => {
                InboundMessage::GameStarted(GameStarted { group_id, message })
            }
        }
    }
}

/// Legacy `otherPlayers` wrapper object.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct PlayersWrapper {
    #[serde(alias = "players")]
    pub(crate) player: Vec<PlayerPosition>,
}
