//! Frames the arena sends to clients.

use rally_core::{GameStarted, PlayerPosition};
use serde::Serialize;

/// Which inbound convention a client expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum WireFormat {
    /// `{"type": ..}` objects.
    Typed,
    /// `otherPlayers[...]` and `player{...}` prefixed text.
    Legacy,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum TypedFrame<'a> {
    PlayersList {
        data: &'a [PlayerPosition],
    },
    PlayerUpdate {
        data: &'a PlayerPosition,
    },
    GameStarted {
        #[serde(rename = "groupId")]
        group_id: &'a str,
        message: &'a str,
    },
}

/// Something that happened in a group, fanned out to every member.
#[derive(Debug, Clone)]
pub enum ArenaEvent {
    Roster(Vec<PlayerPosition>),
    Moved(PlayerPosition),
    Started(GameStarted),
}

impl ArenaEvent {
    pub fn encode(&self, format: WireFormat) -> serde_json::Result<String> {
        match (self, format) {
            (ArenaEvent::Roster(players), WireFormat::Typed) => {
                serde_json::to_string(&TypedFrame::PlayersList { data: players })
            }
            (ArenaEvent::Roster(players), WireFormat::Legacy) => {
                Ok(format!("otherPlayers{}", serde_json::to_string(players)?))
            }
            (ArenaEvent::Moved(player), WireFormat::Typed) => {
                serde_json::to_string(&TypedFrame::PlayerUpdate { data: player })
            }
            (ArenaEvent::Moved(player), WireFormat::Legacy) => {
                Ok(format!("player{}", serde_json::to_string(player)?))
            }
            // No legacy form exists for this one.
            (ArenaEvent::Started(event), _) => serde_json::to_string(&TypedFrame::GameStarted {
                group_id: &event.group_id,
                message: &event.message,
            }),
        }
    }
}
