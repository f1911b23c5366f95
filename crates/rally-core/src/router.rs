//! Frame decoding.
//!
//! Order matters: the tagged envelope is tried first, then the legacy string
//! prefixes. The first convention that matches decides the outcome, so a
//! frame that is tagged but malformed is not retried as legacy.

use crate::message::{PlayersWrapper, TaggedFrame};
use crate::{InboundMessage, PlayerPosition};
use serde_json::Value;

const PLAYER_PREFIX: &str = "player";
const OTHER_PLAYERS_PREFIX: &str = "otherPlayers";

/// Longest frame excerpt written to logs.
const LOG_EXCERPT: usize = 120;

/// Why a frame could not be decoded.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("unknown message type: {0}")]
    UnknownType(String),
    #[error("`type` field is not a string")]
    BadTypeField,
    #[error("malformed {kind} payload: {source}")]
    Payload {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("frame matches no known convention")]
    NoConvention,
}

/// Decode a raw text frame, reporting why it failed.
pub fn try_decode(raw: &str) -> Result<InboundMessage, DecodeError> {
    if let Ok(value) = serde_json::from_str::<Value>(raw) {
        if value.get("type").is_some() {
            return decode_tagged(value);
        }
        // Untagged array of records, sent by some servers as a full list.
        if value.is_array() {
            return serde_json::from_value::<Vec<PlayerPosition>>(value)
                .map(InboundMessage::PlayersList)
                .map_err(|source| DecodeError::Payload {
                    kind: "players array",
                    source,
                });
        }
        return Err(DecodeError::NoConvention);
    }

    if let Some(rest) = raw.strip_prefix(OTHER_PLAYERS_PREFIX) {
        return decode_other_players(rest);
    }

    if let Some(rest) = raw.strip_prefix(PLAYER_PREFIX) {
        return serde_json::from_str::<PlayerPosition>(rest)
            .map(InboundMessage::PlayerUpdate)
            .map_err(|source| DecodeError::Payload {
                kind: PLAYER_PREFIX,
                source,
            });
    }

    Err(DecodeError::NoConvention)
}

/// Decode a raw text frame. Never fails: anything undecodable becomes
/// [`InboundMessage::Unrecognized`] and is logged.
pub fn decode(raw: &str) -> InboundMessage {
    match try_decode(raw) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(error = %e, frame = excerpt(raw), "Unrecognized frame");
            InboundMessage::Unrecognized(raw.to_string())
        }
    }
}

/// The frame's `type` tag, as an entry of the known-types table.
fn tagged_kind(value: &Value) -> Result<&'static str, DecodeError> {
    let ty = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(DecodeError::BadTypeField)?;
    TaggedFrame::KNOWN_TYPES
        .iter()
        .copied()
        .find(|known| *known == ty)
        .ok_or_else(|| DecodeError::UnknownType(ty.to_string()))
}

fn decode_tagged(value: Value) -> Result<InboundMessage, DecodeError> {
    let kind = tagged_kind(&value)?;
    serde_json::from_value::<TaggedFrame>(value)
        .map(InboundMessage::from)
        .map_err(|source| DecodeError::Payload { kind, source })
}

fn decode_other_players(rest: &str) -> Result<InboundMessage, DecodeError> {
    if let Ok(players) = serde_json::from_str::<Vec<PlayerPosition>>(rest) {
        return Ok(InboundMessage::PlayersList(players));
    }
    serde_json::from_str::<PlayersWrapper>(rest)
        .map(|wrapper| InboundMessage::PlayersList(wrapper.player))
        .map_err(|source| DecodeError::Payload {
            kind: OTHER_PLAYERS_PREFIX,
            source,
        })
}

fn excerpt(raw: &str) -> &str {
    match raw.char_indices().nth(LOG_EXCERPT) {
        Some((idx, _)) => &raw[..idx],
        None => raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GameStarted;

    fn pos(login: &str, x: f32, y: f32) -> PlayerPosition {
        PlayerPosition::new(login, x, y)
    }

    #[test]
    fn tagged_player_update() {
        let msg = decode(r#"{"type":"player_update","data":{"login":"a","x":1.0,"y":2.0}}"#);
        assert_eq!(msg, InboundMessage::PlayerUpdate(pos("a", 1.0, 2.0)));
    }

    #[test]
    fn legacy_player_matches_tagged() {
        let legacy = decode(r#"player{"login":"b","x":3.0,"y":4.0}"#);
        let tagged = decode(r#"{"type":"player_update","data":{"login":"b","x":3.0,"y":4.0}}"#);
        assert_eq!(legacy, tagged);
        assert_eq!(legacy, InboundMessage::PlayerUpdate(pos("b", 3.0, 4.0)));
    }

    #[test]
    fn tagged_players_list() {
        let msg = decode(
            r#"{"type":"players_list","data":[{"login":"a","x":0,"y":0},{"login":"b","x":5,"y":6}]}"#,
        );
        assert_eq!(
            msg,
            InboundMessage::PlayersList(vec![pos("a", 0.0, 0.0), pos("b", 5.0, 6.0)])
        );
    }

    #[test]
    fn tagged_game_started() {
        let msg = decode(r#"{"type":"game_started","groupId":"g1","message":"go"}"#);
        assert_eq!(
            msg,
            InboundMessage::GameStarted(GameStarted {
                group_id: "g1".into(),
                message: "go".into(),
            })
        );
    }

    #[test]
    fn legacy_other_players_list_and_wrapper() {
        let list = decode(r#"otherPlayers[{"login":"c","x":1,"y":1}]"#);
        let wrapper = decode(r#"otherPlayers{"player":[{"login":"c","x":1,"y":1}]}"#);
        let expected = InboundMessage::PlayersList(vec![pos("c", 1.0, 1.0)]);
        assert_eq!(list, expected);
        assert_eq!(wrapper, expected);
    }

    #[test]
    fn legacy_other_players_garbage() {
        let raw = r#"otherPlayers{"nope":1}"#;
        assert!(matches!(
            try_decode(raw),
            Err(DecodeError::Payload {
                kind: "otherPlayers",
                ..
            })
        ));
        assert_eq!(decode(raw), InboundMessage::Unrecognized(raw.into()));
    }

    #[test]
    fn bare_array_is_players_list() {
        let msg = decode(r#"[{"login":"d","x":2,"y":3}]"#);
        assert_eq!(msg, InboundMessage::PlayersList(vec![pos("d", 2.0, 3.0)]));
    }

    #[test]
    fn truncated_json_is_unrecognized() {
        let raw = r#"{"type":"player_update","data":{"login":"a","x":1.0"#;
        assert_eq!(decode(raw), InboundMessage::Unrecognized(raw.into()));

        let raw = r#"player{"login":"a","x""#;
        assert!(matches!(try_decode(raw), Err(DecodeError::Payload { .. })));
        assert_eq!(decode(raw), InboundMessage::Unrecognized(raw.into()));
    }

    #[test]
    fn unknown_type_is_unrecognized() {
        let raw = r#"{"type":"chat","data":"hi"}"#;
        assert!(matches!(try_decode(raw), Err(DecodeError::UnknownType(t)) if t == "chat"));
        assert_eq!(decode(raw), InboundMessage::Unrecognized(raw.into()));
    }

    #[test]
    fn non_string_type_is_unrecognized() {
        assert!(matches!(
            try_decode(r#"{"type":7}"#),
            Err(DecodeError::BadTypeField)
        ));
    }

    #[test]
    fn tagged_but_malformed_data() {
        let raw = r#"{"type":"player_update","data":[1,2]}"#;
        assert!(matches!(
            try_decode(raw),
            Err(DecodeError::Payload {
                kind: "player_update",
                ..
            })
        ));
    }

    #[test]
    fn tag_lookup_leaves_frame_intact() {
        let value = serde_json::json!({"type": "game_started", "groupId": "g", "message": "m"});
        assert_eq!(tagged_kind(&value).unwrap(), "game_started");
        assert!(matches!(
            tagged_kind(&serde_json::json!({"type": null})),
            Err(DecodeError::BadTypeField)
        ));
        assert_eq!(
            decode_tagged(value).unwrap(),
            InboundMessage::GameStarted(GameStarted {
                group_id: "g".into(),
                message: "m".into(),
            })
        );
    }

    #[test]
    fn plain_text_matches_nothing() {
        assert!(matches!(try_decode("hello"), Err(DecodeError::NoConvention)));
        assert!(matches!(
            try_decode(r#"{"login":"a","x":1,"y":2}"#),
            Err(DecodeError::NoConvention)
        ));
    }

    #[test]
    fn excerpt_respects_char_boundaries() {
        let long = "é".repeat(300);
        assert_eq!(excerpt(&long).chars().count(), LOG_EXCERPT);
        assert_eq!(excerpt("short"), "short");
    }
}
