//! Player position records.

use serde::{Deserialize, Serialize};

/// Where a freshly created local player stands before any input.
pub const DEFAULT_SPAWN: (f32, f32) = (500.0, 500.0);

/// A player's identity and map coordinates.
///
/// `login` is the routing key: it never changes once the record exists, while
/// the coordinates follow local input or remote updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerPosition {
    login: String,
    pub x: f32,
    pub y: f32,
}

impl PlayerPosition {
    pub fn new(login: impl Into<String>, x: f32, y: f32) -> Self {
        Self {
            login: login.into(),
            x,
            y,
        }
    }

    /// A player standing on the default spawn point.
    pub fn spawn(login: impl Into<String>) -> Self {
        let (x, y) = DEFAULT_SPAWN;
        Self::new(login, x, y)
    }

    pub fn login(&self) -> &str {
        &self.login
    }

    /// Move by a delta from local input.
    pub fn translate(&mut self, dx: f32, dy: f32) {
        self.x += dx;
        self.y += dy;
    }

    /// Take the coordinates of a newer record for the same player.
    pub fn move_to(&mut self, other: &PlayerPosition) {
        debug_assert_eq!(self.login, other.login);
        self.x = other.x;
        self.y = other.y;
    }
}
