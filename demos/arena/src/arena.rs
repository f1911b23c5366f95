//! Group membership and positions.

use crate::protocol::ArenaEvent;
use rally_core::{GameStarted, PlayerPosition};
use std::collections::HashMap;
use tokio::sync::broadcast;

/// Identifies one client connection. A login that reconnects gets a new one.
pub type ConnId = u64;

struct Member {
    conn: ConnId,
    position: PlayerPosition,
}

/// One play group: who is in it and where they stand.
pub struct Group {
    players: HashMap<String, Member>,
    events: broadcast::Sender<ArenaEvent>,
    started: bool,
}

impl Group {
    fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        Self {
            players: HashMap::new(),
            events,
            started: false,
        }
    }

    /// Everyone in the group, sorted by login.
    pub fn players(&self) -> Vec<PlayerPosition> {
        let mut players: Vec<_> = self.players.values().map(|m| m.position.clone()).collect();
        players.sort_by(|a, b| a.login().cmp(b.login()));
        players
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }
}

/// All groups on this server.
pub struct Arena {
    groups: HashMap<String, Group>,
    event_capacity: usize,
    start_at: Option<usize>,
    next_conn: ConnId,
}

impl Arena {
    /// `start_at` announces the game once a group reaches that many players.
    pub fn new(event_capacity: usize, start_at: Option<usize>) -> Self {
        Self {
            groups: HashMap::new(),
            event_capacity,
            start_at,
            next_conn: 0,
        }
    }

    /// Add a player and return its connection id and the group's event feed.
    /// A player already in the group under the same login is replaced, and
    /// the replaced connection loses its membership.
    pub fn join(
        &mut self,
        group_id: &str,
        player: PlayerPosition,
    ) -> (ConnId, broadcast::Receiver<ArenaEvent>) {
        self.next_conn += 1;
        let conn = self.next_conn;
        let capacity = self.event_capacity;
        let group = self
            .groups
            .entry(group_id.to_string())
            .or_insert_with(|| Group::new(capacity));

        let rx = group.events.subscribe();
        group.players.insert(
            player.login().to_string(),
            Member {
                conn,
                position: player,
            },
        );
        let _ = group.events.send(ArenaEvent::Roster(group.players()));

        if let Some(start_at) = self.start_at
            && !group.started
            && group.len() >= start_at
        {
            group.started = true;
            tracing::info!(group = group_id, players = group.len(), "Starting game");
            let _ = group.events.send(ArenaEvent::Started(GameStarted {
                group_id: group_id.to_string(),
                message: format!("{} players ready", group.len()),
            }));
        }
        (conn, rx)
    }

    /// Record a move from `conn`. Moves for unknown players, or from a
    /// connection that no longer owns the login, are ignored.
    pub fn update(&mut self, group_id: &str, conn: ConnId, player: PlayerPosition) -> bool {
        let Some(group) = self.groups.get_mut(group_id) else {
            return false;
        };
        let Some(member) = group.players.get_mut(player.login()) else {
            return false;
        };
        if member.conn != conn {
            return false;
        }
        member.position.move_to(&player);
        let _ = group.events.send(ArenaEvent::Moved(player));
        true
    }

    /// Remove the player owned by `conn`. Empty groups are dropped.
    pub fn leave(&mut self, group_id: &str, conn: ConnId, login: &str) {
        let Some(group) = self.groups.get_mut(group_id) else {
            return;
        };
        if !group.players.get(login).is_some_and(|m| m.conn == conn) {
            return;
        }
        group.players.remove(login);
        if group.players.is_empty() {
            self.groups.remove(group_id);
        } else {
            let _ = group.events.send(ArenaEvent::Roster(group.players()));
        }
    }

    pub fn group(&self, group_id: &str) -> Option<&Group> {
        self.groups.get(group_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roster(event: ArenaEvent) -> Vec<String> {
        match event {
            ArenaEvent::Roster(players) => players.iter().map(|p| p.login().to_string()).collect(),
            other => panic!("expected roster, got {:?}", other),
        }
    }

    #[test]
    fn join_announces_roster() {
        let mut arena = Arena::new(16, None);
        let (_, mut alice) = arena.join("g1", PlayerPosition::spawn("alice"));
        assert_eq!(roster(alice.try_recv().unwrap()), vec!["alice"]);

        arena.join("g1", PlayerPosition::spawn("bob"));
        assert_eq!(roster(alice.try_recv().unwrap()), vec!["alice", "bob"]);
    }

    #[test]
    fn groups_are_isolated() {
        let mut arena = Arena::new(16, None);
        let (_, mut alice) = arena.join("g1", PlayerPosition::spawn("alice"));
        alice.try_recv().unwrap();

        arena.join("g2", PlayerPosition::spawn("bob"));
        assert!(alice.try_recv().is_err());
    }

    #[test]
    fn update_moves_known_player() {
        let mut arena = Arena::new(16, None);
        let (conn, mut rx) = arena.join("g1", PlayerPosition::spawn("alice"));
        rx.try_recv().unwrap();

        assert!(arena.update("g1", conn, PlayerPosition::new("alice", 1.0, 2.0)));
        assert!(!arena.update("g1", conn, PlayerPosition::new("mallory", 1.0, 2.0)));
        assert!(!arena.update("nope", conn, PlayerPosition::new("alice", 1.0, 2.0)));

        match rx.try_recv().unwrap() {
            ArenaEvent::Moved(p) => assert_eq!(p, PlayerPosition::new("alice", 1.0, 2.0)),
            other => panic!("expected move, got {:?}", other),
        }
        assert_eq!(
            arena.group("g1").unwrap().players(),
            vec![PlayerPosition::new("alice", 1.0, 2.0)]
        );
    }

    #[test]
    fn leave_drops_empty_group() {
        let mut arena = Arena::new(16, None);
        let (alice_conn, mut alice) = arena.join("g1", PlayerPosition::spawn("alice"));
        let (bob_conn, _) = arena.join("g1", PlayerPosition::spawn("bob"));
        alice.try_recv().unwrap();
        alice.try_recv().unwrap();

        arena.leave("g1", bob_conn, "bob");
        assert_eq!(roster(alice.try_recv().unwrap()), vec!["alice"]);

        arena.leave("g1", alice_conn, "alice");
        assert!(arena.group("g1").is_none());
    }

    #[test]
    fn rejoin_survives_stale_connection() {
        let mut arena = Arena::new(16, None);
        let (stale, _) = arena.join("g1", PlayerPosition::spawn("alice"));
        let (fresh, mut rx) = arena.join("g1", PlayerPosition::spawn("alice"));
        assert_ne!(stale, fresh);
        rx.try_recv().unwrap();

        // The old handler exits after the reconnect.
        assert!(!arena.update("g1", stale, PlayerPosition::new("alice", 9.0, 9.0)));
        arena.leave("g1", stale, "alice");
        assert!(rx.try_recv().is_err());

        assert!(arena.update("g1", fresh, PlayerPosition::new("alice", 1.0, 2.0)));
        assert_eq!(
            arena.group("g1").unwrap().players(),
            vec![PlayerPosition::new("alice", 1.0, 2.0)]
        );
    }

    #[test]
    fn start_fires_once() {
        let mut arena = Arena::new(16, Some(2));
        let (_, mut alice) = arena.join("g1", PlayerPosition::spawn("alice"));
        arena.join("g1", PlayerPosition::spawn("bob"));
        arena.join("g1", PlayerPosition::spawn("carol"));

        let started = std::iter::from_fn(|| alice.try_recv().ok())
            .filter(|e| matches!(e, ArenaEvent::Started(_)))
            .count();
        assert_eq!(started, 1);
    }
}
