//! Route paths understood by the game server.

use url::form_urlencoded;

/// Group id the server uses for the lobby notification channel.
pub const MENU_GROUP: &str = "menu";

/// Path for joining a group's game session.
pub fn game_route(username: &str, group_id: &str) -> String {
    let query = form_urlencoded::Serializer::new(String::new())
        .append_pair("username", username)
        .append_pair("groupId", group_id)
        .finish();
    format!("/game?{}", query)
}

/// Path for receiving lobby notifications (such as game-started) outside a
/// running game.
pub fn menu_route(username: &str) -> String {
    game_route(username, MENU_GROUP)
}
