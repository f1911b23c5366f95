//! Arena server: accepts game sessions and relays positions within a group.

use crate::arena::{Arena, ConnId};
use crate::protocol::{ArenaEvent, WireFormat};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use rally_core::PlayerPosition;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

type SharedArena = Arc<RwLock<Arena>>;
type Sink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Group used when a client does not name one.
const DEFAULT_GROUP: &str = "menu";

pub struct ServerOptions {
    pub addr: SocketAddr,
    pub format: WireFormat,
    pub start_at: Option<usize>,
}

pub async fn run(options: ServerOptions) -> anyhow::Result<()> {
    let arena = Arc::new(RwLock::new(Arena::new(64, options.start_at)));
    let listener = TcpListener::bind(options.addr).await?;
    tracing::info!(format = ?options.format, "Listening on ws://{}", options.addr);

    loop {
        let (stream, client_addr) = listener.accept().await?;
        let arena = arena.clone();
        let format = options.format;

        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, client_addr, arena, format).await {
                tracing::warn!(%client_addr, "Connection error: {}", e);
            }
        });
    }
}

/// Group id from the `groupId` query parameter of the upgrade request.
fn group_from_query(query: Option<&str>) -> String {
    query
        .and_then(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .find(|(key, _)| key == "groupId")
                .map(|(_, value)| value.into_owned())
        })
        .filter(|group| !group.is_empty())
        .unwrap_or_else(|| DEFAULT_GROUP.to_string())
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    arena: SharedArena,
    format: WireFormat,
) -> anyhow::Result<()> {
    let mut query = None;
    let capture_query = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        query = req.uri().query().map(str::to_string);
        Ok(resp)
    };
    let ws = tokio_tungstenite::accept_hdr_async(stream, capture_query).await?;
    let group = group_from_query(query.as_deref());
    let (mut sink, mut stream) = ws.split();

    tracing::debug!(%addr, %group, "New connection");

    // The first text frame announces the player.
    let player = loop {
        let msg = stream
            .next()
            .await
            .ok_or_else(|| anyhow::anyhow!("Connection closed before first position"))??;
        if let Message::Text(text) = msg {
            break serde_json::from_str::<PlayerPosition>(text.as_str())?;
        }
    };
    let login = player.login().to_string();

    let (conn, mut events) = arena.write().await.join(&group, player);
    tracing::info!(%login, %group, "Player joined");

    let result = relay(&arena, &group, conn, format, &mut sink, &mut stream, &mut events).await;

    arena.write().await.leave(&group, conn, &login);
    tracing::info!(%login, %group, "Player left");
    result
}

async fn relay(
    arena: &SharedArena,
    group: &str,
    conn: ConnId,
    format: WireFormat,
    sink: &mut Sink,
    stream: &mut futures_util::stream::SplitStream<WebSocketStream<TcpStream>>,
    events: &mut broadcast::Receiver<ArenaEvent>,
) -> anyhow::Result<()> {
    loop {
        tokio::select! {
            msg = stream.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => return Ok(()),
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Err(e.into()),
                };
                match serde_json::from_str::<PlayerPosition>(text.as_str()) {
                    Ok(position) => {
                        arena.write().await.update(group, conn, position);
                    }
                    Err(e) => tracing::debug!("Ignoring malformed position: {}", e),
                }
            }

            event = events.recv() => {
                match event {
                    Ok(event) => {
                        let frame = event.encode(format)?;
                        sink.send(Message::Text(frame.into())).await?;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "Client lagging; resending roster");
                        let players = arena.read().await.group(group).map(|g| g.players());
                        if let Some(players) = players {
                            let frame = ArenaEvent::Roster(players).encode(format)?;
                            sink.send(Message::Text(frame.into())).await?;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => return Ok(()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_group_from_query() {
        assert_eq!(group_from_query(Some("username=alice&groupId=g%201")), "g 1");
        assert_eq!(group_from_query(Some("username=alice")), DEFAULT_GROUP);
        assert_eq!(group_from_query(Some("groupId=")), DEFAULT_GROUP);
        assert_eq!(group_from_query(None), DEFAULT_GROUP);
    }
}
