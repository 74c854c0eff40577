//! `GET /ws`: one task per socket multiplexing client requests, the tenant
//! event broadcast and keepalive pings.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use server_api::{chat, session, Actor, Envelope};
use shared::{
    domain::RoomId,
    error::ApiError,
    protocol::{ClientRequest, SendMessageRequest, ServerEvent},
};
use tokio::{
    sync::broadcast::error::RecvError,
    time::{interval_at, Instant},
};
use tracing::{debug, info, warn};

use crate::{
    app_state::AppState,
    http::{ApiQuery, HttpError},
};

const TYPING_THROTTLE: Duration = Duration::from_secs(1);

#[derive(Debug, Deserialize)]
pub(crate) struct WsQuery {
    token: String,
}

pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    ApiQuery(q): ApiQuery<WsQuery>,
) -> Result<Response, HttpError> {
    let actor = session::authenticate(&state.api, &q.token).await?;
    Ok(ws.on_upgrade(move |socket| ws_connection(state, socket, actor)))
}

/// Per-socket routing state: the rooms this socket joined and when it last
/// forwarded a typing event for each room.
#[derive(Debug)]
pub(crate) struct SocketSession {
    actor: Actor,
    joined_rooms: HashSet<RoomId>,
    last_typing: HashMap<RoomId, Instant>,
}

impl SocketSession {
    pub(crate) fn new(actor: Actor) -> Self {
        Self {
            actor,
            joined_rooms: HashSet::new(),
            last_typing: HashMap::new(),
        }
    }

    pub(crate) fn join(&mut self, room_id: RoomId) {
        self.joined_rooms.insert(room_id);
    }

    pub(crate) fn leave(&mut self, room_id: RoomId) {
        self.joined_rooms.remove(&room_id);
        self.last_typing.remove(&room_id);
    }

    pub(crate) fn has_joined(&self, room_id: RoomId) -> bool {
        self.joined_rooms.contains(&room_id)
    }

    /// Whether the envelope goes out on this socket. Being removed from a
    /// room also drops it from the joined set.
    pub(crate) fn accept(&mut self, envelope: &Envelope) -> bool {
        if !envelope.delivers_to(self.actor.tenant_id, self.actor.user_id, &self.joined_rooms) {
            return false;
        }
        if let ServerEvent::RoomRemoved { room_id } = envelope.event {
            self.leave(room_id);
        }
        true
    }

    pub(crate) fn typing_allowed(&mut self, room_id: RoomId, now: Instant) -> bool {
        match self.last_typing.get(&room_id) {
            Some(last) if now.duration_since(*last) < TYPING_THROTTLE => false,
            _ => {
                self.last_typing.insert(room_id, now);
                true
            }
        }
    }

    fn typing_cleared(&mut self, room_id: RoomId) {
        self.last_typing.remove(&room_id);
    }
}

async fn send_event<S>(sender: &mut S, event: &ServerEvent) -> bool
where
    S: futures::Sink<Message> + Unpin,
{
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(error) => {
            warn!(%error, "failed to encode server event");
            return true;
        }
    };
    sender.send(Message::Text(text)).await.is_ok()
}

async fn ws_connection(state: Arc<AppState>, socket: WebSocket, actor: Actor) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = state.api.subscribe();
    let mut session = SocketSession::new(actor);
    let keepalive = state.keepalive;
    let mut ping = interval_at(
        Instant::now() + keepalive.ping_interval,
        keepalive.ping_interval,
    );
    let mut last_seen = Instant::now();

    info!(
        tenant_id = actor.tenant_id.0,
        user_id = actor.user_id.0,
        "socket connected"
    );

    loop {
        tokio::select! {
            incoming = receiver.next() => {
                let message = match incoming {
                    Some(Ok(message)) => message,
                    Some(Err(error)) => {
                        debug!(%error, "socket read failed");
                        break;
                    }
                    None => break,
                };
                last_seen = Instant::now();
                match message {
                    Message::Text(text) => {
                        let replies = handle_client_text(&state, &mut session, &text).await;
                        let mut open = true;
                        for reply in &replies {
                            if !send_event(&mut sender, reply).await {
                                open = false;
                                break;
                            }
                        }
                        if !open {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => {}
                }
            }
            received = events.recv() => {
                match received {
                    Ok(envelope) => {
                        if session.accept(&envelope) && !send_event(&mut sender, &envelope.event).await {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(
                            user_id = actor.user_id.0,
                            skipped,
                            "socket fell behind the event stream"
                        );
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            _ = ping.tick() => {
                if last_seen.elapsed() > keepalive.pong_timeout {
                    info!(user_id = actor.user_id.0, "closing unresponsive socket");
                    break;
                }
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    let _ = sender.close().await;
    info!(
        tenant_id = actor.tenant_id.0,
        user_id = actor.user_id.0,
        "socket disconnected"
    );
}

/// Runs one client request and returns the events that go straight back to
/// this socket. Everything fanned out to other sockets goes through the
/// broadcast channel.
pub(crate) async fn handle_client_text(
    state: &AppState,
    session: &mut SocketSession,
    text: &str,
) -> Vec<ServerEvent> {
    let request = match serde_json::from_str::<ClientRequest>(text) {
        Ok(request) => request,
        Err(error) => {
            return vec![ServerEvent::Error(ApiError::validation(format!(
                "malformed request: {error}"
            )))]
        }
    };
    let actor = session.actor;
    let api = &state.api;

    let outcome = match request {
        ClientRequest::JoinRoom { room_id } => chat::join_room(api, &actor, room_id)
            .await
            .map(|()| {
                session.join(room_id);
                vec![ServerEvent::RoomJoined { room_id }]
            }),
        ClientRequest::LeaveRoom { room_id } => {
            session.leave(room_id);
            Ok(vec![ServerEvent::RoomLeft { room_id }])
        }
        ClientRequest::Typing { room_id } => {
            if session.typing_allowed(room_id, Instant::now()) {
                chat::start_typing(api, &actor, room_id).await.map(|()| Vec::new())
            } else {
                Ok(Vec::new())
            }
        }
        ClientRequest::StopTyping { room_id } => {
            session.typing_cleared(room_id);
            chat::stop_typing(api, &actor, room_id).await.map(|()| Vec::new())
        }
        ClientRequest::NewMessage {
            room_id,
            body,
            client_nonce,
            attachment_ids,
        } => {
            let request = SendMessageRequest {
                body,
                client_nonce,
                attachment_ids,
            };
            chat::send_message(api, &actor, room_id, &request)
                .await
                .map(|_| {
                    session.typing_cleared(room_id);
                    Vec::new()
                })
        }
        ClientRequest::MarkRead {
            room_id,
            message_id,
        } => chat::mark_read(api, &actor, room_id, message_id)
            .await
            .map(|_| Vec::new()),
        ClientRequest::Ping => Ok(vec![ServerEvent::Pong]),
    };

    outcome.unwrap_or_else(|err| vec![ServerEvent::Error(err)])
}

#[cfg(test)]
#[path = "tests/ws_tests.rs"]
mod tests;
