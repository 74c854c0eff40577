use std::{
    collections::HashMap,
    sync::atomic::{AtomicUsize, Ordering},
};

use axum::{
    extract::{
        ws::{Message as WsFrame, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use shared::{
    account::{TenantSummary, UserSummary},
    domain::{Role, TenantId},
    error::ErrorCode,
    protocol::MessageHistoryQuery,
};
use tokio::net::TcpListener;

use super::*;

const TOKEN: &str = "tok-1";
const GENERAL: RoomId = RoomId(1);
const LOCKED: RoomId = RoomId(2);
const OLIVIA: UserId = UserId(10);
const MIA: UserId = UserId(11);

#[derive(Clone, Default)]
struct MockServer {
    auth_headers: Arc<Mutex<Vec<String>>>,
    sent: Arc<Mutex<Vec<SendMessageRequest>>>,
    history_queries: Arc<Mutex<Vec<MessageHistoryQuery>>>,
    connections: Arc<AtomicUsize>,
    socket_requests: Arc<Mutex<Vec<(usize, ClientRequest)>>>,
}

type MockResult<T> = std::result::Result<Json<T>, (StatusCode, Json<ApiError>)>;

fn session() -> SessionResponse {
    SessionResponse {
        token: TOKEN.into(),
        tenant: TenantSummary {
            tenant_id: TenantId(1),
            name: "Acme".into(),
            slug: "acme".into(),
        },
        user: UserSummary {
            user_id: OLIVIA,
            username: "olivia".into(),
            display_name: "Olivia".into(),
            role: Role::Owner,
            deactivated: false,
        },
    }
}

fn chat_message(id: i64, room_id: RoomId, sender_id: UserId, body: &str) -> ChatMessagePayload {
    ChatMessagePayload {
        message_id: MessageId(id),
        room_id,
        sender_id,
        sender_name: format!("user-{}", sender_id.0),
        body: body.into(),
        attachments: Vec::new(),
        reactions: Vec::new(),
        created_at: Utc::now(),
        edited_at: None,
    }
}

async fn login(Json(request): Json<LoginRequest>) -> MockResult<SessionResponse> {
    if request.tenant_slug != "acme" || request.username != "olivia" {
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(ApiError::unauthorized("unknown user")),
        ));
    }
    Ok(Json(session()))
}

async fn list_rooms(State(server): State<MockServer>, headers: HeaderMap) -> Json<Vec<ChatRoomSummary>> {
    if let Some(value) = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        server.auth_headers.lock().await.push(value.to_string());
    }
    Json(vec![ChatRoomSummary {
        room_id: GENERAL,
        name: "general".into(),
        is_direct: false,
        created_by: OLIVIA,
        member_count: 2,
        unread_count: 0,
        last_message_at: None,
    }])
}

async fn send_message(
    State(server): State<MockServer>,
    Path(room_id): Path<i64>,
    Json(request): Json<SendMessageRequest>,
) -> MockResult<ChatMessagePayload> {
    if RoomId(room_id) == LOCKED {
        return Err((
            StatusCode::FORBIDDEN,
            Json(ApiError::forbidden("not a member of this room")),
        ));
    }
    let body = request.body.clone();
    server.sent.lock().await.push(request);
    Ok(Json(chat_message(42, RoomId(room_id), OLIVIA, &body)))
}

async fn history(
    State(server): State<MockServer>,
    Path(room_id): Path<i64>,
    Query(query): Query<MessageHistoryQuery>,
) -> Json<MessagePage> {
    let room_id = RoomId(room_id);
    let page = match query.before {
        None => MessagePage {
            messages: vec![
                chat_message(3, room_id, MIA, "c"),
                chat_message(4, room_id, MIA, "d"),
            ],
            has_more: true,
        },
        Some(_) => MessagePage {
            messages: vec![
                chat_message(1, room_id, MIA, "a"),
                chat_message(2, room_id, MIA, "b"),
            ],
            has_more: false,
        },
    };
    server.history_queries.lock().await.push(query);
    Json(page)
}

async fn socket(
    State(server): State<MockServer>,
    Query(params): Query<HashMap<String, String>>,
    upgrade: WebSocketUpgrade,
) -> Response {
    if params.get("token").map(String::as_str) != Some(TOKEN) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    upgrade.on_upgrade(move |socket| mock_socket(server, socket))
}

/// Answers every join with one message. The first connection is closed right
/// after its first join so the client has to reconnect.
async fn mock_socket(server: MockServer, mut socket: WebSocket) {
    let connection = server.connections.fetch_add(1, Ordering::SeqCst) + 1;
    while let Some(Ok(frame)) = socket.recv().await {
        let WsFrame::Text(text) = frame else { continue };
        let Ok(request) = serde_json::from_str::<ClientRequest>(&text) else {
            continue;
        };
        server
            .socket_requests
            .lock()
            .await
            .push((connection, request.clone()));
        let ClientRequest::JoinRoom { room_id } = request else {
            continue;
        };
        let event = ServerEvent::MessageCreated {
            message: chat_message(
                connection as i64,
                room_id,
                MIA,
                &format!("hello #{connection}"),
            ),
            client_nonce: None,
        };
        let text = serde_json::to_string(&event).expect("encode event");
        if socket.send(WsFrame::Text(text)).await.is_err() {
            return;
        }
        if connection == 1 {
            let _ = socket.send(WsFrame::Close(None)).await;
            return;
        }
    }
}

async fn spawn_mock_server() -> (String, MockServer) {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let server = MockServer::default();
    let app = Router::new()
        .route("/login", post(login))
        .route("/chat/rooms", get(list_rooms))
        .route("/chat/rooms/:id/messages", get(history).post(send_message))
        .route("/ws", get(socket))
        .with_state(server.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), server)
}

fn fast_options() -> ClientOptions {
    ClientOptions {
        reconnect_delay: Duration::from_millis(100),
        ..ClientOptions::default()
    }
}

async fn wait_for(
    events: &mut broadcast::Receiver<ClientEvent>,
    mut wanted: impl FnMut(&ClientEvent) -> bool,
) -> ClientEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.expect("event stream");
            if wanted(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event in time")
}

fn is_message(event: &ClientEvent, body: &str) -> bool {
    matches!(
        event,
        ClientEvent::Server(ServerEvent::MessageCreated { message, .. }) if message.body == body
    )
}

#[test]
fn socket_url_follows_the_server_scheme() {
    let client = ChatClient::from_session(
        "https://chat.example.com/",
        session(),
        ClientOptions::default(),
    );
    let url = client.socket_url().expect("url");
    assert_eq!(url.as_str(), "wss://chat.example.com/ws?token=tok-1");

    let client = ChatClient::from_session("ftp://chat.example.com", session(), ClientOptions::default());
    assert!(client.socket_url().is_err());
}

#[tokio::test]
async fn login_keeps_the_token_for_later_requests() {
    let (server_url, server) = spawn_mock_server().await;
    let client = ChatClient::login(&server_url, "acme", "olivia")
        .await
        .expect("login");
    assert_eq!(client.token(), TOKEN);
    assert_eq!(client.user_id(), OLIVIA);

    let rooms = client.rooms().await.expect("rooms");
    assert_eq!(rooms.len(), 1);
    assert_eq!(
        server.auth_headers.lock().await.as_slice(),
        ["Bearer tok-1".to_string()]
    );
    let cached = client.with_state(|state| state.rooms().count()).await;
    assert_eq!(cached, 1);
}

#[tokio::test]
async fn login_failures_carry_the_server_error() {
    let (server_url, _server) = spawn_mock_server().await;
    let err = ChatClient::login(&server_url, "acme", "mallory")
        .await
        .err()
        .expect("login refused");
    let api_error = err.downcast_ref::<ApiError>().expect("api error");
    assert_eq!(api_error.code, ErrorCode::Unauthorized);
}

#[tokio::test]
async fn sent_messages_replace_their_pending_entry() {
    let (server_url, server) = spawn_mock_server().await;
    let client = ChatClient::from_session(&server_url, session(), fast_options());

    let message = client.send_message(GENERAL, "ship it").await.expect("send");
    assert_eq!(message.body, "ship it");

    let sent = server.sent.lock().await;
    assert_eq!(sent.len(), 1);
    assert!(sent[0].client_nonce.as_deref().is_some_and(|nonce| !nonce.is_empty()));
    drop(sent);

    let (bodies, pending) = client
        .with_state(|state| {
            let bodies: Vec<String> = state
                .messages(GENERAL)
                .into_iter()
                .map(|m| m.body.clone())
                .collect();
            (bodies, state.pending(GENERAL).len())
        })
        .await;
    assert_eq!(bodies, ["ship it"]);
    assert_eq!(pending, 0);
}

#[tokio::test]
async fn rejected_messages_are_marked_failed() {
    let (server_url, _server) = spawn_mock_server().await;
    let client = ChatClient::from_session(&server_url, session(), fast_options());
    let mut events = client.subscribe();

    let err = client
        .send_message(LOCKED, "let me in")
        .await
        .expect_err("forbidden");
    assert_eq!(
        err.downcast_ref::<ApiError>().map(|e| e.code),
        Some(ErrorCode::Forbidden)
    );

    let pending = client
        .with_state(|state| state.pending(LOCKED).to_vec())
        .await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].status, PendingStatus::Failed);
    assert_eq!(pending[0].body, "let me in");
    assert!(matches!(
        wait_for(&mut events, |e| matches!(e, ClientEvent::Error(_))).await,
        ClientEvent::Error(_)
    ));
}

#[tokio::test]
async fn history_pages_walk_backwards() {
    let (server_url, server) = spawn_mock_server().await;
    let client = ChatClient::from_session(&server_url, session(), fast_options());

    let newest = client.fetch_history(GENERAL, None).await.expect("newest");
    assert!(newest.has_more);
    let older = client.load_older(GENERAL).await.expect("older");
    assert!(!older.has_more);

    let queries = server.history_queries.lock().await;
    assert_eq!(queries.len(), 2);
    assert_eq!(queries[0].before, None);
    assert_eq!(queries[0].limit, Some(50));
    assert_eq!(queries[1].before, Some(3));
    drop(queries);

    let (ids, has_more) = client
        .with_state(|state| {
            let ids: Vec<i64> = state
                .messages(GENERAL)
                .into_iter()
                .map(|m| m.message_id.0)
                .collect();
            (ids, state.has_more(GENERAL))
        })
        .await;
    assert_eq!(ids, [1, 2, 3, 4]);
    assert!(!has_more);
}

#[tokio::test]
async fn socket_reconnects_and_rejoins_rooms() {
    let (server_url, server) = spawn_mock_server().await;
    let client = ChatClient::from_session(&server_url, session(), fast_options());
    let mut events = client.subscribe();

    client.connect().await.expect("connect");
    wait_for(&mut events, |e| matches!(e, ClientEvent::Connected)).await;
    client.join_room(GENERAL).await;

    wait_for(&mut events, |e| is_message(e, "hello #1")).await;
    wait_for(&mut events, |e| matches!(e, ClientEvent::Disconnected)).await;
    wait_for(&mut events, |e| matches!(e, ClientEvent::Connected)).await;
    wait_for(&mut events, |e| is_message(e, "hello #2")).await;

    let joins: Vec<(usize, RoomId)> = server
        .socket_requests
        .lock()
        .await
        .iter()
        .filter_map(|(connection, request)| match request {
            ClientRequest::JoinRoom { room_id } => Some((*connection, *room_id)),
            _ => None,
        })
        .collect();
    assert_eq!(joins, [(1, GENERAL), (2, GENERAL)]);

    let bodies: Vec<String> = client
        .with_state(|state| {
            state
                .messages(GENERAL)
                .into_iter()
                .map(|m| m.body.clone())
                .collect()
        })
        .await;
    assert_eq!(bodies, ["hello #1", "hello #2"]);

    client.typing(GENERAL).await;
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let typed = server
                .socket_requests
                .lock()
                .await
                .iter()
                .any(|(connection, request)| {
                    *connection == 2 && matches!(request, ClientRequest::Typing { room_id } if *room_id == GENERAL)
                });
            if typed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("typing reached the server");

    client.disconnect().await;
}
