//! Chat client for the OKR server: REST calls for rooms, history and sending,
//! plus a socket task that feeds server events into [`ChatState`].

use std::{collections::HashSet, sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use futures::{SinkExt, StreamExt};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use shared::{
    account::{LoginRequest, SessionResponse, SignupRequest},
    domain::{MessageId, RoomId, UserId},
    error::ApiError,
    protocol::{
        ChatMessagePayload, ChatRoomSummary, ClientRequest, CreateRoomRequest, MessagePage,
        SendMessageRequest, ServerEvent,
    },
};
use tokio::{
    sync::{broadcast, mpsc, Mutex},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

pub mod state;

pub use state::{ChatState, PendingMessage, PendingStatus, TypingUser};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const HISTORY_PAGE_SIZE: u32 = 50;

#[derive(Debug, Clone, Copy)]
pub struct ClientOptions {
    /// Fixed wait between socket reconnect attempts.
    pub reconnect_delay: Duration,
    pub history_page_size: u32,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            reconnect_delay: RECONNECT_DELAY,
            history_page_size: HISTORY_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ClientEvent {
    Connected,
    Disconnected,
    /// Already applied to the local state when it is broadcast.
    Server(ServerEvent),
    Error(String),
}

pub struct ChatClient {
    http: Client,
    server_url: String,
    session: SessionResponse,
    options: ClientOptions,
    state: Mutex<ChatState>,
    joined_rooms: Mutex<HashSet<RoomId>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<ClientRequest>>>,
    socket_task: Mutex<Option<JoinHandle<()>>>,
    events: broadcast::Sender<ClientEvent>,
}

/// Turns a non-success response into an error carrying the server's
/// [`ApiError`] when the body has one.
async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return response
            .json::<T>()
            .await
            .context("failed to decode server response");
    }
    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ApiError>(&body) {
        Ok(api_error) => Err(anyhow::Error::new(api_error)),
        Err(_) => Err(anyhow!("server returned {status}: {body}")),
    }
}

fn trim_server_url(server_url: &str) -> String {
    server_url.trim().trim_end_matches('/').to_string()
}

impl ChatClient {
    pub async fn signup(server_url: &str, request: &SignupRequest) -> Result<Arc<Self>> {
        let server_url = trim_server_url(server_url);
        let http = Client::new();
        let response = http
            .post(format!("{server_url}/signup"))
            .json(request)
            .send()
            .await
            .with_context(|| format!("failed to reach {server_url}"))?;
        let session = read_json::<SessionResponse>(response).await?;
        Ok(Self::from_session(&server_url, session, ClientOptions::default()))
    }

    pub async fn login(server_url: &str, tenant_slug: &str, username: &str) -> Result<Arc<Self>> {
        Self::login_with_options(server_url, tenant_slug, username, ClientOptions::default()).await
    }

    pub async fn login_with_options(
        server_url: &str,
        tenant_slug: &str,
        username: &str,
        options: ClientOptions,
    ) -> Result<Arc<Self>> {
        let server_url = trim_server_url(server_url);
        let http = Client::new();
        let response = http
            .post(format!("{server_url}/login"))
            .json(&LoginRequest {
                tenant_slug: tenant_slug.to_string(),
                username: username.to_string(),
            })
            .send()
            .await
            .with_context(|| format!("failed to reach {server_url}"))?;
        let session = read_json::<SessionResponse>(response).await?;
        info!(
            tenant = %session.tenant.slug,
            user_id = session.user.user_id.0,
            "logged in"
        );
        Ok(Self::from_session(&server_url, session, options))
    }

    pub fn from_session(server_url: &str, session: SessionResponse, options: ClientOptions) -> Arc<Self> {
        let (events, _) = broadcast::channel(1024);
        let user_id = session.user.user_id;
        Arc::new(Self {
            http: Client::new(),
            server_url: trim_server_url(server_url),
            session,
            options,
            state: Mutex::new(ChatState::new(user_id)),
            joined_rooms: Mutex::new(HashSet::new()),
            outbound: Mutex::new(None),
            socket_task: Mutex::new(None),
            events,
        })
    }

    pub fn token(&self) -> &str {
        &self.session.token
    }

    pub fn user_id(&self) -> UserId {
        self.session.user.user_id
    }

    pub fn session(&self) -> &SessionResponse {
        &self.session
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Reads the local state under its lock.
    pub async fn with_state<R>(&self, read: impl FnOnce(&ChatState) -> R) -> R {
        let state = self.state.lock().await;
        read(&state)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.bearer_auth(&self.session.token)
    }

    pub async fn rooms(&self) -> Result<Vec<ChatRoomSummary>> {
        let response = self
            .authorized(self.http.get(format!("{}/chat/rooms", self.server_url)))
            .send()
            .await?;
        let rooms = read_json::<Vec<ChatRoomSummary>>(response).await?;
        self.state.lock().await.set_rooms(rooms.clone());
        Ok(rooms)
    }

    pub async fn create_room(&self, name: &str, member_ids: Vec<UserId>) -> Result<ChatRoomSummary> {
        let response = self
            .authorized(self.http.post(format!("{}/chat/rooms", self.server_url)))
            .json(&CreateRoomRequest {
                name: name.to_string(),
                member_ids,
            })
            .send()
            .await?;
        let room = read_json::<ChatRoomSummary>(response).await?;
        self.state.lock().await.upsert_room(room.clone());
        Ok(room)
    }

    /// Fetches the page of messages older than `before` (the newest page
    /// when `None`) and merges it into the local timeline.
    pub async fn fetch_history(&self, room_id: RoomId, before: Option<MessageId>) -> Result<MessagePage> {
        let mut query = vec![("limit", self.options.history_page_size.to_string())];
        if let Some(before) = before {
            query.push(("before", before.0.to_string()));
        }
        let response = self
            .authorized(self.http.get(format!(
                "{}/chat/rooms/{}/messages",
                self.server_url, room_id.0
            )))
            .query(&query)
            .send()
            .await?;
        let page = read_json::<MessagePage>(response).await?;
        self.state.lock().await.merge_history(room_id, page.clone());
        Ok(page)
    }

    /// Loads the page before the oldest message held locally.
    pub async fn load_older(&self, room_id: RoomId) -> Result<MessagePage> {
        let before = self.state.lock().await.oldest_message_id(room_id);
        self.fetch_history(room_id, before).await
    }

    /// Shows the message as pending right away, then posts it. The pending
    /// entry is replaced by the stored message on success and marked failed
    /// otherwise.
    pub async fn send_message(&self, room_id: RoomId, body: &str) -> Result<ChatMessagePayload> {
        let client_nonce = Uuid::new_v4().to_string();
        self.state
            .lock()
            .await
            .add_pending(room_id, &client_nonce, body);

        let result = self.post_message(room_id, body, &client_nonce).await;
        let mut state = self.state.lock().await;
        match result {
            Ok(message) => {
                state.confirm_pending(&client_nonce, message.clone());
                Ok(message)
            }
            Err(err) => {
                state.fail_pending(room_id, &client_nonce);
                drop(state);
                warn!(room_id = room_id.0, error = %err, "message send failed");
                let _ = self.events.send(ClientEvent::Error(format!("send failed: {err}")));
                Err(err)
            }
        }
    }

    async fn post_message(&self, room_id: RoomId, body: &str, client_nonce: &str) -> Result<ChatMessagePayload> {
        let response = self
            .authorized(self.http.post(format!(
                "{}/chat/rooms/{}/messages",
                self.server_url, room_id.0
            )))
            .json(&SendMessageRequest {
                body: body.to_string(),
                client_nonce: Some(client_nonce.to_string()),
                attachment_ids: Vec::new(),
            })
            .send()
            .await?;
        read_json(response).await
    }

    fn socket_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.server_url)
            .with_context(|| format!("invalid server url '{}'", self.server_url))?;
        let scheme = match url.scheme() {
            "http" => "ws",
            "https" => "wss",
            other => return Err(anyhow!("unsupported server url scheme '{other}'")),
        };
        url.set_scheme(scheme)
            .map_err(|()| anyhow!("cannot switch '{}' to {scheme}", self.server_url))?;
        url.set_path("/ws");
        url.query_pairs_mut().clear().append_pair("token", &self.session.token);
        Ok(url)
    }

    async fn send_request(&self, request: ClientRequest) {
        if let Some(outbound) = self.outbound.lock().await.as_ref() {
            let _ = outbound.send(request);
        }
    }

    /// Starts the socket task unless it is already running. The task
    /// reconnects forever after a fixed delay until [`Self::disconnect`].
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        let url = self.socket_url()?;
        let mut socket_task = self.socket_task.lock().await;
        if socket_task.as_ref().is_some_and(|task| !task.is_finished()) {
            return Ok(());
        }
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        *self.outbound.lock().await = Some(outbound_tx);
        let client = Arc::clone(self);
        *socket_task = Some(tokio::spawn(async move {
            client.run_socket(url, outbound_rx).await;
        }));
        Ok(())
    }

    async fn run_socket(self: Arc<Self>, url: Url, mut outbound: mpsc::UnboundedReceiver<ClientRequest>) {
        loop {
            match connect_async(url.as_str()).await {
                Ok((stream, _)) => {
                    info!(server = %self.server_url, "socket connected");
                    // requests queued while offline are stale
                    while outbound.try_recv().is_ok() {}
                    let _ = self.events.send(ClientEvent::Connected);
                    self.drive_socket(stream, &mut outbound).await;
                    let _ = self.events.send(ClientEvent::Disconnected);
                }
                Err(err) => {
                    debug!(error = %err, "socket connect failed");
                    let _ = self
                        .events
                        .send(ClientEvent::Error(format!("socket connect failed: {err}")));
                }
            }
            tokio::time::sleep(self.options.reconnect_delay).await;
        }
    }

    async fn drive_socket<S>(&self, stream: S, outbound: &mut mpsc::UnboundedReceiver<ClientRequest>)
    where
        S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
            + futures::Sink<Message>
            + Unpin,
    {
        let (mut writer, mut reader) = stream.split();

        let rejoin: Vec<RoomId> = self.joined_rooms.lock().await.iter().copied().collect();
        for room_id in rejoin {
            if !send_client_request(&mut writer, &ClientRequest::JoinRoom { room_id }).await {
                return;
            }
        }

        loop {
            tokio::select! {
                frame = reader.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.handle_server_text(&text).await,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(error = %err, "socket receive failed");
                        break;
                    }
                },
                request = outbound.recv() => match request {
                    Some(request) => {
                        if !send_client_request(&mut writer, &request).await {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
    }

    async fn handle_server_text(&self, text: &str) {
        match serde_json::from_str::<ServerEvent>(text) {
            Ok(event) => {
                if let ServerEvent::RoomRemoved { room_id } = &event {
                    self.joined_rooms.lock().await.remove(room_id);
                }
                self.state
                    .lock()
                    .await
                    .apply(&event, std::time::Instant::now());
                let _ = self.events.send(ClientEvent::Server(event));
            }
            Err(err) => {
                let _ = self
                    .events
                    .send(ClientEvent::Error(format!("invalid server event: {err}")));
            }
        }
    }

    /// Remembers the room so reconnects join it again.
    pub async fn join_room(&self, room_id: RoomId) {
        self.joined_rooms.lock().await.insert(room_id);
        self.send_request(ClientRequest::JoinRoom { room_id }).await;
    }

    pub async fn leave_room(&self, room_id: RoomId) {
        self.joined_rooms.lock().await.remove(&room_id);
        self.send_request(ClientRequest::LeaveRoom { room_id }).await;
    }

    pub async fn typing(&self, room_id: RoomId) {
        self.send_request(ClientRequest::Typing { room_id }).await;
    }

    pub async fn stop_typing(&self, room_id: RoomId) {
        self.send_request(ClientRequest::StopTyping { room_id }).await;
    }

    pub async fn mark_read(&self, room_id: RoomId, message_id: MessageId) {
        self.send_request(ClientRequest::MarkRead {
            room_id,
            message_id,
        })
        .await;
    }

    pub async fn disconnect(&self) {
        *self.outbound.lock().await = None;
        if let Some(task) = self.socket_task.lock().await.take() {
            task.abort();
            info!(server = %self.server_url, "socket disconnected");
        }
    }
}

async fn send_client_request<W>(writer: &mut W, request: &ClientRequest) -> bool
where
    W: futures::Sink<Message> + Unpin,
{
    match serde_json::to_string(request) {
        Ok(text) => writer.send(Message::Text(text)).await.is_ok(),
        Err(err) => {
            warn!(error = %err, "failed to encode client request");
            true
        }
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
