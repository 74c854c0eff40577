use std::sync::Arc;

use axum::{
    extract::{multipart::MultipartError, Multipart, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    Json,
};
use server_api::chat;
use shared::{
    domain::{AttachmentId, MessageId, RoomId, UserId},
    error::{ApiError, ErrorCode},
    protocol::{
        ChatMessagePayload, ChatRoomSummary, CreateRoomRequest, EditMessageRequest,
        MarkReadRequest, MessageHistoryQuery, MessagePage, OpenDirectRoomRequest,
        ReactionSummary, RoomMember, SendMessageRequest, ToggleReactionRequest,
        UploadedAttachment,
    },
};

use crate::{
    app_state::AppState,
    http::{ApiJson, ApiPath, ApiQuery, Auth, HttpError, HttpResult},
};

const UPLOAD_FIELD: &str = "file";

pub(crate) async fn list_rooms(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
) -> HttpResult<Vec<ChatRoomSummary>> {
    Ok(Json(chat::list_rooms(&state.api, &actor).await?))
}

pub(crate) async fn create_room(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
    ApiJson(req): ApiJson<CreateRoomRequest>,
) -> HttpResult<ChatRoomSummary> {
    Ok(Json(chat::create_room(&state.api, &actor, &req).await?))
}

pub(crate) async fn open_direct_room(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
    ApiJson(req): ApiJson<OpenDirectRoomRequest>,
) -> HttpResult<ChatRoomSummary> {
    Ok(Json(chat::open_direct_room(&state.api, &actor, &req).await?))
}

pub(crate) async fn get_room(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
    ApiPath(room_id): ApiPath<i64>,
) -> HttpResult<ChatRoomSummary> {
    Ok(Json(chat::get_room(&state.api, &actor, RoomId(room_id)).await?))
}

pub(crate) async fn list_members(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
    ApiPath(room_id): ApiPath<i64>,
) -> HttpResult<Vec<RoomMember>> {
    Ok(Json(
        chat::list_room_members(&state.api, &actor, RoomId(room_id)).await?,
    ))
}

pub(crate) async fn add_member(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
    ApiPath((room_id, user_id)): ApiPath<(i64, i64)>,
) -> HttpResult<Vec<RoomMember>> {
    Ok(Json(
        chat::add_room_member(&state.api, &actor, RoomId(room_id), UserId(user_id)).await?,
    ))
}

pub(crate) async fn remove_member(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
    ApiPath((room_id, user_id)): ApiPath<(i64, i64)>,
) -> HttpResult<Vec<RoomMember>> {
    Ok(Json(
        chat::remove_room_member(&state.api, &actor, RoomId(room_id), UserId(user_id)).await?,
    ))
}

pub(crate) async fn list_messages(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
    ApiPath(room_id): ApiPath<i64>,
    ApiQuery(q): ApiQuery<MessageHistoryQuery>,
) -> HttpResult<MessagePage> {
    Ok(Json(
        chat::list_messages(&state.api, &actor, RoomId(room_id), &q).await?,
    ))
}

pub(crate) async fn send_message(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
    ApiPath(room_id): ApiPath<i64>,
    ApiJson(req): ApiJson<SendMessageRequest>,
) -> HttpResult<ChatMessagePayload> {
    Ok(Json(
        chat::send_message(&state.api, &actor, RoomId(room_id), &req).await?,
    ))
}

pub(crate) async fn mark_read(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
    ApiPath(room_id): ApiPath<i64>,
    ApiJson(req): ApiJson<MarkReadRequest>,
) -> HttpResult<ChatRoomSummary> {
    Ok(Json(
        chat::mark_read(&state.api, &actor, RoomId(room_id), req.message_id).await?,
    ))
}

pub(crate) async fn edit_message(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
    ApiPath(message_id): ApiPath<i64>,
    ApiJson(req): ApiJson<EditMessageRequest>,
) -> HttpResult<ChatMessagePayload> {
    Ok(Json(
        chat::edit_message(&state.api, &actor, MessageId(message_id), &req).await?,
    ))
}

pub(crate) async fn delete_message(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
    ApiPath(message_id): ApiPath<i64>,
) -> Result<StatusCode, HttpError> {
    chat::delete_message(&state.api, &actor, MessageId(message_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn toggle_reaction(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
    ApiPath(message_id): ApiPath<i64>,
    ApiJson(req): ApiJson<ToggleReactionRequest>,
) -> HttpResult<Vec<ReactionSummary>> {
    Ok(Json(
        chat::toggle_reaction(&state.api, &actor, MessageId(message_id), &req).await?,
    ))
}

fn multipart_error(err: MultipartError) -> HttpError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::new(ErrorCode::PayloadTooLarge, "attachment is too large").into()
    } else {
        ApiError::validation(format!("invalid multipart body: {}", err.body_text())).into()
    }
}

/// Takes the first `file` part of a multipart body. The part's filename and
/// content type describe the stored attachment.
pub(crate) async fn upload_attachment(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
    ApiPath(room_id): ApiPath<i64>,
    mut multipart: Multipart,
) -> HttpResult<UploadedAttachment> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let filename = field.file_name().map(str::to_owned);
        let mime_type = field.content_type().map(str::to_owned);
        let content = field.bytes().await.map_err(multipart_error)?;
        let attachment = chat::upload_attachment(
            &state.api,
            &actor,
            RoomId(room_id),
            filename.as_deref(),
            mime_type.as_deref(),
            &content,
        )
        .await?;
        return Ok(Json(UploadedAttachment { attachment }));
    }
    Err(ApiError::validation(format!("multipart body has no '{UPLOAD_FIELD}' part")).into())
}

pub(crate) async fn download_attachment(
    State(state): State<Arc<AppState>>,
    Auth(actor): Auth,
    ApiPath(attachment_id): ApiPath<i64>,
) -> Result<impl IntoResponse, HttpError> {
    let (attachment, content) =
        chat::download_attachment(&state.api, &actor, AttachmentId(attachment_id)).await?;

    let mut headers = HeaderMap::new();
    let content_type = attachment
        .mime_type
        .as_deref()
        .and_then(|mime| HeaderValue::from_str(mime).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));
    headers.insert(header::CONTENT_TYPE, content_type);
    if let Ok(value) = HeaderValue::from_str(&format!(
        "attachment; filename=\"{}\"",
        attachment.filename.replace('"', "")
    )) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    Ok((StatusCode::OK, headers, content))
}
