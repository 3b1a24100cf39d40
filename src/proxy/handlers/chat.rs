// Chat handler
//
// Accepts either multipart form data (`message` + `files`) or a JSON body
// `{"message": ...}`, resumes the conversation named by `X-Chat-Metadata` when the
// header holds a valid token, and returns the next token in the same header.

use axum::{
    body::Bytes,
    extract::{FromRequest, Multipart, Path, Request, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    Extension,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::proxy::error::ApiError;
use crate::proxy::middleware::auth::Principal;
use crate::proxy::resume_token::{self, DecodedState, CHAT_METADATA_HEADER};
use crate::proxy::server::AppState;
use crate::proxy::session_manager::ChatInput;
use crate::proxy::upstream::Attachment;

const MESSAGE_FIELD: &str = "message";
const FILES_FIELDS: &[&str] = &["files", "files[]"];
const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

#[derive(Debug, Deserialize)]
struct ChatRequest {
    message: String,
}

pub async fn handle_chat(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    request: Request,
) -> Result<Response, ApiError> {
    run_chat(state, principal, None, request).await
}

pub async fn handle_gem_chat(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(gem_id): Path<String>,
    request: Request,
) -> Result<Response, ApiError> {
    run_chat(state, principal, Some(gem_id), request).await
}

async fn run_chat(
    state: AppState,
    principal: Principal,
    gem_id: Option<String>,
    request: Request,
) -> Result<Response, ApiError> {
    let resume = resume_state(request.headers())?;

    let input = if is_multipart(request.headers()) {
        read_multipart(&state, request).await?
    } else {
        read_json(&state, request).await?
    };

    let outcome = state
        .sessions
        .run_turn(gem_id.as_deref(), resume, input)
        .await?;

    tracing::info!(
        "chat turn completed (new_chat: {}, gem: {:?})",
        outcome.is_new_chat,
        gem_id
    );

    Ok((
        StatusCode::CREATED,
        [(CHAT_METADATA_HEADER, outcome.resume_token)],
        Json(json!({
            "data": {
                "text": outcome.text,
                "is_new_chat": outcome.is_new_chat,
                "user": principal
            }
        })),
    )
        .into_response())
}

/// Decode `X-Chat-Metadata`; absent or malformed means a new conversation
fn resume_state(headers: &HeaderMap) -> Result<Option<DecodedState>, ApiError> {
    let Some(raw) = headers
        .get(CHAT_METADATA_HEADER)
        .and_then(|v| v.to_str().ok())
    else {
        return Ok(None);
    };

    resume_token::decode(raw)
        .map_err(|e| ApiError::BadRequest(format!("Failed to extract metadata: {}", e)))
}

fn is_multipart(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.contains("multipart/form-data"))
        .unwrap_or(false)
}

async fn read_multipart(state: &AppState, request: Request) -> Result<ChatInput, ApiError> {
    let mut multipart = Multipart::from_request(request, state)
        .await
        .map_err(|e| ApiError::rejected(e.status(), format!("Multipart error: {}", e.body_text())))?;

    let mut input = ChatInput::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::rejected(e.status(), format!("Multipart error: {}", e.body_text())))?
    {
        let name = field.name().unwrap_or("").to_string();

        if name == MESSAGE_FIELD {
            input.message = field
                .text()
                .await
                .map_err(|e| {
                    ApiError::rejected(e.status(), format!("Message read error: {}", e.body_text()))
                })?;
        } else if FILES_FIELDS.contains(&name.as_str()) {
            let filename = field.file_name().unwrap_or("upload").to_string();
            let mime_type = field
                .content_type()
                .unwrap_or(DEFAULT_MIME_TYPE)
                .to_string();
            let data = field
                .bytes()
                .await
                .map_err(|e| {
                    ApiError::rejected(e.status(), format!("File read error: {}", e.body_text()))
                })?;
            tracing::debug!("received file {} ({}, {} bytes)", filename, mime_type, data.len());
            input.attachments.push(Attachment {
                filename,
                data: data.to_vec(),
                mime_type,
            });
        }
    }

    if input.message.is_empty() && input.attachments.is_empty() {
        return Err(ApiError::BadRequest(
            "Either message or files must be provided".into(),
        ));
    }

    Ok(input)
}

async fn read_json(state: &AppState, request: Request) -> Result<ChatInput, ApiError> {
    let body = Bytes::from_request(request, state)
        .await
        .map_err(|e| ApiError::rejected(e.status(), e.body_text()))?;

    let value: Value = serde_json::from_slice(&body)
        .map_err(|_| ApiError::BadRequest("Invalid JSON data".into()))?;
    let chat: ChatRequest = serde_json::from_value(value)
        .map_err(|e| ApiError::BadRequest(format!("Invalid chat request: {}", e)))?;

    Ok(ChatInput {
        message: chat.message,
        attachments: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with_token(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CHAT_METADATA_HEADER, HeaderValue::from_str(token).unwrap());
        headers
    }

    #[test]
    fn test_resume_state_from_headers() {
        assert_eq!(resume_state(&HeaderMap::new()).unwrap(), None);
        assert_eq!(resume_state(&headers_with_token("garbage")).unwrap(), None);
        assert_eq!(resume_state(&headers_with_token("AA-bb-cc")).unwrap(), None);

        let state = resume_state(&headers_with_token("aa-bb-cc")).unwrap().unwrap();
        assert_eq!(state.labeled(), ["c_aa", "r_bb", "rc_cc"]);
    }

    #[test]
    fn test_is_multipart() {
        let mut headers = HeaderMap::new();
        assert!(!is_multipart(&headers));
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("multipart/form-data; boundary=xyz"),
        );
        assert!(is_multipart(&headers));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        assert!(!is_multipart(&headers));
    }
}
