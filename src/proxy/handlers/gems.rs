//! Gem (persona) endpoints
//!
//! `/gems` and `/gems/:id` are served by one dispatcher keyed on the HTTP method:
//!
//! | route        | GET  | POST   | PUT    | DELETE |
//! |--------------|------|--------|--------|--------|
//! | `/gems`      | list | create | -      | -      |
//! | `/gems/:id`  | get  | -      | update | delete |
//!
//! Anything else is answered with 405.

use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, rejection::QueryRejection, Path, Query, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Json, Response},
    Extension,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::proxy::common::TriState;
use crate::proxy::error::ApiError;
use crate::proxy::middleware::auth::Principal;
use crate::proxy::server::AppState;
use crate::proxy::upstream::{BackendError, GemPatch, NewGem};

use super::bounded;

const ERROR_CONTEXT: &str = "Internal server error";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GemRoute<'a> {
    Collection,
    Item(&'a str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GemOperation<'a> {
    List(GemRoute<'a>),
    Create,
    Update(&'a str),
    Delete(&'a str),
}

impl<'a> GemOperation<'a> {
    pub fn resolve(method: &Method, route: GemRoute<'a>) -> Result<Self, ApiError> {
        match (method, route) {
            (&Method::GET, route) => Ok(Self::List(route)),
            (&Method::POST, GemRoute::Collection) => Ok(Self::Create),
            (&Method::PUT, GemRoute::Item(id)) => Ok(Self::Update(id)),
            (&Method::DELETE, GemRoute::Item(id)) => Ok(Self::Delete(id)),
            _ => Err(ApiError::MethodNotAllowed),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct GemQuery {
    #[serde(default)]
    pub predefined: TriState,
    #[serde(default)]
    pub hidden: TriState,
    pub name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GemBody {
    pub name: Option<String>,
    pub prompt: Option<String>,
    pub description: Option<String>,
}

impl GemBody {
    fn parse(body: &[u8]) -> Result<Self, ApiError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(body).map_err(|_| ApiError::BadRequest("Invalid JSON data".into()))
    }
}

/// Query and body, normalized for every gem operation
struct GemCall {
    query: GemQuery,
    body: GemBody,
}

type QueryResult = Result<Query<GemQuery>, QueryRejection>;
type BodyResult = Result<Bytes, BytesRejection>;

pub async fn handle_gems(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    method: Method,
    query: QueryResult,
    body: BodyResult,
) -> Result<Response, ApiError> {
    dispatch(&state, &principal, &method, GemRoute::Collection, query, body).await
}

pub async fn handle_gem(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    method: Method,
    Path(gem_id): Path<String>,
    query: QueryResult,
    body: BodyResult,
) -> Result<Response, ApiError> {
    dispatch(&state, &principal, &method, GemRoute::Item(&gem_id), query, body).await
}

async fn dispatch(
    state: &AppState,
    principal: &Principal,
    method: &Method,
    route: GemRoute<'_>,
    query: QueryResult,
    body: BodyResult,
) -> Result<Response, ApiError> {
    let operation = GemOperation::resolve(method, route)?;
    let Query(query) = query.map_err(|e| ApiError::rejected(e.status(), e.body_text()))?;
    let body = body.map_err(|e| ApiError::rejected(e.status(), e.body_text()))?;
    let call = GemCall {
        query,
        body: GemBody::parse(&body)?,
    };

    tracing::debug!("gems {:?}", operation);

    let limit = state.sessions.timeout();
    let (status, key, payload) = match operation {
        GemOperation::List(route) => (
            StatusCode::OK,
            "gems",
            bounded(limit, list(state, route, call)).await?,
        ),
        GemOperation::Create => (
            StatusCode::CREATED,
            "created_gem",
            bounded(limit, create(state, call)).await?,
        ),
        GemOperation::Update(id) => (
            StatusCode::OK,
            "updated_gem",
            bounded(limit, update(state, id, call)).await?,
        ),
        GemOperation::Delete(id) => (
            StatusCode::OK,
            "deleted_gem",
            bounded(limit, delete(state, id, call)).await?,
        ),
    };

    let mut data = serde_json::Map::new();
    data.insert(key.to_string(), payload);
    data.insert("user".to_string(), json!(principal));

    Ok((status, Json(json!({ "data": data }))).into_response())
}

fn backend_error(err: BackendError) -> ApiError {
    ApiError::from_backend(err, ERROR_CONTEXT)
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, ApiError> {
    serde_json::to_value(value).map_err(|e| ApiError::Internal(format!("{}: {}", ERROR_CONTEXT, e)))
}

fn not_found(what: &str) -> ApiError {
    ApiError::NotFound(format!("Gem not found: {}", what))
}

async fn list(state: &AppState, route: GemRoute<'_>, call: GemCall) -> Result<Value, ApiError> {
    let include_hidden = call.query.hidden.or(false);
    let mut gems = state
        .backend
        .fetch_gems(include_hidden)
        .await
        .map_err(backend_error)?;

    if let Some(predefined) = call.query.predefined.as_option() {
        gems.retain(|g| g.predefined == predefined);
    }

    match route {
        GemRoute::Collection => to_value(&gems),
        GemRoute::Item(id) => {
            let gem = gems.iter().find(|g| g.id == id).ok_or_else(|| not_found(id))?;
            to_value(gem)
        }
    }
}

async fn create(state: &AppState, call: GemCall) -> Result<Value, ApiError> {
    let GemBody {
        name,
        prompt,
        description,
    } = call.body;

    let require = |field: Option<String>, label: &str| {
        field.ok_or_else(|| ApiError::BadRequest(format!("Missing required field: {}", label)))
    };
    let new_gem = NewGem {
        name: require(name, "name")?,
        prompt: require(prompt, "prompt")?,
        description: require(description, "description")?,
    };

    let created = state
        .backend
        .create_gem(new_gem)
        .await
        .map_err(backend_error)?;
    tracing::info!("created gem {} ({})", created.name, created.id);
    to_value(&created)
}

async fn update(state: &AppState, id: &str, call: GemCall) -> Result<Value, ApiError> {
    // target may be hidden
    let gems = state.backend.fetch_gems(true).await.map_err(backend_error)?;
    if !gems.iter().any(|g| g.id == id) {
        return Err(not_found(id));
    }

    let patch = GemPatch {
        name: call.body.name,
        prompt: call.body.prompt,
        description: call.body.description,
    };
    let updated = state
        .backend
        .update_gem(id, patch)
        .await
        .map_err(backend_error)?;
    to_value(&updated)
}

async fn delete(state: &AppState, id: &str, call: GemCall) -> Result<Value, ApiError> {
    // hidden gems cannot be deleted
    let gems = state.backend.fetch_gems(false).await.map_err(backend_error)?;

    let gem = match call.query.name.as_deref().or(call.body.name.as_deref()) {
        Some(name) => gems.iter().find(|g| g.name == name).ok_or_else(|| not_found(name))?,
        None => gems.iter().find(|g| g.id == id).ok_or_else(|| not_found(id))?,
    };

    state
        .backend
        .delete_gem(&gem.id)
        .await
        .map_err(backend_error)?;
    tracing::info!("deleted gem {} ({})", gem.name, gem.id);
    to_value(gem)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_routes() {
        let item = GemRoute::Item("x");
        assert_eq!(
            GemOperation::resolve(&Method::GET, GemRoute::Collection).unwrap(),
            GemOperation::List(GemRoute::Collection)
        );
        assert_eq!(
            GemOperation::resolve(&Method::GET, item).unwrap(),
            GemOperation::List(item)
        );
        assert_eq!(
            GemOperation::resolve(&Method::POST, GemRoute::Collection).unwrap(),
            GemOperation::Create
        );
        assert_eq!(
            GemOperation::resolve(&Method::PUT, item).unwrap(),
            GemOperation::Update("x")
        );
        assert_eq!(
            GemOperation::resolve(&Method::DELETE, item).unwrap(),
            GemOperation::Delete("x")
        );
    }

    #[test]
    fn test_resolve_rejects_unsupported() {
        for (method, route) in [
            (Method::PATCH, GemRoute::Collection),
            (Method::PATCH, GemRoute::Item("x")),
            (Method::PUT, GemRoute::Collection),
            (Method::DELETE, GemRoute::Collection),
            (Method::POST, GemRoute::Item("x")),
        ] {
            assert!(matches!(
                GemOperation::resolve(&method, route),
                Err(ApiError::MethodNotAllowed)
            ));
        }
    }

    #[test]
    fn test_body_parse() {
        assert!(GemBody::parse(b"").unwrap().name.is_none());
        assert!(GemBody::parse(b"  \n").unwrap().name.is_none());
        let body = GemBody::parse(br#"{"name":"n","prompt":"p"}"#).unwrap();
        assert_eq!(body.name.as_deref(), Some("n"));
        assert!(body.description.is_none());
        assert!(matches!(GemBody::parse(b"{oops"), Err(ApiError::BadRequest(_))));
    }
}
