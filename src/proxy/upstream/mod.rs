// Upstream module - conversational backend collaborator
//
// Handlers never talk to a concrete backend; they hold an `Arc<dyn ChatBackend>`
// constructed once at startup.

pub mod client;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::proxy::resume_token::{CodecError, DecodedState};

pub use client::RemoteBackend;
pub use memory::InMemoryBackend;

/// Persona ("gem") as exposed by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gem {
    pub id: String,
    pub name: String,
    pub description: String,
    pub prompt: String,
    /// System-provided rather than user-created
    #[serde(default)]
    pub predefined: bool,
    /// Excluded from default listings
    #[serde(default)]
    pub hidden: bool,
}

/// Fields for a new gem
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewGem {
    pub name: String,
    pub prompt: String,
    pub description: String,
}

/// Partial gem update; `None` leaves the backend value untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GemPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Uploaded file forwarded to the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub data: Vec<u8>,
    pub mime_type: String,
}

#[derive(Debug, Clone)]
pub struct Reply {
    pub text: String,
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("{0}")]
    NotFound(String),
    #[error("request to backend failed: {0}")]
    Transport(String),
    #[error("backend returned HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("unexpected backend response: {0}")]
    Protocol(String),
    #[error("backend returned invalid conversation state: {0}")]
    State(#[from] CodecError),
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Protocol(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// One conversation for the lifetime of a single request
#[async_trait]
pub trait Conversation: Send {
    async fn send(
        &mut self,
        message: &str,
        attachments: Vec<Attachment>,
    ) -> Result<Reply, BackendError>;

    /// Backend resume state after the latest turn, if any
    fn state(&self) -> Option<DecodedState>;
}

#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn is_running(&self) -> bool;

    async fn start_conversation(
        &self,
        model: &str,
        gem: Option<&str>,
        resume: Option<DecodedState>,
    ) -> Result<Box<dyn Conversation>, BackendError>;

    async fn fetch_gems(&self, include_hidden: bool) -> Result<Vec<Gem>, BackendError>;

    async fn create_gem(&self, gem: NewGem) -> Result<Gem, BackendError>;

    async fn update_gem(&self, id: &str, patch: GemPatch) -> Result<Gem, BackendError>;

    async fn delete_gem(&self, id: &str) -> Result<(), BackendError>;
}
