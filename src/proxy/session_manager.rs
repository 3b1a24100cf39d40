//! Conversation session manager
//!
//! Runs one chat turn per request. Nothing is kept between requests: the caller
//! hands in the decoded resume state (if any) and receives a fresh resume token to
//! return to the client.
//!
//! ```text
//! Fresh ──┐
//!         ├─ start_conversation + send ──> Completed (new token)
//! Resuming┘                          └───> Failed
//! ```

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::proxy::error::ApiError;
use crate::proxy::resume_token::{self, DecodedState};
use crate::proxy::upstream::{Attachment, ChatBackend};

const ERROR_CONTEXT: &str = "Error processing request";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Fresh,
    Resuming,
    Completed,
    Failed,
}

/// Message plus uploaded files for one turn
#[derive(Debug, Clone, Default)]
pub struct ChatInput {
    pub message: String,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub text: String,
    /// The request carried no usable resume token
    pub is_new_chat: bool,
    /// Wire token for the `X-Chat-Metadata` response header
    pub resume_token: String,
}

/// Keyed async locks, one per conversation id.
///
/// Entries are removed once the last holder or waiter lets go.
#[derive(Clone, Default)]
pub struct ConversationLocks {
    inner: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

pub struct ConversationGuard {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl ConversationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: &str) -> ConversationGuard {
        let mutex = self
            .inner
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;
        ConversationGuard {
            locks: self.inner.clone(),
            key: key.to_string(),
            guard: Some(guard),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl Drop for ConversationGuard {
    fn drop(&mut self) {
        self.guard.take();
        // only the map's own reference left: nobody holds or waits on this key
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

pub struct SessionManager {
    backend: Arc<dyn ChatBackend>,
    model: String,
    timeout: Duration,
    locks: Option<ConversationLocks>,
}

impl SessionManager {
    pub fn new(backend: Arc<dyn ChatBackend>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            backend,
            model: model.into(),
            timeout,
            locks: None,
        }
    }

    /// Serialize turns that resume the same conversation
    pub fn with_serialized_conversations(mut self, enabled: bool) -> Self {
        self.locks = enabled.then(ConversationLocks::new);
        self
    }

    pub fn backend(&self) -> &Arc<dyn ChatBackend> {
        &self.backend
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run one turn against the backend and compute the next resume token
    pub async fn run_turn(
        &self,
        gem: Option<&str>,
        resume: Option<DecodedState>,
        input: ChatInput,
    ) -> Result<TurnOutcome, ApiError> {
        let phase = if resume.is_some() {
            TurnPhase::Resuming
        } else {
            TurnPhase::Fresh
        };
        let is_new_chat = phase == TurnPhase::Fresh;

        tracing::debug!(
            "chat turn {:?}: gem={:?}, files={}",
            phase,
            gem,
            input.attachments.len()
        );

        // waiting for the conversation lock counts against the timeout
        let turn = async move {
            let _guard = match (&self.locks, &resume) {
                (Some(locks), Some(state)) => Some(locks.acquire(state.conversation_id()).await),
                _ => None,
            };
            self.exchange(gem, resume, input).await
        };
        let result = tokio::time::timeout(self.timeout, turn).await;

        let (text, state) = match result {
            Ok(Ok(done)) => done,
            Ok(Err(err)) => {
                tracing::warn!("chat turn {:?} -> {:?}: {}", phase, TurnPhase::Failed, err);
                return Err(err);
            }
            Err(_) => {
                tracing::warn!(
                    "chat turn {:?} -> {:?}: timed out after {:?}",
                    phase,
                    TurnPhase::Failed,
                    self.timeout
                );
                return Err(ApiError::Timeout);
            }
        };

        tracing::debug!("chat turn {:?} -> {:?}", phase, TurnPhase::Completed);

        Ok(TurnOutcome {
            text,
            is_new_chat,
            resume_token: resume_token::encode(&state),
        })
    }

    async fn exchange(
        &self,
        gem: Option<&str>,
        resume: Option<DecodedState>,
        input: ChatInput,
    ) -> Result<(String, DecodedState), ApiError> {
        let fallback = resume.clone();

        let mut conversation = self
            .backend
            .start_conversation(&self.model, gem, resume)
            .await
            .map_err(|e| ApiError::from_backend(e, ERROR_CONTEXT))?;

        let reply = conversation
            .send(&input.message, input.attachments)
            .await
            .map_err(|e| ApiError::from_backend(e, ERROR_CONTEXT))?;

        let state = conversation.state().or(fallback).ok_or_else(|| {
            ApiError::Internal(format!(
                "{}: backend returned no conversation state",
                ERROR_CONTEXT
            ))
        })?;

        Ok((reply.text, state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::upstream::{
        BackendError, Conversation, Gem, GemPatch, InMemoryBackend, NewGem,
    };
    use async_trait::async_trait;

    fn manager(backend: Arc<dyn ChatBackend>) -> SessionManager {
        SessionManager::new(backend, "test-model", Duration::from_secs(5))
    }

    fn input(message: &str) -> ChatInput {
        ChatInput {
            message: message.to_string(),
            attachments: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_fresh_turn_is_new_chat() {
        let sessions = manager(Arc::new(InMemoryBackend::new()));
        let outcome = sessions.run_turn(None, None, input("hi")).await.unwrap();
        assert!(outcome.is_new_chat);
        assert!(resume_token::is_valid_token(&outcome.resume_token));
    }

    #[tokio::test]
    async fn test_resumed_turn_continues_conversation() {
        let backend = Arc::new(InMemoryBackend::new());
        let sessions = manager(backend.clone());

        let first = sessions.run_turn(None, None, input("one")).await.unwrap();
        let state = resume_token::decode(&first.resume_token).unwrap();
        let second = sessions.run_turn(None, state.clone(), input("two")).await.unwrap();

        assert!(!second.is_new_chat);
        assert_eq!(second.text, "[turn 2] two");
        let next = resume_token::decode(&second.resume_token).unwrap().unwrap();
        assert_eq!(next.conversation_id(), state.unwrap().conversation_id());
    }

    #[tokio::test]
    async fn test_unknown_gem_maps_to_not_found() {
        let sessions = manager(Arc::new(InMemoryBackend::new()));
        let err = sessions
            .run_turn(Some("nope"), None, input("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    struct StalledBackend;

    #[async_trait]
    impl ChatBackend for StalledBackend {
        async fn is_running(&self) -> bool {
            true
        }

        async fn start_conversation(
            &self,
            _model: &str,
            _gem: Option<&str>,
            _resume: Option<DecodedState>,
        ) -> Result<Box<dyn Conversation>, BackendError> {
            std::future::pending().await
        }

        async fn fetch_gems(&self, _include_hidden: bool) -> Result<Vec<Gem>, BackendError> {
            Ok(Vec::new())
        }

        async fn create_gem(&self, _gem: NewGem) -> Result<Gem, BackendError> {
            Err(BackendError::Protocol("unsupported".into()))
        }

        async fn update_gem(&self, _id: &str, _patch: GemPatch) -> Result<Gem, BackendError> {
            Err(BackendError::Protocol("unsupported".into()))
        }

        async fn delete_gem(&self, _id: &str) -> Result<(), BackendError> {
            Err(BackendError::Protocol("unsupported".into()))
        }
    }

    #[tokio::test]
    async fn test_backend_timeout() {
        let sessions = SessionManager::new(
            Arc::new(StalledBackend),
            "test-model",
            Duration::from_millis(20),
        );
        let err = sessions.run_turn(None, None, input("hi")).await.unwrap_err();
        assert!(matches!(err, ApiError::Timeout));
    }

    #[tokio::test]
    async fn test_conversation_locks_serialize_same_key() {
        let locks = ConversationLocks::new();

        let first = locks.acquire("abc").await;
        let blocked =
            tokio::time::timeout(Duration::from_millis(20), locks.acquire("abc")).await;
        assert!(blocked.is_err());

        let other = locks.acquire("def").await;
        assert_eq!(locks.len(), 2);

        drop(first);
        let second = locks.acquire("abc").await;
        drop(second);
        drop(other);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_serialized_turns_release_locks() {
        let sessions = manager(Arc::new(InMemoryBackend::new())).with_serialized_conversations(true);
        let first = sessions.run_turn(None, None, input("one")).await.unwrap();
        let state = resume_token::decode(&first.resume_token).unwrap();

        let (a, b) = tokio::join!(
            sessions.run_turn(None, state.clone(), input("a")),
            sessions.run_turn(None, state, input("b")),
        );
        assert!(a.is_ok() && b.is_ok());
        assert!(sessions.locks.as_ref().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lock_wait_is_bounded_by_timeout() {
        let sessions = SessionManager::new(
            Arc::new(InMemoryBackend::new()),
            "test-model",
            Duration::from_millis(20),
        )
        .with_serialized_conversations(true);
        let state = resume_token::decode("aa-bb-cc").unwrap().unwrap();

        let held = sessions.locks.as_ref().unwrap().acquire(state.conversation_id()).await;
        let err = sessions
            .run_turn(None, Some(state.clone()), input("queued"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Timeout));

        drop(held);
        assert!(sessions.locks.as_ref().unwrap().is_empty());
        assert!(sessions.run_turn(None, Some(state), input("next")).await.is_ok());
    }
}
