//! In-process backend
//!
//! Answers chat turns by echoing the message and keeps gems in memory. Used for
//! local development (`backend.kind = "memory"`) and throughout the test suite.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::RwLock;

use super::{Attachment, BackendError, ChatBackend, Conversation, Gem, GemPatch, NewGem, Reply};
use crate::proxy::resume_token::DecodedState;

pub struct InMemoryBackend {
    running: AtomicBool,
    gems: RwLock<Vec<Gem>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::with_gems(default_gems())
    }

    pub fn with_gems(gems: Vec<Gem>) -> Self {
        Self {
            running: AtomicBool::new(true),
            gems: RwLock::new(gems),
        }
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Relaxed);
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn default_gems() -> Vec<Gem> {
    [
        ("brainstormer", "Brainstormer", "Help me brainstorm ideas"),
        ("coding-partner", "Coding partner", "Help me write and debug code"),
        ("writing-editor", "Writing editor", "Give feedback on my writing"),
    ]
    .into_iter()
    .map(|(id, name, description)| Gem {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        prompt: String::new(),
        predefined: true,
        hidden: false,
    })
    .collect()
}

fn random_hex(bytes: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..bytes).map(|_| format!("{:02x}", rng.gen::<u8>())).collect()
}

// Response ids are `{turn:08x}{random:08x}`: the turn counter travels in the
// resume token.
const TURN_DIGITS: usize = 8;

fn next_response_id(turn: u64) -> String {
    format!("{:0width$x}{}", turn, random_hex(4), width = TURN_DIGITS)
}

fn completed_turns(state: &DecodedState) -> u64 {
    let response = state.response_id();
    if response.len() != TURN_DIGITS * 2 {
        return 0;
    }
    u64::from_str_radix(&response[..TURN_DIGITS], 16).unwrap_or(0)
}

struct MemoryConversation {
    gem: Option<String>,
    state: Option<DecodedState>,
}

#[async_trait]
impl Conversation for MemoryConversation {
    async fn send(
        &mut self,
        message: &str,
        attachments: Vec<Attachment>,
    ) -> Result<Reply, BackendError> {
        let (conversation, turn) = match &self.state {
            Some(state) => (
                state.conversation_id().to_string(),
                completed_turns(state).saturating_add(1),
            ),
            None => (random_hex(8), 1),
        };

        self.state = Some(DecodedState::from_raw(
            conversation,
            next_response_id(turn),
            random_hex(4),
        )?);

        let mut text = format!("[turn {}] {}", turn, message);
        if let Some(gem) = &self.gem {
            text = format!("({}) {}", gem, text);
        }
        if !attachments.is_empty() {
            let names: Vec<&str> = attachments.iter().map(|a| a.filename.as_str()).collect();
            text.push_str(&format!(" [files: {}]", names.join(", ")));
        }

        Ok(Reply { text })
    }

    fn state(&self) -> Option<DecodedState> {
        self.state.clone()
    }
}

#[async_trait]
impl ChatBackend for InMemoryBackend {
    async fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    async fn start_conversation(
        &self,
        _model: &str,
        gem: Option<&str>,
        resume: Option<DecodedState>,
    ) -> Result<Box<dyn Conversation>, BackendError> {
        if let Some(id) = gem {
            if !self.gems.read().await.iter().any(|g| g.id == id) {
                return Err(BackendError::NotFound(format!("Gem not found: {}", id)));
            }
        }

        Ok(Box::new(MemoryConversation {
            gem: gem.map(str::to_string),
            state: resume,
        }))
    }

    async fn fetch_gems(&self, include_hidden: bool) -> Result<Vec<Gem>, BackendError> {
        let gems = self.gems.read().await;
        Ok(gems
            .iter()
            .filter(|g| include_hidden || !g.hidden)
            .cloned()
            .collect())
    }

    async fn create_gem(&self, gem: NewGem) -> Result<Gem, BackendError> {
        let created = Gem {
            id: random_hex(6),
            name: gem.name,
            description: gem.description,
            prompt: gem.prompt,
            predefined: false,
            hidden: false,
        };
        self.gems.write().await.push(created.clone());
        Ok(created)
    }

    async fn update_gem(&self, id: &str, patch: GemPatch) -> Result<Gem, BackendError> {
        let mut gems = self.gems.write().await;
        let gem = gems
            .iter_mut()
            .find(|g| g.id == id)
            .ok_or_else(|| BackendError::NotFound(format!("Gem not found: {}", id)))?;

        if let Some(name) = patch.name {
            gem.name = name;
        }
        if let Some(prompt) = patch.prompt {
            gem.prompt = prompt;
        }
        if let Some(description) = patch.description {
            gem.description = description;
        }
        Ok(gem.clone())
    }

    async fn delete_gem(&self, id: &str) -> Result<(), BackendError> {
        let mut gems = self.gems.write().await;
        let before = gems.len();
        gems.retain(|g| g.id != id);
        if gems.len() == before {
            return Err(BackendError::NotFound(format!("Gem not found: {}", id)));
        }
        Ok(())
    }
}
