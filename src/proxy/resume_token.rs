//! Resume token codec
//!
//! The gateway keeps no conversation store. After every chat turn the backend's
//! resume state is folded into a compact header value (`X-Chat-Metadata`) which the
//! client echoes back on its next request:
//!
//! ```text
//! wire:     <conversation>-<response>-<choice>        (lowercase hex groups)
//! labeled:  ["c_<conversation>", "r_<response>", "rc_<choice>"]
//! ```
//!
//! A header that does not look like a token is not an error; it simply starts a new
//! conversation.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Request/response header carrying the resume token
pub const CHAT_METADATA_HEADER: &str = "x-chat-metadata";

const SEPARATOR: char = '-';
const LABELS: [&str; 3] = ["c_", "r_", "rc_"];

static HEX_GROUP: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9a-f]+$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("expected {expected} components, found {found}")]
    ComponentCount { expected: usize, found: usize },
    #[error("component {index} is not a lowercase hex string")]
    InvalidComponent { index: usize },
    #[error("component {index} is missing the '{label}' label")]
    MissingLabel { index: usize, label: &'static str },
}

/// Backend-facing conversation state.
///
/// Holds the three raw hex components; the labeled form is produced on demand so a
/// value of this type is always well-formed and always encodable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DecodedState {
    conversation: String,
    response: String,
    choice: String,
}

impl DecodedState {
    /// Build from raw (unlabeled) components, validating each one.
    pub fn from_raw(
        conversation: impl Into<String>,
        response: impl Into<String>,
        choice: impl Into<String>,
    ) -> Result<Self, CodecError> {
        let parts = [conversation.into(), response.into(), choice.into()];
        for (index, part) in parts.iter().enumerate() {
            if !HEX_GROUP.is_match(part) {
                return Err(CodecError::InvalidComponent { index });
            }
        }
        let [conversation, response, choice] = parts;
        Ok(Self {
            conversation,
            response,
            choice,
        })
    }

    /// Build from the labeled form the backend produces (`c_..`, `r_..`, `rc_..`).
    pub fn from_labeled<S: AsRef<str>>(labeled: &[S]) -> Result<Self, CodecError> {
        if labeled.len() != LABELS.len() {
            return Err(CodecError::ComponentCount {
                expected: LABELS.len(),
                found: labeled.len(),
            });
        }

        let mut raw = [""; 3];
        for (index, (item, label)) in labeled.iter().zip(LABELS).enumerate() {
            raw[index] = item
                .as_ref()
                .strip_prefix(label)
                .ok_or(CodecError::MissingLabel { index, label })?;
        }

        Self::from_raw(raw[0], raw[1], raw[2])
    }

    /// Labeled sequence in fixed order, as consumed by the backend.
    pub fn labeled(&self) -> [String; 3] {
        [
            format!("{}{}", LABELS[0], self.conversation),
            format!("{}{}", LABELS[1], self.response),
            format!("{}{}", LABELS[2], self.choice),
        ]
    }

    /// Conversation identity, used to key per-conversation locks.
    pub fn conversation_id(&self) -> &str {
        &self.conversation
    }

    pub fn response_id(&self) -> &str {
        &self.response
    }
}

/// True iff `token` is exactly three non-empty lowercase hex groups joined by `-`.
pub fn is_valid_token(token: &str) -> bool {
    let parts: Vec<&str> = token.split(SEPARATOR).collect();
    parts.len() == 3 && parts.iter().all(|p| HEX_GROUP.is_match(p))
}

/// Decode a wire token.
///
/// `Ok(None)` means "no usable prior state" and covers every malformed token.
/// `Err` is only returned when a token passed the validity check but still could not
/// be turned into a state.
pub fn decode(token: &str) -> Result<Option<DecodedState>, CodecError> {
    if !is_valid_token(token) {
        return Ok(None);
    }

    let labeled: Vec<String> = LABELS
        .iter()
        .zip(token.split(SEPARATOR))
        .map(|(label, part)| format!("{}{}", label, part))
        .collect();

    DecodedState::from_labeled(&labeled).map(Some)
}

/// Encode a state into its wire form. Exact inverse of [`decode`].
pub fn encode(state: &DecodedState) -> String {
    state
        .labeled()
        .iter()
        .zip(LABELS)
        .map(|(item, label)| item.strip_prefix(label).unwrap_or(item))
        .collect::<Vec<_>>()
        .join(&SEPARATOR.to_string())
}
