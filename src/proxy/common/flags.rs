//! Boolean-ish query flags
//!
//! Query flags such as `?hidden=` and `?predefined=` share one literal table:
//!
//! | literal (case-insensitive)   | meaning |
//! |------------------------------|---------|
//! | `""`, `true`, `1`, `yes`     | true    |
//! | `false`, `0`, `no`           | false   |
//! | anything else / absent       | unspecified |

use serde::{Deserialize, Deserializer};

const TRUTHY: &[&str] = &["", "true", "1", "yes"];
const FALSY: &[&str] = &["false", "0", "no"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriState {
    True,
    False,
    #[default]
    Unspecified,
}

impl TriState {
    pub fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return Self::Unspecified;
        };
        let lowered = raw.to_ascii_lowercase();
        if TRUTHY.contains(&lowered.as_str()) {
            Self::True
        } else if FALSY.contains(&lowered.as_str()) {
            Self::False
        } else {
            Self::Unspecified
        }
    }

    pub fn as_option(self) -> Option<bool> {
        match self {
            Self::True => Some(true),
            Self::False => Some(false),
            Self::Unspecified => None,
        }
    }

    /// Collapse to a plain bool, treating unspecified as `default`.
    pub fn or(self, default: bool) -> bool {
        self.as_option().unwrap_or(default)
    }
}

impl<'de> Deserialize<'de> for TriState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(Self::parse(raw.as_deref()))
    }
}
