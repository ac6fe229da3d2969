use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Level {
    #[default]
    Beginner,
    Elementary,
    Intermediate,
    UpperIntermediate,
    Advanced,
}

impl Level {
    pub const ALL: [Level; 5] = [
        Level::Beginner,
        Level::Elementary,
        Level::Intermediate,
        Level::UpperIntermediate,
        Level::Advanced,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Beginner => "beginner",
            Level::Elementary => "elementary",
            Level::Intermediate => "intermediate",
            Level::UpperIntermediate => "upper-intermediate",
            Level::Advanced => "advanced",
        }
    }

    /// Accepts the canonical names plus `_`/space separated variants, case-insensitive.
    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase().replace(['_', ' '], "-");
        Self::ALL.into_iter().find(|level| level.as_str() == normalized)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One transcript entry as sent to the generation gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackNote {
    #[serde(default, deserialize_with = "null_as_default")]
    pub positive: String,
    #[serde(default)]
    pub correction: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tip: String,
}

impl FeedbackNote {
    pub fn has_correction(&self) -> bool {
        self.correction.as_deref().is_some_and(|c| !c.trim().is_empty())
    }
}

/// Structured record returned for every assistant turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TutorReply {
    #[serde(default, deserialize_with = "null_as_default")]
    pub reply: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub feedback: FeedbackNote,
    /// `None` when the provider omitted the level or sent one we do not know.
    #[serde(default, deserialize_with = "lenient_level")]
    pub level: Option<Level>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub new_words: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub goals: Vec<String>,
}

impl TutorReply {
    /// Record used when the provider output could not be decoded.
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            reply: text.into(),
            feedback: FeedbackNote::default(),
            level: Some(Level::Beginner),
            new_words: Vec::new(),
            goals: Vec::new(),
        }
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn lenient_level<'de, D>(deserializer: D) -> Result<Option<Level>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(serde_json::Value::as_str).and_then(Level::parse))
}
