//! Identifiers for what is being timed and who is timing it.

use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Content id that switches tracking off for a binding.
pub const DISABLED_CONTENT_ID: &str = "none";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Chapter,
    Quiz,
    Exercise,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Chapter => "chapter",
            ContentType::Quiz => "quiz",
            ContentType::Exercise => "exercise",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "chapter" => Ok(ContentType::Chapter),
            "quiz" => Ok(ContentType::Quiz),
            "exercise" => Ok(ContentType::Exercise),
            other => Err(anyhow!("unknown content type '{other}'")),
        }
    }
}

/// Opaque learner identity handed out by the identity provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct TrackingKey {
    pub content_type: ContentType,
    pub content_id: String,
    /// Chapter owning a quiz or exercise. Stored alongside the counter so
    /// chapter views can aggregate; not part of the counter's identity.
    pub chapter_id: Option<String>,
}

impl TrackingKey {
    pub fn new(content_type: ContentType, content_id: impl Into<String>) -> Self {
        Self {
            content_type,
            content_id: content_id.into(),
            chapter_id: None,
        }
    }

    pub fn with_chapter(mut self, chapter_id: impl Into<String>) -> Self {
        self.chapter_id = Some(chapter_id.into());
        self
    }

    pub fn chapter(content_id: impl Into<String>) -> Self {
        Self::new(ContentType::Chapter, content_id)
    }

    pub fn quiz(content_id: impl Into<String>) -> Self {
        Self::new(ContentType::Quiz, content_id)
    }

    pub fn exercise(content_id: impl Into<String>) -> Self {
        Self::new(ContentType::Exercise, content_id)
    }

    /// Placeholder key used by views that have nothing to time yet.
    pub fn disabled(content_type: ContentType) -> Self {
        Self::new(content_type, DISABLED_CONTENT_ID)
    }

    pub fn is_disabled(&self) -> bool {
        self.content_id == DISABLED_CONTENT_ID
    }
}

impl fmt::Display for TrackingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.content_type, self.content_id)
    }
}
