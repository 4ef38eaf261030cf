//! Post data model shared by the store and its hosts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Context text given to new posts that do not bring their own
pub const DEFAULT_SAMPLE_CTX: &str = "{\n  \n}\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PostStatus {
    #[default]
    Draft,
    Published,
}

/// A stored script snippet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynNodePost {
    pub id: String,
    pub title: String,
    pub summary: Option<String>,
    pub code: String,
    /// JSON text kept verbatim
    pub sample_ctx: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub status: PostStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The two text fields the runner reads and writes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeFields {
    pub code: String,
    #[serde(rename = "contextText")]
    pub context_text: String,
}

impl From<&DynNodePost> for CodeFields {
    fn from(post: &DynNodePost) -> Self {
        Self {
            code: post.code.clone(),
            context_text: post.sample_ctx.clone(),
        }
    }
}

/// Input for creating a post
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPost {
    pub title: String,
    pub summary: Option<String>,
    pub code: String,
    pub sample_ctx: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub status: PostStatus,
}

impl NewPost {
    pub fn new(title: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            code: code.into(),
            ..Default::default()
        }
    }

    pub fn with_sample_ctx(mut self, ctx: impl Into<String>) -> Self {
        self.sample_ctx = Some(ctx.into());
        self
    }
}
