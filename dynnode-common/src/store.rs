//! Post store collaborator
//!
//! The runner only needs `get_code`/`save_code`; the rest of the surface is
//! what hosts use to manage posts. `FileStore` keeps everything in one JSON
//! document and tolerates a missing or corrupt file by treating it as empty.

use crate::types::{CodeFields, DynNodePost, NewPost, DEFAULT_SAMPLE_CTX};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("post not found: {0}")]
    NotFound(String),

    #[error("invalid post: {0}")]
    Invalid(String),

    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait PostStore: Send + Sync {
    /// All posts, most recently updated first
    async fn list(&self) -> StoreResult<Vec<DynNodePost>>;

    async fn get(&self, id: &str) -> StoreResult<Option<DynNodePost>>;

    async fn create(&self, input: NewPost) -> StoreResult<DynNodePost>;

    /// Returns the number of removed posts
    async fn delete(&self, id: &str) -> StoreResult<usize>;

    async fn get_code(&self, id: &str) -> StoreResult<CodeFields> {
        self.get(id)
            .await?
            .map(|post| CodeFields::from(&post))
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn save_code(&self, id: &str, fields: CodeFields) -> StoreResult<DynNodePost>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreDocument {
    items: Vec<DynNodePost>,
}

/// JSON-file backed store
pub struct FileStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_document(&self) -> StoreResult<StoreDocument> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(StoreDocument::default()),
            Err(e) => return Err(e.into()),
        };

        if raw.trim().is_empty() {
            return Ok(StoreDocument::default());
        }

        match serde_json::from_str::<StoreDocument>(&raw) {
            Ok(doc) => Ok(doc),
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Store file unreadable, treating as empty"
                );
                Ok(StoreDocument::default())
            }
        }
    }

    async fn write_document(&self, doc: &StoreDocument) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let body = serde_json::to_string_pretty(doc)?;
        let tmp = PathBuf::from(format!(
            "{}.{}.{:06x}.tmp",
            self.path.display(),
            Utc::now().timestamp_millis(),
            rand::random::<u32>() & 0xff_ffff
        ));

        tokio::fs::write(&tmp, body).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            // Some platforms refuse to rename over an open file
            if e.kind() == std::io::ErrorKind::PermissionDenied {
                let copied = tokio::fs::copy(&tmp, &self.path).await;
                let _ = tokio::fs::remove_file(&tmp).await;
                copied?;
                return Ok(());
            }
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        tracing::debug!(path = %self.path.display(), items = doc.items.len(), "Store written");
        Ok(())
    }
}

fn make_id() -> String {
    format!(
        "dn_{}_{:06x}",
        Utc::now().timestamp_millis(),
        rand::random::<u32>() & 0xff_ffff
    )
}

#[async_trait]
impl PostStore for FileStore {
    async fn list(&self) -> StoreResult<Vec<DynNodePost>> {
        let mut items = self.read_document().await?.items;
        items.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(items)
    }

    async fn get(&self, id: &str) -> StoreResult<Option<DynNodePost>> {
        let doc = self.read_document().await?;
        Ok(doc.items.into_iter().find(|post| post.id == id))
    }

    async fn create(&self, input: NewPost) -> StoreResult<DynNodePost> {
        if input.title.trim().is_empty() {
            return Err(StoreError::Invalid("title is required".into()));
        }
        if input.code.is_empty() {
            return Err(StoreError::Invalid("code is required".into()));
        }

        let _guard = self.lock.lock().await;
        let mut doc = self.read_document().await?;
        let now = Utc::now();

        let post = DynNodePost {
            id: make_id(),
            title: input.title,
            summary: input.summary,
            code: input.code,
            sample_ctx: input
                .sample_ctx
                .unwrap_or_else(|| DEFAULT_SAMPLE_CTX.to_string()),
            tags: input.tags,
            status: input.status,
            created_at: now,
            updated_at: now,
        };

        doc.items.insert(0, post.clone());
        self.write_document(&doc).await?;
        tracing::info!(post_id = %post.id, "Post created");
        Ok(post)
    }

    async fn delete(&self, id: &str) -> StoreResult<usize> {
        let _guard = self.lock.lock().await;
        let mut doc = self.read_document().await?;
        let before = doc.items.len();
        doc.items.retain(|post| post.id != id);
        let removed = before - doc.items.len();
        if removed > 0 {
            self.write_document(&doc).await?;
        }
        Ok(removed)
    }

    async fn save_code(&self, id: &str, fields: CodeFields) -> StoreResult<DynNodePost> {
        let _guard = self.lock.lock().await;
        let mut doc = self.read_document().await?;
        let post = doc
            .items
            .iter_mut()
            .find(|post| post.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        post.code = fields.code;
        post.sample_ctx = fields.context_text;
        post.updated_at = Utc::now();
        let saved = post.clone();

        self.write_document(&doc).await?;
        Ok(saved)
    }
}
