//! Content-addressed documents and mutable artifacts.
//!
//! Documents are immutable and keyed by a SHA-256 over their logical content
//! `(kind, title, language, body)`: writing identical content twice converges
//! on the same row, so dedup needs no coordination. An optional `supersedes`
//! pointer to a prior hash forms an edit chain. Artifacts (generated content
//! attached to a matrix cell) live in the graph store and are mutable in
//! place; see [`crate::graph`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::instrument;

use crate::error::{ErrorCode, Result, StaffError};
use crate::store::Backend;

// ═══════════════════════════════════════════════════════════════════════════════
// Document Types
// ═══════════════════════════════════════════════════════════════════════════════

/// Kind of a stored document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Document,
    Skill,
    Prompt,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Skill => "skill",
            Self::Prompt => "prompt",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "document" => Some(Self::Document),
            "skill" => Some(Self::Skill),
            "prompt" => Some(Self::Prompt),
            _ => None,
        }
    }
}

impl std::fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content address of a document: hex-encoded SHA-256.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocHash(pub String);

impl DocHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DocHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Compute the content address for a document.
///
/// Fields are hashed with a separator byte so shifting bytes between fields
/// cannot collide.
pub fn content_hash(
    kind: DocumentKind,
    title: &str,
    language: Option<&str>,
    body: &str,
) -> DocHash {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(title.as_bytes());
    hasher.update([0u8]);
    hasher.update(language.unwrap_or("").as_bytes());
    hasher.update([0u8]);
    hasher.update(body.as_bytes());
    DocHash(hex::encode(hasher.finalize()))
}

/// Input for inserting a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDocument {
    pub kind: DocumentKind,
    pub title: String,
    pub language: Option<String>,
    pub body: String,
    pub supersedes: Option<DocHash>,
}

impl NewDocument {
    /// The content address this document will be stored under.
    pub fn hash(&self) -> DocHash {
        content_hash(self.kind, &self.title, self.language.as_deref(), &self.body)
    }
}

/// A stored document row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub hash: DocHash,
    pub kind: DocumentKind,
    pub title: String,
    pub language: Option<String>,
    pub body: String,
    pub supersedes: Option<DocHash>,
    pub created_at: DateTime<Utc>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Content Store
// ═══════════════════════════════════════════════════════════════════════════════

/// Service facade for document storage.
#[derive(Clone)]
pub struct ContentStore {
    backend: Arc<dyn Backend>,
}

impl ContentStore {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Store a document, deduplicating on content address.
    ///
    /// Idempotent: identical content returns the existing row and never
    /// errors on duplicates.
    #[instrument(skip(self, body), fields(kind = %kind))]
    pub async fn put_document(
        &self,
        kind: DocumentKind,
        title: impl Into<String> + std::fmt::Debug,
        language: Option<String>,
        body: impl Into<String>,
        supersedes: Option<DocHash>,
    ) -> Result<DocumentRecord> {
        let title = title.into();
        if title.trim().is_empty() {
            return Err(StaffError::new(
                ErrorCode::MissingRequiredField,
                "Document title must not be blank",
            ));
        }

        if let Some(prior) = &supersedes {
            if self.backend.get_document(prior).await?.is_none() {
                return Err(StaffError::not_found("document", prior.as_str()));
            }
        }

        let new = NewDocument {
            kind,
            title,
            language,
            body: body.into(),
            supersedes,
        };
        let record = self.backend.put_document(new).await?;
        tracing::debug!(hash = %record.hash, "Document stored");
        Ok(record)
    }

    /// Fetch a document by content address.
    pub async fn get_document(&self, hash: &DocHash) -> Result<DocumentRecord> {
        self.backend
            .get_document(hash)
            .await?
            .ok_or_else(|| StaffError::not_found("document", hash.as_str()))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_is_stable() {
        let a = content_hash(DocumentKind::Document, "Title", Some("en"), "body");
        let b = content_hash(DocumentKind::Document, "Title", Some("en"), "body");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_content_hash_discriminates_fields() {
        let base = content_hash(DocumentKind::Document, "Title", None, "body");
        assert_ne!(
            base,
            content_hash(DocumentKind::Skill, "Title", None, "body")
        );
        assert_ne!(
            base,
            content_hash(DocumentKind::Document, "Title2", None, "body")
        );
        assert_ne!(
            base,
            content_hash(DocumentKind::Document, "Title", Some("en"), "body")
        );
        // Field boundaries matter: "Titleb" + "ody" must not collide.
        assert_ne!(
            base,
            content_hash(DocumentKind::Document, "Titleb", None, "ody")
        );
    }

    #[test]
    fn test_new_document_hash_matches_free_fn() {
        let new = NewDocument {
            kind: DocumentKind::Prompt,
            title: "Greeting".into(),
            language: None,
            body: "Say hello".into(),
            supersedes: None,
        };
        assert_eq!(
            new.hash(),
            content_hash(DocumentKind::Prompt, "Greeting", None, "Say hello")
        );
    }
}
