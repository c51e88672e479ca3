//! Read-only view of documents and their sections.
//!
//! The orchestrator never edits documents itself; it reads a snapshot from a
//! [`DocumentStateProvider`] to resolve references and build task payloads.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// One structural section of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    /// Section id.
    pub id: String,
    /// Display name ("Chapter 1").
    pub name: String,
    /// Nesting level, 1 for top level.
    pub level: u32,
    /// Current text, if written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl Section {
    /// Creates an empty section.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, level: u32) -> Self {
        Self { id: id.into(), name: name.into(), level, content: None }
    }

    /// Sets the current text.
    #[must_use]
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }
}

/// A document with its structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Document id (the canvas node id).
    pub id: String,
    /// Title.
    pub name: String,
    /// Format ("novel", "screenplay", ...).
    pub format: String,
    /// Sections in reading order.
    #[serde(default)]
    pub sections: Vec<Section>,
}

impl Document {
    /// Creates a document without sections.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, format: impl Into<String>) -> Self {
        Self { id: id.into(), name: name.into(), format: format.into(), sections: Vec::new() }
    }

    /// Section by id.
    #[must_use]
    pub fn section(&self, id: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.id == id)
    }
}

/// Point-in-time view of every document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    documents: Vec<Document>,
    active: Option<String>,
}

impl DocumentSnapshot {
    /// Creates a snapshot; `active` names the open document.
    #[must_use]
    pub fn new(documents: Vec<Document>, active: Option<String>) -> Self {
        Self { documents, active }
    }

    /// Every document.
    #[must_use]
    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    /// Document by id.
    #[must_use]
    pub fn document(&self, id: &str) -> Option<&Document> {
        self.documents.iter().find(|d| d.id == id)
    }

    /// The open document.
    #[must_use]
    pub fn active_document(&self) -> Option<&Document> {
        self.active.as_deref().and_then(|id| self.document(id))
    }

    /// Text of a section in any document.
    #[must_use]
    pub fn section_content(&self, section_id: &str) -> Option<&str> {
        self.documents.iter().find_map(|d| d.section(section_id)).and_then(|s| s.content.as_deref())
    }
}

/// Source of document snapshots.
#[async_trait]
pub trait DocumentStateProvider: Send + Sync {
    /// Current snapshot.
    async fn snapshot(&self) -> DocumentSnapshot;
}

/// In-process document store, used by the CLI and tests.
#[derive(Default)]
pub struct InMemoryDocuments {
    state: RwLock<DocumentSnapshot>,
}

impl fmt::Debug for InMemoryDocuments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryDocuments")
            .field("document_count", &self.state.try_read().map(|s| s.documents.len()).unwrap_or(0))
            .finish()
    }
}

impl InMemoryDocuments {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding `snapshot`.
    #[must_use]
    pub fn from_snapshot(snapshot: DocumentSnapshot) -> Self {
        Self { state: RwLock::new(snapshot) }
    }

    /// Inserts or replaces a document.
    pub async fn upsert(&self, document: Document) {
        let mut state = self.state.write().await;
        match state.documents.iter_mut().find(|d| d.id == document.id) {
            Some(existing) => *existing = document,
            None => state.documents.push(document),
        }
    }

    /// Marks a document as open, or closes the panel with `None`.
    pub async fn set_active(&self, id: Option<String>) {
        self.state.write().await.active = id;
    }
}

#[async_trait]
impl DocumentStateProvider for InMemoryDocuments {
    async fn snapshot(&self) -> DocumentSnapshot {
        self.state.read().await.clone()
    }
}
