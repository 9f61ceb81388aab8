//! Validated remote document model
//!
//! Remote payloads arrive as loosely shaped JSON. They are decoded into
//! [`RawDocument`] first and promoted to [`RemoteDocument`] only after
//! validation, so the sync core never sees a half-formed record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{RemoteError, Result};

/// One free-form body section of a meeting note
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSection {
    pub heading: String,
    pub content: String,
}

/// A remote meeting note as the wire delivers it
///
/// Every field is optional; nothing here is trusted yet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawDocument {
    pub id: Option<String>,
    pub title: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sections: Vec<DocumentSection>,
    pub source_folder: Option<String>,
    #[serde(default)]
    pub attachments: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A validated remote meeting note
///
/// Immutable from the sync core's point of view; a fresh copy arrives on
/// every fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteDocument {
    /// Opaque stable identifier, unique across the collection
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sections: Vec<DocumentSection>,
    /// Logical remote grouping, used as the target subfolder
    pub source_folder: Option<String>,
    pub attachments: Vec<String>,
    pub tags: Vec<String>,
}

impl RemoteDocument {
    /// Promote a raw payload to a validated document.
    ///
    /// A missing id or title is a validation error; a missing `updated_at`
    /// falls back to `created_at` (older exports omitted it).
    pub fn from_raw(raw: RawDocument) -> Result<Self> {
        let id = match raw.id {
            Some(id) if !id.trim().is_empty() => id,
            _ => {
                return Err(RemoteError::Validation {
                    id: None,
                    reason: "missing or empty id".to_string(),
                })
            }
        };

        let title = match raw.title {
            Some(t) if !t.trim().is_empty() => t,
            _ => {
                return Err(RemoteError::Validation {
                    id: Some(id),
                    reason: "missing or empty title".to_string(),
                })
            }
        };

        let created_at = raw.created_at.ok_or_else(|| RemoteError::Validation {
            id: Some(id.clone()),
            reason: "missing created_at".to_string(),
        })?;
        let updated_at = raw.updated_at.unwrap_or(created_at);

        Ok(Self {
            id,
            title,
            created_at,
            updated_at,
            sections: raw.sections,
            source_folder: raw.source_folder,
            attachments: raw.attachments,
            tags: raw.tags,
        })
    }

    /// Render the note body (everything below the header).
    pub fn render_body(&self) -> String {
        let mut body = String::new();
        body.push_str(&format!("# {}\n", self.title));
        for section in &self.sections {
            body.push('\n');
            if !section.heading.is_empty() {
                body.push_str(&format!("## {}\n\n", section.heading));
            }
            body.push_str(section.content.trim_end());
            body.push('\n');
        }
        if !self.attachments.is_empty() {
            body.push_str("\n## Attachments\n\n");
            for attachment in &self.attachments {
                body.push_str(&format!("- {attachment}\n"));
            }
        }
        body
    }
}
