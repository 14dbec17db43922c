//! Queue item model matching the consumer's wire format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Action applied by the consumer when none is given.
pub const DEFAULT_ACTION: &str = "append";

/// A rendered, self-contained payload waiting for the consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    /// Strictly increasing; defines delivery order.
    pub id: u64,
    pub content: String,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Item contents before the queue assigns an identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct NewQueueItem {
    pub content: String,
    pub action: String,
    pub collection: Option<String>,
    pub title: Option<String>,
}

/// Request body for `POST /queue`.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitItemRequest {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

impl SubmitItemRequest {
    /// Validate the submission; `content` must be present and non-blank.
    pub fn into_new_item(self) -> Result<NewQueueItem, String> {
        let content = self
            .content
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| "content required".to_string())?;

        let action = self
            .action
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| DEFAULT_ACTION.to_string());

        Ok(NewQueueItem {
            content,
            action,
            collection: self.collection.filter(|c| !c.trim().is_empty()),
            title: self.title.filter(|t| !t.trim().is_empty()),
        })
    }
}
