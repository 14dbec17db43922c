//! Persisted comparison baselines.
//!
//! A snapshot holds only the fields change detection looks at. It is stored as
//! JSON in the source's snapshot table, keyed by the record's external identifier.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{EventStatus, IssueState, SyncRecord};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueSnapshot {
    pub title: String,
    pub state: IssueState,
    #[serde(default)]
    pub merged: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSnapshot {
    pub title: String,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub location: String,
    pub status: EventStatus,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSnapshot {
    pub title: String,
    /// Every child (highlight) identifier seen so far.
    #[serde(default)]
    pub child_ids: BTreeSet<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Last-observed state of one remote record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StoredSnapshot {
    Issue(IssueSnapshot),
    Event(EventSnapshot),
    Document(DocumentSnapshot),
}

impl StoredSnapshot {
    /// Build the snapshot to persist for `record`, merging child ids with `previous`.
    pub fn capture(record: &SyncRecord, previous: Option<&StoredSnapshot>) -> Self {
        match record {
            SyncRecord::Issue(r) => StoredSnapshot::Issue(IssueSnapshot {
                title: r.title.clone(),
                state: r.state,
                merged: r.merged,
                updated_at: r.updated_at,
            }),
            SyncRecord::Event(r) => StoredSnapshot::Event(EventSnapshot {
                title: r.title.clone(),
                start: r.start,
                end: r.end,
                location: r.location.clone(),
                status: r.status,
                updated_at: r.updated_at,
            }),
            SyncRecord::Document(r) => {
                let mut child_ids = match previous {
                    Some(StoredSnapshot::Document(prev)) => prev.child_ids.clone(),
                    _ => BTreeSet::new(),
                };
                child_ids.extend(r.highlights.iter().map(|h| h.id.clone()));
                StoredSnapshot::Document(DocumentSnapshot {
                    title: r.title.clone(),
                    child_ids,
                    updated_at: r.updated_at,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{document_id, Highlight, HighlightedDocument};

    fn doc_with(ids: &[&str]) -> SyncRecord {
        SyncRecord::Document(HighlightedDocument {
            id: document_id("d1"),
            title: "Essay".to_string(),
            author: String::new(),
            category: "article".to_string(),
            summary: String::new(),
            url: String::new(),
            source_url: String::new(),
            updated_at: None,
            highlights: ids
                .iter()
                .map(|id| Highlight {
                    id: id.to_string(),
                    content: "text".to_string(),
                    note: String::new(),
                })
                .collect(),
        })
    }

    #[test]
    fn test_document_capture_unions_child_ids() {
        let first = StoredSnapshot::capture(&doc_with(&["a", "b"]), None);
        let second = StoredSnapshot::capture(&doc_with(&["c"]), Some(&first));

        let StoredSnapshot::Document(snapshot) = second else {
            panic!("expected document snapshot");
        };
        let ids: Vec<_> = snapshot.child_ids.iter().map(String::as_str).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_snapshot_json_is_tagged() {
        let snapshot = StoredSnapshot::capture(&doc_with(&["a"]), None);
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["kind"], "document");
        assert_eq!(json["childIds"][0], "a");
    }
}
