//! Change classification and verb derivation.
//!
//! Both functions are pure: they look only at the stored snapshot and the freshly
//! fetched record, and never touch storage.

use crate::models::{
    CalendarEvent, Classification, DocumentSnapshot, EventSnapshot, EventStatus,
    HighlightedDocument, IssueRecord, IssueSnapshot, IssueState, StoredSnapshot, SyncRecord, Verb,
};

/// Classify the transition from `old` to `new`.
///
/// Tracked fields are compared first; a newer remote last-modified timestamp is
/// only the fallback trigger. A snapshot of a different record kind is treated
/// as absent.
pub fn classify(old: Option<&StoredSnapshot>, new: &SyncRecord) -> Classification {
    match (old, new) {
        (Some(StoredSnapshot::Issue(old)), SyncRecord::Issue(new)) => {
            if issue_changed(old, new) {
                Classification::Updated
            } else {
                Classification::Unchanged
            }
        }
        (Some(StoredSnapshot::Event(old)), SyncRecord::Event(new)) => {
            if new.status == EventStatus::Cancelled && old.status != EventStatus::Cancelled {
                Classification::Cancelled
            } else if event_changed(old, new) {
                Classification::Updated
            } else {
                Classification::Unchanged
            }
        }
        (Some(StoredSnapshot::Document(old)), SyncRecord::Document(new)) => {
            if has_new_children(old, new) {
                Classification::Updated
            } else {
                Classification::Unchanged
            }
        }
        _ => Classification::Created,
    }
}

/// Human-readable label for the transition from `old` to `new`.
pub fn derive_verb(old: Option<&StoredSnapshot>, new: &SyncRecord) -> Verb {
    match (old, new) {
        (Some(StoredSnapshot::Issue(old)), SyncRecord::Issue(new)) => {
            if new.merged && !old.merged {
                Verb::Merged
            } else if new.state == IssueState::Closed && old.state == IssueState::Open {
                Verb::Closed
            } else if new.state == IssueState::Open && old.state == IssueState::Closed {
                Verb::Reopened
            } else {
                Verb::Updated
            }
        }
        (Some(StoredSnapshot::Event(old)), SyncRecord::Event(new)) => {
            if new.status == EventStatus::Cancelled && old.status != EventStatus::Cancelled {
                Verb::Cancelled
            } else {
                Verb::Updated
            }
        }
        (_, SyncRecord::Issue(_)) => Verb::Opened,
        (_, SyncRecord::Event(_)) => Verb::Created,
        (_, SyncRecord::Document(_)) => Verb::Highlighted,
    }
}

fn issue_changed(old: &IssueSnapshot, new: &IssueRecord) -> bool {
    old.title != new.title
        || old.state != new.state
        || old.merged != new.merged
        || new.updated_at > old.updated_at
}

fn event_changed(old: &EventSnapshot, new: &CalendarEvent) -> bool {
    old.title != new.title
        || old.start != new.start
        || old.end != new.end
        || old.location != new.location
        || old.status != new.status
        || matches!((old.updated_at, new.updated_at), (Some(o), Some(n)) if n > o)
        || (old.updated_at.is_none() && new.updated_at.is_some())
}

fn has_new_children(old: &DocumentSnapshot, new: &HighlightedDocument) -> bool {
    new.highlights
        .iter()
        .any(|h| !old.child_ids.contains(&h.id))
}
