//! Normalized records produced by the source adapters.
//!
//! Every record carries an external identifier that is a pure function of
//! immutable source-side fields, so reconciliation survives renames and state
//! changes.

use chrono::{DateTime, Utc};

use super::{LabeledRecord, Source, Verb};

/// Identifier for an issue or pull request: `github_<owner>_<repo>_<number>`.
pub fn issue_id(repo: &str, number: u64) -> String {
    format!("github_{}_{}", repo.replace('/', "_"), number)
}

/// Identifier for a calendar event: `gcal_<native event id>`.
pub fn event_id(native_id: &str) -> String {
    format!("gcal_{}", native_id)
}

/// Identifier for a read-later document: `readwise_<document id>`.
pub fn document_id(native_id: &str) -> String {
    format!("readwise_{}", native_id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueKind {
    Issue,
    PullRequest,
}

impl IssueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueKind::Issue => "issue",
            IssueKind::PullRequest => "pull_request",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueState {
    Open,
    Closed,
}

impl IssueState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueState::Open => "open",
            IssueState::Closed => "closed",
        }
    }
}

/// An issue or pull request from the issue tracker.
#[derive(Debug, Clone, PartialEq)]
pub struct IssueRecord {
    pub id: String,
    /// `owner/repo`
    pub repo: String,
    pub number: u64,
    pub kind: IssueKind,
    pub title: String,
    pub body: String,
    pub state: IssueState,
    pub merged: bool,
    pub url: String,
    pub author: Option<String>,
    pub labels: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Confirmed,
    Tentative,
    Cancelled,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Confirmed => "confirmed",
            EventStatus::Tentative => "tentative",
            EventStatus::Cancelled => "cancelled",
        }
    }

    /// Unknown statuses are treated as confirmed.
    pub fn parse(s: &str) -> Self {
        match s {
            "tentative" => EventStatus::Tentative,
            "cancelled" => EventStatus::Cancelled,
            _ => EventStatus::Confirmed,
        }
    }
}

/// A calendar event inside the sync window.
#[derive(Debug, Clone, PartialEq)]
pub struct CalendarEvent {
    pub id: String,
    pub calendar_id: String,
    /// Category label derived from the calendar id and display name.
    pub calendar_label: String,
    pub title: String,
    pub description: String,
    pub location: String,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub all_day: bool,
    pub attendees: Vec<String>,
    pub meet_link: Option<String>,
    pub status: EventStatus,
    pub updated_at: Option<DateTime<Utc>>,
}

/// A single highlight (child annotation) of a document.
#[derive(Debug, Clone, PartialEq)]
pub struct Highlight {
    pub id: String,
    pub content: String,
    pub note: String,
}

/// A read-later document together with the highlights fetched for it.
#[derive(Debug, Clone, PartialEq)]
pub struct HighlightedDocument {
    pub id: String,
    pub title: String,
    pub author: String,
    pub category: String,
    pub summary: String,
    pub url: String,
    pub source_url: String,
    pub updated_at: Option<DateTime<Utc>>,
    pub highlights: Vec<Highlight>,
}

/// A freshly fetched record from any source.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncRecord {
    Issue(IssueRecord),
    Event(CalendarEvent),
    Document(HighlightedDocument),
}

impl SyncRecord {
    pub fn id(&self) -> &str {
        match self {
            SyncRecord::Issue(r) => &r.id,
            SyncRecord::Event(r) => &r.id,
            SyncRecord::Document(r) => &r.id,
        }
    }

    pub fn source(&self) -> Source {
        match self {
            SyncRecord::Issue(_) => Source::Github,
            SyncRecord::Event(_) => Source::Calendar,
            SyncRecord::Document(_) => Source::Readwise,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            SyncRecord::Issue(r) => &r.title,
            SyncRecord::Event(r) => &r.title,
            SyncRecord::Document(r) => &r.title,
        }
    }

    /// Flatten into the generic contract consumed by the renderer.
    pub fn labeled(&self, verb: Verb) -> LabeledRecord {
        let mut labeled = LabeledRecord::new(self.id(), self.source().collection(), verb);
        labeled.title = self.title().to_string();

        match self {
            SyncRecord::Issue(r) => {
                labeled.body = r.body.clone();
                labeled.push_field("repo", &r.repo);
                labeled.push_field("number", r.number.to_string());
                labeled.push_field("type", r.kind.as_str());
                labeled.push_field("state", if r.merged { "merged" } else { r.state.as_str() });
                if let Some(author) = &r.author {
                    labeled.push_field("author", author);
                }
                if !r.labels.is_empty() {
                    labeled.push_field("labels", r.labels.join(", "));
                }
                labeled.push_field("url", &r.url);
                labeled.push_field("created", r.created_at.to_rfc3339());
                if let Some(closed) = r.closed_at {
                    labeled.push_field("closed", closed.to_rfc3339());
                }
            }
            SyncRecord::Event(r) => {
                labeled.body = r.description.clone();
                labeled.push_field("calendar", &r.calendar_label);
                labeled.push_field("calendar_id", &r.calendar_id);
                if let Some(start) = r.start {
                    labeled.push_field("start", start.timestamp().to_string());
                }
                if let Some(end) = r.end {
                    labeled.push_field("end", end.timestamp().to_string());
                }
                if r.all_day {
                    labeled.push_field("all_day", "true");
                }
                labeled.push_field("location", &r.location);
                if !r.attendees.is_empty() {
                    labeled.push_field("attendees", r.attendees.join(", "));
                }
                if let Some(link) = &r.meet_link {
                    labeled.push_field("meet_link", link);
                }
                labeled.push_field("status", r.status.as_str());
            }
            SyncRecord::Document(r) => {
                labeled.body = document_body(r);
                labeled.push_field("author", &r.author);
                labeled.push_field("category", &r.category);
                labeled.push_field("source_url", &r.source_url);
                labeled.push_field("url", &r.url);
            }
        }

        labeled
    }
}

fn document_body(doc: &HighlightedDocument) -> String {
    let mut body = String::new();

    if !doc.summary.is_empty() {
        body.push_str("## Summary\n\n");
        body.push_str(&doc.summary);
        body.push_str("\n\n");
    }

    if !doc.highlights.is_empty() {
        body.push_str("## Highlights\n\n");
        for highlight in &doc.highlights {
            body.push_str("> ");
            body.push_str(&highlight.content.replace('\n', "\n> "));
            body.push('\n');
            if !highlight.note.is_empty() {
                body.push_str("\n**Note:** ");
                body.push_str(&highlight.note);
                body.push('\n');
            }
            body.push('\n');
        }
    }

    body
}
