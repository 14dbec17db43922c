//! Shared fixtures for unit tests.

use chrono::{TimeZone, Utc};

use crate::models::{
    document_id, event_id, issue_id, CalendarEvent, EventStatus, Highlight, HighlightedDocument,
    IssueKind, IssueRecord, IssueState,
};

pub fn sample_issue(number: u64) -> IssueRecord {
    IssueRecord {
        id: issue_id("acme/api", number),
        repo: "acme/api".to_string(),
        number,
        kind: IssueKind::Issue,
        title: format!("Issue {}", number),
        body: "Steps to reproduce".to_string(),
        state: IssueState::Open,
        merged: false,
        url: format!("https://github.com/acme/api/issues/{}", number),
        author: Some("octocat".to_string()),
        labels: vec!["bug".to_string()],
        created_at: Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap(),
        updated_at: Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap(),
        closed_at: None,
    }
}

pub fn sample_event(native_id: &str) -> CalendarEvent {
    CalendarEvent {
        id: event_id(native_id),
        calendar_id: "primary".to_string(),
        calendar_label: "Primary".to_string(),
        title: "Standup".to_string(),
        description: "Daily sync".to_string(),
        location: "Room 1".to_string(),
        start: Some(Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()),
        end: Some(Utc.with_ymd_and_hms(2026, 3, 2, 9, 15, 0).unwrap()),
        all_day: false,
        attendees: vec!["ada@example.com".to_string()],
        meet_link: None,
        status: EventStatus::Confirmed,
        updated_at: Some(Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap()),
    }
}

pub fn sample_document(native_id: &str, highlight_ids: &[&str]) -> HighlightedDocument {
    HighlightedDocument {
        id: document_id(native_id),
        title: "On Writing".to_string(),
        author: "Someone".to_string(),
        category: "article".to_string(),
        summary: String::new(),
        url: format!("https://read.readwise.io/read/{}", native_id),
        source_url: "https://example.com/essay".to_string(),
        updated_at: Some(Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap()),
        highlights: highlight_ids
            .iter()
            .map(|id| Highlight {
                id: id.to_string(),
                content: format!("highlight {}", id),
                note: String::new(),
            })
            .collect(),
    }
}

/// Serve `router` on an ephemeral local port and return its base URL.
pub async fn spawn_stub(router: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().expect("Failed to get addr");

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    format!("http://{}", addr)
}
