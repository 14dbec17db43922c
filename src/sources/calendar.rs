//! Calendar adapter (Google Calendar API v3).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use reqwest::Url;
use serde::Deserialize;

use super::{FetchOutcome, HttpClient, SourceAdapter, TokenProvider};
use crate::config::CalendarConfig;
use crate::errors::AppError;
use crate::models::{event_id, CalendarEvent, EventStatus, Source, SyncRecord};

/// Sync window relative to now.
const WINDOW_PAST_DAYS: i64 = 7;
const WINDOW_FUTURE_DAYS: i64 = 84;
const PAGE_SIZE: &str = "250";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventPage {
    #[serde(default)]
    items: Vec<ApiEvent>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventTime {
    #[serde(default)]
    date_time: Option<DateTime<Utc>>,
    #[serde(default)]
    date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiAttendee {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntryPoint {
    #[serde(default)]
    entry_point_type: String,
    #[serde(default)]
    uri: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConferenceData {
    #[serde(default)]
    entry_points: Vec<EntryPoint>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiEvent {
    id: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    location: String,
    #[serde(default)]
    start: Option<EventTime>,
    #[serde(default)]
    end: Option<EventTime>,
    #[serde(default)]
    attendees: Vec<ApiAttendee>,
    #[serde(default)]
    hangout_link: Option<String>,
    #[serde(default)]
    conference_data: Option<ConferenceData>,
    #[serde(default)]
    updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct CalendarList {
    #[serde(default)]
    items: Vec<CalendarListEntry>,
}

#[derive(Debug, Deserialize)]
struct CalendarListEntry {
    id: String,
    #[serde(default)]
    summary: String,
}

impl ApiEvent {
    fn into_event(self, calendar_id: &str, calendar_label: &str) -> CalendarEvent {
        let start = self.start.unwrap_or_default();
        let end = self.end.unwrap_or_default();
        let all_day = start.date_time.is_none() && start.date.is_some();

        let meet_link = self.hangout_link.filter(|l| !l.is_empty()).or_else(|| {
            self.conference_data.and_then(|data| {
                data.entry_points
                    .into_iter()
                    .find(|ep| ep.entry_point_type == "video" && !ep.uri.is_empty())
                    .map(|ep| ep.uri)
            })
        });

        CalendarEvent {
            id: event_id(&self.id),
            calendar_id: calendar_id.to_string(),
            calendar_label: calendar_label.to_string(),
            title: self.summary,
            description: self.description,
            location: self.location,
            start: resolve_time(&start),
            end: resolve_time(&end),
            all_day,
            attendees: self
                .attendees
                .into_iter()
                .filter_map(|a| a.display_name.filter(|n| !n.is_empty()).or(a.email))
                .collect(),
            meet_link,
            status: EventStatus::parse(&self.status),
            updated_at: self.updated,
        }
    }
}

/// Timed events use their instant; all-day events use midnight UTC of their date.
fn resolve_time(time: &EventTime) -> Option<DateTime<Utc>> {
    time.date_time.or_else(|| {
        time.date
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc())
    })
}

/// Map a calendar to the category label the consumer groups events by.
pub fn calendar_label(calendar_id: &str, calendar_name: &str) -> String {
    let id_lower = calendar_id.to_lowercase();
    let name_lower = calendar_name.to_lowercase();

    if calendar_id == "primary"
        || calendar_id.contains("@gmail.com")
        || calendar_id.contains("@googlemail.com")
    {
        return "Primary".to_string();
    }
    if id_lower.contains("work") || name_lower.contains("work") {
        return "Work".to_string();
    }
    if name_lower.contains("personal") {
        return "Personal".to_string();
    }
    if calendar_id.contains('@')
        && !calendar_id.contains("group.calendar.google.com")
        && !calendar_id.contains("import.calendar.google.com")
    {
        return "Primary".to_string();
    }
    if calendar_name.is_empty() {
        calendar_id.to_string()
    } else {
        calendar_name.to_string()
    }
}

/// Lists events of every configured calendar inside the sync window.
pub struct CalendarAdapter {
    http: HttpClient,
    credentials: Arc<dyn TokenProvider>,
    calendars: Vec<String>,
    api_url: String,
}

impl CalendarAdapter {
    pub fn new(config: &CalendarConfig, http: HttpClient, credentials: Arc<dyn TokenProvider>) -> Self {
        Self {
            http,
            credentials,
            calendars: config.calendars.clone(),
            api_url: config.api_url.trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, AppError> {
        let mut url = Url::parse(&self.api_url)
            .map_err(|e| AppError::Validation(format!("Invalid calendar API URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| AppError::Validation("Calendar API URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Display names by calendar id. Failure only costs the nicer labels.
    async fn calendar_names(&self, token: &str) -> HashMap<String, String> {
        let result = async {
            let url = self.endpoint(&["users", "me", "calendarList"])?;
            self.http
                .get_json::<CalendarList, _>(|c| c.get(url.clone()).bearer_auth(token))
                .await
        }
        .await;

        match result {
            Ok(list) => list
                .items
                .into_iter()
                .map(|entry| (entry.id, entry.summary))
                .collect(),
            Err(e) => {
                tracing::warn!("Failed to fetch calendar list, using ids as names: {}", e);
                HashMap::new()
            }
        }
    }

    async fn fetch_calendar(
        &self,
        token: &str,
        calendar_id: &str,
        label: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>, AppError> {
        let url = self.endpoint(&["calendars", calendar_id, "events"])?;
        let time_min = (now - Duration::days(WINDOW_PAST_DAYS)).to_rfc3339();
        let time_max = (now + Duration::days(WINDOW_FUTURE_DAYS)).to_rfc3339();

        let mut events = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![
                ("timeMin", time_min.as_str()),
                ("timeMax", time_max.as_str()),
                ("singleEvents", "true"),
                ("showDeleted", "true"),
                ("orderBy", "startTime"),
                ("maxResults", PAGE_SIZE),
            ];
            if let Some(page) = page_token.as_deref() {
                query.push(("pageToken", page));
            }

            let page: EventPage = self
                .http
                .get_json(|c| c.get(url.clone()).bearer_auth(token).query(&query))
                .await?;

            events.extend(
                page.items
                    .into_iter()
                    .map(|item| item.into_event(calendar_id, label)),
            );

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        Ok(events)
    }
}

#[async_trait]
impl SourceAdapter for CalendarAdapter {
    fn source(&self) -> Source {
        Source::Calendar
    }

    fn scopes(&self) -> Vec<String> {
        self.calendars.clone()
    }

    async fn fetch(&self, _since: Option<DateTime<Utc>>) -> FetchOutcome {
        let mut outcome = FetchOutcome::default();

        let token = match self.credentials.access_token().await {
            Ok(token) => token,
            Err(e) => {
                // Without a token every calendar fails the same way.
                for calendar in &self.calendars {
                    outcome.fail(
                        calendar.clone(),
                        AppError::Unauthorized(e.message()),
                    );
                }
                return outcome;
            }
        };

        let names = self.calendar_names(&token).await;
        let now = Utc::now();

        for calendar_id in &self.calendars {
            let name = names.get(calendar_id).map(String::as_str).unwrap_or(calendar_id);
            let label = calendar_label(calendar_id, name);

            match self.fetch_calendar(&token, calendar_id, &label, now).await {
                Ok(events) => {
                    tracing::debug!(calendar = %calendar_id, count = events.len(), "Fetched calendar");
                    outcome
                        .records
                        .extend(events.into_iter().map(SyncRecord::Event));
                }
                Err(e) => outcome.fail(calendar_id.clone(), e),
            }
        }

        outcome
    }
}
