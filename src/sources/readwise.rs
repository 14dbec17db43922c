//! Highlight service adapter (Readwise Reader list API).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;

use super::{FetchOutcome, HttpClient, SourceAdapter, TokenProvider};
use crate::config::ReadwiseConfig;
use crate::errors::AppError;
use crate::models::{document_id, Highlight, HighlightedDocument, Source, SyncRecord};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListPage {
    #[serde(default)]
    results: Vec<ApiItem>,
    #[serde(default)]
    next_page_cursor: Option<String>,
}

/// A list entry: a document, or a highlight when `parent_id` is set.
#[derive(Debug, Clone, Deserialize)]
struct ApiItem {
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    source_url: Option<String>,
    #[serde(default)]
    parent_id: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, alias = "notes")]
    note: Option<String>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

impl ApiItem {
    fn into_highlight(self) -> Highlight {
        Highlight {
            id: self.id,
            content: self.content.unwrap_or_default(),
            note: self.note.unwrap_or_default(),
        }
    }

    fn into_document(self, highlights: Vec<Highlight>) -> HighlightedDocument {
        HighlightedDocument {
            id: document_id(&self.id),
            title: self.title.unwrap_or_default(),
            author: self.author.unwrap_or_default(),
            category: self.category.unwrap_or_default(),
            summary: self.summary.unwrap_or_default(),
            url: self.url.unwrap_or_default(),
            source_url: self.source_url.unwrap_or_default(),
            updated_at: self.updated_at,
            highlights,
        }
    }
}

/// Lists documents and highlights updated since the watermark.
pub struct ReadwiseAdapter {
    http: HttpClient,
    credentials: Arc<dyn TokenProvider>,
    api_url: String,
}

impl ReadwiseAdapter {
    pub fn new(config: &ReadwiseConfig, http: HttpClient, credentials: Arc<dyn TokenProvider>) -> Self {
        Self {
            http,
            credentials,
            api_url: config.api_url.trim_end_matches('/').to_string(),
        }
    }

    fn list_url(&self) -> String {
        format!("{}/list/", self.api_url)
    }

    async fn list_page(
        &self,
        token: &str,
        query: &[(&str, &str)],
    ) -> Result<ListPage, AppError> {
        let url = self.list_url();
        let auth = format!("Token {}", token);
        self.http
            .get_json(|c| c.get(&url).header("Authorization", &auth).query(query))
            .await
    }

    /// Every item changed since `since`, following `pageCursor`.
    async fn list_all(
        &self,
        token: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ApiItem>, AppError> {
        let updated_after = since.map(|s| s.to_rfc3339_opts(SecondsFormat::Secs, true));
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut query = Vec::new();
            if let Some(after) = updated_after.as_deref() {
                query.push(("updatedAfter", after));
            }
            if let Some(c) = cursor.as_deref() {
                query.push(("pageCursor", c));
            }

            let page = self.list_page(token, &query).await?;
            items.extend(page.results);

            match page.next_page_cursor.filter(|c| !c.is_empty()) {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        Ok(items)
    }

    /// Look up a single document by id.
    async fn fetch_document(&self, token: &str, id: &str) -> Result<Option<ApiItem>, AppError> {
        let page = self.list_page(token, &[("id", id)]).await?;
        Ok(page
            .results
            .into_iter()
            .find(|item| item.id == id && item.parent_id.is_none()))
    }
}

#[async_trait]
impl SourceAdapter for ReadwiseAdapter {
    fn source(&self) -> Source {
        Source::Readwise
    }

    fn scopes(&self) -> Vec<String> {
        vec![self.list_url()]
    }

    fn uses_watermark(&self) -> bool {
        true
    }

    async fn fetch(&self, since: Option<DateTime<Utc>>) -> FetchOutcome {
        let mut outcome = FetchOutcome::default();
        let scope = "list";

        let token = match self.credentials.access_token().await {
            Ok(token) => token,
            Err(e) => {
                outcome.fail(scope, e);
                return outcome;
            }
        };

        let items = match self.list_all(&token, since).await {
            Ok(items) => items,
            Err(e) => {
                outcome.fail(scope, e);
                return outcome;
            }
        };

        let mut documents: Vec<ApiItem> = Vec::new();
        let mut highlights: HashMap<String, Vec<Highlight>> = HashMap::new();
        let mut parent_order: Vec<String> = Vec::new();

        for item in items {
            match item.parent_id.clone() {
                Some(parent) => {
                    let entry = highlights.entry(parent.clone()).or_default();
                    if entry.is_empty() {
                        parent_order.push(parent);
                    }
                    entry.push(item.into_highlight());
                }
                None => documents.push(item),
            }
        }

        // Highlights whose document was not updated in this window.
        for parent in parent_order {
            if documents.iter().any(|d| d.id == parent) {
                continue;
            }
            match self.fetch_document(&token, &parent).await {
                Ok(Some(doc)) => documents.push(doc),
                Ok(None) => {
                    tracing::warn!(document = %parent, "Highlight parent not found, skipping")
                }
                Err(e) => outcome.fail(format!("document {}", parent), e),
            }
        }

        for doc in documents {
            let Some(doc_highlights) = highlights.remove(&doc.id) else {
                continue;
            };
            outcome
                .records
                .push(SyncRecord::Document(doc.into_document(doc_highlights)));
        }

        outcome
    }
}
