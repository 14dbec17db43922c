//! Credential providers for adapters that authenticate with OAuth tokens.
//!
//! The consent flow that produces the token file lives outside the relay; the
//! relay only reads it and refreshes the access token when it expires.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::HttpClient;
use crate::config::CalendarConfig;
use crate::errors::AppError;

/// Refresh this long before the recorded expiry.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Yields a bearer token for upstream requests.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String, AppError>;
}

/// A fixed token.
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticToken([REDACTED])")
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn access_token(&self) -> Result<String, AppError> {
        Ok(self.0.clone())
    }
}

/// On-disk token file.
#[derive(Clone, Serialize, Deserialize)]
struct TokenFile {
    access_token: String,
    #[serde(default)]
    refresh_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expiry: Option<DateTime<Utc>>,
    /// Anything else the consent flow wrote (account email, scopes)
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

impl TokenFile {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        match self.expiry {
            Some(expiry) => expiry - Duration::seconds(EXPIRY_MARGIN_SECS) > now,
            None => true,
        }
    }
}

#[derive(Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
}

/// Reads a token file and refreshes it against the token endpoint when expired.
pub struct RefreshingTokenProvider {
    path: PathBuf,
    client_id: Option<String>,
    client_secret: Option<String>,
    token_url: String,
    http: HttpClient,
    cached: Mutex<Option<TokenFile>>,
}

impl std::fmt::Debug for RefreshingTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshingTokenProvider")
            .field("path", &self.path)
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl RefreshingTokenProvider {
    pub fn new(config: &CalendarConfig, http: HttpClient) -> Self {
        Self {
            path: config.token_path.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            token_url: config.token_url.clone(),
            http,
            cached: Mutex::new(None),
        }
    }

    async fn load(&self) -> Result<TokenFile, AppError> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            AppError::Unauthorized(format!(
                "Cannot read token file {}: {}",
                self.path.display(),
                e
            ))
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    async fn refresh(&self, current: &TokenFile) -> Result<TokenFile, AppError> {
        let (Some(client_id), Some(client_secret)) = (&self.client_id, &self.client_secret) else {
            return Err(AppError::Unauthorized(
                "Access token expired and no OAuth client credentials are configured".to_string(),
            ));
        };
        if current.refresh_token.is_empty() {
            return Err(AppError::Unauthorized(
                "Access token expired and the token file has no refresh token".to_string(),
            ));
        }

        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", current.refresh_token.as_str()),
            ("client_id", client_id.as_str()),
            ("client_secret", client_secret.as_str()),
        ];
        let response: RefreshResponse = self
            .http
            .get_json(|c| c.post(&self.token_url).form(&form))
            .await?;

        let mut refreshed = current.clone();
        refreshed.access_token = response.access_token;
        refreshed.expiry = response
            .expires_in
            .map(|secs| Utc::now() + Duration::seconds(secs));
        if let Some(refresh_token) = response.refresh_token {
            refreshed.refresh_token = refresh_token;
        }
        if response.token_type.is_some() {
            refreshed.token_type = response.token_type;
        }

        // Persist so a restart does not refresh again; failure here is not fatal.
        match serde_json::to_string_pretty(&refreshed) {
            Ok(data) => {
                if let Err(e) = tokio::fs::write(&self.path, data).await {
                    tracing::warn!("Failed to persist refreshed token: {}", e);
                }
            }
            Err(e) => tracing::warn!("Failed to encode refreshed token: {}", e),
        }

        tracing::info!("Refreshed calendar access token");
        Ok(refreshed)
    }
}

#[async_trait]
impl TokenProvider for RefreshingTokenProvider {
    async fn access_token(&self) -> Result<String, AppError> {
        let mut cached = self.cached.lock().await;

        let current = match cached.take() {
            Some(token) => token,
            None => self.load().await?,
        };

        let token = if current.is_fresh(Utc::now()) {
            current
        } else {
            match self.refresh(&current).await {
                Ok(refreshed) => refreshed,
                Err(e) => {
                    *cached = Some(current);
                    return Err(e);
                }
            }
        };

        let access = token.access_token.clone();
        *cached = Some(token);
        Ok(access)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::RetryPolicy;
    use crate::test_support::spawn_stub;
    use axum::{routing::post, Form, Json, Router};
    use serde_json::json;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn config(dir: &TempDir, token_url: String) -> CalendarConfig {
        CalendarConfig {
            calendars: vec!["primary".to_string()],
            token_path: dir.path().join("google.json"),
            client_id: Some("client".to_string()),
            client_secret: Some("secret".to_string()),
            api_url: String::new(),
            token_url,
            interval: std::time::Duration::from_secs(300),
        }
    }

    fn http() -> HttpClient {
        HttpClient::new(RetryPolicy {
            max_attempts: 1,
            ..RetryPolicy::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_fresh_token_is_used_as_is() {
        let dir = TempDir::new().unwrap();
        let expiry = (Utc::now() + Duration::hours(1)).to_rfc3339();
        std::fs::write(
            dir.path().join("google.json"),
            json!({"access_token": "ya29.fresh", "refresh_token": "r", "expiry": expiry}).to_string(),
        )
        .unwrap();

        let provider = RefreshingTokenProvider::new(&config(&dir, "http://127.0.0.1:9".into()), http());
        assert_eq!(provider.access_token().await.unwrap(), "ya29.fresh");
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed_and_persisted() {
        let router = Router::new().route(
            "/token",
            post(|Form(form): Form<HashMap<String, String>>| async move {
                assert_eq!(form.get("grant_type").map(String::as_str), Some("refresh_token"));
                assert_eq!(form.get("refresh_token").map(String::as_str), Some("r-1"));
                Json(json!({"access_token": "ya29.new", "expires_in": 3600, "token_type": "Bearer"}))
            }),
        );
        let base = spawn_stub(router).await;

        let dir = TempDir::new().unwrap();
        let expiry = (Utc::now() - Duration::hours(1)).to_rfc3339();
        std::fs::write(
            dir.path().join("google.json"),
            json!({
                "access_token": "ya29.old",
                "refresh_token": "r-1",
                "expiry": expiry,
                "email": "ada@example.com"
            })
            .to_string(),
        )
        .unwrap();

        let provider = RefreshingTokenProvider::new(&config(&dir, format!("{}/token", base)), http());
        assert_eq!(provider.access_token().await.unwrap(), "ya29.new");

        let saved: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("google.json")).unwrap())
                .unwrap();
        assert_eq!(saved["access_token"], "ya29.new");
        assert_eq!(saved["refresh_token"], "r-1");
        assert_eq!(saved["email"], "ada@example.com");
    }

    #[tokio::test]
    async fn test_missing_token_file_is_unauthorized() {
        let dir = TempDir::new().unwrap();
        let provider = RefreshingTokenProvider::new(&config(&dir, String::new()), http());
        assert!(matches!(
            provider.access_token().await,
            Err(AppError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let token = StaticToken::new("rw-secret");
        assert!(!format!("{:?}", token).contains("rw-secret"));
    }
}
