//! Integration tests for the relay's HTTP surface.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::db::{init_database, Repository};
use crate::models::{Source, SyncRecord};
use crate::queue::DeliveryQueue;
use crate::render::FrontmatterRenderer;
use crate::sources::{FetchOutcome, SourceAdapter};
use crate::sync::{QueueSink, Schedule, Scheduler, SourceTask, Upserter};
use crate::test_support::sample_issue;
use crate::{create_router, AppState};

const TOKEN: &str = "test-token";

/// Issue source that always reports the same two issues.
struct FixedIssues;

#[async_trait]
impl SourceAdapter for FixedIssues {
    fn source(&self) -> Source {
        Source::Github
    }

    fn scopes(&self) -> Vec<String> {
        vec!["acme/api".to_string()]
    }

    async fn fetch(&self, _since: Option<DateTime<Utc>>) -> FetchOutcome {
        FetchOutcome {
            records: vec![
                SyncRecord::Issue(sample_issue(1)),
                SyncRecord::Issue(sample_issue(2)),
            ],
            failures: Vec::new(),
        }
    }
}

/// Test fixture for integration tests.
struct TestFixture {
    client: Client,
    base_url: String,
    queue: Arc<DeliveryQueue>,
    scheduler: Arc<Scheduler>,
    repo: Repository,
    _temp_dir: TempDir,
}

impl TestFixture {
    async fn new() -> Self {
        Self::with_github(false).await
    }

    async fn with_github(github: bool) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.sqlite");

        let config = Config {
            api_token: TOKEN.to_string(),
            db_path: db_path.clone(),
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            log_level: "warn".to_string(),
            stream_poll_interval: Duration::from_millis(50),
            stream_window: Duration::from_millis(400),
            ..Config::default()
        };

        let pool = init_database(&db_path, config.store_lock_timeout)
            .await
            .expect("Failed to init DB");
        let repo = Repository::new(pool);

        let queue = Arc::new(DeliveryQueue::new(None));
        let mut scheduler = Scheduler::new(CancellationToken::new());
        if github {
            let sink = Arc::new(QueueSink::new(queue.clone(), Arc::new(FrontmatterRenderer)));
            let task = SourceTask::new(Arc::new(FixedIssues), repo.clone(), sink, config.fetch_timeout);
            scheduler.register(
                task,
                Schedule {
                    interval: Duration::from_secs(3600),
                    initial_delay: Duration::ZERO,
                },
            );
        }
        let scheduler = Arc::new(scheduler);

        let state = AppState {
            queue: queue.clone(),
            scheduler: scheduler.clone(),
            config: Arc::new(config),
        };

        let app = create_router(state);

        // Bind to random port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to get addr");
        let base_url = format!("http://{}", addr);

        // Spawn server
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "authorization",
            format!("Bearer {}", TOKEN).parse().unwrap(),
        );

        TestFixture {
            client: Client::builder().default_headers(headers).build().unwrap(),
            base_url,
            queue,
            scheduler,
            repo,
            _temp_dir: temp_dir,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn submit(&self, body: Value) -> reqwest::Response {
        self.client
            .post(self.url("/queue"))
            .json(&body)
            .send()
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn test_health_check_needs_no_token() {
    let fixture = TestFixture::new().await;

    let resp = Client::new().get(fixture.url("/health")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({"status": "ok"}));
}

#[tokio::test]
async fn test_auth_missing_token() {
    let fixture = TestFixture::new().await;

    let resp = Client::new().get(fixture.url("/peek")).send().await.unwrap();
    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_auth_wrong_token() {
    let fixture = TestFixture::new().await;

    let resp = Client::new()
        .post(fixture.url("/queue"))
        .bearer_auth("not-the-token")
        .json(&json!({"content": "x"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
    assert_eq!(fixture.queue.len().await, 0);
}

#[tokio::test]
async fn test_auth_query_token() {
    let fixture = TestFixture::new().await;

    let resp = Client::new()
        .get(fixture.url(&format!("/peek?token={}", TOKEN)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_cors_preflight_allows_private_network() {
    let fixture = TestFixture::new().await;

    let resp = Client::new()
        .request(reqwest::Method::OPTIONS, fixture.url("/peek"))
        .header("origin", "https://notes.example.com")
        .header("access-control-request-method", "GET")
        .header("access-control-request-private-network", "true")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let header = |name: &str| {
        resp.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    assert_eq!(
        header("access-control-allow-private-network").as_deref(),
        Some("true")
    );
    assert_eq!(header("access-control-allow-origin").as_deref(), Some("*"));
}

#[tokio::test]
async fn test_submit_then_pending_in_order() {
    let fixture = TestFixture::new().await;

    let first = fixture
        .submit(json!({"content": "Had coffee", "action": "lifelog", "title": "Morning"}))
        .await;
    assert_eq!(first.status(), 200);
    let first: Value = first.json().await.unwrap();
    assert_eq!(first["success"], true);

    let second: Value = fixture
        .submit(json!({"content": "Second note"}))
        .await
        .json()
        .await
        .unwrap();
    assert!(second["id"].as_u64().unwrap() > first["id"].as_u64().unwrap());

    let resp = fixture.client.get(fixture.url("/pending")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let item: Value = resp.json().await.unwrap();
    assert_eq!(item["id"], first["id"]);
    assert_eq!(item["content"], "Had coffee");
    assert_eq!(item["action"], "lifelog");
    assert_eq!(item["title"], "Morning");
    assert!(item["createdAt"].is_string());

    let item: Value = fixture
        .client
        .get(fixture.url("/pending"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(item["action"], "append");

    let resp = fixture.client.get(fixture.url("/pending")).send().await.unwrap();
    assert_eq!(resp.status(), 204);
}

#[tokio::test]
async fn test_submit_rejects_malformed_items() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .post(fixture.url("/queue"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "BAD_REQUEST");

    let resp = fixture.submit(json!({"title": "no content"})).await;
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["message"], "content required");

    let resp = fixture.submit(json!({"content": ""})).await;
    assert_eq!(resp.status(), 400);

    assert_eq!(fixture.queue.len().await, 0);
}

#[tokio::test]
async fn test_peek_does_not_consume() {
    let fixture = TestFixture::new().await;
    fixture.submit(json!({"content": "a"})).await;
    fixture.submit(json!({"content": "b"})).await;

    for _ in 0..2 {
        let body: Value = fixture
            .client
            .get(fixture.url("/peek"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["count"], 2);
        let contents: Vec<_> = body["items"]
            .as_array()
            .unwrap()
            .iter()
            .map(|i| i["content"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(contents, vec!["a", "b"]);
    }
}

#[tokio::test]
async fn test_sync_unknown_source() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .post(fixture.url("/sync/jira"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_sync_unconfigured_source() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .post(fixture.url("/sync/readwise"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["message"], "readwise sync not configured");
}

#[tokio::test]
async fn test_sync_trigger_enqueues_changes() {
    let fixture = TestFixture::with_github(true).await;

    let resp = fixture
        .client
        .post(fixture.url("/sync/github"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "sync started");

    // The run is in the background; wait for it to land.
    fixture.scheduler.shutdown().await;

    let body: Value = fixture
        .client
        .get(fixture.url("/peek"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["count"], 2);
    let first = body["items"][0]["content"].as_str().unwrap();
    assert!(first.contains("verb: opened"));
    assert_eq!(body["items"][0]["collection"], "GitHub");
}

#[tokio::test]
async fn test_sync_resync_wipes_store_and_requeues() {
    let fixture = TestFixture::with_github(true).await;

    // Both fetched issues are already known, plus one the source no longer reports.
    let upserter = Upserter::new(fixture.repo.clone());
    for number in [1, 2, 99] {
        upserter
            .upsert(&SyncRecord::Issue(sample_issue(number)))
            .await
            .unwrap();
    }
    fixture
        .repo
        .set_meta(Source::Github, "last_sync", "2026-01-01T00:00:00Z")
        .await
        .unwrap();
    assert_eq!(fixture.repo.count_snapshots(Source::Github).await.unwrap(), 3);

    let resp = fixture
        .client
        .post(fixture.url("/sync/github?resync=true"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    fixture.scheduler.shutdown().await;

    assert_eq!(fixture.repo.count_snapshots(Source::Github).await.unwrap(), 2);
    assert!(fixture
        .repo
        .get_meta(Source::Github, "last_sync")
        .await
        .unwrap()
        .is_none());

    // Without the wipe both issues would be unchanged and nothing queued.
    let items = fixture.queue.peek_all().await;
    assert_eq!(items.len(), 2);
    assert!(items.iter().all(|item| item.content.contains("verb: opened")));
}

#[tokio::test]
async fn test_sync_trigger_after_shutdown_is_rejected() {
    let fixture = TestFixture::with_github(true).await;
    fixture.scheduler.shutdown().await;

    let resp = fixture
        .client
        .post(fixture.url("/sync/github?resync=true"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);
}

#[tokio::test]
async fn test_stream_delivers_connected_items_and_heartbeats() {
    let fixture = TestFixture::new().await;
    fixture.submit(json!({"content": "streamed note"})).await;

    let mut resp = fixture
        .client
        .get(fixture.url("/stream"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(resp
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .starts_with("text/event-stream"));

    // The session closes on its own after the window.
    let mut body = String::new();
    while let Some(chunk) = resp.chunk().await.unwrap() {
        body.push_str(&String::from_utf8_lossy(&chunk));
    }

    assert!(body.starts_with("event: connected\ndata: {}\n\n"));
    assert!(body.contains("\"content\":\"streamed note\""));
    assert!(body.contains(": heartbeat"));
    assert_eq!(fixture.queue.len().await, 0);
}
