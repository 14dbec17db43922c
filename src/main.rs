//! Delta Relay
//!
//! Polls remote systems of record, detects what changed since the last look and
//! hands rendered change notes to a single local consumer over HTTP.

mod api;
mod auth;
mod config;
mod db;
mod errors;
mod models;
mod queue;
mod render;
mod sources;
mod sync;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::{Config, LogFormat};
use db::Repository;
use errors::AppError;
use queue::DeliveryQueue;
use render::FrontmatterRenderer;
use sources::{
    CalendarAdapter, GitHubAdapter, HttpClient, ReadwiseAdapter, RefreshingTokenProvider,
    RetryPolicy, SourceAdapter, StaticToken,
};
use sync::{QueueSink, Schedule, Scheduler, SourceTask};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<DeliveryQueue>,
    pub scheduler: Arc<Scheduler>,
    pub config: Arc<Config>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(env_filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }

    tracing::info!("Starting Delta Relay");
    tracing::info!("Database path: {:?}", config.db_path);
    tracing::info!("Bind address: {}", config.bind_addr);

    if config.uses_default_token() {
        tracing::warn!("RELAY_TOKEN is not set, using the built-in development token");
    }

    // Initialize database
    let pool = db::init_database(&config.db_path, config.store_lock_timeout).await?;
    let repo = Repository::new(pool);
    for source in models::Source::ALL {
        let snapshots = repo.count_snapshots(source).await?;
        tracing::info!(source = %source, snapshots, "Loaded snapshot table");
    }

    let queue = Arc::new(DeliveryQueue::new(config.queue_max_items));
    let shutdown = CancellationToken::new();

    let scheduler = Arc::new(build_scheduler(&config, repo, queue.clone(), shutdown.clone())?);
    scheduler.start();
    tracing::info!(sources = ?scheduler.sources(), "Scheduler started");

    let state = AppState {
        queue,
        scheduler: scheduler.clone(),
        config: Arc::new(config.clone()),
    };

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    tracing::info!("Waiting for running syncs to finish");
    scheduler.shutdown().await;
    tracing::info!("Shutdown complete");

    Ok(())
}

/// Resolve on Ctrl-C and tell the background work to stop.
async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
    }
    tracing::info!("Shutdown requested");
    shutdown.cancel();
}

/// Register a task for every source the configuration enables.
pub fn build_scheduler(
    config: &Config,
    repo: Repository,
    queue: Arc<DeliveryQueue>,
    shutdown: CancellationToken,
) -> Result<Scheduler, AppError> {
    // Retries run inside the fetch timeout, so size them to fit it.
    let http = HttpClient::new(RetryPolicy::default().within(config.fetch_timeout))?;
    let sink = Arc::new(QueueSink::new(queue, Arc::new(FrontmatterRenderer)));
    let mut scheduler = Scheduler::new(shutdown);

    let mut register = |adapter: Arc<dyn SourceAdapter>, schedule: Schedule| {
        tracing::info!(
            source = %adapter.source(),
            scopes = ?adapter.scopes(),
            interval_secs = schedule.interval.as_secs(),
            "Source enabled"
        );
        let task = SourceTask::new(adapter, repo.clone(), sink.clone(), config.fetch_timeout);
        scheduler.register(task, schedule);
    };

    match &config.github {
        Some(github) => register(
            Arc::new(GitHubAdapter::new(github, http.clone())),
            Schedule {
                interval: github.interval,
                initial_delay: std::time::Duration::ZERO,
            },
        ),
        None => tracing::info!(source = "github", "Source disabled: GITHUB_TOKEN or GITHUB_REPOS not set"),
    }

    match &config.calendar {
        Some(calendar) => {
            let credentials = Arc::new(RefreshingTokenProvider::new(calendar, http.clone()));
            register(
                Arc::new(CalendarAdapter::new(calendar, http.clone(), credentials)),
                Schedule {
                    interval: calendar.interval,
                    initial_delay: std::time::Duration::ZERO,
                },
            )
        }
        None => tracing::info!(source = "calendar", "Source disabled: GOOGLE_CALENDARS not set"),
    }

    match &config.readwise {
        Some(readwise) => {
            let credentials = Arc::new(StaticToken::new(readwise.token.clone()));
            register(
                Arc::new(ReadwiseAdapter::new(readwise, http.clone(), credentials)),
                Schedule {
                    interval: readwise.interval,
                    initial_delay: readwise.initial_delay,
                },
            )
        }
        None => tracing::info!(source = "readwise", "Source disabled: READWISE_TOKEN not set"),
    }

    Ok(scheduler)
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    // CORS configuration; the consumer runs in a browser on another origin
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .allow_private_network(true);

    let token: Arc<str> = Arc::from(state.config.api_token.as_str());

    let api_routes = Router::new()
        // Queue
        .route("/queue", post(api::submit_item))
        .route("/pending", get(api::pending))
        .route("/peek", get(api::peek))
        .route("/stream", get(api::stream_queue))
        // Sync
        .route("/sync/{source}", post(api::trigger_sync))
        .layer(middleware::from_fn(move |req, next| {
            auth::token_auth_layer(token.clone(), req, next)
        }));

    // Health check (no auth required)
    let health_routes = Router::new().route("/health", get(api::health_check));

    Router::new()
        .merge(api_routes)
        .merge(health_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod test_support;
#[cfg(test)]
mod tests;
