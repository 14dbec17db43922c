//! Bounded SSE session draining the delivery queue.
//!
//! A session announces itself with a `connected` event, then pops at most one
//! item per poll tick and sends a heartbeat comment when the queue is empty.
//! It closes after the connection window so the consumer reconnects.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use futures::stream::{self, Stream};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use crate::queue::DeliveryQueue;
use crate::AppState;

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

struct Session {
    queue: Arc<DeliveryQueue>,
    ticker: Interval,
    deadline: Instant,
    announced: bool,
    delivered: usize,
}

impl Session {
    fn new(queue: Arc<DeliveryQueue>, poll_interval: Duration, window: Duration) -> Self {
        // A zero period would panic inside the interval.
        let poll_interval = poll_interval.max(MIN_POLL_INTERVAL);
        let now = Instant::now();
        let mut ticker = interval_at(now + poll_interval, poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            queue,
            ticker,
            deadline: now + window,
            announced: false,
            delivered: 0,
        }
    }

    /// Next event of the session, `None` once the window has elapsed.
    async fn next_event(&mut self) -> Option<Event> {
        if !self.announced {
            self.announced = true;
            return Some(Event::default().event("connected").data("{}"));
        }

        tokio::select! {
            _ = tokio::time::sleep_until(self.deadline) => None,
            _ = self.ticker.tick() => Some(self.drain_one().await),
        }
    }

    async fn drain_one(&mut self) -> Event {
        let Some(item) = self.queue.pop_oldest().await else {
            return Event::default().comment("heartbeat");
        };

        match Event::default().json_data(&item) {
            Ok(event) => {
                self.delivered += 1;
                tracing::debug!(id = item.id, action = %item.action, bytes = item.content.len(), "Sent item over stream");
                event
            }
            Err(e) => {
                tracing::error!(id = item.id, error = %e, "Failed to encode queue item, dropping it");
                Event::default().comment("heartbeat")
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        tracing::debug!(delivered = self.delivered, "Stream session closed");
    }
}

/// GET /stream - Server-sent events for the consumer.
pub async fn stream_queue(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    tracing::info!("Stream client connected");

    let session = Session::new(
        state.queue.clone(),
        state.config.stream_poll_interval,
        state.config.stream_window,
    );

    let events = stream::unfold(session, |mut session| async move {
        let event = session.next_event().await?;
        Some((Ok(event), session))
    });

    Sse::new(events)
}
