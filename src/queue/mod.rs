//! In-memory delivery queue.
//!
//! Items are ordered by a strictly increasing identifier and removed on read,
//! so each item is handed to the consumer at most once. Nothing here survives a
//! restart.

use std::collections::BTreeMap;

use chrono::Utc;
use tokio::sync::Mutex;

use crate::models::{NewQueueItem, QueueItem};

/// Ordered holding area between the sync engine and the single consumer.
pub struct DeliveryQueue {
    state: Mutex<QueueState>,
    max_items: Option<usize>,
}

#[derive(Default)]
struct QueueState {
    items: BTreeMap<u64, QueueItem>,
    last_id: u64,
}

impl QueueState {
    /// Microsecond timestamp, bumped past the previous id on ties or clock regression.
    fn next_id(&mut self) -> u64 {
        let now = u64::try_from(Utc::now().timestamp_micros()).unwrap_or(0);
        let id = now.max(self.last_id + 1);
        self.last_id = id;
        id
    }

    /// Insert an item, evicting the oldest entries past `max`. Returns how many were evicted.
    fn push(&mut self, item: QueueItem, max: Option<usize>) -> usize {
        self.last_id = self.last_id.max(item.id);
        self.items.insert(item.id, item);

        let mut evicted = 0;
        if let Some(max) = max {
            while self.items.len() > max {
                if self.items.pop_first().is_none() {
                    break;
                }
                evicted += 1;
            }
        }
        evicted
    }
}

impl DeliveryQueue {
    /// Create a queue; `max_items` caps its length with drop-oldest eviction.
    pub fn new(max_items: Option<usize>) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            max_items,
        }
    }

    /// Append an item and return it with its assigned identifier.
    pub async fn enqueue(&self, new_item: NewQueueItem) -> QueueItem {
        let mut state = self.state.lock().await;

        let item = QueueItem {
            id: state.next_id(),
            content: new_item.content,
            action: new_item.action,
            collection: new_item.collection,
            title: new_item.title,
            created_at: Utc::now(),
        };

        let evicted = state.push(item.clone(), self.max_items);
        if evicted > 0 {
            tracing::warn!(
                evicted,
                max_items = ?self.max_items,
                "Delivery queue full, dropped oldest items"
            );
        }

        item
    }

    /// Remove and return the item with the lowest identifier.
    pub async fn pop_oldest(&self) -> Option<QueueItem> {
        self.state.lock().await.items.pop_first().map(|(_, item)| item)
    }

    /// Snapshot of every queued item in delivery order. Does not remove anything.
    pub async fn peek_all(&self) -> Vec<QueueItem> {
        self.state.lock().await.items.values().cloned().collect()
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.state.lock().await.items.len()
    }
}
