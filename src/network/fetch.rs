//! Block-fetch queue
//!
//! Holds the ids of announced blocks that still have to be requested, one at
//! a time, from the peer that announced them, plus the id currently in flight.

use std::collections::VecDeque;
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct Queue {
    pending: VecDeque<String>,
    in_flight: Option<String>,
}

#[derive(Debug, Default)]
pub struct BlockFetchQueue {
    inner: Mutex<Queue>,
}

impl BlockFetchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the queue with `items` and take the first one out as the
    /// block in flight.
    ///
    /// Every copy of the taken id is dropped so it is never requested twice.
    pub async fn replace_and_take_first(&self, items: Vec<String>) -> Option<String> {
        let mut queue = self.inner.lock().await;
        queue.pending = items.into();

        let first = queue.pending.pop_front();
        if let Some(first) = &first {
            queue.pending.retain(|id| id != first);
        }
        queue.in_flight = first.clone();
        first
    }

    /// Take the next id; it becomes the block in flight
    pub async fn pop_next(&self) -> Option<String> {
        let mut queue = self.inner.lock().await;
        queue.in_flight = queue.pending.pop_front();
        queue.in_flight.clone()
    }

    /// Advance past `hash` only if it is the block in flight.
    ///
    /// Returns `None` when `hash` was not requested, leaving the queue as it
    /// was; otherwise the id taken next, which may itself be `None`.
    pub async fn advance_past(&self, hash: &str) -> Option<Option<String>> {
        let mut queue = self.inner.lock().await;
        if queue.in_flight.as_deref() != Some(hash) {
            return None;
        }
        queue.in_flight = queue.pending.pop_front();
        Some(queue.in_flight.clone())
    }

    pub async fn in_flight(&self) -> Option<String> {
        self.inner.lock().await.in_flight.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.pending.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.pending.is_empty()
    }

    pub async fn snapshot(&self) -> Vec<String> {
        self.inner.lock().await.pending.iter().cloned().collect()
    }
}
