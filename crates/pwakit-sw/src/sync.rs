//! Outbox of deferred requests for background sync.

use std::collections::VecDeque;

use hashbrown::HashMap;
use pwakit_net::Request;

/// Deferred non-GET requests, queued per sync tag in arrival order.
#[derive(Debug, Default)]
pub struct Outbox {
    queues: HashMap<String, VecDeque<Request>>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a request under a tag.
    pub fn push(&mut self, tag: &str, request: Request) {
        self.queues
            .entry(tag.to_string())
            .or_default()
            .push_back(request);
    }

    /// Remove and return every request queued under a tag.
    pub fn take(&mut self, tag: &str) -> Vec<Request> {
        self.queues
            .remove(tag)
            .map(Vec::from)
            .unwrap_or_default()
    }

    /// Put requests back ahead of anything queued since they were taken.
    pub fn requeue_front(&mut self, tag: &str, requests: Vec<Request>) {
        if requests.is_empty() {
            return;
        }
        let queue = self.queues.entry(tag.to_string()).or_default();
        for request in requests.into_iter().rev() {
            queue.push_front(request);
        }
    }

    pub fn len(&self, tag: &str) -> usize {
        self.queues.get(tag).map(VecDeque::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.queues.values().all(VecDeque::is_empty)
    }
}
