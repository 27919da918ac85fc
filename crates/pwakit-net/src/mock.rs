//! Scripted in-memory fetcher.
//!
//! Routes are keyed by the full URL string. Unrouted URLs answer 404, and the whole
//! fetcher can be switched offline to simulate an unreachable network.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderValue, StatusCode};

use crate::{Fetcher, NetError, Request, Response};

#[derive(Debug, Clone)]
struct MockRoute {
    status: StatusCode,
    body: Bytes,
    content_type: Option<&'static str>,
}

/// Fetcher that answers from a routing table.
#[derive(Debug, Default)]
pub struct MockFetcher {
    routes: Mutex<HashMap<String, MockRoute>>,
    offline: AtomicBool,
    calls: AtomicUsize,
    latency: Mutex<Option<Duration>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `url` with the given status and body.
    pub fn route(&self, url: &str, status: u16, body: impl Into<Bytes>) -> &Self {
        self.insert(url, status, body.into(), None);
        self
    }

    /// Answer `url` with a 200 and a content type.
    pub fn route_typed(
        &self,
        url: &str,
        content_type: &'static str,
        body: impl Into<Bytes>,
    ) -> &Self {
        self.insert(url, 200, body.into(), Some(content_type));
        self
    }

    fn insert(&self, url: &str, status: u16, body: Bytes, content_type: Option<&'static str>) {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        self.routes
            .lock()
            .expect("mock routes poisoned")
            .insert(
                url.to_string(),
                MockRoute {
                    status,
                    body,
                    content_type,
                },
            );
    }

    /// Simulate losing (or regaining) connectivity.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Delay every answer, so concurrent requests overlap.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().expect("mock latency poisoned") = Some(latency);
    }

    /// Total fetch attempts, including offline ones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        let key = request.url.to_string();
        self.calls.fetch_add(1, Ordering::SeqCst);

        let latency = *self.latency.lock().expect("mock latency poisoned");
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if self.offline.load(Ordering::SeqCst) {
            return Err(NetError::Unreachable(key));
        }

        let route = self
            .routes
            .lock()
            .expect("mock routes poisoned")
            .get(&key)
            .cloned();

        let response = match route {
            Some(route) => {
                let mut response = Response::new(request.url.clone(), route.status, route.body);
                if let Some(content_type) = route.content_type {
                    response.headers.insert(
                        http::header::CONTENT_TYPE,
                        HeaderValue::from_static(content_type),
                    );
                }
                response
            }
            None => Response::new(request.url.clone(), StatusCode::NOT_FOUND, Bytes::new()),
        };
        Ok(response)
    }
}
