//! Test doubles: a scripted adapter and a canned HTTP transport.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

use crate::models::{FieldValue, PartialRecord, Query, QueryKinds};
use crate::sources::{SourceAdapter, SourceError, SourceErrorKind};
use crate::utils::{HttpRequest, HttpResponse, Transport, TransportError};

#[derive(Debug, Clone)]
enum Behavior {
    Respond,
    Fail(SourceErrorKind),
    /// Never answers; only the deadline ends the call
    Hang,
}

/// A scripted adapter.
///
/// Responds with its configured fields after an optional delay, or fails with
/// a fixed error kind. Counts how often it was called.
#[derive(Debug)]
pub struct MockSource {
    name: String,
    capabilities: QueryKinds,
    priority: i32,
    confidence: i32,
    fields: Vec<(String, FieldValue)>,
    behavior: Behavior,
    delay: Duration,
    calls: AtomicUsize,
}

impl MockSource {
    pub fn new(name: &str, capabilities: QueryKinds) -> Self {
        Self {
            name: name.to_string(),
            capabilities,
            priority: 100,
            confidence: 1,
            fields: Vec::new(),
            behavior: Behavior::Respond,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_confidence(mut self, confidence: i32) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_field(mut self, name: &str, value: FieldValue) -> Self {
        self.fields.push((name.to_string(), value));
        self
    }

    pub fn with_text(self, name: &str, value: &str) -> Self {
        self.with_field(name, FieldValue::Text(value.to_string()))
    }

    pub fn failing(mut self, kind: SourceErrorKind) -> Self {
        self.behavior = Behavior::Fail(kind);
        self
    }

    pub fn hanging(mut self) -> Self {
        self.behavior = Behavior::Hang;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// How many times `call` was entered
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceAdapter for MockSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> QueryKinds {
        self.capabilities
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn confidence(&self) -> i32 {
        self.confidence
    }

    async fn call(&self, _query: &Query, deadline: Instant) -> Result<PartialRecord, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Behavior::Hang = self.behavior {
            tokio::time::sleep_until(deadline).await;
            return Err(SourceError::timeout(&self.name));
        }

        if !self.delay.is_zero() {
            let wake = Instant::now() + self.delay;
            if wake > deadline {
                tokio::time::sleep_until(deadline).await;
                return Err(SourceError::timeout(&self.name));
            }
            tokio::time::sleep_until(wake).await;
        }

        match &self.behavior {
            Behavior::Fail(kind) => Err(SourceError::new(&self.name, *kind, "scripted failure")),
            _ => {
                let record = self
                    .fields
                    .iter()
                    .fold(
                        PartialRecord::builder(&self.name, self.confidence),
                        |builder, (name, value)| builder.value(name, value.clone()),
                    )
                    .build();
                Ok(record)
            }
        }
    }
}

/// A transport that answers from a routing table.
///
/// The first route whose pattern is a substring of the request URL wins;
/// unmatched requests get a 404. Every request is recorded.
#[derive(Debug, Default)]
pub struct StaticTransport {
    routes: Vec<(String, HttpResponse)>,
    delay: Duration,
    requests: Mutex<Vec<HttpRequest>>,
}

impl StaticTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, pattern: &str, response: HttpResponse) -> Self {
        self.routes.push((pattern.to_string(), response));
        self
    }

    /// Shorthand for a 200 response with a JSON body
    pub fn json(self, pattern: &str, body: serde_json::Value) -> Self {
        self.route(
            pattern,
            HttpResponse::new(200, body.to_string())
                .with_header("content-type", "application/json"),
        )
    }

    /// Delay every response
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Transport for StaticTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        if !self.delay.is_zero() {
            match request.timeout {
                Some(timeout) if timeout < self.delay => {
                    tokio::time::sleep(timeout).await;
                    return Err(TransportError::Timeout(request.url));
                }
                _ => tokio::time::sleep(self.delay).await,
            }
        }

        let response = self
            .routes
            .iter()
            .find(|(pattern, _)| request.url.contains(pattern.as_str()))
            .map(|(_, response)| response.clone())
            .unwrap_or_else(|| HttpResponse::new(404, "not found"));
        Ok(response)
    }
}
