//! Response capture over a browser network event stream.
//!
//! A [`Subscription`] listens to completed network responses, keeps the ones whose URL contains a
//! configured pattern, pulls their body through a [`BodySource`] and extracts one JSON field. The
//! latest extracted value is published on a watch channel owned by the subscription, so callers
//! can either peek at it ([`Subscription::captured`]) or await it with a bound
//! ([`Subscription::wait_captured`]).
//!
//! Extraction problems never stop the listener. They are logged and recorded as an
//! [`ExtractionOutcome`] so a caller can tell *why* nothing was captured.

pub mod config;
pub mod path;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use crate::config::CaptureConfig;
pub use crate::path::FieldPath;

/// Opaque identifier the browser assigns to a request.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A completed HTTP response observed on the automation channel.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NetworkEvent {
    pub request_id: RequestId,
    pub url: String,
    pub status: i64,
    pub method: Option<String>,
    pub mime_type: Option<String>,
    /// CDP session the response belongs to, needed to fetch its body.
    pub session_id: Option<String>,
}

impl NetworkEvent {
    pub fn new(request_id: impl Into<RequestId>, url: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            url: url.into(),
            status: 200,
            method: None,
            mime_type: None,
            session_id: None,
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn with_status(mut self, status: i64) -> Self {
        self.status = status;
        self
    }

    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session_id = Some(session.into());
        self
    }
}

/// Decoded response body text.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResponseBody {
    pub text: String,
}

impl ResponseBody {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// On-demand, asynchronous retrieval of a response body.
#[async_trait]
pub trait BodySource: Send + Sync {
    async fn fetch_body(&self, event: &NetworkEvent) -> Result<ResponseBody, CaptureError>;
}

/// Errors emitted by the capture surface.
#[derive(Clone, Debug, Error)]
pub enum CaptureError {
    #[error("url pattern must not be empty")]
    EmptyPattern,
    #[error("invalid field path '{0}'")]
    InvalidFieldPath(String),
    #[error("response body unavailable: {0}")]
    BodyUnavailable(String),
    #[error("no value captured within {waited:?} (last outcome: {last})")]
    NotReady {
        waited: Duration,
        last: ExtractionOutcome,
    },
}

/// Result of the most recent extraction attempt.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExtractionOutcome {
    #[default]
    NoMatchYet,
    Captured {
        value: String,
    },
    BodyUnavailable {
        reason: String,
    },
    BodyTimedOut {
        waited_ms: u64,
    },
    ParseError {
        reason: String,
    },
    FieldAbsent {
        path: String,
    },
}

impl ExtractionOutcome {
    pub fn is_captured(&self) -> bool {
        matches!(self, ExtractionOutcome::Captured { .. })
    }

    pub fn value(&self) -> Option<&str> {
        match self {
            ExtractionOutcome::Captured { value } => Some(value),
            _ => None,
        }
    }
}

impl fmt::Display for ExtractionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractionOutcome::NoMatchYet => write!(f, "no matching response yet"),
            ExtractionOutcome::Captured { value } => write!(f, "captured '{value}'"),
            ExtractionOutcome::BodyUnavailable { reason } => {
                write!(f, "body unavailable: {reason}")
            }
            ExtractionOutcome::BodyTimedOut { waited_ms } => {
                write!(f, "body fetch exceeded {waited_ms}ms")
            }
            ExtractionOutcome::ParseError { reason } => write!(f, "body is not JSON: {reason}"),
            ExtractionOutcome::FieldAbsent { path } => write!(f, "field '{path}' absent"),
        }
    }
}

/// Decides whether a network event is relevant to a subscription.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "RawFilter")]
pub struct ResponseFilter {
    url_pattern: String,
    method: Option<String>,
}

#[derive(Deserialize)]
struct RawFilter {
    url_pattern: String,
    #[serde(default)]
    method: Option<String>,
}

impl TryFrom<RawFilter> for ResponseFilter {
    type Error = CaptureError;

    fn try_from(raw: RawFilter) -> Result<Self, Self::Error> {
        let filter = ResponseFilter::new(raw.url_pattern)?;
        Ok(match raw.method {
            Some(method) => filter.with_method(method),
            None => filter,
        })
    }
}

impl ResponseFilter {
    pub fn new(url_pattern: impl Into<String>) -> Result<Self, CaptureError> {
        let url_pattern = url_pattern.into();
        if url_pattern.is_empty() {
            return Err(CaptureError::EmptyPattern);
        }
        Ok(Self {
            url_pattern,
            method: None,
        })
    }

    /// Only accept responses to requests sent with `method`.
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into().to_ascii_uppercase());
        self
    }

    pub fn url_pattern(&self) -> &str {
        &self.url_pattern
    }

    pub fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    pub fn matches(&self, event: &NetworkEvent) -> bool {
        if !event.url.contains(&self.url_pattern) {
            return false;
        }
        match (&self.method, &event.method) {
            (None, _) => true,
            (Some(wanted), Some(seen)) => wanted.eq_ignore_ascii_case(seen),
            (Some(_), None) => false,
        }
    }
}

/// Pull-based view of a subscription.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CaptureSnapshot {
    pub value: Option<String>,
    pub last_outcome: ExtractionOutcome,
    pub matched: u64,
    pub captured: u64,
    pub failed: u64,
    pub inflight: u64,
}

/// Parse `body` as JSON and pull `path` out of it.
pub fn extract_field(body: &str, path: &FieldPath) -> ExtractionOutcome {
    let document: Value = match serde_json::from_str(body) {
        Ok(doc) => doc,
        Err(err) => {
            return ExtractionOutcome::ParseError {
                reason: err.to_string(),
            }
        }
    };

    match path.resolve(&document).and_then(path::render) {
        Some(value) => ExtractionOutcome::Captured { value },
        None => ExtractionOutcome::FieldAbsent {
            path: path.to_string(),
        },
    }
}

/// Factory for subscriptions sharing one configuration.
#[derive(Clone, Debug, Default)]
pub struct ResponseCapture {
    config: CaptureConfig,
}

impl ResponseCapture {
    pub fn new(config: CaptureConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Register a listener on `events`. Must be called from within a tokio runtime.
    pub fn subscribe(
        &self,
        events: broadcast::Receiver<NetworkEvent>,
        source: Arc<dyn BodySource>,
        filter: ResponseFilter,
        path: FieldPath,
    ) -> Subscription {
        Subscription::spawn(events, source, filter, path, self.config.clone())
    }

    /// Same as [`subscribe`](Self::subscribe) but validates raw pattern and path strings.
    pub fn subscribe_str(
        &self,
        events: broadcast::Receiver<NetworkEvent>,
        source: Arc<dyn BodySource>,
        url_pattern: &str,
        field_path: &str,
    ) -> Result<Subscription, CaptureError> {
        let filter = ResponseFilter::new(url_pattern)?;
        let path = FieldPath::parse(field_path)?;
        Ok(self.subscribe(events, source, filter, path))
    }
}

/// Handle to a running capture listener.
///
/// Dropping the handle releases the listener; the last captured value stays readable until then.
pub struct Subscription {
    filter: ResponseFilter,
    path: FieldPath,
    state: watch::Receiver<CaptureSnapshot>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Subscription {
    fn spawn(
        events: broadcast::Receiver<NetworkEvent>,
        source: Arc<dyn BodySource>,
        filter: ResponseFilter,
        path: FieldPath,
        config: CaptureConfig,
    ) -> Self {
        let (tx, rx) = watch::channel(CaptureSnapshot::default());
        let cancel = CancellationToken::new();
        let listener = Listener {
            source,
            filter: filter.clone(),
            path: path.clone(),
            config,
            state: tx,
        };
        let task = tokio::spawn(listener.run(events, cancel.clone()));

        info!(
            target: "response-capture",
            pattern = %filter.url_pattern(),
            method = filter.method().unwrap_or("*"),
            path = %path,
            "response capture subscribed"
        );

        Self {
            filter,
            path,
            state: rx,
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    /// Most recently captured value, if any. Never blocks.
    pub fn captured(&self) -> Option<String> {
        self.state.borrow().value.clone()
    }

    pub fn outcome(&self) -> ExtractionOutcome {
        self.state.borrow().last_outcome.clone()
    }

    pub fn snapshot(&self) -> CaptureSnapshot {
        self.state.borrow().clone()
    }

    pub fn filter(&self) -> &ResponseFilter {
        &self.filter
    }

    pub fn field_path(&self) -> &FieldPath {
        &self.path
    }

    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
            && self
                .task
                .lock()
                .as_ref()
                .map(|task| !task.is_finished())
                .unwrap_or(false)
    }

    /// Wait until a value has been captured or `within` elapses.
    pub async fn wait_captured(&self, within: Duration) -> Result<String, CaptureError> {
        let mut rx = self.state.clone();
        let waited = timeout(within, async move {
            rx.wait_for(|snapshot| snapshot.value.is_some())
                .await
                .ok()
                .and_then(|snapshot| snapshot.value.clone())
        })
        .await;

        match waited {
            Ok(Some(value)) => Ok(value),
            Ok(None) | Err(_) => Err(CaptureError::NotReady {
                waited: within,
                last: self.outcome(),
            }),
        }
    }

    /// Wait until at least one matching response finished extraction and none is in flight.
    pub async fn wait_settled(&self, within: Duration) -> Result<CaptureSnapshot, CaptureError> {
        let mut rx = self.state.clone();
        let waited = timeout(within, async move {
            rx.wait_for(|snapshot| snapshot.matched > 0 && snapshot.inflight == 0)
                .await
                .ok()
                .map(|snapshot| snapshot.clone())
        })
        .await;

        match waited {
            Ok(Some(snapshot)) => Ok(snapshot),
            Ok(None) | Err(_) => Err(CaptureError::NotReady {
                waited: within,
                last: self.outcome(),
            }),
        }
    }

    /// Release the listener. Calling this more than once is a no-op.
    pub fn unsubscribe(&self) {
        self.cancel.cancel();
        if let Some(task) = self.task.lock().take() {
            task.abort();
            debug!(target: "response-capture", pattern = %self.filter.url_pattern(), "response capture released");
        }
    }

    /// Release the listener and wait for it to stop.
    pub async fn shutdown(self) -> Result<(), tokio::task::JoinError> {
        self.cancel.cancel();
        let task = self.task.lock().take();
        match task {
            Some(task) => match task.await {
                Ok(()) => Ok(()),
                Err(err) if err.is_cancelled() => Ok(()),
                Err(err) => Err(err),
            },
            None => Ok(()),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

struct Listener {
    source: Arc<dyn BodySource>,
    filter: ResponseFilter,
    path: FieldPath,
    config: CaptureConfig,
    state: watch::Sender<CaptureSnapshot>,
}

impl Listener {
    async fn run(self, mut events: broadcast::Receiver<NetworkEvent>, cancel: CancellationToken) {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                received = events.recv() => match received {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(target: "response-capture", skipped, "network event stream lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!(target: "response-capture", "network event stream closed");
                        break;
                    }
                },
            };

            if !self.filter.matches(&event) {
                continue;
            }

            debug!(
                target: "response-capture",
                request = %event.request_id.as_str(),
                url = %event.url,
                "matching response observed"
            );
            self.state.send_modify(|snapshot| {
                snapshot.matched += 1;
                snapshot.inflight += 1;
            });

            let outcome = tokio::select! {
                _ = cancel.cancelled() => break,
                outcome = self.extract(&event) => outcome,
            };
            self.record(&event, outcome);
        }
    }

    async fn extract(&self, event: &NetworkEvent) -> ExtractionOutcome {
        let grace = self.config.grace_delay();
        if !grace.is_zero() {
            sleep(grace).await;
        }

        let limit = self.config.body_timeout();
        let body = match timeout(limit, self.source.fetch_body(event)).await {
            Ok(Ok(body)) => body,
            Ok(Err(err)) => {
                return ExtractionOutcome::BodyUnavailable {
                    reason: err.to_string(),
                }
            }
            Err(_) => {
                return ExtractionOutcome::BodyTimedOut {
                    waited_ms: limit.as_millis() as u64,
                }
            }
        };

        extract_field(&body.text, &self.path)
    }

    fn record(&self, event: &NetworkEvent, outcome: ExtractionOutcome) {
        match &outcome {
            ExtractionOutcome::Captured { value } => {
                info!(
                    target: "response-capture",
                    request = %event.request_id.as_str(),
                    path = %self.path,
                    value = %value,
                    "captured response field"
                );
            }
            other => {
                warn!(
                    target: "response-capture",
                    request = %event.request_id.as_str(),
                    url = %event.url,
                    outcome = %other,
                    "response field not captured"
                );
            }
        }

        self.state.send_modify(|snapshot| {
            snapshot.inflight = snapshot.inflight.saturating_sub(1);
            match &outcome {
                ExtractionOutcome::Captured { value } => {
                    snapshot.value = Some(value.clone());
                    snapshot.captured += 1;
                }
                ExtractionOutcome::NoMatchYet => {}
                _ => snapshot.failed += 1,
            }
            snapshot.last_outcome = outcome;
        });
    }
}
