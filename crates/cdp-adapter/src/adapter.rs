//! The adapter proper: event loop, page registry wiring and the [`Cdp`] primitives.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use dashmap::DashMap;
use response_capture::{BodySource, CaptureError, NetworkEvent, ResponseBody};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio::{select, spawn};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::commands::{Anchor, Locator, ProbeResult, WaitCondition};
use crate::config::CdpConfig;
use crate::error::{internal, AdapterError, AdapterErrorKind};
use crate::events::RawEvent;
use crate::ids::{BrowserId, PageId, SessionId};
use crate::metrics;
use crate::registry::Registry;
use crate::transport::{
    CdpTransport, ChromiumTransport, CommandTarget, NoopTransport, TransportEvent,
};
use crate::{chrome_mode, resolve_chrome_path, AdapterMode, ChromeMode};

/// Page event bus.
pub type EventBus = broadcast::Sender<RawEvent>;

/// Completed network responses, one message per finished request.
pub type NetworkBus = broadcast::Sender<NetworkEvent>;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const ATTACH_TIMEOUT: Duration = Duration::from_secs(5);
const NETWORK_BUFFER: usize = 256;

/// Browser primitives the scenarios are written against.
#[async_trait]
pub trait Cdp: Send + Sync {
    async fn create_page(&self, url: &str) -> Result<PageId, AdapterError>;

    /// Close the page's target. Its network events stop once this returns.
    async fn close_page(&self, page: PageId) -> Result<(), AdapterError>;

    async fn navigate(&self, page: PageId, url: &str, deadline: Duration)
        -> Result<(), AdapterError>;

    async fn click(
        &self,
        page: PageId,
        locator: &Locator,
        deadline: Duration,
    ) -> Result<(), AdapterError>;

    async fn type_text(
        &self,
        page: PageId,
        locator: &Locator,
        text: &str,
        deadline: Duration,
    ) -> Result<(), AdapterError>;

    /// Rendered text of the element, trimmed. Waits for the element to exist.
    async fn text_content(
        &self,
        page: PageId,
        locator: &Locator,
        deadline: Duration,
    ) -> Result<String, AdapterError>;

    /// Poll until `condition` holds for the element or `timeout` expires.
    async fn wait_for(
        &self,
        page: PageId,
        locator: &Locator,
        condition: WaitCondition,
        timeout: Duration,
    ) -> Result<Anchor, AdapterError>;

    async fn evaluate_script(&self, page: PageId, expression: &str)
        -> Result<Value, AdapterError>;

    async fn screenshot(&self, page: PageId, deadline: Duration) -> Result<Vec<u8>, AdapterError>;

    async fn set_viewport(&self, page: PageId, width: u32, height: u32)
        -> Result<(), AdapterError>;

    async fn set_network_capture(&self, page: PageId, enabled: bool)
        -> Result<(), AdapterError>;

    fn network_events(&self) -> broadcast::Receiver<NetworkEvent>;

    async fn response_body(&self, event: &NetworkEvent) -> Result<ResponseBody, AdapterError>;
}

#[derive(Clone, Debug, Default)]
struct InflightRequest {
    method: Option<String>,
    url: Option<String>,
    status: Option<i64>,
    mime_type: Option<String>,
}

/// Adapter implementation with pluggable transport.
pub struct CdpAdapter {
    pub browser_id: BrowserId,
    pub cfg: CdpConfig,
    pub bus: EventBus,
    pub registry: Arc<Registry>,
    network: NetworkBus,
    mode: AdapterMode,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    transport: Arc<dyn CdpTransport>,
    targets: DashMap<String, PageId>,
    sessions: DashMap<String, PageId>,
    requests: DashMap<String, InflightRequest>,
}

impl CdpAdapter {
    /// Pick a transport from the configuration and environment.
    pub fn new(mut cfg: CdpConfig, bus: EventBus) -> Result<Self, AdapterError> {
        let mode = chrome_mode();
        let transport: Arc<dyn CdpTransport> = if cfg.websocket_url.is_some() {
            info!(target: "cdp-adapter", "attaching to existing DevTools endpoint");
            Arc::new(ChromiumTransport::new(cfg.clone()))
        } else if mode == ChromeMode::ForceStub {
            warn!(
                target: "cdp-adapter",
                mode = %AdapterMode::Stub.as_str(),
                reason = "forced_stub_mode",
                "CDP adapter initialized without a real browser"
            );
            Arc::new(NoopTransport)
        } else {
            match resolve_chrome_path(&cfg) {
                Some(path) => {
                    info!(target: "cdp-adapter", chrome = %path.display(), "using Chromium transport");
                    cfg.executable = path;
                    Arc::new(ChromiumTransport::new(cfg.clone()))
                }
                None if mode == ChromeMode::ForceReal => {
                    return Err(AdapterError::new(AdapterErrorKind::CdpIo).with_hint(
                        "Chrome/Chromium executable not found while MEDIFLOW_USE_REAL_CHROME=1",
                    ));
                }
                None => {
                    warn!(
                        target: "cdp-adapter",
                        mode = %AdapterMode::Stub.as_str(),
                        reason = "chrome_not_found",
                        remediation = "install Chrome/Chromium, set MEDIFLOW_CHROME=/path/to/chrome or pass --ws-url",
                        "CDP adapter initialized without a real browser"
                    );
                    Arc::new(NoopTransport)
                }
            }
        };
        Ok(Self::with_transport(cfg, bus, transport))
    }

    pub fn with_transport(cfg: CdpConfig, bus: EventBus, transport: Arc<dyn CdpTransport>) -> Self {
        let (network, _) = broadcast::channel(NETWORK_BUFFER);
        Self {
            browser_id: BrowserId::new(),
            mode: transport.mode(),
            cfg,
            bus,
            registry: Arc::new(Registry::new()),
            network,
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            transport,
            targets: DashMap::new(),
            sessions: DashMap::new(),
            requests: DashMap::new(),
        }
    }

    pub fn mode(&self) -> AdapterMode {
        self.mode
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RawEvent> {
        self.bus.subscribe()
    }

    /// Start the transport and the event loop. Calling it again is a no-op.
    pub async fn start(self: Arc<Self>) -> Result<(), AdapterError> {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            return Ok(());
        }

        self.transport.start().await?;
        tasks.push(spawn(Self::event_loop(Arc::clone(&self))));
        info!(target: "cdp-adapter", mode = %self.mode.as_str(), "event loop started");
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let mut handles = self.tasks.lock().await;
        while let Some(handle) = handles.pop() {
            let _ = handle.await;
        }
    }

    pub fn register_page(
        &self,
        page: PageId,
        session: SessionId,
        target_id: Option<String>,
        cdp_session: Option<String>,
    ) {
        if let Some(target) = target_id.as_ref() {
            self.targets.insert(target.clone(), page);
        }
        if let Some(cdp_session) = cdp_session.as_ref() {
            self.sessions.insert(cdp_session.clone(), page);
        }
        self.registry
            .insert_page(page, session, target_id, cdp_session);
    }

    async fn event_loop(self: Arc<Self>) {
        debug!(target: "cdp-adapter", "event loop entered");
        const MIN_BACKOFF: Duration = Duration::from_millis(100);
        const MAX_BACKOFF: Duration = Duration::from_secs(5);
        let mut backoff = MIN_BACKOFF;

        loop {
            select! {
                _ = self.shutdown.cancelled() => break,
                event = self.transport.next_event() => match event {
                    Some(ev) => {
                        backoff = MIN_BACKOFF;
                        self.handle_event(ev);
                    }
                    None => {
                        if self.shutdown.is_cancelled() || self.mode.is_stub() {
                            break;
                        }
                        self.handle_transport_disconnect();
                        warn!(target: "cdp-adapter", "transport stream ended; attempting restart");
                        if let Err(err) = self.transport.start().await {
                            warn!(target: "cdp-adapter", ?err, "transport restart failed");
                        }
                        select! {
                            _ = self.shutdown.cancelled() => break,
                            _ = sleep(backoff) => {}
                        }
                        backoff = (backoff + MIN_BACKOFF).min(MAX_BACKOFF);
                    }
                },
            }
        }
        debug!(target: "cdp-adapter", "event loop exiting");
    }

    fn handle_transport_disconnect(&self) {
        let pages = self.registry.pages();
        let had_pages = !pages.is_empty();
        for page in pages {
            self.emit_page_event(page, None, "closed");
            self.registry.remove_page(&page);
        }

        self.targets.clear();
        self.sessions.clear();
        self.requests.clear();

        let message = if had_pages {
            "cdp transport restarted; active pages were reset"
        } else {
            "cdp transport restarted"
        };
        let _ = self.bus.send(RawEvent::Error {
            page: None,
            message: message.to_string(),
        });
    }

    fn handle_event(&self, event: TransportEvent) {
        if let Err(err) = self.process_event(event) {
            let _ = self.bus.send(RawEvent::Error {
                page: None,
                message: format!("cdp event handling error: {err}"),
            });
        }
    }

    fn process_event(&self, event: TransportEvent) -> Result<(), AdapterError> {
        metrics::record_event();
        if event.method.starts_with("Network.") && !self.is_live_session(event.session_id.as_deref())
        {
            debug!(target: "cdp-adapter", method = %event.method, "network event from closed page");
            return Ok(());
        }
        match event.method.as_str() {
            "Target.targetCreated" => self.on_target_created(event.params),
            "Target.targetDestroyed" => self.on_target_destroyed(event.params),
            "Target.attachedToTarget" => self.on_target_attached(event.params),
            "Target.detachedFromTarget" => self.on_target_detached(event.params),
            "Target.targetInfoChanged" => self.on_target_info_changed(event.params),
            "Network.requestWillBeSent" => self.on_network_request(event.params),
            "Network.responseReceived" => self.on_network_response(event.params),
            "Network.loadingFinished" => self.on_network_finished(event),
            "Network.loadingFailed" => self.on_network_failed(event.params),
            "Runtime.exceptionThrown" => self.on_exception_thrown(event),
            _ => {
                debug!(target: "cdp-adapter", method = %event.method, "unhandled cdp event");
                Ok(())
            }
        }
    }

    fn on_target_created(&self, params: Value) -> Result<(), AdapterError> {
        let payload: TargetCreatedParams = decode(params)?;
        if payload.target_info.target_type != "page" {
            return Ok(());
        }

        let target_id = payload.target_info.target_id;
        if self.targets.contains_key(&target_id) {
            return Ok(());
        }

        let page = PageId::new();
        self.targets.insert(target_id.clone(), page);
        self.registry
            .insert_page(page, SessionId::new(), Some(target_id), None);
        if let Some(url) = payload.target_info.url.filter(|u| !u.is_empty()) {
            self.registry.set_recent_url(&page, url);
        }

        let opener = payload
            .target_info
            .opener_id
            .and_then(|opener| self.targets.get(&opener).map(|entry| *entry.value()));
        self.emit_page_event(page, opener, "opened");
        Ok(())
    }

    fn on_target_destroyed(&self, params: Value) -> Result<(), AdapterError> {
        let payload: TargetDestroyedParams = decode(params)?;
        if let Some((_, page)) = self.targets.remove(&payload.target_id) {
            self.sessions.retain(|_, v| *v != page);
            self.registry.remove_page(&page);
            self.emit_page_event(page, None, "closed");
        }
        Ok(())
    }

    fn on_target_attached(&self, params: Value) -> Result<(), AdapterError> {
        let payload: AttachedToTargetParams = decode(params)?;
        if payload.target_info.target_type != "page" {
            return Ok(());
        }

        if self.targets.get(&payload.target_info.target_id).is_none() {
            self.on_target_created(json!({
                "targetInfo": {
                    "targetId": payload.target_info.target_id,
                    "type": payload.target_info.target_type,
                    "url": payload.target_info.url,
                }
            }))?;
        }

        if let Some(entry) = self.targets.get(&payload.target_info.target_id) {
            let page = *entry.value();
            self.sessions.insert(payload.session_id.clone(), page);
            self.registry.set_cdp_session(&page, payload.session_id);
            self.emit_page_event(page, None, "attached");
        }
        Ok(())
    }

    fn on_target_detached(&self, params: Value) -> Result<(), AdapterError> {
        let payload: DetachedFromTargetParams = decode(params)?;
        self.sessions.remove(&payload.session_id);
        Ok(())
    }

    fn on_target_info_changed(&self, params: Value) -> Result<(), AdapterError> {
        let payload: TargetInfoChangedParams = decode(params)?;
        if payload.target_info.target_type != "page" {
            return Ok(());
        }

        if let Some(entry) = self.targets.get(&payload.target_info.target_id) {
            let page = *entry.value();
            if let Some(url) = payload.target_info.url.filter(|u| !u.is_empty()) {
                self.registry.set_recent_url(&page, url.clone());
                let _ = self.bus.send(RawEvent::PageNavigated {
                    page,
                    url,
                    ts: timestamp_now(),
                });
            }
        }
        Ok(())
    }

    fn on_network_request(&self, params: Value) -> Result<(), AdapterError> {
        let payload: RequestWillBeSentParams = decode(params)?;
        // redirects reuse the request id; the final hop wins
        self.requests.insert(
            payload.request_id,
            InflightRequest {
                method: Some(payload.request.method),
                url: Some(payload.request.url),
                ..InflightRequest::default()
            },
        );
        Ok(())
    }

    fn on_network_response(&self, params: Value) -> Result<(), AdapterError> {
        let payload: ResponseReceivedParams = decode(params)?;
        let mut entry = self.requests.entry(payload.request_id).or_default();
        entry.url = Some(payload.response.url);
        entry.status = Some(payload.response.status);
        entry.mime_type = payload.response.mime_type;
        Ok(())
    }

    fn on_network_finished(&self, event: TransportEvent) -> Result<(), AdapterError> {
        let payload: LoadingParams = decode(event.params)?;
        let Some((request_id, request)) = self.requests.remove(&payload.request_id) else {
            return Ok(());
        };
        let (Some(url), Some(status)) = (request.url, request.status) else {
            return Ok(());
        };

        debug!(
            target: "cdp-adapter",
            request = %request_id,
            method = request.method.as_deref().unwrap_or("?"),
            %url,
            status,
            "network response finished"
        );
        metrics::record_network_response();
        let _ = self.network.send(NetworkEvent {
            request_id: request_id.into(),
            url,
            status,
            method: request.method,
            mime_type: request.mime_type,
            session_id: event.session_id,
        });
        Ok(())
    }

    fn on_network_failed(&self, params: Value) -> Result<(), AdapterError> {
        let payload: LoadingParams = decode(params)?;
        if let Some((request_id, request)) = self.requests.remove(&payload.request_id) {
            debug!(
                target: "cdp-adapter",
                request = %request_id,
                url = request.url.as_deref().unwrap_or("?"),
                "network request failed"
            );
        }
        Ok(())
    }

    fn on_exception_thrown(&self, event: TransportEvent) -> Result<(), AdapterError> {
        let payload: ExceptionThrownParams = decode(event.params)?;
        let message = payload
            .exception_details
            .exception
            .and_then(|ex| ex.description)
            .or(payload.exception_details.text)
            .unwrap_or_else(|| "runtime exception".to_string());
        let page = self.page_from_session(event.session_id.as_ref());
        let _ = self.bus.send(RawEvent::Error { page, message });
        Ok(())
    }

    fn page_from_session(&self, session: Option<&String>) -> Option<PageId> {
        session.and_then(|sid| self.sessions.get(sid).map(|entry| *entry.value()))
    }

    fn is_live_session(&self, session: Option<&str>) -> bool {
        session.map_or(true, |id| self.sessions.contains_key(id))
    }

    fn emit_page_event(&self, page: PageId, opener: Option<PageId>, phase: &str) {
        let _ = self.bus.send(RawEvent::PageLifecycle {
            page,
            opener,
            phase: phase.to_string(),
            ts: timestamp_now(),
        });
    }

    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError> {
        let start = Instant::now();
        metrics::record_command(method);
        match self.transport.send_command(target, method, params).await {
            Ok(value) => {
                metrics::record_command_success(method, start.elapsed());
                Ok(value)
            }
            Err(err) => {
                metrics::record_command_failure(method);
                Err(err)
            }
        }
    }

    async fn send_page_command(
        &self,
        page: PageId,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError> {
        let session = self.registry.cdp_session(&page).ok_or_else(|| {
            AdapterError::new(AdapterErrorKind::Internal)
                .with_hint(format!("missing cdp session for page {page:?}"))
        })?;
        self.send_command(CommandTarget::Session(session), method, params)
            .await
    }

    async fn wait_for_page_ready(&self, page: PageId) -> Result<(), AdapterError> {
        let deadline = Instant::now() + ATTACH_TIMEOUT;
        while Instant::now() < deadline {
            if self.registry.is_attached(&page) {
                return Ok(());
            }
            sleep(Duration::from_millis(50)).await;
        }
        Err(AdapterError::new(AdapterErrorKind::Internal)
            .with_hint(format!("cdp session not ready for page {page:?}")))
    }

    async fn wait_for_dom_ready(&self, page: PageId, deadline: Instant) -> Result<(), AdapterError> {
        loop {
            let response = self
                .send_page_command(
                    page,
                    "Runtime.evaluate",
                    json!({
                        "expression": "document.readyState",
                        "returnByValue": true,
                    }),
                )
                .await?;

            let ready = response
                .get("result")
                .and_then(|v| v.get("value"))
                .and_then(Value::as_str)
                .map(|state| matches!(state, "interactive" | "complete"))
                .unwrap_or(false);
            if ready {
                return Ok(());
            }

            if Instant::now() >= deadline {
                return Err(AdapterError::new(AdapterErrorKind::NavTimeout)
                    .with_hint("document never reached readyState interactive"));
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn probe(&self, page: PageId, expression: &str) -> Result<ProbeResult, AdapterError> {
        let response = self
            .send_page_command(
                page,
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                }),
            )
            .await?;

        let missing = || ProbeResult {
            status: "missing".into(),
            x: 0.0,
            y: 0.0,
            text: String::new(),
        };
        if response.get("exceptionDetails").is_some() {
            return Ok(missing());
        }
        Ok(response
            .get("result")
            .and_then(|res| res.get("value"))
            .cloned()
            .and_then(|value| serde_json::from_value::<ProbeResult>(value).ok())
            .unwrap_or_else(missing))
    }

    async fn poll_element(
        &self,
        page: PageId,
        locator: &Locator,
        condition: WaitCondition,
        timeout: Duration,
        scroll_into_view: bool,
    ) -> Result<Anchor, AdapterError> {
        self.wait_for_page_ready(page).await?;
        let expression = locator.probe_expression(scroll_into_view)?;
        let deadline = Instant::now() + timeout;

        loop {
            match self.probe(page, &expression).await {
                Ok(probe) if probe.satisfies(condition) => return Ok(probe.into_anchor()),
                Ok(_) => {}
                // execution contexts come and go while the app routes between views
                Err(err) if err.kind == AdapterErrorKind::CdpIo && Instant::now() < deadline => {
                    debug!(target: "cdp-adapter", %locator, ?err, "element probe failed; retrying");
                }
                Err(err) => return Err(err),
            }

            if Instant::now() >= deadline {
                return Err(AdapterError::new(AdapterErrorKind::TargetNotFound)
                    .with_hint(format!(
                        "{locator} not {condition:?} within {}ms",
                        timeout.as_millis()
                    ))
                    .with_data(json!({ "locator": locator, "condition": condition })));
            }
            sleep(POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl Cdp for CdpAdapter {
    async fn create_page(&self, url: &str) -> Result<PageId, AdapterError> {
        let response = self
            .send_command(
                CommandTarget::Browser,
                "Target.createTarget",
                json!({ "url": url }),
            )
            .await?;
        let target_id = response
            .get("targetId")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                AdapterError::new(AdapterErrorKind::Internal)
                    .with_hint("createTarget missing targetId")
            })?
            .to_string();

        let deadline = Instant::now() + ATTACH_TIMEOUT;
        loop {
            if let Some(page) = self.targets.get(&target_id).map(|entry| *entry.value()) {
                if self.registry.is_attached(&page) {
                    info!(target: "cdp-adapter", ?page, %url, "page created");
                    return Ok(page);
                }
            }
            if Instant::now() >= deadline {
                return Err(AdapterError::new(AdapterErrorKind::Internal)
                    .with_hint(format!("timed out waiting for target {target_id} to attach")));
            }
            sleep(Duration::from_millis(50)).await;
        }
    }

    async fn close_page(&self, page: PageId) -> Result<(), AdapterError> {
        let target_id = self
            .registry
            .get(&page)
            .and_then(|ctx| ctx.target_id)
            .ok_or_else(|| {
                AdapterError::new(AdapterErrorKind::TargetNotFound)
                    .with_hint(format!("no target recorded for page {page:?}"))
            })?;
        self.send_command(
            CommandTarget::Browser,
            "Target.closeTarget",
            json!({ "targetId": target_id }),
        )
        .await?;

        self.targets.remove(&target_id);
        self.sessions.retain(|_, v| *v != page);
        self.registry.remove_page(&page);
        self.emit_page_event(page, None, "closed");
        info!(target: "cdp-adapter", ?page, "page closed");
        Ok(())
    }

    async fn navigate(
        &self,
        page: PageId,
        url: &str,
        deadline: Duration,
    ) -> Result<(), AdapterError> {
        self.wait_for_page_ready(page).await?;
        let response = self
            .send_page_command(page, "Page.navigate", json!({ "url": url }))
            .await?;
        if let Some(error_text) = response.get("errorText").and_then(Value::as_str) {
            return Err(AdapterError::new(AdapterErrorKind::CdpIo)
                .with_hint(format!("navigation to {url} failed: {error_text}")));
        }
        self.registry.set_recent_url(&page, url.to_string());
        self.wait_for_dom_ready(page, Instant::now() + deadline)
            .await
    }

    async fn click(
        &self,
        page: PageId,
        locator: &Locator,
        deadline: Duration,
    ) -> Result<(), AdapterError> {
        let anchor = self
            .poll_element(page, locator, WaitCondition::Visible, deadline, true)
            .await?;

        for kind in ["mousePressed", "mouseReleased"] {
            self.send_page_command(
                page,
                "Input.dispatchMouseEvent",
                json!({
                    "type": kind,
                    "x": anchor.x,
                    "y": anchor.y,
                    "button": "left",
                    "buttons": 1,
                    "clickCount": 1,
                    "pointerType": "mouse",
                }),
            )
            .await?;
        }
        debug!(target: "cdp-adapter", %locator, "clicked");
        Ok(())
    }

    async fn type_text(
        &self,
        page: PageId,
        locator: &Locator,
        text: &str,
        deadline: Duration,
    ) -> Result<(), AdapterError> {
        let started = Instant::now();
        self.poll_element(page, locator, WaitCondition::Visible, deadline, false)
            .await?;

        let focus = locator.focus_expression()?;
        let focus_deadline = started + deadline;
        loop {
            let response = self
                .send_page_command(
                    page,
                    "Runtime.evaluate",
                    json!({
                        "expression": focus,
                        "returnByValue": true,
                    }),
                )
                .await?;
            let status = response
                .get("result")
                .and_then(|res| res.get("value"))
                .and_then(|val| val.get("status"))
                .and_then(Value::as_str)
                .unwrap_or("unknown");

            match status {
                "focused" => break,
                "not-found" if Instant::now() < focus_deadline => sleep(POLL_INTERVAL).await,
                "not-found" => {
                    return Err(AdapterError::new(AdapterErrorKind::TargetNotFound)
                        .with_hint(format!("{locator} disappeared before it could be focused")))
                }
                other => {
                    return Err(AdapterError::new(AdapterErrorKind::Internal).with_hint(format!(
                        "failed to focus {locator} (status: {other})"
                    )))
                }
            }
        }

        self.send_page_command(page, "Input.insertText", json!({ "text": text }))
            .await?;
        Ok(())
    }

    async fn text_content(
        &self,
        page: PageId,
        locator: &Locator,
        deadline: Duration,
    ) -> Result<String, AdapterError> {
        self.poll_element(page, locator, WaitCondition::Present, deadline, false)
            .await
            .map(|anchor| anchor.text)
    }

    async fn wait_for(
        &self,
        page: PageId,
        locator: &Locator,
        condition: WaitCondition,
        timeout: Duration,
    ) -> Result<Anchor, AdapterError> {
        self.poll_element(page, locator, condition, timeout, false)
            .await
    }

    async fn evaluate_script(
        &self,
        page: PageId,
        expression: &str,
    ) -> Result<Value, AdapterError> {
        self.wait_for_page_ready(page).await?;
        let response = self
            .send_page_command(
                page,
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "awaitPromise": true,
                    "returnByValue": true,
                    "userGesture": true,
                }),
            )
            .await?;

        if let Some(details) = response.get("exceptionDetails") {
            return Err(AdapterError::new(AdapterErrorKind::Internal)
                .with_hint("evaluate_script raised exception")
                .with_data(details.clone()));
        }

        Ok(response
            .get("result")
            .and_then(|res| res.get("value"))
            .cloned()
            .unwrap_or(Value::Null))
    }

    async fn screenshot(&self, page: PageId, deadline: Duration) -> Result<Vec<u8>, AdapterError> {
        let capture = self.send_page_command(
            page,
            "Page.captureScreenshot",
            json!({ "format": "png", "captureBeyondViewport": false }),
        );
        let response = tokio::time::timeout(deadline, capture)
            .await
            .map_err(|_| {
                AdapterError::new(AdapterErrorKind::NavTimeout).with_hint("screenshot timed out")
            })??;
        let data = response
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                AdapterError::new(AdapterErrorKind::Internal).with_hint("missing screenshot data")
            })?;
        STANDARD.decode(data).map_err(internal)
    }

    async fn set_viewport(
        &self,
        page: PageId,
        width: u32,
        height: u32,
    ) -> Result<(), AdapterError> {
        self.send_page_command(
            page,
            "Emulation.setDeviceMetricsOverride",
            json!({
                "width": width,
                "height": height,
                "deviceScaleFactor": 1,
                "mobile": false,
            }),
        )
        .await?;
        Ok(())
    }

    async fn set_network_capture(&self, page: PageId, enabled: bool) -> Result<(), AdapterError> {
        self.wait_for_page_ready(page).await?;
        if enabled {
            self.send_page_command(
                page,
                "Network.enable",
                json!({
                    "maxTotalBufferSize": 10_485_760u64,
                    "maxResourceBufferSize": 5_242_880u64,
                }),
            )
            .await?;
        } else {
            self.send_page_command(page, "Network.disable", json!({}))
                .await?;
        }
        Ok(())
    }

    fn network_events(&self) -> broadcast::Receiver<NetworkEvent> {
        self.network.subscribe()
    }

    async fn response_body(&self, event: &NetworkEvent) -> Result<ResponseBody, AdapterError> {
        let session = event.session_id.clone().ok_or_else(|| {
            AdapterError::new(AdapterErrorKind::Internal).with_hint(format!(
                "response {} has no cdp session",
                event.request_id.as_str()
            ))
        })?;

        let result = self
            .send_command(
                CommandTarget::Session(session),
                "Network.getResponseBody",
                json!({ "requestId": event.request_id.as_str() }),
            )
            .await;
        metrics::record_body_fetch(result.is_ok());
        let response = result?;

        let body = response
            .get("body")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let encoded = response
            .get("base64Encoded")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let text = if encoded {
            let bytes = STANDARD.decode(body).map_err(internal)?;
            String::from_utf8_lossy(&bytes).into_owned()
        } else {
            body.to_string()
        };
        Ok(ResponseBody::new(text))
    }
}

/// Lets a capture subscription pull bodies through any [`Cdp`] implementation.
pub struct CdpBodySource<C: ?Sized> {
    cdp: Arc<C>,
}

impl<C: Cdp + ?Sized> CdpBodySource<C> {
    pub fn new(cdp: Arc<C>) -> Self {
        Self { cdp }
    }
}

#[async_trait]
impl<C: Cdp + ?Sized + 'static> BodySource for CdpBodySource<C> {
    async fn fetch_body(&self, event: &NetworkEvent) -> Result<ResponseBody, CaptureError> {
        self.cdp
            .response_body(event)
            .await
            .map_err(|err| CaptureError::BodyUnavailable(err.to_string()))
    }
}

fn decode<T: for<'de> Deserialize<'de>>(params: Value) -> Result<T, AdapterError> {
    serde_json::from_value(params).map_err(internal)
}

#[derive(Debug, Deserialize)]
struct TargetCreatedParams {
    #[serde(rename = "targetInfo")]
    target_info: TargetInfoPayload,
}

#[derive(Debug, Deserialize)]
struct TargetDestroyedParams {
    #[serde(rename = "targetId")]
    target_id: String,
}

#[derive(Debug, Deserialize)]
struct AttachedToTargetParams {
    #[serde(rename = "sessionId")]
    session_id: String,
    #[serde(rename = "targetInfo")]
    target_info: TargetInfoPayload,
}

#[derive(Debug, Deserialize)]
struct DetachedFromTargetParams {
    #[serde(rename = "sessionId")]
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct TargetInfoChangedParams {
    #[serde(rename = "targetInfo")]
    target_info: TargetInfoPayload,
}

#[derive(Debug, Deserialize)]
struct TargetInfoPayload {
    #[serde(rename = "targetId")]
    target_id: String,
    #[serde(rename = "type")]
    target_type: String,
    url: Option<String>,
    #[serde(rename = "openerId")]
    opener_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestWillBeSentParams {
    request_id: String,
    request: RequestPayload,
}

#[derive(Debug, Deserialize)]
struct RequestPayload {
    url: String,
    method: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseReceivedParams {
    request_id: String,
    response: ResponsePayload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePayload {
    url: String,
    status: i64,
    mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoadingParams {
    request_id: String,
}

#[derive(Debug, Deserialize)]
struct ExceptionThrownParams {
    #[serde(rename = "exceptionDetails")]
    exception_details: ExceptionDetails,
}

#[derive(Debug, Deserialize)]
struct ExceptionDetails {
    text: Option<String>,
    exception: Option<ExceptionObject>,
}

#[derive(Debug, Deserialize)]
struct ExceptionObject {
    description: Option<String>,
}

fn timestamp_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
