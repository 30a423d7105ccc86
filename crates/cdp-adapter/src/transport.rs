use std::collections::HashMap;
use std::convert::TryInto;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::async_process::Child;
use chromiumoxide::browser::{BrowserConfig, HeadlessMode};
use chromiumoxide::cdp::browser_protocol::target::SessionId as CdpSessionId;
use chromiumoxide::cdp::events::CdpEventMessage;
use chromiumoxide::conn::Connection;
use chromiumoxide::error::CdpError;
use chromiumoxide_types::{CallId, CdpJsonEventMessage, Message, MethodId, Response};
use futures::{future::BoxFuture, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::CdpConfig;
use crate::error::{AdapterError, AdapterErrorKind};
use crate::util::devtools_ws_url;
use crate::AdapterMode;

const LAUNCH_TIMEOUT: Duration = Duration::from_secs(20);
const HEARTBEAT_REPLY_CAP: Duration = Duration::from_secs(5);

/// A CDP event as delivered by the connection.
#[derive(Clone, Debug)]
pub struct TransportEvent {
    pub method: String,
    pub params: Value,
    pub session_id: Option<String>,
}

#[derive(Clone, Debug)]
pub enum CommandTarget {
    Browser,
    Session(String),
}

#[async_trait]
pub trait CdpTransport: Send + Sync {
    async fn start(&self) -> Result<(), AdapterError>;
    async fn next_event(&self) -> Option<TransportEvent>;
    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError>;

    fn mode(&self) -> AdapterMode {
        AdapterMode::Real
    }
}

/// Transport used when no browser is available; every command fails.
#[derive(Default)]
pub struct NoopTransport;

#[async_trait]
impl CdpTransport for NoopTransport {
    async fn start(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        None
    }

    async fn send_command(
        &self,
        _target: CommandTarget,
        method: &str,
        _params: Value,
    ) -> Result<Value, AdapterError> {
        Err(AdapterError::new(AdapterErrorKind::CdpIo)
            .with_hint(format!("no browser attached; cannot run {method}")))
    }

    fn mode(&self) -> AdapterMode {
        AdapterMode::Stub
    }
}

type Connector =
    Arc<dyn Fn(CdpConfig) -> BoxFuture<'static, Result<Arc<BrowserLink>, AdapterError>> + Send + Sync>;

/// Transport backed by a launched (or already running) Chromium.
///
/// The underlying link is created lazily and replaced when its connection loop has died.
#[derive(Clone)]
pub struct ChromiumTransport {
    cfg: CdpConfig,
    link: Arc<Mutex<Option<Arc<BrowserLink>>>>,
    connector: Connector,
}

impl ChromiumTransport {
    pub fn new(cfg: CdpConfig) -> Self {
        let connector: Connector =
            Arc::new(|cfg: CdpConfig| Box::pin(async move { BrowserLink::open(cfg).await.map(Arc::new) }));
        Self::with_connector(cfg, connector)
    }

    fn with_connector(cfg: CdpConfig, connector: Connector) -> Self {
        Self {
            cfg,
            link: Arc::new(Mutex::new(None)),
            connector,
        }
    }

    async fn link(&self) -> Result<Arc<BrowserLink>, AdapterError> {
        let mut slot = self.link.lock().await;
        if let Some(link) = slot.as_ref().filter(|link| link.is_alive()) {
            return Ok(Arc::clone(link));
        }

        let link = (self.connector)(self.cfg.clone()).await?;
        *slot = Some(Arc::clone(&link));
        Ok(link)
    }

    fn deadline(&self) -> Duration {
        Duration::from_millis(self.cfg.default_deadline_ms)
    }
}

#[async_trait]
impl CdpTransport for ChromiumTransport {
    async fn start(&self) -> Result<(), AdapterError> {
        let link = self.link().await?;
        link.call(
            CommandTarget::Browser,
            "Target.setDiscoverTargets",
            json!({ "discover": true }),
            self.deadline(),
        )
        .await?;
        link.call(
            CommandTarget::Browser,
            "Target.setAutoAttach",
            json!({
                "autoAttach": true,
                "waitForDebuggerOnStart": false,
                "flatten": true,
            }),
            self.deadline(),
        )
        .await?;
        Ok(())
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        match self.link().await {
            Ok(link) => link.next_event().await,
            Err(err) => {
                warn!(target: "cdp-transport", ?err, "browser link unavailable");
                None
            }
        }
    }

    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError> {
        self.link()
            .await?
            .call(target, method, params, self.deadline())
            .await
    }
}

struct Call {
    target: CommandTarget,
    method: String,
    params: Value,
    reply: oneshot::Sender<Result<Value, AdapterError>>,
}

type Pending = HashMap<CallId, oneshot::Sender<Result<Value, AdapterError>>>;

/// One live websocket connection plus the tasks that service it.
struct BrowserLink {
    calls: mpsc::Sender<Call>,
    events: Mutex<mpsc::Receiver<TransportEvent>>,
    pump: JoinHandle<()>,
    heartbeat: Option<JoinHandle<()>>,
    child: Mutex<Option<Child>>,
    alive: Arc<AtomicBool>,
}

impl BrowserLink {
    async fn open(cfg: CdpConfig) -> Result<Self, AdapterError> {
        let (child, ws_url) = match cfg.websocket_url.clone() {
            Some(url) => (None, url),
            None => {
                let (child, url) = launch(&cfg).await?;
                (Some(child), url)
            }
        };

        let conn = Connection::<CdpEventMessage>::connect(&ws_url)
            .await
            .map_err(|err| AdapterError::new(AdapterErrorKind::CdpIo).with_hint(err.to_string()))?;

        let (calls_tx, calls_rx) = mpsc::channel(128);
        let (events_tx, events_rx) = mpsc::channel(1024);
        let alive = Arc::new(AtomicBool::new(true));

        let pump_alive = Arc::clone(&alive);
        let pump = tokio::spawn(async move {
            let result = pump(conn, calls_rx, events_tx).await;
            pump_alive.store(false, Ordering::Relaxed);
            if let Err(err) = result {
                error!(target: "cdp-transport", ?err, "connection loop terminated with error");
            }
        });

        let heartbeat = spawn_heartbeat(
            calls_tx.clone(),
            Arc::clone(&alive),
            Duration::from_millis(cfg.heartbeat_interval_ms),
            Duration::from_millis(cfg.default_deadline_ms).min(HEARTBEAT_REPLY_CAP),
        );

        info!(target: "cdp-transport", url = %ws_url, "chromium connection established");

        Ok(Self {
            calls: calls_tx,
            events: Mutex::new(events_rx),
            pump,
            heartbeat,
            child: Mutex::new(child),
            alive,
        })
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    async fn call(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
        deadline: Duration,
    ) -> Result<Value, AdapterError> {
        let (reply, reply_rx) = oneshot::channel();
        self.calls
            .send(Call {
                target,
                method: method.to_string(),
                params,
                reply,
            })
            .await
            .map_err(|err| AdapterError::new(AdapterErrorKind::CdpIo).with_hint(err.to_string()))?;

        match tokio::time::timeout(deadline, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(AdapterError::new(AdapterErrorKind::CdpIo)
                .with_hint(format!("{method}: reply channel closed"))),
            Err(_) => Err(AdapterError::new(AdapterErrorKind::NavTimeout)
                .with_hint(format!("{method} timed out after {deadline:?}"))
                .retriable(true)),
        }
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        self.events.lock().await.recv().await
    }

    #[cfg(test)]
    fn detached() -> (Self, Arc<AtomicBool>) {
        let (calls, _calls_rx) = mpsc::channel(1);
        let (_events_tx, events_rx) = mpsc::channel(1);
        let alive = Arc::new(AtomicBool::new(true));
        let link = Self {
            calls,
            events: Mutex::new(events_rx),
            pump: tokio::spawn(futures::future::pending::<()>()),
            heartbeat: None,
            child: Mutex::new(None),
            alive: Arc::clone(&alive),
        };
        (link, alive)
    }
}

impl Drop for BrowserLink {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Relaxed);
        self.pump.abort();
        if let Some(handle) = &self.heartbeat {
            handle.abort();
        }

        let child = self.child.get_mut().take();
        if let Some(mut child) = child {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        if let Err(err) = child.kill().await {
                            warn!(target: "cdp-transport", ?err, "failed to kill chromium child");
                        }
                    });
                }
                Err(_) => {
                    debug!(target: "cdp-transport", "no tokio runtime available to kill chromium child")
                }
            }
        }
    }
}

fn spawn_heartbeat(
    calls: mpsc::Sender<Call>,
    alive: Arc<AtomicBool>,
    every: Duration,
    reply_within: Duration,
) -> Option<JoinHandle<()>> {
    if every.is_zero() {
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // first tick fires immediately
        ticker.tick().await;

        while alive.load(Ordering::Relaxed) {
            ticker.tick().await;
            let (reply, reply_rx) = oneshot::channel();
            let ping = Call {
                target: CommandTarget::Browser,
                method: "Browser.getVersion".to_string(),
                params: json!({}),
                reply,
            };
            if calls.send(ping).await.is_err() {
                debug!(target: "cdp-transport", "heartbeat stopped: connection loop gone");
                break;
            }
            match tokio::time::timeout(reply_within, reply_rx).await {
                Ok(Ok(Ok(_))) => {}
                Ok(Ok(Err(err))) => {
                    warn!(target: "cdp-transport", ?err, "heartbeat command failed");
                    break;
                }
                Ok(Err(_)) => break,
                Err(_) => {
                    warn!(target: "cdp-transport", "heartbeat timed out");
                    break;
                }
            }
        }
    }))
}

async fn pump(
    mut conn: Connection<CdpEventMessage>,
    mut calls: mpsc::Receiver<Call>,
    events: mpsc::Sender<TransportEvent>,
) -> Result<(), AdapterError> {
    let mut pending: Pending = HashMap::new();

    loop {
        tokio::select! {
            Some(call) = calls.recv() => submit(&mut conn, call, &mut pending)?,
            message = conn.next() => match message {
                Some(Ok(Message::Response(resp))) => {
                    if let Some(reply) = pending.remove(&resp.id) {
                        let _ = reply.send(response_payload(resp));
                    }
                }
                Some(Ok(Message::Event(event))) => {
                    if let Err(err) = forward_event(event, &events).await {
                        warn!(target: "cdp-transport", ?err, "failed to forward event");
                    }
                }
                Some(Err(err)) => {
                    let err = map_cdp_error(err);
                    fail_pending(&mut pending, &err);
                    return Err(err);
                }
                None => {
                    fail_pending(
                        &mut pending,
                        &AdapterError::new(AdapterErrorKind::CdpIo).with_hint("cdp connection closed"),
                    );
                    return Ok(());
                }
            },
        }
    }
}

fn submit(
    conn: &mut Connection<CdpEventMessage>,
    call: Call,
    pending: &mut Pending,
) -> Result<(), AdapterError> {
    let session = match call.target {
        CommandTarget::Browser => None,
        CommandTarget::Session(id) => Some(CdpSessionId::from(id)),
    };
    let method: MethodId = call.method.into();
    match conn.submit_command(method, session, call.params) {
        Ok(id) => {
            pending.insert(id, call.reply);
            Ok(())
        }
        Err(err) => {
            let err = AdapterError::new(AdapterErrorKind::CdpIo).with_hint(err.to_string());
            let _ = call.reply.send(Err(err.clone()));
            Err(err)
        }
    }
}

fn fail_pending(pending: &mut Pending, err: &AdapterError) {
    for (_, reply) in pending.drain() {
        let _ = reply.send(Err(err.clone()));
    }
}

async fn forward_event(
    event: CdpEventMessage,
    events: &mpsc::Sender<TransportEvent>,
) -> Result<(), AdapterError> {
    let raw: CdpJsonEventMessage = event.try_into().map_err(|err| {
        AdapterError::new(AdapterErrorKind::Internal)
            .with_hint(format!("failed to decode cdp event: {err}"))
    })?;

    events
        .send(TransportEvent {
            method: raw.method.into_owned(),
            params: raw.params,
            session_id: raw.session_id,
        })
        .await
        .map_err(|err| AdapterError::new(AdapterErrorKind::Internal).with_hint(err.to_string()))
}

fn response_payload(resp: Response) -> Result<Value, AdapterError> {
    match (resp.result, resp.error) {
        (Some(result), _) => Ok(result),
        (None, Some(error)) => Err(AdapterError::new(AdapterErrorKind::CdpIo)
            .with_hint(format!("cdp error {}: {}", error.code, error.message))
            .retriable(error.code >= 500)),
        (None, None) => {
            Err(AdapterError::new(AdapterErrorKind::Internal).with_hint("empty cdp response"))
        }
    }
}

fn map_cdp_error(err: CdpError) -> AdapterError {
    let hint = err.to_string();
    match err {
        CdpError::Timeout => AdapterError::new(AdapterErrorKind::NavTimeout)
            .with_hint(hint)
            .retriable(true),
        CdpError::FrameNotFound(_) | CdpError::JavascriptException(_) | CdpError::Serde(_) => {
            AdapterError::new(AdapterErrorKind::Internal).with_hint(hint)
        }
        _ => AdapterError::new(AdapterErrorKind::CdpIo)
            .with_hint(hint)
            .retriable(true),
    }
}

/// Chromium command-line switches for a scenario browser.
pub(crate) fn launch_args(cfg: &CdpConfig) -> Vec<String> {
    let mut args: Vec<String> = [
        "--disable-background-networking",
        "--disable-background-timer-throttling",
        "--disable-breakpad",
        "--disable-component-update",
        "--disable-default-apps",
        "--disable-dev-shm-usage",
        "--disable-extensions",
        "--disable-popup-blocking",
        "--disable-sync",
        "--no-first-run",
        "--no-default-browser-check",
        "--password-store=basic",
        "--remote-allow-origins=*",
        "--use-mock-keychain",
    ]
    .iter()
    .map(|arg| arg.to_string())
    .collect();

    args.push(format!(
        "--window-size={},{}",
        cfg.window_width, cfg.window_height
    ));
    args
}

/// chromiumoxide adds the matching `--headless` flags itself.
fn headless_mode(cfg: &CdpConfig) -> HeadlessMode {
    if cfg.headless {
        HeadlessMode::New
    } else {
        HeadlessMode::False
    }
}

fn sandbox_disabled() -> bool {
    std::env::var("MEDIFLOW_DISABLE_SANDBOX")
        .map(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

fn profile_dir(cfg: &CdpConfig) -> Result<PathBuf, AdapterError> {
    let dir = if cfg.user_data_dir.is_absolute() {
        cfg.user_data_dir.clone()
    } else {
        std::env::current_dir()
            .map_err(|err| {
                AdapterError::new(AdapterErrorKind::Internal)
                    .with_hint(format!("failed to resolve cwd for user-data-dir: {err}"))
            })?
            .join(&cfg.user_data_dir)
    };

    fs::create_dir_all(&dir).map_err(|err| {
        AdapterError::new(AdapterErrorKind::Internal)
            .with_hint(format!("failed to create user-data-dir {}: {err}", dir.display()))
    })?;
    Ok(dir)
}

fn browser_config(cfg: &CdpConfig) -> Result<BrowserConfig, AdapterError> {
    if !cfg.executable.as_os_str().is_empty() && !cfg.executable.exists() {
        return Err(AdapterError::new(AdapterErrorKind::CdpIo)
            .with_hint(format!(
                "chrome executable not found at {}",
                cfg.executable.display()
            ))
            .with_data(json!({
                "expected": cfg.executable,
                "hint": "Set MEDIFLOW_CHROME to the full path of chrome/chromium."
            })));
    }

    let mut builder = BrowserConfig::builder()
        .request_timeout(Duration::from_millis(cfg.default_deadline_ms))
        .launch_timeout(LAUNCH_TIMEOUT)
        .args(launch_args(cfg))
        .headless_mode(headless_mode(cfg))
        .user_data_dir(profile_dir(cfg)?);

    if sandbox_disabled() {
        builder = builder.no_sandbox();
    }
    if !cfg.executable.as_os_str().is_empty() {
        builder = builder.chrome_executable(cfg.executable.clone());
    }

    builder.build().map_err(|err| {
        AdapterError::new(AdapterErrorKind::Internal)
            .with_hint(format!("browser config error: {err}"))
    })
}

async fn launch(cfg: &CdpConfig) -> Result<(Child, String), AdapterError> {
    let config = browser_config(cfg)?;
    let mut child = config.launch().map_err(|err| {
        AdapterError::new(AdapterErrorKind::CdpIo)
            .with_hint(format!("failed to launch chromium: {err}"))
    })?;

    let ws_url = devtools_ws_url(&mut child, LAUNCH_TIMEOUT)
        .await
        .map_err(|err| AdapterError::new(AdapterErrorKind::CdpIo).with_hint(err.to_string()))?;

    Ok((child, ws_url))
}
