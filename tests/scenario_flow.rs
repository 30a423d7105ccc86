//! Scenario runs against an in-memory stand-in for the MediFlow frontend.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cdp_adapter::{
    AdapterError, AdapterErrorKind, Anchor, Cdp, Locator, NetworkEvent, PageId, ResponseBody,
    WaitCondition,
};
use mediflow_e2e::config::Timeouts;
use mediflow_e2e::{Config, Role, ScenarioKind, ScenarioRunner, ScenarioStatus};
use parking_lot::Mutex;
use response_capture::CaptureConfig;
use serde_json::{json, Value};
use tempfile::tempdir;
use tokio::sync::broadcast;
use tokio::time::sleep;

const PRESCRIPTIONS_API: &str = "http://localhost:5000/api/prescriptions";
const SESSION: &str = "fake-session";

#[derive(Clone, Copy, Debug, PartialEq)]
enum View {
    Login,
    Dashboard,
    Scan { started: bool, proceeded: bool },
    List,
}

struct AppState {
    email: String,
    password: String,
    signed_in: Option<Role>,
    view: View,
    prescriptions: Vec<u64>,
    pages: usize,
    closed: usize,
    network_enabled: bool,
    viewport: Option<(u32, u32)>,
}

/// Mimics the MediFlow UI closely enough for the page objects: a login form, the role indicator,
/// the scan wizard and the prescription table, plus the API responses they trigger.
struct FakeApp {
    state: Mutex<AppState>,
    bodies: Mutex<HashMap<String, String>>,
    network: broadcast::Sender<NetworkEvent>,
    next_request: AtomicU64,
    body_delay: Duration,
    role_label_override: Option<String>,
}

impl FakeApp {
    fn new() -> Self {
        let (network, _) = broadcast::channel(32);
        Self {
            state: Mutex::new(AppState {
                email: String::new(),
                password: String::new(),
                signed_in: None,
                view: View::Login,
                prescriptions: Vec::new(),
                pages: 0,
                closed: 0,
                network_enabled: false,
                viewport: None,
            }),
            bodies: Mutex::new(HashMap::new()),
            network,
            next_request: AtomicU64::new(1),
            body_delay: Duration::ZERO,
            role_label_override: None,
        }
    }

    fn with_prescriptions(self, ids: &[u64]) -> Self {
        self.state.lock().prescriptions = ids.to_vec();
        self
    }

    fn with_body_delay(mut self, delay: Duration) -> Self {
        self.body_delay = delay;
        self
    }

    fn with_role_label(mut self, label: &str) -> Self {
        self.role_label_override = Some(label.to_string());
        self
    }

    fn not_found(locator: &Locator) -> AdapterError {
        AdapterError::new(AdapterErrorKind::TargetNotFound).with_hint(format!("{locator} not found"))
    }

    fn respond(&self, method: &str, status: i64, body: Value) {
        let state = self.state.lock();
        if !state.network_enabled {
            return;
        }
        drop(state);
        let request_id = format!("req-{}", self.next_request.fetch_add(1, Ordering::SeqCst));
        self.bodies.lock().insert(request_id.clone(), body.to_string());
        let event = NetworkEvent::new(request_id.as_str(), PRESCRIPTIONS_API)
            .with_method(method)
            .with_status(status)
            .with_session(SESSION);
        let _ = self.network.send(event);
    }

    fn role_for(email: &str, password: &str) -> Option<Role> {
        if password != "password123" {
            return None;
        }
        match email {
            "doctor@example.com" => Some(Role::Doctor),
            "pharmacist@example.com" => Some(Role::Pharmacist),
            _ => None,
        }
    }
}

#[async_trait]
impl Cdp for FakeApp {
    async fn create_page(&self, _url: &str) -> Result<PageId, AdapterError> {
        self.state.lock().pages += 1;
        Ok(PageId::new())
    }

    async fn close_page(&self, _page: PageId) -> Result<(), AdapterError> {
        self.state.lock().closed += 1;
        Ok(())
    }

    async fn navigate(&self, _page: PageId, _url: &str, _deadline: Duration) -> Result<(), AdapterError> {
        let mut state = self.state.lock();
        state.view = if state.signed_in.is_some() {
            View::Dashboard
        } else {
            View::Login
        };
        Ok(())
    }

    async fn click(&self, _page: PageId, locator: &Locator, _deadline: Duration) -> Result<(), AdapterError> {
        let mut state = self.state.lock();
        match (locator, state.view) {
            (Locator::Id(id), View::Login) if id == "submit" => {
                state.signed_in = FakeApp::role_for(&state.email, &state.password);
                if state.signed_in.is_some() {
                    state.view = View::Dashboard;
                }
                Ok(())
            }
            (Locator::TestId(id), View::Dashboard) if id == "menu-item-scan_patients" => {
                if state.signed_in != Some(Role::Doctor) {
                    return Err(FakeApp::not_found(locator));
                }
                state.view = View::Scan {
                    started: false,
                    proceeded: false,
                };
                Ok(())
            }
            (Locator::Id(id), View::Scan { .. }) if id == "start-scan" => {
                state.view = View::Scan {
                    started: true,
                    proceeded: false,
                };
                Ok(())
            }
            (Locator::Id(id), View::Scan { started: true, .. }) if id == "proceed" => {
                state.view = View::Scan {
                    started: true,
                    proceeded: true,
                };
                Ok(())
            }
            (Locator::Id(id), View::Scan { proceeded: true, .. }) if id == "submit" => {
                let id = state.prescriptions.iter().max().copied().unwrap_or(100) + 1;
                state.prescriptions.push(id);
                state.view = View::Dashboard;
                drop(state);
                self.respond(
                    "POST",
                    201,
                    json!({ "prescription": { "id": id, "status": "pending" } }),
                );
                Ok(())
            }
            (Locator::TestId(id), View::Dashboard | View::List)
                if id == "menu-item-prescriptions" && state.signed_in.is_some() =>
            {
                state.view = View::List;
                let rows: Vec<Value> = state
                    .prescriptions
                    .iter()
                    .map(|id| json!({ "id": id }))
                    .collect();
                drop(state);
                self.respond("GET", 200, json!({ "prescriptions": rows }));
                Ok(())
            }
            _ => Err(FakeApp::not_found(locator)),
        }
    }

    async fn type_text(
        &self,
        _page: PageId,
        locator: &Locator,
        text: &str,
        _deadline: Duration,
    ) -> Result<(), AdapterError> {
        let mut state = self.state.lock();
        if state.view != View::Login {
            return Err(FakeApp::not_found(locator));
        }
        match locator {
            Locator::Id(id) if id == "email" => state.email = text.to_string(),
            Locator::Id(id) if id == "password" => state.password = text.to_string(),
            _ => return Err(FakeApp::not_found(locator)),
        }
        Ok(())
    }

    async fn text_content(
        &self,
        page: PageId,
        locator: &Locator,
        deadline: Duration,
    ) -> Result<String, AdapterError> {
        self.wait_for(page, locator, WaitCondition::Present, deadline)
            .await
            .map(|anchor| anchor.text)
    }

    async fn wait_for(
        &self,
        _page: PageId,
        locator: &Locator,
        _condition: WaitCondition,
        _timeout: Duration,
    ) -> Result<Anchor, AdapterError> {
        let state = self.state.lock();
        let text = match locator {
            Locator::Id(id) if id == "role-indicator" && state.view != View::Login => state
                .signed_in
                .map(|role| {
                    self.role_label_override
                        .clone()
                        .unwrap_or_else(|| role.label().to_string())
                }),
            Locator::XPath(path) if path == "//tbody/tr[last()]/td[1]/div" && state.view == View::List => {
                state.prescriptions.last().map(|id| id.to_string())
            }
            _ => None,
        };
        text.map(|text| Anchor {
            x: 10.0,
            y: 10.0,
            visible: true,
            text,
        })
        .ok_or_else(|| FakeApp::not_found(locator))
    }

    async fn evaluate_script(&self, _page: PageId, expression: &str) -> Result<Value, AdapterError> {
        if expression.contains("localStorage.clear()") {
            self.state.lock().signed_in = None;
        }
        Ok(Value::Bool(true))
    }

    async fn screenshot(&self, _page: PageId, _deadline: Duration) -> Result<Vec<u8>, AdapterError> {
        Ok(vec![0x89, b'P', b'N', b'G'])
    }

    async fn set_viewport(&self, _page: PageId, width: u32, height: u32) -> Result<(), AdapterError> {
        self.state.lock().viewport = Some((width, height));
        Ok(())
    }

    async fn set_network_capture(&self, _page: PageId, enabled: bool) -> Result<(), AdapterError> {
        self.state.lock().network_enabled = enabled;
        Ok(())
    }

    fn network_events(&self) -> broadcast::Receiver<NetworkEvent> {
        self.network.subscribe()
    }

    async fn response_body(&self, event: &NetworkEvent) -> Result<ResponseBody, AdapterError> {
        let body = self.bodies.lock().get(event.request_id.as_str()).cloned();
        if !self.body_delay.is_zero() {
            sleep(self.body_delay).await;
        }
        body.map(ResponseBody::new).ok_or_else(|| {
            AdapterError::new(AdapterErrorKind::CdpIo)
                .with_hint("No resource with given identifier found")
        })
    }
}

fn test_config(artifacts: &Path) -> Config {
    let mut config = Config::default();
    config.timeouts = Timeouts {
        element_ms: 200,
        navigation_ms: 200,
        screenshot_ms: 200,
        settle_ms: 0,
    };
    config.capture = CaptureConfig {
        grace_delay_ms: 0,
        body_timeout_ms: 200,
        ready_timeout_ms: 1_000,
    };
    config.artifacts_dir = artifacts.to_path_buf();
    config
}

fn runner(app: FakeApp, config: Config) -> (Arc<FakeApp>, ScenarioRunner<FakeApp>) {
    let app = Arc::new(app);
    let runner = ScenarioRunner::new(Arc::clone(&app), Arc::new(config));
    (app, runner)
}

#[tokio::test]
async fn doctor_login_shows_doctor_role() {
    let dir = tempdir().unwrap();
    let (app, runner) = runner(FakeApp::new(), test_config(dir.path()));

    let report = runner.run(ScenarioKind::DoctorLogin).await;
    assert_eq!(report.status, ScenarioStatus::Passed, "{:?}", report.failure);
    assert_eq!(report.scenario, "doctor-login");
    assert!(report
        .steps
        .iter()
        .any(|step| step.name == "log in as doctor@example.com"));

    let state = app.state.lock();
    assert_eq!(state.viewport, Some((1440, 900)));
    assert!(state.network_enabled);
    assert_eq!(state.closed, 1);
}

#[tokio::test]
async fn repeated_pharmacist_login_reads_the_same_role() {
    let dir = tempdir().unwrap();
    let (app, runner) = runner(FakeApp::new(), test_config(dir.path()));

    let first = runner.run(ScenarioKind::PharmacistLogin).await;
    let second = runner.run(ScenarioKind::PharmacistLogin).await;
    assert!(first.passed(), "{:?}", first.failure);
    assert!(second.passed(), "{:?}", second.failure);
    assert_eq!(app.state.lock().pages, 2);
}

#[tokio::test]
async fn wrong_role_label_fails_with_expected_and_actual() {
    let dir = tempdir().unwrap();
    let (app, runner) = runner(
        FakeApp::new().with_role_label("Nurse"),
        test_config(dir.path()),
    );

    let report = runner.run(ScenarioKind::DoctorLogin).await;
    assert_eq!(report.status, ScenarioStatus::Failed);
    let failure = report.failure.expect("failure detail");
    assert_eq!(failure.expected.as_deref(), Some("Doctor"));
    assert_eq!(failure.actual.as_deref(), Some("Nurse"));

    let screenshot = report.screenshot.expect("failure screenshot");
    assert_eq!(screenshot, dir.path().join("doctor-login.png"));
    assert!(screenshot.exists());
    assert_eq!(app.state.lock().closed, 1);
}

#[tokio::test]
async fn missing_credentials_fail_before_typing() {
    let dir = tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.credentials.pharmacist.password.clear();
    config.screenshot_on_failure = false;
    let (app, runner) = runner(FakeApp::new(), config);

    let report = runner.run(ScenarioKind::PharmacistLogin).await;
    assert!(!report.passed());
    assert!(report
        .failure
        .unwrap()
        .message
        .contains("no credentials configured for the pharmacist role"));
    assert!(report.screenshot.is_none());
    assert!(app.state.lock().email.is_empty());
}

#[tokio::test]
async fn doctor_prescription_captures_created_id() {
    let dir = tempdir().unwrap();
    let (app, runner) = runner(FakeApp::new(), test_config(dir.path()));

    let report = runner.run(ScenarioKind::DoctorPrescription).await;
    assert!(report.passed(), "{:?}", report.failure);
    assert_eq!(report.captured.as_deref(), Some("101"));
    assert_eq!(app.state.lock().prescriptions, vec![101]);
}

#[tokio::test]
async fn handoff_matches_last_row_despite_list_request() {
    let dir = tempdir().unwrap();
    let (app, runner) = runner(
        FakeApp::new().with_prescriptions(&[7, 8]),
        test_config(dir.path()),
    );

    let report = runner.run(ScenarioKind::PrescriptionHandoff).await;
    assert!(report.passed(), "{:?}", report.failure);
    assert_eq!(report.captured.as_deref(), Some("9"));

    let names: Vec<&str> = report.steps.iter().map(|s| s.name.as_str()).collect();
    assert!(names.contains(&"sign out"));
    assert!(names.contains(&"log in as pharmacist@example.com"));
    assert_eq!(names.last(), Some(&"read last prescription id"));

    // both the POST and the list GET went over the wire
    assert_eq!(app.bodies.lock().len(), 2);
}

#[tokio::test]
async fn slow_body_leaves_value_empty_and_handoff_fails() {
    let dir = tempdir().unwrap();
    let (_app, runner) = runner(
        FakeApp::new().with_body_delay(Duration::from_millis(600)),
        test_config(dir.path()),
    );

    let report = runner.run(ScenarioKind::PrescriptionHandoff).await;
    assert_eq!(report.status, ScenarioStatus::Failed);
    assert!(report.captured.is_none());
    let failure = report.failure.unwrap();
    assert!(
        failure.message.contains("no value captured"),
        "unexpected failure: {}",
        failure.message
    );
    assert!(!report.steps.iter().any(|s| s.name == "sign out"));
}

#[tokio::test]
async fn run_all_reports_every_scenario() {
    let dir = tempdir().unwrap();
    let (app, runner) = runner(FakeApp::new(), test_config(dir.path()));

    let report = runner.run_all(&ScenarioKind::ALL).await;
    assert_eq!(report.scenarios.len(), 4);
    assert!(report.all_passed(), "{}", report.render_human());
    assert_eq!(report.base_url, "http://localhost:5173/");
    assert!(report.finished_at >= report.started_at);

    let order: Vec<&str> = report.scenarios.iter().map(|s| s.scenario.as_str()).collect();
    assert_eq!(
        order,
        [
            "doctor-login",
            "pharmacist-login",
            "doctor-prescription",
            "prescription-handoff"
        ]
    );
    // prescription-handoff issued the second prescription
    assert_eq!(report.scenarios[3].captured.as_deref(), Some("102"));

    // every scenario page is closed again
    let state = app.state.lock();
    assert_eq!(state.pages, 4);
    assert_eq!(state.closed, 4);
}
