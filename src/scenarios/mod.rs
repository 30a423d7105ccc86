//! The MediFlow UI scenarios and the runner that executes them.

mod login;
mod prescription;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use cdp_adapter::{AdapterMode, Cdp};
use chrono::Utc;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::Config;
use crate::errors::{ScenarioError, ScenarioResult};
use crate::report::{FailureDetail, RunReport, ScenarioReport, ScenarioStatus, StepRecord};
use crate::session::BrowserSession;

pub use login::role_login;
pub use prescription::{doctor_prescription, prescription_handoff};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ScenarioKind {
    /// Doctor logs in and sees the Doctor role indicator
    DoctorLogin,
    /// Pharmacist logs in and sees the Pharmacist role indicator
    PharmacistLogin,
    /// Doctor scans a patient and issues a prescription
    DoctorPrescription,
    /// Prescription issued by the doctor shows up last in the pharmacist's list
    PrescriptionHandoff,
}

impl ScenarioKind {
    pub const ALL: [ScenarioKind; 4] = [
        ScenarioKind::DoctorLogin,
        ScenarioKind::PharmacistLogin,
        ScenarioKind::DoctorPrescription,
        ScenarioKind::PrescriptionHandoff,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ScenarioKind::DoctorLogin => "doctor-login",
            ScenarioKind::PharmacistLogin => "pharmacist-login",
            ScenarioKind::DoctorPrescription => "doctor-prescription",
            ScenarioKind::PrescriptionHandoff => "prescription-handoff",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ScenarioKind::DoctorLogin => "doctor logs in and sees the Doctor role indicator",
            ScenarioKind::PharmacistLogin => {
                "pharmacist logs in and sees the Pharmacist role indicator"
            }
            ScenarioKind::DoctorPrescription => "doctor scans a patient and issues a prescription",
            ScenarioKind::PrescriptionHandoff => {
                "prescription issued by the doctor shows up last in the pharmacist's list"
            }
        }
    }
}

impl fmt::Display for ScenarioKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Steps taken and values observed while a scenario runs.
#[derive(Debug)]
pub struct ScenarioTrace {
    started: Instant,
    steps: Vec<StepRecord>,
    captured: Option<String>,
}

impl ScenarioTrace {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            steps: Vec::new(),
            captured: None,
        }
    }

    pub fn step(&mut self, name: impl Into<String>) {
        let name = name.into();
        info!(target: "mediflow", step = %name, "scenario step");
        self.steps.push(StepRecord {
            name,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
        });
    }

    pub fn set_captured(&mut self, value: impl Into<String>) {
        self.captured = Some(value.into());
    }

    pub fn captured(&self) -> Option<&str> {
        self.captured.as_deref()
    }
}

/// Compare an observed value with the expected one.
pub fn expect_eq(what: &str, expected: &str, actual: &str) -> ScenarioResult<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(ScenarioError::mismatch(what, expected, actual))
    }
}

/// Executes scenarios one after another, each on a fresh page.
pub struct ScenarioRunner<C: Cdp + ?Sized> {
    cdp: Arc<C>,
    config: Arc<Config>,
    mode: AdapterMode,
    artifacts: Option<PathBuf>,
}

impl<C: Cdp + ?Sized + 'static> ScenarioRunner<C> {
    pub fn new(cdp: Arc<C>, config: Arc<Config>) -> Self {
        let artifacts = config
            .screenshot_on_failure
            .then(|| config.artifacts_dir.clone());
        Self {
            cdp,
            config,
            mode: AdapterMode::Real,
            artifacts,
        }
    }

    pub fn with_mode(mut self, mode: AdapterMode) -> Self {
        self.mode = mode;
        self
    }

    /// Directory for failure screenshots; `None` disables them.
    pub fn with_artifacts(mut self, dir: Option<PathBuf>) -> Self {
        self.artifacts = dir;
        self
    }

    pub async fn run(&self, kind: ScenarioKind) -> ScenarioReport {
        let started_at = Utc::now();
        let mut trace = ScenarioTrace::new();
        let mut screenshot = None;

        let span = info_span!(target: "mediflow", "scenario", name = kind.name());
        let result: ScenarioResult<()> = async {
            let session = BrowserSession::open(Arc::clone(&self.cdp), Arc::clone(&self.config))
                .await?;
            trace.step("open application");
            let result = self.execute(kind, &session, &mut trace).await;
            if result.is_err() {
                if let Some(dir) = &self.artifacts {
                    screenshot = session.save_screenshot(dir, kind.name()).await;
                }
            }
            if let Err(err) = session.close().await {
                warn!(target: "mediflow", %err, "failed to close scenario page");
            }
            result
        }
        .instrument(span)
        .await;

        let failure = match &result {
            Ok(()) => {
                info!(target: "mediflow", scenario = kind.name(), "scenario passed");
                None
            }
            Err(err) => {
                error!(target: "mediflow", scenario = kind.name(), %err, "scenario failed");
                Some(FailureDetail::from(err))
            }
        };

        ScenarioReport {
            scenario: kind.name().to_string(),
            status: if failure.is_none() {
                ScenarioStatus::Passed
            } else {
                ScenarioStatus::Failed
            },
            started_at,
            duration_ms: trace.started.elapsed().as_millis() as u64,
            steps: trace.steps,
            captured: trace.captured,
            failure,
            screenshot,
        }
    }

    pub async fn run_all(&self, kinds: &[ScenarioKind]) -> RunReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(target: "mediflow", %run_id, count = kinds.len(), "starting run");

        let mut scenarios = Vec::with_capacity(kinds.len());
        for kind in kinds {
            scenarios.push(self.run(*kind).await);
        }

        RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            base_url: self.config.base_url.clone(),
            adapter_mode: self.mode,
            scenarios,
            metrics: None,
        }
    }

    async fn execute(
        &self,
        kind: ScenarioKind,
        session: &BrowserSession<C>,
        trace: &mut ScenarioTrace,
    ) -> ScenarioResult<()> {
        use crate::config::Role;

        match kind {
            ScenarioKind::DoctorLogin => role_login(session, Role::Doctor, trace).await.map(drop),
            ScenarioKind::PharmacistLogin => {
                role_login(session, Role::Pharmacist, trace).await.map(drop)
            }
            ScenarioKind::DoctorPrescription => doctor_prescription(session, trace).await,
            ScenarioKind::PrescriptionHandoff => prescription_handoff(session, trace).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_match_cli_values() {
        for kind in ScenarioKind::ALL {
            let parsed = ScenarioKind::from_str(kind.name(), false).unwrap();
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn expect_eq_reports_both_sides() {
        assert!(expect_eq("role indicator", "Doctor", "Doctor").is_ok());
        let err = expect_eq("role indicator", "Doctor", "").unwrap_err();
        assert_eq!(err.expectation(), Some(("Doctor", "")));
    }

    #[test]
    fn trace_records_steps_in_order() {
        let mut trace = ScenarioTrace::new();
        trace.step("a");
        trace.step("b");
        trace.set_captured("17");
        assert_eq!(
            trace.steps.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
            ["a", "b"]
        );
        assert_eq!(trace.captured(), Some("17"));
    }
}
