//! Run and scenario reports.

use std::fmt::Write as _;
use std::path::PathBuf;

use cdp_adapter::{AdapterMetricsSnapshot, AdapterMode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ScenarioError;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioStatus {
    Passed,
    Failed,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    pub elapsed_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FailureDetail {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
}

impl From<&ScenarioError> for FailureDetail {
    fn from(err: &ScenarioError) -> Self {
        let (expected, actual) = match err.expectation() {
            Some((expected, actual)) => (Some(expected.to_string()), Some(actual.to_string())),
            None => (None, None),
        };
        Self {
            message: err.to_string(),
            expected,
            actual,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub scenario: String,
    pub status: ScenarioStatus,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub steps: Vec<StepRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub captured: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<PathBuf>,
}

impl ScenarioReport {
    pub fn passed(&self) -> bool {
        self.status == ScenarioStatus::Passed
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub base_url: String,
    pub adapter_mode: AdapterMode,
    pub scenarios: Vec<ScenarioReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<AdapterMetricsSnapshot>,
}

impl RunReport {
    pub fn passed_count(&self) -> usize {
        self.scenarios.iter().filter(|s| s.passed()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.scenarios.len() - self.passed_count()
    }

    pub fn all_passed(&self) -> bool {
        self.failed_count() == 0
    }

    pub fn render_human(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Run {} against {} ({} browser)",
            self.run_id,
            self.base_url,
            self.adapter_mode.as_str()
        );
        for scenario in &self.scenarios {
            let mark = if scenario.passed() { "PASS" } else { "FAIL" };
            let _ = writeln!(
                out,
                "  [{mark}] {} ({} ms, {} steps)",
                scenario.scenario,
                scenario.duration_ms,
                scenario.steps.len()
            );
            if let Some(value) = &scenario.captured {
                let _ = writeln!(out, "         captured: {value}");
            }
            if let Some(failure) = &scenario.failure {
                let _ = writeln!(out, "         {}", failure.message);
                if let (Some(expected), Some(actual)) = (&failure.expected, &failure.actual) {
                    let _ = writeln!(out, "         expected: {expected}");
                    let _ = writeln!(out, "         actual:   {actual}");
                }
            }
            if let Some(path) = &scenario.screenshot {
                let _ = writeln!(out, "         screenshot: {}", path.display());
            }
        }
        let _ = writeln!(
            out,
            "{} passed, {} failed in {} ms",
            self.passed_count(),
            self.failed_count(),
            (self.finished_at - self.started_at).num_milliseconds()
        );
        if let Some(metrics) = &self.metrics {
            let _ = writeln!(
                out,
                "cdp: {} commands ({} failed), {} events, {} responses, {} body fetches",
                metrics.commands,
                metrics.command_failures,
                metrics.events,
                metrics.network_responses,
                metrics.body_fetches
            );
        }
        out
    }
}
