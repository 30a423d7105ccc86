//! MediFlow end-to-end runner
//!
//! Drives the MediFlow prescription app through Chromium: page objects, the doctor/pharmacist
//! scenarios and the reports they produce. The CLI in `main.rs` is a thin shell over this crate.

pub mod config;
pub mod errors;
pub mod pages;
pub mod report;
pub mod scenarios;
pub mod session;

pub use config::{Config, Credentials, Role};
pub use errors::{ConfigError, ScenarioError, ScenarioResult};
pub use report::{RunReport, ScenarioReport, ScenarioStatus};
pub use scenarios::{ScenarioKind, ScenarioRunner};
pub use session::BrowserSession;
