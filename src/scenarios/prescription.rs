use cdp_adapter::Cdp;
use response_capture::Subscription;
use tracing::info;

use super::{expect_eq, role_login, ScenarioTrace};
use crate::config::Role;
use crate::errors::{ScenarioError, ScenarioResult};
use crate::session::BrowserSession;

/// Doctor scans a patient and issues a prescription; the creation response must carry an id.
pub async fn doctor_prescription<C: Cdp + ?Sized + 'static>(
    session: &BrowserSession<C>,
    trace: &mut ScenarioTrace,
) -> ScenarioResult<()> {
    let capture = session.capture_prescription_id()?;
    issue_as_doctor(session, &capture, trace).await?;
    capture.unsubscribe();
    Ok(())
}

/// The id the doctor's prescription got must be the newest row the pharmacist sees.
pub async fn prescription_handoff<C: Cdp + ?Sized + 'static>(
    session: &BrowserSession<C>,
    trace: &mut ScenarioTrace,
) -> ScenarioResult<()> {
    let capture = session.capture_prescription_id()?;
    let issued = issue_as_doctor(session, &capture, trace).await?;

    session.sign_out().await?;
    trace.step("sign out");

    let dashboard = role_login(session, Role::Pharmacist, trace).await?;
    let list = dashboard.open_prescriptions().await?;
    trace.step("open prescription list");

    let newest = list.last_prescription_id().await?;
    trace.step("read last prescription id");
    info!(target: "mediflow", %issued, %newest, "comparing prescription ids");
    expect_eq("last prescription id", &issued, &newest)?;

    // the list request shares the path; it must not have replaced the captured id
    if let Some(current) = capture.captured() {
        expect_eq("captured prescription id", &issued, &current)?;
    }
    capture.unsubscribe();
    Ok(())
}

async fn issue_as_doctor<C: Cdp + ?Sized + 'static>(
    session: &BrowserSession<C>,
    capture: &Subscription,
    trace: &mut ScenarioTrace,
) -> ScenarioResult<String> {
    let dashboard = role_login(session, Role::Doctor, trace).await?;
    let scan = dashboard.open_scan_patients().await?;
    trace.step("open patient scan");
    scan.start_scan().await?;
    trace.step("start scan");
    scan.proceed().await?;
    trace.step("proceed to prescription");
    scan.submit().await?;
    trace.step("submit prescription");

    let id = capture
        .wait_captured(session.config().capture.ready_timeout())
        .await?;
    if id.trim().is_empty() {
        return Err(ScenarioError::mismatch(
            "captured prescription id",
            "a non-empty id",
            id,
        ));
    }
    trace.set_captured(id.clone());
    trace.step("capture prescription id");
    Ok(id)
}
