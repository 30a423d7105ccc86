use cdp_adapter::Cdp;

use super::{expect_eq, ScenarioTrace};
use crate::config::Role;
use crate::errors::ScenarioResult;
use crate::pages::{Dashboard, LoginPage};
use crate::session::BrowserSession;

/// Log in as `role` and check the role indicator names it.
pub async fn role_login<'a, C: Cdp + ?Sized + 'static>(
    session: &'a BrowserSession<C>,
    role: Role,
    trace: &mut ScenarioTrace,
) -> ScenarioResult<Dashboard<'a, C>> {
    let creds = session.config().credentials.for_role(role)?;
    let dashboard = LoginPage::new(session).login(creds).await?;
    trace.step(format!("log in as {}", creds.email));

    let shown = dashboard.role_text().await?;
    trace.step("read role indicator");
    expect_eq("role indicator", role.label(), &shown)?;
    Ok(dashboard)
}
