//! Page objects for the MediFlow frontend.

use cdp_adapter::Cdp;
use tracing::info;

use crate::config::Credentials;
use crate::errors::ScenarioResult;
use crate::session::BrowserSession;

pub mod selectors {
    use cdp_adapter::Locator;

    pub fn email() -> Locator {
        Locator::id("email")
    }

    pub fn password() -> Locator {
        Locator::id("password")
    }

    /// Login button, and the final submit button of the prescription form.
    pub fn submit() -> Locator {
        Locator::id("submit")
    }

    pub fn role_indicator() -> Locator {
        Locator::id("role-indicator")
    }

    pub fn scan_patients_menu() -> Locator {
        Locator::test_id("menu-item-scan_patients")
    }

    pub fn start_scan() -> Locator {
        Locator::id("start-scan")
    }

    pub fn proceed() -> Locator {
        Locator::id("proceed")
    }

    pub fn prescriptions_menu() -> Locator {
        Locator::test_id("menu-item-prescriptions")
    }

    /// First cell of the newest row in the prescription table.
    pub fn last_prescription_id() -> Locator {
        Locator::xpath("//tbody/tr[last()]/td[1]/div")
    }
}

pub struct LoginPage<'a, C: Cdp + ?Sized> {
    session: &'a BrowserSession<C>,
}

impl<'a, C: Cdp + ?Sized + 'static> LoginPage<'a, C> {
    pub fn new(session: &'a BrowserSession<C>) -> Self {
        Self { session }
    }

    pub async fn login(&self, creds: &Credentials) -> ScenarioResult<Dashboard<'a, C>> {
        self.session.fill(&selectors::email(), &creds.email).await?;
        self.session
            .fill(&selectors::password(), &creds.password)
            .await?;
        self.session.click(&selectors::submit()).await?;
        info!(target: "mediflow", email = %creds.email, "submitted login form");
        Ok(Dashboard::new(self.session))
    }
}

/// Signed-in shell: role indicator and navigation menu.
pub struct Dashboard<'a, C: Cdp + ?Sized> {
    session: &'a BrowserSession<C>,
}

impl<'a, C: Cdp + ?Sized + 'static> Dashboard<'a, C> {
    pub fn new(session: &'a BrowserSession<C>) -> Self {
        Self { session }
    }

    pub async fn role_text(&self) -> ScenarioResult<String> {
        self.session.visible_text(&selectors::role_indicator()).await
    }

    pub async fn open_scan_patients(&self) -> ScenarioResult<ScanPatientPage<'a, C>> {
        self.session.click(&selectors::scan_patients_menu()).await?;
        Ok(ScanPatientPage {
            session: self.session,
        })
    }

    pub async fn open_prescriptions(&self) -> ScenarioResult<PrescriptionList<'a, C>> {
        self.session.click(&selectors::prescriptions_menu()).await?;
        Ok(PrescriptionList {
            session: self.session,
        })
    }
}

/// Patient scan wizard ending in the prescription form.
pub struct ScanPatientPage<'a, C: Cdp + ?Sized> {
    session: &'a BrowserSession<C>,
}

impl<'a, C: Cdp + ?Sized + 'static> ScanPatientPage<'a, C> {
    pub async fn start_scan(&self) -> ScenarioResult<()> {
        self.session.click(&selectors::start_scan()).await
    }

    pub async fn proceed(&self) -> ScenarioResult<()> {
        self.session.click(&selectors::proceed()).await
    }

    pub async fn submit(&self) -> ScenarioResult<()> {
        self.session.click(&selectors::submit()).await
    }
}

pub struct PrescriptionList<'a, C: Cdp + ?Sized> {
    session: &'a BrowserSession<C>,
}

impl<'a, C: Cdp + ?Sized + 'static> PrescriptionList<'a, C> {
    pub async fn last_prescription_id(&self) -> ScenarioResult<String> {
        self.session
            .visible_text(&selectors::last_prescription_id())
            .await
    }
}
