//! One browser page bound to the application under test.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use cdp_adapter::{Anchor, Cdp, CdpBodySource, Locator, PageId, WaitCondition};
use response_capture::{ResponseCapture, Subscription};
use tokio::fs;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::errors::ScenarioResult;

const CLEAR_STORAGE: &str = "(() => { window.localStorage.clear(); window.sessionStorage.clear(); return true; })()";

/// A page opened on the configured base URL.
///
/// All interaction helpers use the configured element bound as their explicit wait.
pub struct BrowserSession<C: Cdp + ?Sized> {
    cdp: Arc<C>,
    config: Arc<Config>,
    page: PageId,
}

impl<C: Cdp + ?Sized + 'static> BrowserSession<C> {
    /// Open a fresh page, size it, turn on network capture and land on the login screen.
    pub async fn open(cdp: Arc<C>, config: Arc<Config>) -> ScenarioResult<Self> {
        let page = cdp.create_page("about:blank").await?;
        let session = Self { cdp, config, page };
        if let Err(err) = session.prepare().await {
            if let Err(close_err) = session.cdp.close_page(page).await {
                warn!(target: "mediflow", ?page, %close_err, "failed to close page after setup error");
            }
            return Err(err);
        }
        info!(target: "mediflow", ?page, base_url = %session.config.base_url, "session opened");
        Ok(session)
    }

    async fn prepare(&self) -> ScenarioResult<()> {
        let browser = &self.config.browser;
        self.cdp
            .set_viewport(self.page, browser.window_width, browser.window_height)
            .await?;
        self.cdp.set_network_capture(self.page, true).await?;
        self.goto_home().await?;
        // the shared browser profile may still hold an earlier scenario's session token
        self.sign_out().await
    }

    pub fn page(&self) -> PageId {
        self.page
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cdp(&self) -> &Arc<C> {
        &self.cdp
    }

    pub async fn goto(&self, url: &str) -> ScenarioResult<()> {
        debug!(target: "mediflow", %url, "navigate");
        self.cdp
            .navigate(self.page, url, self.config.timeouts.navigation())
            .await?;
        Ok(())
    }

    pub async fn goto_home(&self) -> ScenarioResult<()> {
        let base = self.config.base_url.clone();
        self.goto(&base).await
    }

    /// Click the element once it is visible, then give the UI its settle pause.
    pub async fn click(&self, locator: &Locator) -> ScenarioResult<()> {
        debug!(target: "mediflow", %locator, "click");
        self.cdp
            .click(self.page, locator, self.config.timeouts.element())
            .await?;
        self.settle().await;
        Ok(())
    }

    pub async fn fill(&self, locator: &Locator, text: &str) -> ScenarioResult<()> {
        debug!(target: "mediflow", %locator, "fill");
        self.cdp
            .type_text(self.page, locator, text, self.config.timeouts.element())
            .await?;
        Ok(())
    }

    pub async fn wait_visible(&self, locator: &Locator) -> ScenarioResult<Anchor> {
        Ok(self
            .cdp
            .wait_for(
                self.page,
                locator,
                WaitCondition::Visible,
                self.config.timeouts.element(),
            )
            .await?)
    }

    /// Visible text of the element once it is rendered.
    pub async fn visible_text(&self, locator: &Locator) -> ScenarioResult<String> {
        self.wait_visible(locator).await.map(|anchor| anchor.text)
    }

    /// Close the page. Its responses no longer reach capture subscribers.
    pub async fn close(self) -> ScenarioResult<()> {
        self.cdp.close_page(self.page).await?;
        debug!(target: "mediflow", page = ?self.page, "session closed");
        Ok(())
    }

    /// Drop the app's stored session token and return to the login screen.
    pub async fn sign_out(&self) -> ScenarioResult<()> {
        self.cdp.evaluate_script(self.page, CLEAR_STORAGE).await?;
        self.goto_home().await?;
        info!(target: "mediflow", page = ?self.page, "signed out");
        Ok(())
    }

    /// Start capturing the prescription id from prescription-creation responses.
    pub fn capture_prescription_id(&self) -> ScenarioResult<Subscription> {
        let filter = self.config.api.prescription_filter()?;
        let path = self.config.api.prescription_id_path()?;
        let capture = ResponseCapture::new(self.config.capture.clone());
        Ok(capture.subscribe(
            self.cdp.network_events(),
            Arc::new(CdpBodySource::new(Arc::clone(&self.cdp))),
            filter,
            path,
        ))
    }

    /// Save a PNG of the current viewport into `dir`, returning the written path.
    pub async fn save_screenshot(&self, dir: &Path, name: &str) -> Option<PathBuf> {
        let bytes = match self
            .cdp
            .screenshot(self.page, self.config.timeouts.screenshot())
            .await
        {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(target: "mediflow", ?err, "screenshot failed");
                return None;
            }
        };

        let path = dir.join(format!("{name}.png"));
        let written = async {
            fs::create_dir_all(dir).await?;
            fs::write(&path, &bytes).await
        }
        .await;
        match written {
            Ok(()) => {
                info!(target: "mediflow", path = %path.display(), "saved failure screenshot");
                Some(path)
            }
            Err(err) => {
                warn!(target: "mediflow", path = %path.display(), ?err, "could not write screenshot");
                None
            }
        }
    }

    async fn settle(&self) {
        if let Some(pause) = self.config.timeouts.settle() {
            sleep(pause).await;
        }
    }
}
