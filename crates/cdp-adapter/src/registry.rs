//! Registry of open pages and the CDP sessions attached to them.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::ids::{PageId, SessionId};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PageContext {
    pub session_id: SessionId,
    pub target_id: Option<String>,
    pub cdp_session: Option<String>,
    pub recent_url: Option<String>,
}

#[derive(Default)]
pub struct Registry {
    pages: DashMap<PageId, PageContext>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_page(
        &self,
        page: PageId,
        session: SessionId,
        target_id: Option<String>,
        cdp_session: Option<String>,
    ) {
        self.pages.insert(
            page,
            PageContext {
                session_id: session,
                target_id,
                cdp_session,
                recent_url: None,
            },
        );
    }

    pub fn remove_page(&self, page: &PageId) -> Option<PageContext> {
        self.pages.remove(page).map(|(_, ctx)| ctx)
    }

    pub fn get(&self, page: &PageId) -> Option<PageContext> {
        self.pages.get(page).map(|entry| entry.value().clone())
    }

    pub fn pages(&self) -> Vec<PageId> {
        self.pages.iter().map(|entry| *entry.key()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn set_recent_url(&self, page: &PageId, url: String) {
        if let Some(mut entry) = self.pages.get_mut(page) {
            entry.recent_url = Some(url);
        }
    }

    pub fn set_cdp_session(&self, page: &PageId, session: String) {
        if let Some(mut entry) = self.pages.get_mut(page) {
            entry.cdp_session = Some(session);
        }
    }

    pub fn cdp_session(&self, page: &PageId) -> Option<String> {
        self.pages
            .get(page)
            .and_then(|entry| entry.cdp_session.clone())
    }

    pub fn is_attached(&self, page: &PageId) -> bool {
        self.cdp_session(page).is_some()
    }

    /// First page with an attached session, if any.
    pub fn first_attached(&self) -> Option<PageId> {
        self.pages
            .iter()
            .find(|entry| entry.cdp_session.is_some())
            .map(|entry| *entry.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_session_attachment() {
        let registry = Registry::new();
        let page = PageId::new();
        registry.insert_page(page, SessionId::new(), Some("target-1".into()), None);

        assert!(!registry.is_attached(&page));
        assert_eq!(registry.first_attached(), None);

        registry.set_cdp_session(&page, "session-1".into());
        registry.set_recent_url(&page, "http://localhost:5173/".into());

        assert_eq!(registry.cdp_session(&page).as_deref(), Some("session-1"));
        assert_eq!(registry.first_attached(), Some(page));
        assert_eq!(
            registry.get(&page).and_then(|ctx| ctx.recent_url).as_deref(),
            Some("http://localhost:5173/")
        );

        assert!(registry.remove_page(&page).is_some());
        assert!(registry.is_empty());
    }
}
