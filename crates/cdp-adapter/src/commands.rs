//! Element locators and the page-side probes built from them.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{internal, AdapterError};

/// How a scenario addresses an element on the page.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(tag = "by", content = "value", rename_all = "snake_case")]
pub enum Locator {
    Id(String),
    Css(String),
    /// Value of the `data-testid` attribute.
    TestId(String),
    XPath(String),
}

impl Locator {
    pub fn id(value: impl Into<String>) -> Self {
        Locator::Id(value.into())
    }

    pub fn css(value: impl Into<String>) -> Self {
        Locator::Css(value.into())
    }

    pub fn test_id(value: impl Into<String>) -> Self {
        Locator::TestId(value.into())
    }

    pub fn xpath(value: impl Into<String>) -> Self {
        Locator::XPath(value.into())
    }

    /// JavaScript expression evaluating to the first matching element or `null`.
    pub fn lookup_expression(&self) -> Result<String, AdapterError> {
        let expression = match self {
            Locator::Id(id) => format!("document.getElementById({})", literal(id)?),
            Locator::Css(selector) => format!(
                "(() => {{ try {{ return document.querySelector({}); }} catch (err) {{ return null; }} }})()",
                literal(selector)?
            ),
            Locator::TestId(test_id) => {
                let selector = format!("[data-testid='{}']", test_id.replace('\'', "\\'"));
                format!("document.querySelector({})", literal(&selector)?)
            }
            Locator::XPath(path) => format!(
                "(() => {{ try {{ return document.evaluate({}, document, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue; }} catch (err) {{ return null; }} }})()",
                literal(path)?
            ),
        };
        Ok(expression)
    }

    /// Probe reporting presence, visibility, centre point and text of the element.
    pub(crate) fn probe_expression(&self, scroll_into_view: bool) -> Result<String, AdapterError> {
        let lookup = self.lookup_expression()?;
        let scroll = if scroll_into_view {
            "if (typeof el.scrollIntoView === 'function') { el.scrollIntoView({ block: 'center', inline: 'center' }); }"
        } else {
            ""
        };
        Ok(format!(
            "(() => {{\n    const el = {lookup};\n    if (!el) {{ return {{ status: 'missing' }}; }}\n    {scroll}\n    const rect = el.getBoundingClientRect();\n    const style = window.getComputedStyle(el);\n    const visible = rect.width > 0 && rect.height > 0 && style.visibility !== 'hidden' && style.display !== 'none';\n    return {{\n        status: visible ? 'visible' : 'hidden',\n        x: Number.isFinite(rect.left) ? rect.left + rect.width / 2 : 0,\n        y: Number.isFinite(rect.top) ? rect.top + rect.height / 2 : 0,\n        text: ((el.innerText || el.textContent) || '').trim()\n    }};\n}})()"
        ))
    }

    /// Focus the element and select its current content so inserted text replaces it.
    pub(crate) fn focus_expression(&self) -> Result<String, AdapterError> {
        let lookup = self.lookup_expression()?;
        Ok(format!(
            "(() => {{\n    const el = {lookup};\n    if (!el) {{ return {{ status: 'not-found' }}; }}\n    if (typeof el.focus === 'function') {{ el.focus(); }}\n    if (typeof el.select === 'function') {{ el.select(); }}\n    return {{ status: 'focused' }};\n}})()"
        ))
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Id(id) => write!(f, "#{id}"),
            Locator::Css(selector) => write!(f, "css={selector}"),
            Locator::TestId(test_id) => write!(f, "[data-testid='{test_id}']"),
            Locator::XPath(path) => write!(f, "xpath={path}"),
        }
    }
}

fn literal(value: &str) -> Result<String, AdapterError> {
    serde_json::to_string(value).map_err(internal)
}

/// Condition an explicit wait polls for.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitCondition {
    /// Element exists in the DOM.
    #[default]
    Present,
    /// Element exists and has a rendered box.
    Visible,
}

/// Where an element was found when a wait resolved.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Anchor {
    pub x: f64,
    pub y: f64,
    pub visible: bool,
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ProbeResult {
    pub status: String,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub text: String,
}

impl ProbeResult {
    pub(crate) fn satisfies(&self, condition: WaitCondition) -> bool {
        match condition {
            WaitCondition::Present => self.status != "missing",
            WaitCondition::Visible => self.status == "visible",
        }
    }

    pub(crate) fn into_anchor(self) -> Anchor {
        Anchor {
            visible: self.status == "visible",
            x: self.x,
            y: self.y,
            text: self.text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_expressions_use_matching_dom_api() {
        let by_id = Locator::id("role-indicator").lookup_expression().unwrap();
        assert_eq!(by_id, "document.getElementById(\"role-indicator\")");

        let by_test_id = Locator::test_id("menu-item-scan_patients")
            .lookup_expression()
            .unwrap();
        assert!(by_test_id.contains("[data-testid='menu-item-scan_patients']"));

        let by_xpath = Locator::xpath("//tbody/tr[last()]/td[1]/div")
            .lookup_expression()
            .unwrap();
        assert!(by_xpath.contains("document.evaluate(\"//tbody/tr[last()]/td[1]/div\""));
        assert!(by_xpath.contains("FIRST_ORDERED_NODE_TYPE"));
    }

    #[test]
    fn literals_are_escaped() {
        let expr = Locator::css("input[name=\"email\"]")
            .lookup_expression()
            .unwrap();
        assert!(expr.contains(r#"querySelector("input[name=\"email\"]")"#));
    }

    #[test]
    fn probe_conditions() {
        let hidden = ProbeResult {
            status: "hidden".into(),
            x: 0.0,
            y: 0.0,
            text: "Doctor".into(),
        };
        assert!(hidden.satisfies(WaitCondition::Present));
        assert!(!hidden.satisfies(WaitCondition::Visible));

        let missing = ProbeResult {
            status: "missing".into(),
            x: 0.0,
            y: 0.0,
            text: String::new(),
        };
        assert!(!missing.satisfies(WaitCondition::Present));
    }

    #[test]
    fn locator_serializes_with_kind_tag() {
        let json = serde_json::to_value(Locator::test_id("menu-item-prescriptions")).unwrap();
        assert_eq!(json["by"], "test_id");
        assert_eq!(json["value"], "menu-item-prescriptions");
    }
}
