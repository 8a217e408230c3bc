use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowserClaim {
    NotBrowser,
    /// First instance of this browser in the run; it gets persisted.
    First(String),
    Duplicate(String),
}

/// Per-run "already captured" flags, one per configured browser substring.
#[derive(Debug, Clone, Default)]
pub struct BrowserDedup {
    captured: Vec<(String, bool)>,
}

impl BrowserDedup {
    pub fn new(browsers: &[String]) -> Self {
        Self {
            captured: browsers.iter().map(|b| (b.clone(), false)).collect(),
        }
    }

    /// Matches `command` against the configured browsers in configuration
    /// order and flips the flag of the first match.
    pub fn claim(&mut self, command: &str) -> BrowserClaim {
        for (browser, captured) in &mut self.captured {
            if !command.contains(browser.as_str()) {
                continue;
            }
            if *captured {
                return BrowserClaim::Duplicate(browser.clone());
            }
            *captured = true;
            return BrowserClaim::First(browser.clone());
        }
        BrowserClaim::NotBrowser
    }

    pub fn captured(&self) -> BTreeMap<&str, bool> {
        self.captured
            .iter()
            .map(|(browser, captured)| (browser.as_str(), *captured))
            .collect()
    }
}
