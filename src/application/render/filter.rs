//! Sub-resource filtering applied while a page loads.

/// Resource types that never contribute to the final markup.
///
/// Both the lowercase engine spelling and legacy aliases are listed, lookups
/// are case-insensitive.
const BLOCKED_RESOURCE_TYPES: &[&str] = &[
    "stylesheet",
    "css",
    "image",
    "media",
    "font",
    "texttrack",
    "object",
    "beacon",
    "ping",
    "csp_report",
    "cspviolationreport",
    "imageset",
];

/// Third-party hosts and trackers, matched as substrings of the bare URL.
const SKIPPED_RESOURCES: &[&str] = &[
    "quantserve",
    "adzerk",
    "doubleclick",
    "adition",
    "exelator",
    "sharethrough",
    "cdn.api.twitter",
    "google-analytics",
    "googletagmanager",
    "google",
    "fontawesome",
    "facebook",
    "analytics",
    "optimizely",
    "clicktale",
    "mixpanel",
    "zedo",
    "clicksor",
    "tiqcdn",
    "adtelligent",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceDecision {
    Allow,
    Block,
}

impl ResourceDecision {
    pub fn is_blocked(self) -> bool {
        matches!(self, ResourceDecision::Block)
    }
}

/// Decides which sub-resource requests a page is allowed to make.
#[derive(Debug, Clone)]
pub struct ResourceFilter {
    blocked_types: Vec<String>,
    skipped_resources: Vec<String>,
}

impl Default for ResourceFilter {
    fn default() -> Self {
        Self {
            blocked_types: BLOCKED_RESOURCE_TYPES
                .iter()
                .map(|value| value.to_string())
                .collect(),
            skipped_resources: SKIPPED_RESOURCES
                .iter()
                .map(|value| value.to_string())
                .collect(),
        }
    }
}

impl ResourceFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unknown types are allowed unless the URL itself is denylisted.
    pub fn decide(&self, resource_type: &str, resource_url: &str) -> ResourceDecision {
        if self.blocks_type(resource_type) || self.blocks_url(resource_url) {
            ResourceDecision::Block
        } else {
            ResourceDecision::Allow
        }
    }

    fn blocks_type(&self, resource_type: &str) -> bool {
        let resource_type = resource_type.trim();
        self.blocked_types
            .iter()
            .any(|blocked| blocked.eq_ignore_ascii_case(resource_type))
    }

    fn blocks_url(&self, resource_url: &str) -> bool {
        let bare = strip_query_and_fragment(resource_url);
        self.skipped_resources
            .iter()
            .any(|fragment| bare.contains(fragment.as_str()))
    }
}

fn strip_query_and_fragment(url: &str) -> &str {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    &url[..end]
}
