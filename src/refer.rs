//! Refer resolver — maps a navigation path to a coarse category tag
//!
//! Rules are checked in order; the first matching pattern wins. Resolution
//! is pure so it can run on every navigation.

use crate::error::{Result, TrackError};
use regex::Regex;

/// Category used when no rule matches
pub const DEFAULT_CATEGORY: &str = "other";

const PLATFORM_RULES: &[(&str, &str)] = &[
    (r"^/?$", "home"),
    (r"^/(post|posts)(/|$)", "post"),
    (r"^/(product|products|shop)(/|$)", "product"),
    (r"^/(profile|u|user)(/|$)", "profile"),
    (r"^/(purchase|purchases|orders|checkout)(/|$)", "purchase"),
    (r"^/search(/|$)", "search"),
    (r"^/(notifications|inbox)(/|$)", "notification"),
    (r"^/settings(/|$)", "settings"),
];

/// A single `(pattern, category)` rule
#[derive(Debug, Clone)]
pub struct ReferRule {
    pattern: Regex,
    category: String,
}

impl ReferRule {
    /// Compile a rule; fails on an invalid pattern
    pub fn new(pattern: &str, category: impl Into<String>) -> Result<Self> {
        let pattern = Regex::new(pattern).map_err(|e| {
            TrackError::Config(format!("Invalid refer pattern '{}': {}", pattern, e))
        })?;
        Ok(Self {
            pattern,
            category: category.into(),
        })
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn matches(&self, path: &str) -> bool {
        self.pattern.is_match(path)
    }
}

/// Ordered rule table
#[derive(Debug, Clone)]
pub struct ReferResolver {
    rules: Vec<ReferRule>,
    default_category: String,
}

impl ReferResolver {
    /// Build a resolver from ordered rules and a catch-all category
    pub fn new(rules: Vec<ReferRule>, default_category: impl Into<String>) -> Self {
        Self {
            rules,
            default_category: default_category.into(),
        }
    }

    /// Build from `(pattern, category)` pairs
    pub fn from_pairs<'a>(
        pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
        default_category: impl Into<String>,
    ) -> Result<Self> {
        let rules = pairs
            .into_iter()
            .map(|(pattern, category)| ReferRule::new(pattern, category))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(rules, default_category))
    }

    /// Category for a path; query string and fragment are ignored
    pub fn resolve(&self, path: &str) -> &str {
        let path = path
            .split(['?', '#'])
            .next()
            .unwrap_or_default();

        self.rules
            .iter()
            .find(|rule| rule.matches(path))
            .map(|rule| rule.category())
            .unwrap_or(self.default_category.as_str())
    }

    pub fn default_category(&self) -> &str {
        &self.default_category
    }

    pub fn rules(&self) -> &[ReferRule] {
        &self.rules
    }
}

impl Default for ReferResolver {
    fn default() -> Self {
        let rules = PLATFORM_RULES
            .iter()
            .filter_map(|(pattern, category)| ReferRule::new(pattern, *category).ok())
            .collect();
        Self::new(rules, DEFAULT_CATEGORY)
    }
}
