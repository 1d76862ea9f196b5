//! Upstream identity providers the bridge federates to

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Upstream OAuth provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Jira and Confluence
    Atlassian,
    Figma,
    /// Google Drive
    Google,
}

impl Provider {
    /// Every provider, in consent chaining order
    pub const ALL: [Provider; 3] = [Provider::Atlassian, Provider::Figma, Provider::Google];

    /// Wire identifier (`atlassian`, `figma`, `google`)
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Atlassian => "atlassian",
            Provider::Figma => "figma",
            Provider::Google => "google",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Provider::Atlassian => "Atlassian",
            Provider::Figma => "Figma",
            Provider::Google => "Google",
        }
    }

    /// Parse a comma separated provider list (`atlassian,figma`).
    ///
    /// Unknown names are rejected; duplicates are collapsed preserving order.
    pub fn parse_list(input: &str) -> Result<Vec<Provider>, UnknownProvider> {
        let mut providers = Vec::new();
        for part in input.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let provider: Provider = part.parse()?;
            if !providers.contains(&provider) {
                providers.push(provider);
            }
        }
        Ok(providers)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Provider name that is not one of the supported upstreams
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown provider: {0}")]
pub struct UnknownProvider(pub String);

impl FromStr for Provider {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "atlassian" | "jira" | "confluence" => Ok(Provider::Atlassian),
            "figma" => Ok(Provider::Figma),
            "google" | "google-drive" => Ok(Provider::Google),
            other => Err(UnknownProvider(other.to_string())),
        }
    }
}
