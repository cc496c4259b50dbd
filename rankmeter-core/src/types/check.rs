use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Kind of metered external lookup. Each kind has exactly one prober adapter.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    RankCheck,
    AiVisibility,
    BacklinkAudit,
}

pub const ALL_CHECK_KINDS: [CheckKind; 3] = [
    CheckKind::RankCheck,
    CheckKind::AiVisibility,
    CheckKind::BacklinkAudit,
];

impl CheckKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckKind::RankCheck => "rank_check",
            CheckKind::AiVisibility => "ai_visibility",
            CheckKind::BacklinkAudit => "backlink_audit",
        }
    }

    /// Surfaces a kind accepts. The first entry is used when none are requested.
    pub fn allowed_surfaces(&self) -> &'static [Surface] {
        match self {
            CheckKind::RankCheck => &[Surface::Desktop, Surface::Mobile],
            CheckKind::AiVisibility => &[
                Surface::ChatGpt,
                Surface::Perplexity,
                Surface::Gemini,
                Surface::GoogleAiOverview,
            ],
            CheckKind::BacklinkAudit => &[Surface::LinkIndex],
        }
    }
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "rank_check" => Ok(CheckKind::RankCheck),
            "ai_visibility" => Ok(CheckKind::AiVisibility),
            "backlink_audit" => Ok(CheckKind::BacklinkAudit),
            other => Err(format!("unknown check kind '{other}'")),
        }
    }
}

/// One separately billed upstream view of a subject.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Surface {
    Desktop,
    Mobile,
    #[serde(rename = "chatgpt")]
    ChatGpt,
    Perplexity,
    Gemini,
    GoogleAiOverview,
    LinkIndex,
}

impl Surface {
    pub fn as_str(&self) -> &'static str {
        match self {
            Surface::Desktop => "desktop",
            Surface::Mobile => "mobile",
            Surface::ChatGpt => "chatgpt",
            Surface::Perplexity => "perplexity",
            Surface::Gemini => "gemini",
            Surface::GoogleAiOverview => "google_ai_overview",
            Surface::LinkIndex => "link_index",
        }
    }
}

impl fmt::Display for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-run options forwarded to every probe call.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOptions {
    #[serde(default)]
    pub surfaces: Vec<Surface>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Domain whose presence is being measured (rank and AI visibility checks).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_domain: Option<String>,
}

impl CheckOptions {
    pub fn with_surfaces(surfaces: impl IntoIterator<Item = Surface>) -> Self {
        Self {
            surfaces: surfaces.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Surfaces that will actually be probed for `kind`, applying the kind's default.
    pub fn effective_surfaces(&self, kind: CheckKind) -> Vec<Surface> {
        if self.surfaces.is_empty() {
            vec![kind.allowed_surfaces()[0]]
        } else {
            self.surfaces.clone()
        }
    }
}
