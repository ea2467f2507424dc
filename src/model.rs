//! Records shared with the external `user` and `disposal` tables.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Level a freshly created profile starts at
pub const STARTING_LEVEL: i64 = 1;

/// Placeholder region used whenever the real one cannot be resolved
pub const UNKNOWN_REGION: &str = "Unknown";

/// Identity handed over by the identity provider after sign-in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
    pub email: String,
    pub name: String,
    pub avatar: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    /// Avatar URL
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub exp: i64,
    #[serde(default = "default_level")]
    pub level: i64,
    #[serde(default)]
    pub total_disposal: i64,
}

fn default_level() -> i64 {
    STARTING_LEVEL
}

impl UserProfile {
    /// Seed profile for a first sign-in
    pub fn seeded(identity: &Identity, region: &str) -> Self {
        Self {
            id: identity.id.clone(),
            name: identity.name.clone(),
            email: identity.email.clone(),
            image: identity.avatar.clone(),
            region: region.to_string(),
            exp: 0,
            level: STARTING_LEVEL,
            total_disposal: 0,
        }
    }

    pub fn progress(&self) -> Progress {
        Progress {
            exp: self.exp,
            level: self.level,
            total_disposal: self.total_disposal,
        }
    }

    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.exp = progress.exp;
        self.level = progress.level;
        self.total_disposal = progress.total_disposal;
        self
    }
}

/// The partial field set written back after a disposal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub exp: i64,
    pub level: i64,
    pub total_disposal: i64,
}

/// Coarse waste class returned by the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WasteCategory {
    Recyclable,
    NonRecyclable,
}

impl WasteCategory {
    /// Parse the classifier's label, tolerating case and separator drift
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace(['_', ' '], "-").as_str() {
            "recyclable" => Some(Self::Recyclable),
            "non-recyclable" | "nonrecyclable" => Some(Self::NonRecyclable),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Recyclable => "recyclable",
            Self::NonRecyclable => "non-recyclable",
        }
    }

    /// Where the item should go
    pub fn guidance(&self) -> &'static str {
        match self {
            Self::Recyclable => "Place this item in the recycling bin",
            Self::NonRecyclable => "This should go in general waste",
        }
    }
}

impl std::fmt::Display for WasteCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sub-category the classifier uses when the photo shows no trash at all
pub const IRRELEVANT_SUB_CATEGORY: &str = "none";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisposalRecord {
    pub id: Uuid,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub category: WasteCategory,
    pub sub_category: String,
}

impl DisposalRecord {
    pub fn new(user_id: &str, category: WasteCategory, sub_category: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            created_at: Utc::now(),
            category,
            sub_category: sub_category.trim().to_lowercase(),
        }
    }
}
