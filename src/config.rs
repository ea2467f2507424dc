use crate::geo::Coordinates;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the per-user and per-project config directory
pub const CONFIG_DIR: &str = ".binboss";

/// A validation error in the configuration
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]: {}", self.field, self.message)
    }
}

/// Where profiles and disposal records live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// PostgREST / Supabase over HTTP
    #[default]
    Rest,
    /// Process-local tables, lost on exit
    Memory,
}

impl StoreBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rest => "rest",
            Self::Memory => "memory",
        }
    }
}

fn default_store_timeout() -> u64 {
    10_000
}
fn default_classifier_timeout() -> u64 {
    30_000
}
fn default_geocoder_timeout() -> u64 {
    5_000
}

/// Configuration for the profile/disposal store and identity provider
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl StoreConfig {
    /// Resolve the API key from config or environment
    pub fn resolve_api_key(&self) -> Result<String> {
        // Direct key takes priority
        if let Some(key) = &self.api_key {
            return Ok(key.clone());
        }

        let env_var = self
            .api_key_env
            .as_deref()
            .unwrap_or("BINBOSS_SUPABASE_KEY");
        std::env::var(env_var)
            .map_err(|_| anyhow!("No store API key: set store.api_key or ${}", env_var))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.unwrap_or_else(default_store_timeout))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct IdentityConfig {
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl IdentityConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.unwrap_or_else(default_store_timeout))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ClassifierConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl ClassifierConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.unwrap_or_else(default_classifier_timeout))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct GeocoderConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl GeocoderConfig {
    pub fn url(&self) -> &str {
        self.url
            .as_deref()
            .unwrap_or("https://nominatim.openstreetmap.org")
    }

    pub fn user_agent(&self) -> String {
        self.user_agent
            .clone()
            .unwrap_or_else(|| format!("binboss/{}", env!("CARGO_PKG_VERSION")))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.unwrap_or_else(default_geocoder_timeout))
    }
}

/// Fixed position used for region lookup
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct LocationConfig {
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

impl LocationConfig {
    pub fn coordinates(&self) -> Option<Coordinates> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Coordinates::new(lat, lon).ok(),
            _ => None,
        }
    }
}

fn default_proof_xp() -> i64 {
    100
}
fn default_max_xp() -> i64 {
    1_000
}

/// Experience awarded for accepted disposal proofs
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RewardsConfig {
    #[serde(default = "default_proof_xp")]
    pub proof_xp: i64,
    #[serde(default = "default_max_xp")]
    pub max_xp_per_event: i64,
    /// Per-sub-category overrides of `proof_xp`, keys lowercase
    #[serde(default)]
    pub sub_category: HashMap<String, i64>,
}

impl Default for RewardsConfig {
    fn default() -> Self {
        Self {
            proof_xp: default_proof_xp(),
            max_xp_per_event: default_max_xp(),
            sub_category: HashMap::new(),
        }
    }
}

impl RewardsConfig {
    /// Award for a proof of `sub_category`, capped at `max_xp_per_event`
    pub fn xp_for(&self, sub_category: &str) -> i64 {
        let base = self
            .sub_category
            .get(&sub_category.trim().to_lowercase())
            .copied()
            .unwrap_or(self.proof_xp);
        base.clamp(0, self.max_xp_per_event.max(0))
    }
}

fn default_true() -> bool {
    true
}

/// Configuration for the per-session activity journal
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JournalConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub geocoder: GeocoderConfig,
    #[serde(default)]
    pub location: LocationConfig,
    #[serde(default)]
    pub rewards: RewardsConfig,
    #[serde(default)]
    pub journal: JournalConfig,
}

impl Config {
    /// Load configuration from default paths
    /// Priority: local (.binboss/config.local.toml) > project (.binboss/config.toml)
    /// > user (~/.binboss/config.toml) > built-in defaults
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(CONFIG_DIR).join("config.toml");
            if user_config.exists() {
                config.merge(Self::load_from(&user_config)?);
            }
        }

        let project_config = Path::new(CONFIG_DIR).join("config.toml");
        if project_config.exists() {
            config.merge(Self::load_from(&project_config)?);
        }

        // should be gitignored: holds keys
        let local_config = Path::new(CONFIG_DIR).join("config.local.toml");
        if local_config.exists() {
            config.merge(Self::load_from(&local_config)?);
        }

        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("Cannot read {}: {}", path.display(), e))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Invalid config {}: {}", path.display(), e))?;
        Ok(config)
    }

    /// Merge another config into this one (other takes priority).
    /// Optional scalars override when set; backend overrides when non-default;
    /// rewards and journal sections are taken whole; sub-category rewards merge.
    pub fn merge(&mut self, other: Config) {
        if other.store.backend != StoreBackend::Rest {
            self.store.backend = other.store.backend;
        }
        if other.store.url.is_some() {
            self.store.url = other.store.url;
        }
        if other.store.api_key.is_some() {
            self.store.api_key = other.store.api_key;
        }
        if other.store.api_key_env.is_some() {
            self.store.api_key_env = other.store.api_key_env;
        }
        if other.store.timeout_ms.is_some() {
            self.store.timeout_ms = other.store.timeout_ms;
        }

        if other.identity.timeout_ms.is_some() {
            self.identity.timeout_ms = other.identity.timeout_ms;
        }

        if other.classifier.url.is_some() {
            self.classifier.url = other.classifier.url;
        }
        if other.classifier.timeout_ms.is_some() {
            self.classifier.timeout_ms = other.classifier.timeout_ms;
        }

        if other.geocoder.url.is_some() {
            self.geocoder.url = other.geocoder.url;
        }
        if other.geocoder.user_agent.is_some() {
            self.geocoder.user_agent = other.geocoder.user_agent;
        }
        if other.geocoder.timeout_ms.is_some() {
            self.geocoder.timeout_ms = other.geocoder.timeout_ms;
        }

        if other.location.latitude.is_some() || other.location.longitude.is_some() {
            self.location = other.location;
        }

        let mut sub_category = std::mem::take(&mut self.rewards.sub_category);
        sub_category.extend(other.rewards.sub_category);
        self.rewards = RewardsConfig {
            sub_category,
            ..other.rewards
        };

        self.journal = other.journal;
    }

    /// Directory for session journals
    pub fn journal_dir(&self, root: &Path) -> PathBuf {
        self.journal
            .dir
            .clone()
            .unwrap_or_else(|| root.join(CONFIG_DIR).join("sessions"))
    }

    /// Validate configuration and return any errors found
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        let blank = |v: &Option<String>| v.as_deref().map_or(true, |u| u.trim().is_empty());
        if self.store.backend == StoreBackend::Rest && blank(&self.store.url) {
            errors.push(ValidationError {
                field: "store.url".to_string(),
                message: "Required for the rest backend".to_string(),
            });
        }
        if blank(&self.classifier.url) {
            errors.push(ValidationError {
                field: "classifier.url".to_string(),
                message: "Required".to_string(),
            });
        }

        let timeouts = [
            ("store.timeout_ms", self.store.timeout_ms),
            ("identity.timeout_ms", self.identity.timeout_ms),
            ("classifier.timeout_ms", self.classifier.timeout_ms),
            ("geocoder.timeout_ms", self.geocoder.timeout_ms),
        ];
        for (field, value) in timeouts {
            if value == Some(0) {
                errors.push(ValidationError {
                    field: field.to_string(),
                    message: "Must be greater than 0".to_string(),
                });
            }
        }

        match (self.location.latitude, self.location.longitude) {
            (Some(lat), Some(lon)) => {
                if Coordinates::new(lat, lon).is_err() {
                    errors.push(ValidationError {
                        field: "location".to_string(),
                        message: format!("Coordinates out of range: {}, {}", lat, lon),
                    });
                }
            }
            (None, None) => {}
            _ => errors.push(ValidationError {
                field: "location".to_string(),
                message: "Set both latitude and longitude, or neither".to_string(),
            }),
        }

        if self.rewards.proof_xp < 0 {
            errors.push(ValidationError {
                field: "rewards.proof_xp".to_string(),
                message: format!("Must not be negative, got {}", self.rewards.proof_xp),
            });
        }
        if self.rewards.max_xp_per_event <= 0 {
            errors.push(ValidationError {
                field: "rewards.max_xp_per_event".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }
        for (name, xp) in &self.rewards.sub_category {
            if *xp < 0 {
                errors.push(ValidationError {
                    field: format!("rewards.sub_category.{}", name),
                    message: format!("Must not be negative, got {}", xp),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
