//! PWAKit configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::{PwaKitError, Result};

/// Top-level configuration, usually loaded from a JSON file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PwaConfig {
    /// Site identity
    pub site: SiteConfig,

    /// Worker caching policy
    pub worker: WorkerPolicy,

    /// Page-side registration behaviour
    pub registration: RegistrationSettings,

    /// Cache store backend
    pub store: StoreSettings,

    /// Outgoing HTTP client
    pub network: NetworkSettings,
}

impl PwaConfig {
    /// Load configuration from a JSON file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents).map_err(|e| {
            PwaKitError::config_with_source(format!("Failed to parse {}", path.display()), e)
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_string_pretty(self)
            .map_err(|e| PwaKitError::config_with_source("Failed to serialize config", e))?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, data)?;
        Ok(())
    }

    /// Check invariants that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.site.origin.scheme(), "http" | "https") {
            return Err(PwaKitError::config(format!(
                "Site origin must be http(s): {}",
                self.site.origin
            )));
        }
        if self.worker.cache_prefix.trim().is_empty() {
            return Err(PwaKitError::config("Cache prefix must not be empty"));
        }
        if self.worker.version.trim().is_empty() {
            return Err(PwaKitError::config("Cache version must not be empty"));
        }
        Ok(())
    }
}

/// Site identity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    /// Display name, used as the notification title
    pub name: String,

    /// Origin every relative asset path is resolved against
    pub origin: Url,

    /// Icon and badge shown on push notifications
    pub icon: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            name: "PWAKit".to_string(),
            origin: Url::parse("http://localhost:8080/").expect("static origin is valid"),
            icon: "/img/favicon.png".to_string(),
        }
    }
}

/// Which preset asset and bypass lists a worker uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyProfile {
    /// Minimal manifest and the analytics/advertising bypass list
    #[default]
    Standard,
    /// Every landing page precached, plus private paths and PDFs bypassed
    Extended,
}

const STANDARD_ASSETS: &[&str] = &[
    "/",
    "/index.html",
    "/style.css",
    "/navigation.js",
    "/img/favicon.png",
    "https://fonts.googleapis.com/css2?family=Inter:wght@300;400;500;600;700&display=swap",
];

const EXTENDED_ASSETS: &[&str] = &[
    "/",
    "/index.html",
    "/style.css",
    "/non-critical.css",
    "/navigation.js",
    "/cookie-loader.js",
    "/services.html",
    "/heating.html",
    "/air-conditioning.html",
    "/ventilation.html",
    "/refrigeration.html",
    "/electrical.html",
    "/support.html",
    "/about.html",
    "/img/hero-640w.webp",
    "/img/hero-640w.jpg",
    "/img/hero-320w.webp",
    "/img/hero-320w.jpg",
    "/img/favicon.png",
    "https://fonts.googleapis.com/css2?family=Inter:wght@300;400;500;600;700&display=swap",
];

const STANDARD_BYPASS: &[&str] = &[
    "chrome-extension://",
    "analytics",
    "gtag",
    "googletagmanager",
    "google-analytics",
    "pagead",
    "doubleclick",
    "facebook",
    "cloudflare",
];

const EXTENDED_EXTRA_BYPASS: &[&str] = &["/admin/", "/private/", ".pdf"];

impl PolicyProfile {
    /// Preset static asset manifest.
    pub fn static_assets(&self) -> Vec<String> {
        let assets = match self {
            PolicyProfile::Standard => STANDARD_ASSETS,
            PolicyProfile::Extended => EXTENDED_ASSETS,
        };
        assets.iter().map(|s| s.to_string()).collect()
    }

    /// Preset bypass substring list.
    pub fn bypass_tokens(&self) -> Vec<String> {
        let mut tokens: Vec<String> = STANDARD_BYPASS.iter().map(|s| s.to_string()).collect();
        if *self == PolicyProfile::Extended {
            tokens.extend(EXTENDED_EXTRA_BYPASS.iter().map(|s| s.to_string()));
        }
        tokens
    }
}

/// Caching policy of one worker version.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerPolicy {
    /// Namespace prefix, e.g. "app"
    pub cache_prefix: String,

    /// Version tag embedded in the namespace name
    pub version: String,

    /// Preset lists used when no explicit override is given
    pub profile: PolicyProfile,

    /// Explicit manifest, overrides the profile preset
    pub static_assets: Option<Vec<String>>,

    /// Explicit bypass list, overrides the profile preset
    pub bypass_tokens: Option<Vec<String>>,

    /// Document served when a navigation fails offline
    pub offline_document: Option<String>,

    /// Image served when an image request fails offline
    pub fallback_image: Option<String>,

    /// Hosts whose responses are always served cache-first
    pub font_hosts: Vec<String>,

    /// Background sync tag for deferred form submissions
    pub sync_tag: String,

    /// Per-request network timeout in milliseconds
    pub fetch_timeout_ms: u64,
}

impl Default for WorkerPolicy {
    fn default() -> Self {
        Self::for_profile(PolicyProfile::Standard)
    }
}

impl WorkerPolicy {
    /// Policy with every list taken from a profile preset.
    pub fn for_profile(profile: PolicyProfile) -> Self {
        Self {
            cache_prefix: "app".to_string(),
            version: "1.0.0".to_string(),
            profile,
            static_assets: None,
            bypass_tokens: None,
            offline_document: Some("/index.html".to_string()),
            fallback_image: None,
            font_hosts: vec![
                "fonts.googleapis.com".to_string(),
                "fonts.gstatic.com".to_string(),
            ],
            sync_tag: "contact-form".to_string(),
            fetch_timeout_ms: 10_000,
        }
    }

    /// Name of the current cache namespace.
    pub fn namespace(&self) -> String {
        format!("{}-v{}", self.cache_prefix, self.version)
    }

    /// Manifest in effect (override or profile preset).
    pub fn effective_assets(&self) -> Vec<String> {
        self.static_assets
            .clone()
            .unwrap_or_else(|| self.profile.static_assets())
    }

    /// Bypass list in effect (override or profile preset).
    pub fn effective_bypass(&self) -> Vec<String> {
        self.bypass_tokens
            .clone()
            .unwrap_or_else(|| self.profile.bypass_tokens())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

/// Page-side registration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationSettings {
    /// Worker script path
    pub script_url: String,

    /// Registration scope
    pub scope: String,

    /// Delay after the load event before registering
    pub settle_delay_ms: u64,

    /// Minimum interval between update checks
    pub update_interval_secs: u64,

    /// Case-insensitive patterns identifying audit/automation user agents
    pub audit_agent_patterns: Vec<String>,

    /// How long an accepted update may take to claim the page
    pub activation_timeout_ms: u64,
}

impl Default for RegistrationSettings {
    fn default() -> Self {
        Self {
            script_url: "/service-worker.js".to_string(),
            scope: "/".to_string(),
            settle_delay_ms: 3000,
            update_interval_secs: 3600,
            audit_agent_patterns: vec![
                "Lighthouse".to_string(),
                "Chrome-Lighthouse".to_string(),
                "PageSpeed".to_string(),
                "HeadlessChrome".to_string(),
            ],
            activation_timeout_ms: 10_000,
        }
    }
}

impl RegistrationSettings {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs)
    }

    pub fn activation_timeout(&self) -> Duration {
        Duration::from_millis(self.activation_timeout_ms)
    }
}

/// Cache store backend kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackendKind {
    Memory,
    #[default]
    Sqlite,
}

/// Cache store settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Backend kind
    pub backend: StoreBackendKind,

    /// Database path (SQLite only)
    pub path: Option<PathBuf>,

    /// Maximum total body bytes across all namespaces
    pub quota_bytes: Option<u64>,
}

impl StoreSettings {
    /// Database path, defaulting to the platform cache directory.
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("pwakit")
                .join("cache.db")
        })
    }
}

/// Outgoing HTTP client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    /// User agent string
    pub user_agent: String,

    /// Client-wide timeout in seconds
    pub timeout_secs: u64,

    /// Maximum redirects to follow
    pub max_redirects: usize,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            user_agent: format!("PWAKit/{}", env!("CARGO_PKG_VERSION")),
            timeout_secs: 30,
            max_redirects: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_namespace_name() {
        let mut policy = WorkerPolicy::default();
        policy.cache_prefix = "app".to_string();
        policy.version = "1.1.0".to_string();
        assert_eq!(policy.namespace(), "app-v1.1.0");
    }

    #[test]
    fn test_profiles() {
        let standard = WorkerPolicy::for_profile(PolicyProfile::Standard);
        let extended = WorkerPolicy::for_profile(PolicyProfile::Extended);

        assert_eq!(standard.effective_bypass().len(), 9);
        assert!(extended.effective_bypass().contains(&"/admin/".to_string()));
        assert!(extended.effective_assets().len() > standard.effective_assets().len());
    }

    #[test]
    fn test_overrides_win_over_profile() {
        let mut policy = WorkerPolicy::for_profile(PolicyProfile::Extended);
        policy.static_assets = Some(vec!["/".to_string()]);
        policy.bypass_tokens = Some(vec![]);

        assert_eq!(policy.effective_assets(), vec!["/".to_string()]);
        assert!(policy.effective_bypass().is_empty());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = PwaConfig::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config.worker.namespace(), "app-v1.0.0");
        assert_eq!(config.registration.settle_delay_ms, 3000);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("pwakit.json");

        let mut config = PwaConfig::default();
        config.worker.version = "2.0.0".to_string();
        config.worker.profile = PolicyProfile::Extended;
        config.save(&path).unwrap();

        let loaded = PwaConfig::load(&path).unwrap();
        assert_eq!(loaded.worker.namespace(), "app-v2.0.0");
        assert_eq!(loaded.worker.profile, PolicyProfile::Extended);
    }

    #[test]
    fn test_partial_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pwakit.json");
        std::fs::write(
            &path,
            r#"{
                "site": { "origin": "https://shop.example.com/" },
                "worker": { "version": "3" }
            }"#,
        )
        .unwrap();

        let config = PwaConfig::load(&path).unwrap();
        assert_eq!(config.site.origin.host_str(), Some("shop.example.com"));
        assert_eq!(config.worker.namespace(), "app-v3");
        assert_eq!(config.worker.sync_tag, "contact-form");
    }

    #[test]
    fn test_malformed_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pwakit.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = PwaConfig::load(&path).unwrap_err();
        assert_eq!(err.category(), "config");
    }

    #[test]
    fn test_rejects_non_http_origin() {
        let mut config = PwaConfig::default();
        config.site.origin = Url::parse("ftp://example.com/").unwrap();
        assert!(config.validate().is_err());
    }
}
