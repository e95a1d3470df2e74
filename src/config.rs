//! Coordinator configuration, install policy, and registration gating.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::artifact::{UpdateKind, UpdateMethod};

/// Property holding the install policy: `notify`, `install` or `download`.
pub const PROP_UPDATE_POLICY: &str = "router.updatePolicy";
/// Property holding the signed-update URL list (whitespace/comma separated).
pub const PROP_UPDATE_URL: &str = "router.updateURL";
/// Property holding the unsigned-update URL.
pub const PROP_UNSIGNED_URL: &str = "router.updateUnsignedURL";
/// Property persisting the unsigned version known to be available.
pub const PROP_UNSIGNED_AVAILABLE: &str = "router.updateUnsignedAvailable";
/// Property persisting the wall time (ms) of the last applied update.
pub const PROP_LAST_UPDATE_TIME: &str = "router.updateLastUpdateTime";

const DEFAULT_MAX_UPDATE_TIME_MS: u64 = 3 * 60 * 60 * 1000;
const DEFAULT_CHECK_TIME_MS: u64 = 60 * 1000;
const DEFAULT_STATUS_EXPIRY_MS: u64 = 20 * 60 * 1000;
const DEFAULT_REAPER_PERIOD_MS: u64 = 15 * 60 * 1000;
const DEFAULT_NEWS_PERIOD_MS: u64 = 24 * 60 * 60 * 1000;

/// Static configuration for one coordinator instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Directory holding the install slot.
    pub router_dir: PathBuf,
    /// File name of the install slot inside `router_dir`.
    pub update_file: String,
    /// Version of the currently running router binary.
    pub router_version: String,
    /// Timestamp version of the news currently on disk, if any.
    pub news_version: Option<String>,
    /// Ceiling passed to updaters that honor a time budget.
    pub max_update_time_ms: u64,
    /// Time budget handed to checkers launched by `check`.
    pub default_check_time_ms: u64,
    /// How long a finished status stays visible unless superseded.
    pub status_expiry_ms: u64,
    /// Period of the dead-task sweep.
    pub reaper_period_ms: u64,
    /// Period of the recurring news check.
    pub news_check_period_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            router_dir: PathBuf::from("."),
            update_file: "update.zip".to_string(),
            router_version: String::new(),
            news_version: None,
            max_update_time_ms: DEFAULT_MAX_UPDATE_TIME_MS,
            default_check_time_ms: DEFAULT_CHECK_TIME_MS,
            status_expiry_ms: DEFAULT_STATUS_EXPIRY_MS,
            reaper_period_ms: DEFAULT_REAPER_PERIOD_MS,
            news_check_period_ms: DEFAULT_NEWS_PERIOD_MS,
        }
    }
}

impl CoordinatorConfig {
    /// Full path of the install slot.
    #[must_use]
    pub fn update_file_path(&self) -> PathBuf {
        self.router_dir.join(&self.update_file)
    }

    #[must_use]
    pub fn max_update_time(&self) -> Duration {
        Duration::from_millis(self.max_update_time_ms)
    }

    #[must_use]
    pub fn default_check_time(&self) -> Duration {
        Duration::from_millis(self.default_check_time_ms)
    }

    #[must_use]
    pub fn status_expiry(&self) -> Duration {
        Duration::from_millis(self.status_expiry_ms)
    }

    #[must_use]
    pub fn reaper_period(&self) -> Duration {
        Duration::from_millis(self.reaper_period_ms)
    }

    #[must_use]
    pub fn news_check_period(&self) -> Duration {
        Duration::from_millis(self.news_check_period_ms)
    }
}

/// What to do once a newer router version is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallPolicy {
    /// Surface the version but never download on the user's behalf.
    Notify,
    /// Download and restart immediately once verified.
    Install,
    /// Download, then wait for the next restart.
    Download,
}

impl InstallPolicy {
    /// Parses the policy property value. Unknown values mean download-only.
    #[must_use]
    pub fn from_property(value: Option<&str>) -> Self {
        match value {
            Some("notify") => Self::Notify,
            Some("install") => Self::Install,
            _ => Self::Download,
        }
    }
}

/// Gate consulted when a checker or updater is registered.
///
/// Hosts use this to phase transports in or out, e.g. admitting a torrent
/// updater only on a sampled fraction of installs.
#[derive(Clone)]
pub struct RegistrationPolicy(Arc<dyn Fn(UpdateKind, UpdateMethod) -> bool + Send + Sync>);

impl RegistrationPolicy {
    /// A policy admitting every registration.
    #[must_use]
    pub fn allow_all() -> Self {
        Self(Arc::new(|_, _| true))
    }

    /// A policy from an arbitrary predicate.
    pub fn new(permit: impl Fn(UpdateKind, UpdateMethod) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(permit))
    }

    /// Whether a registration for this kind/method pair is admitted.
    #[must_use]
    pub fn permits(&self, kind: UpdateKind, method: UpdateMethod) -> bool {
        (self.0)(kind, method)
    }
}

impl Default for RegistrationPolicy {
    fn default() -> Self {
        Self::allow_all()
    }
}

impl fmt::Debug for RegistrationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RegistrationPolicy")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.max_update_time_ms, 3 * 60 * 60 * 1000);
        assert_eq!(config.default_check_time_ms, 60 * 1000);
        assert_eq!(config.status_expiry_ms, 20 * 60 * 1000);
        assert_eq!(config.reaper_period_ms, 15 * 60 * 1000);
        assert_eq!(config.update_file, "update.zip");
    }

    #[test]
    fn test_update_file_path_joins_router_dir() {
        let config = CoordinatorConfig {
            router_dir: PathBuf::from("/var/router"),
            ..CoordinatorConfig::default()
        };
        assert_eq!(
            config.update_file_path(),
            PathBuf::from("/var/router/update.zip")
        );
    }

    #[test]
    fn test_install_policy_parsing() {
        assert_eq!(
            InstallPolicy::from_property(Some("notify")),
            InstallPolicy::Notify
        );
        assert_eq!(
            InstallPolicy::from_property(Some("install")),
            InstallPolicy::Install
        );
        assert_eq!(InstallPolicy::from_property(None), InstallPolicy::Download);
        assert_eq!(
            InstallPolicy::from_property(Some("anything")),
            InstallPolicy::Download
        );
    }

    #[test]
    fn test_registration_policy_predicate() {
        let policy = RegistrationPolicy::new(|_, method| method != UpdateMethod::Torrent);
        assert!(policy.permits(UpdateKind::RouterSigned, UpdateMethod::Http));
        assert!(!policy.permits(UpdateKind::RouterSigned, UpdateMethod::Torrent));
    }
}
