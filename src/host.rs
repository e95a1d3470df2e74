//! Collaborator traits required of the host service.
//!
//! The coordinator owns no wall clock, timer wheel, property file, signature
//! code or process control of its own; it reaches all of them through the
//! traits bundled in [`HostServices`]. Production hosts wire real
//! implementations, tests substitute stubs.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

use crate::sync::lock;
use crate::version::Version;

/// Millisecond wall time.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// System time clock.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }
}

/// Durable string properties. `save` with `None` deletes the key.
pub trait PropertyStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn save(&self, key: &str, value: Option<&str>);
}

/// In-memory property store for embedding hosts and tests.
#[derive(Debug, Default)]
pub struct MemoryPropertyStore {
    props: Mutex<HashMap<String, String>>,
}

impl MemoryPropertyStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl PropertyStore for MemoryPropertyStore {
    fn get(&self, key: &str) -> Option<String> {
        lock(&self.props).get(key).cloned()
    }

    fn save(&self, key: &str, value: Option<&str>) {
        let mut props = lock(&self.props);
        match value {
            Some(v) => {
                props.insert(key.to_string(), v.to_string());
            }
            None => {
                props.remove(key);
            }
        }
    }
}

/// One-shot and periodic deferred execution.
pub trait Scheduler: Send + Sync {
    /// Runs `event` once after `delay`.
    fn add_event(&self, delay: Duration, event: Box<dyn FnOnce() + Send>);
    /// Runs `event` every `period`, first firing one period from now.
    fn add_periodic_event(&self, period: Duration, event: Box<dyn Fn() + Send + Sync>);
}

/// Scheduler backed by tokio timers. Must be used inside a runtime.
#[derive(Debug, Default)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn add_event(&self, delay: Duration, event: Box<dyn FnOnce() + Send>) {
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            event();
        });
    }

    fn add_periodic_event(&self, period: Duration, event: Box<dyn Fn() + Send + Sync>) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // the first tick fires immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                event();
            }
        });
    }
}

/// An installed plugin as enumerated by the host.
#[derive(Debug, Clone)]
pub struct PluginInfo {
    pub name: String,
    pub version: Version,
    /// Where this plugin publishes its updates, if it does.
    pub update_url: Option<Url>,
}

/// Enumerates installed plugins.
pub trait PluginCatalog: Send + Sync {
    fn plugins(&self) -> Vec<PluginInfo>;
}

/// Catalog for hosts without plugin support.
#[derive(Debug, Default)]
pub struct NoPlugins;

impl PluginCatalog for NoPlugins {
    fn plugins(&self) -> Vec<PluginInfo> {
        Vec::new()
    }
}

/// A signed file failed verification. The message is surfaced verbatim in
/// the status channel.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct VerifyError(pub String);

/// Verifies a signed update file and migrates it into the install slot.
#[async_trait]
pub trait SignedVerifier: Send + Sync {
    /// Checks the signature and version of `from` against `current` and, on
    /// success, moves the payload to `to`.
    ///
    /// # Errors
    ///
    /// Returns a [`VerifyError`] describing the rejection.
    async fn migrate_verified(
        &self,
        current: &Version,
        from: &Path,
        to: &Path,
    ) -> Result<(), VerifyError>;
}

/// Structural validation of an unsigned archive.
#[async_trait]
pub trait ArchiveValidator: Send + Sync {
    /// Returns true when `file` is a readable, well-formed archive.
    async fn validate(&self, file: &Path) -> bool;
}

/// Process-level control handed to the coordinator.
pub trait ServiceControl: Send + Sync {
    /// Requests a graceful restart so a downloaded update gets applied.
    fn restart_gracefully(&self);
}

/// Translates user-visible message templates.
pub trait Translator: Send + Sync {
    fn translate(&self, text: &str) -> String;
}

/// Translator that returns templates unchanged.
#[derive(Debug, Default)]
pub struct IdentityTranslator;

impl Translator for IdentityTranslator {
    fn translate(&self, text: &str) -> String {
        text.to_string()
    }
}

/// Everything the coordinator needs from its host, bundled for injection.
#[derive(Clone)]
pub struct HostServices {
    pub clock: Arc<dyn Clock>,
    pub properties: Arc<dyn PropertyStore>,
    pub scheduler: Arc<dyn Scheduler>,
    pub plugins: Arc<dyn PluginCatalog>,
    pub verifier: Arc<dyn SignedVerifier>,
    pub validator: Arc<dyn ArchiveValidator>,
    pub service: Arc<dyn ServiceControl>,
    pub translator: Arc<dyn Translator>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_property_store_roundtrip() {
        let store = MemoryPropertyStore::new();
        assert_eq!(store.get("k"), None);

        store.save("k", Some("v"));
        assert_eq!(store.get("k").as_deref(), Some("v"));

        store.save("k", None);
        assert_eq!(store.get("k"), None);
    }

    #[test]
    fn test_system_clock_is_past_2020() {
        let clock = SystemClock;
        assert!(clock.now_ms() > 1_577_836_800_000);
    }

    #[test]
    fn test_identity_translator_passes_through() {
        let t = IdentityTranslator;
        assert_eq!(t.translate("Transfer failed from {0}"), "Transfer failed from {0}");
    }
}
