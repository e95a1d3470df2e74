//! The three-tier version store: installed, downloaded, available.
//!
//! Every accepted transition upgrades state monotonically: recording a
//! version at one tier evicts any version it dominates from the tiers below
//! it, and a reported version that does not strictly exceed everything
//! already known for its identity is rejected. The three-map invariants are
//! maintained under a per-identity critical section; individual reads stay
//! lock-free.

use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tracing::{info, warn};
use url::Url;

use crate::artifact::{ArtifactKey, AvailableVersion, SourceMap, UpdateKind, UpdateMethod};
use crate::version::Version;

/// Outcome of recording a reported version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvailableOutcome {
    /// The version was newer than everything known and is now available.
    Accepted,
    /// Same version as already available; its source map gained a method.
    SourceAdded,
    /// An equal or newer version is already installed.
    AlreadyInstalled,
    /// An equal or newer version is already downloaded.
    AlreadyDownloaded,
    /// The version is already available (or an available one is newer), and
    /// the reported method brought nothing new.
    AlreadyAvailable,
}

impl AvailableOutcome {
    /// True when a new version was published.
    #[must_use]
    pub fn is_accepted(self) -> bool {
        self == Self::Accepted
    }
}

/// Concurrent store of per-artifact version state.
#[derive(Debug, Default)]
pub struct StateStore {
    installed: DashMap<ArtifactKey, Version>,
    downloaded: DashMap<ArtifactKey, Version>,
    available: DashMap<ArtifactKey, AvailableVersion>,
    guards: DashMap<ArtifactKey, Arc<Mutex<()>>>,
}

impl StateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The critical section serializing multi-map transitions for one
    /// identity. Reads do not take it.
    fn guard(&self, key: &ArtifactKey) -> Arc<Mutex<()>> {
        self.guards.entry(key.clone()).or_default().clone()
    }

    /// Records an installed version: sets `installed` and evicts dominated
    /// entries from `downloaded` and `available`. `None` removes the entry.
    pub fn note_installed(&self, key: &ArtifactKey, version: Option<Version>) {
        let guard = self.guard(key);
        let _held = crate::sync::lock(&*guard);
        let Some(version) = version else {
            self.installed.remove(key);
            info!(%key, "installed entry removed");
            return;
        };
        info!(%key, %version, "installed");
        self.installed.insert(key.clone(), version.clone());
        let stale = self.downloaded.get(key).is_some_and(|d| *d <= version);
        if stale {
            self.downloaded.remove(key);
        }
        let stale = self.available.get(key).is_some_and(|a| a.version <= version);
        if stale {
            self.available.remove(key);
        }
    }

    /// Records a downloaded version: sets `downloaded`, applies the router
    /// signed/unsigned supersession, and evicts a dominated `available`.
    pub fn note_downloaded(&self, key: &ArtifactKey, version: Version) {
        let guard = self.guard(key);
        let _held = crate::sync::lock(&*guard);
        info!(%key, %version, "downloaded");
        self.downloaded.insert(key.clone(), version.clone());
        // a signed download trumps a pending unsigned one, and vice versa
        match key.kind {
            UpdateKind::RouterSigned => {
                self.downloaded
                    .remove(&ArtifactKey::singleton(UpdateKind::RouterUnsigned));
            }
            UpdateKind::RouterUnsigned => {
                self.downloaded
                    .remove(&ArtifactKey::singleton(UpdateKind::RouterSigned));
            }
            _ => {}
        }
        let stale = self.available.get(key).is_some_and(|a| a.version <= version);
        if stale {
            self.available.remove(key);
        }
    }

    /// Records a version reported available by a checker.
    ///
    /// The version must strictly exceed everything known for the identity.
    /// An exactly-equal report may still extend the existing entry's source
    /// map with a method not yet present.
    pub fn record_available(
        &self,
        key: &ArtifactKey,
        version: Version,
        min_version: Version,
        method: UpdateMethod,
        uris: Vec<Url>,
    ) -> AvailableOutcome {
        let guard = self.guard(key);
        let _held = crate::sync::lock(&*guard);
        if self.installed.get(key).is_some_and(|i| *i >= version) {
            warn!(%key, %version, "already installed");
            return AvailableOutcome::AlreadyInstalled;
        }
        if self.downloaded.get(key).is_some_and(|d| *d >= version) {
            warn!(%key, %version, "already downloaded");
            return AvailableOutcome::AlreadyDownloaded;
        }
        {
            if let Some(mut entry) = self.available.get_mut(key) {
                if entry.version > version {
                    warn!(%key, %version, known = %entry.version, "newer version already available");
                    return AvailableOutcome::AlreadyAvailable;
                }
                if entry.version == version {
                    return if entry.add_source_method(method, uris) {
                        info!(%key, %version, %method, "available version gained a source method");
                        AvailableOutcome::SourceAdded
                    } else {
                        warn!(%key, %version, "already available");
                        AvailableOutcome::AlreadyAvailable
                    };
                }
            }
        }
        info!(%key, %version, %method, "now available");
        self.available.insert(
            key.clone(),
            AvailableVersion::new(version, min_version, method, uris),
        );
        AvailableOutcome::Accepted
    }

    /// Publishes an available version unconditionally (bootstrap paths).
    pub fn put_available(&self, key: &ArtifactKey, available: AvailableVersion) {
        self.available.insert(key.clone(), available);
    }

    /// Publishes an available version only if none is recorded yet.
    pub fn ensure_available(&self, key: &ArtifactKey, available: AvailableVersion) {
        self.available.entry(key.clone()).or_insert(available);
    }

    #[must_use]
    pub fn installed_version(&self, key: &ArtifactKey) -> Option<Version> {
        self.installed.get(key).map(|v| v.clone())
    }

    #[must_use]
    pub fn downloaded_version(&self, key: &ArtifactKey) -> Option<Version> {
        self.downloaded.get(key).map(|v| v.clone())
    }

    #[must_use]
    pub fn available_version(&self, key: &ArtifactKey) -> Option<Version> {
        self.available.get(key).map(|a| a.version.clone())
    }

    /// Snapshot of the source map recorded for the identity.
    #[must_use]
    pub fn sources(&self, key: &ArtifactKey) -> Option<SourceMap> {
        self.available.get(key).map(|a| a.sources.clone())
    }

    /// The URIs recorded for one method of the identity.
    #[must_use]
    pub fn sources_for(&self, key: &ArtifactKey, method: UpdateMethod) -> Option<Vec<Url>> {
        self.available
            .get(key)
            .and_then(|a| a.sources_for(method).map(<[Url]>::to_vec))
    }

    /// The higher of the downloaded and installed versions, the baseline
    /// handed to checkers.
    #[must_use]
    pub fn downloaded_or_installed(&self, key: &ArtifactKey) -> Option<Version> {
        let installed = self.installed_version(key);
        let downloaded = self.downloaded_version(key);
        match (installed, downloaded) {
            (Some(i), Some(d)) => Some(if i > d { i } else { d }),
            (Some(i), None) => Some(i),
            (None, d) => d,
        }
    }

    /// Sorted `key = version` snapshots, for the debug dump.
    #[must_use]
    pub fn snapshot_installed(&self) -> Vec<(ArtifactKey, Version)> {
        let mut entries: Vec<_> = self
            .installed
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// See [`Self::snapshot_installed`].
    #[must_use]
    pub fn snapshot_downloaded(&self) -> Vec<(ArtifactKey, Version)> {
        let mut entries: Vec<_> = self
            .downloaded
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// See [`Self::snapshot_installed`].
    #[must_use]
    pub fn snapshot_available(&self) -> Vec<(ArtifactKey, AvailableVersion)> {
        let mut entries: Vec<_> = self
            .available
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Drops all state.
    pub fn clear(&self) {
        self.installed.clear();
        self.downloaded.clear();
        self.available.clear();
        self.guards.clear();
    }
}
