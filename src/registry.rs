//! Priority-ordered registries of checkers and updaters.
//!
//! A registrant is identified by (capability, kind, method); priority is a
//! scheduling hint only. Iteration for scheduling returns registrants sorted
//! by descending priority, with registration order as a stable tie-break so
//! distinct registrations never collide.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::artifact::{UpdateKind, UpdateMethod};
use crate::sync::lock;
use crate::task::{Checker, Updater};

/// One registration of a capability for a (kind, method) pair.
pub struct Registered<C: ?Sized> {
    capability: Arc<C>,
    pub kind: UpdateKind,
    pub method: UpdateMethod,
    pub priority: i32,
    serial: u64,
}

/// A registered checker.
pub type RegisteredChecker = Registered<dyn Checker>;
/// A registered updater.
pub type RegisteredUpdater = Registered<dyn Updater>;

impl<C: ?Sized> Registered<C> {
    /// The registered capability.
    #[must_use]
    pub fn capability(&self) -> &Arc<C> {
        &self.capability
    }

    /// Identity comparison on (capability, kind, method); priority is
    /// excluded so re-registration at another priority still collides.
    fn same_identity(&self, capability: &Arc<C>, kind: UpdateKind, method: UpdateMethod) -> bool {
        self.kind == kind
            && self.method == method
            && std::ptr::addr_eq(Arc::as_ptr(&self.capability), Arc::as_ptr(capability))
    }
}

impl<C: ?Sized> Clone for Registered<C> {
    fn clone(&self) -> Self {
        Self {
            capability: Arc::clone(&self.capability),
            kind: self.kind,
            method: self.method,
            priority: self.priority,
            serial: self.serial,
        }
    }
}

impl<C: ?Sized> fmt::Display for Registered<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} @pri {} #{}",
            self.kind, self.method, self.priority, self.serial
        )
    }
}

impl<C: ?Sized> fmt::Debug for Registered<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registered")
            .field("kind", &self.kind)
            .field("method", &self.method)
            .field("priority", &self.priority)
            .field("serial", &self.serial)
            .finish_non_exhaustive()
    }
}

/// A concurrent set of registrations for one capability type.
pub struct Registry<C: ?Sized> {
    entries: Mutex<Vec<Registered<C>>>,
    next_serial: AtomicU64,
    label: &'static str,
}

impl<C: ?Sized> Registry<C> {
    /// Creates an empty registry. `label` names the capability in logs.
    #[must_use]
    pub fn new(label: &'static str) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            next_serial: AtomicU64::new(0),
            label,
        }
    }

    /// Registers a capability for a (kind, method) pair.
    ///
    /// Duplicate registrations (same capability, kind and method) are
    /// idempotent: the existing entry is kept and false is returned.
    pub fn register(
        &self,
        capability: Arc<C>,
        kind: UpdateKind,
        method: UpdateMethod,
        priority: i32,
    ) -> bool {
        let mut entries = lock(&self.entries);
        if entries
            .iter()
            .any(|r| r.same_identity(&capability, kind, method))
        {
            warn!(label = self.label, %kind, %method, "duplicate registration");
            return false;
        }
        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        let entry = Registered {
            capability,
            kind,
            method,
            priority,
            serial,
        };
        info!(label = self.label, entry = %entry, "registering");
        entries.push(entry);
        true
    }

    /// Removes a registration. Returns true if an entry was removed.
    pub fn unregister(&self, capability: &Arc<C>, kind: UpdateKind, method: UpdateMethod) -> bool {
        let mut entries = lock(&self.entries);
        let before = entries.len();
        entries.retain(|r| !r.same_identity(capability, kind, method));
        let removed = entries.len() < before;
        if removed {
            info!(label = self.label, %kind, %method, "unregistered");
        } else {
            debug!(label = self.label, %kind, %method, "unregister missed");
        }
        removed
    }

    /// True while `entry` is still registered. Retry plans re-check this so
    /// an updater unregistered mid-download is skipped rather than invoked.
    #[must_use]
    pub fn contains(&self, entry: &Registered<C>) -> bool {
        lock(&self.entries)
            .iter()
            .any(|r| r.same_identity(&entry.capability, entry.kind, entry.method))
    }

    /// All registrations for a kind, sorted by descending priority with
    /// registration order as the tie-break.
    #[must_use]
    pub fn sorted_for_kind(&self, kind: UpdateKind) -> Vec<Registered<C>> {
        let mut matching: Vec<Registered<C>> = lock(&self.entries)
            .iter()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.serial.cmp(&b.serial)));
        matching
    }

    /// A snapshot of every registration, in registration order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Registered<C>> {
        lock(&self.entries).clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }

    /// Drops every registration.
    pub fn clear(&self) {
        lock(&self.entries).clear();
    }
}

impl<C: ?Sized> fmt::Debug for Registry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("label", &self.label)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use url::Url;

    use super::*;
    use crate::task::UpdateTask;
    use crate::version::Version;

    struct NeverUpdater;

    impl Updater for NeverUpdater {
        fn update(
            &self,
            _kind: UpdateKind,
            _method: UpdateMethod,
            _sources: &[Url],
            _id: &str,
            _new_version: &Version,
            _max_time: Duration,
        ) -> Option<Arc<dyn UpdateTask>> {
            None
        }
    }

    fn updater() -> Arc<dyn Updater> {
        Arc::new(NeverUpdater)
    }

    #[test]
    fn test_register_then_unregister_restores_prior_state() {
        let registry: Registry<dyn Updater> = Registry::new("updater");
        let u = updater();

        assert!(registry.register(
            Arc::clone(&u),
            UpdateKind::RouterSigned,
            UpdateMethod::Http,
            0
        ));
        assert_eq!(registry.len(), 1);
        assert!(registry.unregister(&u, UpdateKind::RouterSigned, UpdateMethod::Http));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_duplicate_registration_is_idempotent() {
        let registry: Registry<dyn Updater> = Registry::new("updater");
        let u = updater();

        assert!(registry.register(Arc::clone(&u), UpdateKind::Plugin, UpdateMethod::Http, 0));
        // same identity at a different priority still collides
        assert!(!registry.register(Arc::clone(&u), UpdateKind::Plugin, UpdateMethod::Http, 5));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.snapshot()[0].priority, 0);
    }

    #[test]
    fn test_same_capability_different_method_is_distinct() {
        let registry: Registry<dyn Updater> = Registry::new("updater");
        let u = updater();

        assert!(registry.register(Arc::clone(&u), UpdateKind::Plugin, UpdateMethod::Http, 0));
        assert!(registry.register(Arc::clone(&u), UpdateKind::Plugin, UpdateMethod::Torrent, 0));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_sorted_for_kind_descending_priority() {
        let registry: Registry<dyn Updater> = Registry::new("updater");

        registry.register(updater(), UpdateKind::RouterSigned, UpdateMethod::Http, 0);
        registry.register(updater(), UpdateKind::RouterSigned, UpdateMethod::Torrent, 10);
        registry.register(updater(), UpdateKind::Plugin, UpdateMethod::Http, 99);

        let sorted = registry.sorted_for_kind(UpdateKind::RouterSigned);
        assert_eq!(sorted.len(), 2);
        assert_eq!(sorted[0].priority, 10);
        assert_eq!(sorted[1].priority, 0);
    }

    #[test]
    fn test_equal_priority_keeps_registration_order() {
        let registry: Registry<dyn Updater> = Registry::new("updater");

        registry.register(updater(), UpdateKind::Plugin, UpdateMethod::Http, 0);
        registry.register(updater(), UpdateKind::Plugin, UpdateMethod::Torrent, 0);

        let sorted = registry.sorted_for_kind(UpdateKind::Plugin);
        assert_eq!(sorted[0].method, UpdateMethod::Http);
        assert_eq!(sorted[1].method, UpdateMethod::Torrent);
    }

    #[test]
    fn test_contains_tracks_unregistration() {
        let registry: Registry<dyn Updater> = Registry::new("updater");
        let u = updater();
        registry.register(Arc::clone(&u), UpdateKind::Plugin, UpdateMethod::Http, 0);

        let entry = registry.sorted_for_kind(UpdateKind::Plugin).remove(0);
        assert!(registry.contains(&entry));
        registry.unregister(&u, UpdateKind::Plugin, UpdateMethod::Http);
        assert!(!registry.contains(&entry));
    }
}
