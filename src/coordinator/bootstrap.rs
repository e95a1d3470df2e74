//! Startup wiring: seeding, built-in registration, timers.

use std::sync::Arc;

use tracing::info;
use url::Url;

use crate::artifact::{ArtifactKey, AvailableVersion, UpdateKind, UpdateMethod};
use crate::config::PROP_UNSIGNED_AVAILABLE;
use crate::dummy::DummyHandler;
use crate::task::{Checker, Updater};
use crate::version::Version;

use super::UpdateCoordinator;

/// The host-provided checker and updater implementations wired in at
/// startup. Transports live entirely behind these.
pub struct UpdateHandlers {
    /// Checks the news feed; the feed also carries router release
    /// announcements, so this doubles as the router update checker.
    pub news_checker: Arc<dyn Checker>,
    /// Downloads the signed router update.
    pub router_updater: Arc<dyn Updater>,
    /// Checks for unsigned drop-in archives.
    pub unsigned_checker: Arc<dyn Checker>,
    /// Downloads unsigned drop-in archives.
    pub unsigned_updater: Arc<dyn Updater>,
    /// Where unsigned archives are fetched from, used to rehydrate a
    /// persisted unsigned-available marker.
    pub unsigned_sources: Vec<Url>,
    /// Checks installed plugins for newer versions.
    pub plugin_checker: Arc<dyn Checker>,
    /// Downloads and installs plugin updates.
    pub plugin_updater: Arc<dyn Updater>,
}

impl UpdateCoordinator {
    /// Seeds current versions, registers the built-in handlers and arms the
    /// recurring news check and the dead-task sweep.
    pub fn start(self: &Arc<Self>, handlers: UpdateHandlers) {
        info!("update coordinator starting");
        self.state.note_installed(
            &ArtifactKey::singleton(UpdateKind::RouterSigned),
            Some(Version::new(self.config.router_version.clone())),
        );
        if let Some(news) = self.config.news_version.clone() {
            self.state.note_installed(
                &ArtifactKey::singleton(UpdateKind::News),
                Some(Version::new(news)),
            );
        }
        for plugin in self.host.plugins.plugins() {
            self.state.note_installed(
                &ArtifactKey::new(UpdateKind::Plugin, plugin.name),
                Some(plugin.version),
            );
        }

        let dummy = DummyHandler::new(Arc::downgrade(self));
        self.register_checker(
            dummy.clone(),
            UpdateKind::Dummy,
            UpdateMethod::Dummy,
            0,
        );
        self.register_updater(dummy, UpdateKind::Dummy, UpdateMethod::Dummy, 0);
        self.state.put_available(
            &ArtifactKey::singleton(UpdateKind::Dummy),
            AvailableVersion::new(
                Version::new(""),
                Version::new(""),
                UpdateMethod::Dummy,
                Vec::new(),
            ),
        );

        // the news checker goes in before the router updater, so a stale
        // news file seen during startup cannot fire a router download
        self.register_checker(
            handlers.news_checker.clone(),
            UpdateKind::News,
            UpdateMethod::Http,
            0,
        );
        self.register_checker(
            handlers.news_checker,
            UpdateKind::RouterSigned,
            UpdateMethod::Http,
            0,
        );
        self.register_updater(
            handlers.router_updater,
            UpdateKind::RouterSigned,
            UpdateMethod::Http,
            0,
        );
        self.register_checker(
            handlers.unsigned_checker,
            UpdateKind::RouterUnsigned,
            UpdateMethod::Http,
            0,
        );
        self.register_updater(
            handlers.unsigned_updater,
            UpdateKind::RouterUnsigned,
            UpdateMethod::Http,
            0,
        );
        if let Some(version) = self.host.properties.get(PROP_UNSIGNED_AVAILABLE) {
            self.state.put_available(
                &ArtifactKey::singleton(UpdateKind::RouterUnsigned),
                AvailableVersion::new(
                    Version::new(version),
                    Version::new(""),
                    UpdateMethod::Http,
                    handlers.unsigned_sources,
                ),
            );
        }
        self.register_checker(
            handlers.plugin_checker,
            UpdateKind::Plugin,
            UpdateMethod::Http,
            0,
        );
        self.register_updater(
            handlers.plugin_updater,
            UpdateKind::Plugin,
            UpdateMethod::Http,
            0,
        );

        let weak = Arc::downgrade(self);
        self.host.scheduler.add_periodic_event(
            self.config.news_check_period(),
            Box::new(move || {
                if let Some(coordinator) = weak.upgrade() {
                    coordinator.check(UpdateKind::News, "");
                }
            }),
        );
        let weak = Arc::downgrade(self);
        self.host.scheduler.add_periodic_event(
            self.config.reaper_period(),
            Box::new(move || {
                if let Some(coordinator) = weak.upgrade() {
                    coordinator.reap_dead_tasks();
                }
            }),
        );
    }
}
