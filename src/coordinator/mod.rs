//! The coordinator: registry front-end, task tables, public API.
//!
//! One [`UpdateCoordinator`] is constructed per host and passed by
//! reference; tasks call back into it through the notification methods in
//! [`sink`](self). All API calls return promptly except
//! [`check_available`](UpdateCoordinator::check_available), which waits on
//! the launched task's completion signal up to a caller-supplied bound.

mod bootstrap;
mod retry;
mod sink;

pub use bootstrap::UpdateHandlers;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{info, warn};
use url::Url;

use crate::artifact::{ArtifactKey, AvailableVersion, UpdateKind, UpdateMethod};
use crate::config::{
    CoordinatorConfig, PROP_UNSIGNED_URL, PROP_UPDATE_URL, RegistrationPolicy,
};
use crate::host::HostServices;
use crate::registry::{Registered, Registry};
use crate::state::StateStore;
use crate::status::{StatusChannel, StatusEvent};
use crate::sync::lock;
use crate::task::{Checker, UpdateTask, Updater, same_task};
use crate::version::Version;

/// An active download and the updaters still left to try if it fails.
pub(crate) struct Download {
    pub(crate) task: Arc<dyn UpdateTask>,
    pub(crate) plan: Vec<Registered<dyn Updater>>,
}

/// The central resource coordinating updates.
///
/// Starts and stops all checks and downloads, prevents concurrent work on
/// the same artifact, drives failover across registered updaters, and owns
/// the user-visible status string.
pub struct UpdateCoordinator {
    pub(crate) config: CoordinatorConfig,
    pub(crate) host: HostServices,
    policy: RegistrationPolicy,
    pub(crate) checkers: Registry<dyn Checker>,
    pub(crate) updaters: Registry<dyn Updater>,
    pub(crate) state: StateStore,
    pub(crate) active_checkers: Mutex<Vec<Arc<dyn UpdateTask>>>,
    pub(crate) downloaders: Mutex<Vec<Download>>,
    pub(crate) status: Arc<StatusChannel>,
}

impl UpdateCoordinator {
    /// Creates a coordinator. Call [`start`](Self::start) to seed state,
    /// register the built-in handlers and arm the timers.
    #[must_use]
    pub fn new(
        config: CoordinatorConfig,
        host: HostServices,
        policy: RegistrationPolicy,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            host,
            policy,
            checkers: Registry::new("checker"),
            updaters: Registry::new("updater"),
            state: StateStore::new(),
            active_checkers: Mutex::new(Vec::new()),
            downloaders: Mutex::new(Vec::new()),
            status: Arc::new(StatusChannel::new()),
        })
    }

    /// Stops all work and drops every registration and all version state.
    pub fn shutdown(&self) {
        self.stop_checks();
        self.stop_updates();
        self.checkers.clear();
        self.updaters.clear();
        self.state.clear();
    }

    // ---- registration ----

    /// Registers a checker for a (kind, method) pair. Call once per pair.
    pub fn register_checker(
        &self,
        checker: Arc<dyn Checker>,
        kind: UpdateKind,
        method: UpdateMethod,
        priority: i32,
    ) {
        self.checkers.register(checker, kind, method, priority);
    }

    /// Removes a checker registration.
    pub fn unregister_checker(
        &self,
        checker: &Arc<dyn Checker>,
        kind: UpdateKind,
        method: UpdateMethod,
    ) {
        self.checkers.unregister(checker, kind, method);
    }

    /// Registers an updater for a (kind, method) pair, subject to the
    /// registration policy. Call once per pair.
    pub fn register_updater(
        &self,
        updater: Arc<dyn Updater>,
        kind: UpdateKind,
        method: UpdateMethod,
        priority: i32,
    ) {
        if !self.policy.permits(kind, method) {
            warn!(%kind, %method, "updater registration not permitted by policy");
            return;
        }
        self.updaters.register(updater, kind, method, priority);
    }

    /// Removes an updater registration.
    pub fn unregister_updater(
        &self,
        updater: &Arc<dyn Updater>,
        kind: UpdateKind,
        method: UpdateMethod,
    ) {
        self.updaters.unregister(updater, kind, method);
    }

    // ---- checks ----

    /// Fires off a checker task. Non-blocking; a no-op while a check for the
    /// same artifact is already in progress.
    pub fn check(&self, kind: UpdateKind, id: &str) {
        if self.is_check_in_progress(kind, id) {
            warn!(%kind, id, "check already in progress");
            return;
        }
        let key = ArtifactKey::new(kind, id);
        let current = self.state.downloaded_or_installed(&key);
        let max_time = self.config.default_check_time();
        for candidate in self.checkers.sorted_for_kind(kind) {
            if let Some(task) = self.launch_checker(&candidate, id, current.as_ref(), max_time) {
                task.start();
                return;
            }
        }
    }

    /// Is an update available? Blocking, up to `max_wait`.
    ///
    /// Launches a checker like [`check`](Self::check), then waits on the
    /// task's completion signal. Returns the version recorded available at
    /// wakeup (the check may still be running on timeout), or `None` when a
    /// check or download is already in progress or no checker accepts.
    pub async fn check_available(
        &self,
        kind: UpdateKind,
        id: &str,
        max_wait: Duration,
    ) -> Option<Version> {
        if self.is_check_in_progress(kind, id) || self.is_update_in_progress(kind, id) {
            warn!(%kind, id, "check or update already in progress");
            return None;
        }
        let key = ArtifactKey::new(kind, id);
        let current = self.state.downloaded_or_installed(&key);
        let mut launched = None;
        for candidate in self.checkers.sorted_for_kind(kind) {
            if let Some(task) = self.launch_checker(&candidate, id, current.as_ref(), max_wait) {
                launched = Some(task);
                break;
            }
        }
        let task = launched?;
        // register for the completion signal before the worker can fire it
        let notified = task.completion().notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        task.clone().start();
        let _ = tokio::time::timeout(max_wait, notified).await;
        self.update_available(kind, id)
    }

    /// Asks one registered checker for a task and enters it into the active
    /// set, atomically with the no-check-in-progress test. The returned task
    /// has not been started.
    fn launch_checker(
        &self,
        candidate: &Registered<dyn Checker>,
        id: &str,
        current: Option<&Version>,
        max_time: Duration,
    ) -> Option<Arc<dyn UpdateTask>> {
        let mut active = lock(&self.active_checkers);
        if active
            .iter()
            .any(|t| t.kind() == candidate.kind && t.id() == id)
        {
            return None;
        }
        let task = candidate
            .capability()
            .check(candidate.kind, candidate.method, id, current, max_time)?;
        info!(entry = %candidate, "starting checker");
        active.push(Arc::clone(&task));
        Some(task)
    }

    /// Stops the check for one artifact, invoking shutdown on its task.
    pub fn stop_check(&self, kind: UpdateKind, id: &str) {
        let removed = {
            let mut active = lock(&self.active_checkers);
            let mut removed = Vec::new();
            active.retain(|t| {
                if t.kind() == kind && t.id() == id {
                    removed.push(Arc::clone(t));
                    false
                } else {
                    true
                }
            });
            removed
        };
        for task in removed {
            task.shutdown();
        }
    }

    /// Stops every check in progress.
    pub fn stop_checks(&self) {
        let tasks = std::mem::take(&mut *lock(&self.active_checkers));
        for task in tasks {
            task.shutdown();
        }
    }

    /// Is a check in progress for this artifact?
    #[must_use]
    pub fn is_check_in_progress(&self, kind: UpdateKind, id: &str) -> bool {
        lock(&self.active_checkers)
            .iter()
            .any(|t| t.kind() == kind && t.id() == id)
    }

    /// Is any check in progress? Does not include downloads.
    #[must_use]
    pub fn any_check_in_progress(&self) -> bool {
        !lock(&self.active_checkers).is_empty()
    }

    // ---- updates ----

    /// Starts a download of the recorded available version. Non-blocking;
    /// does not check first. Returns true if a task started.
    pub fn update(&self, kind: UpdateKind, id: &str) -> bool {
        self.update_with_max_time(kind, id, self.config.max_update_time())
    }

    /// Like [`update`](Self::update) with an explicit time budget.
    /// `max_time` is passed through to updaters but not enforced here.
    pub fn update_with_max_time(&self, kind: UpdateKind, id: &str, max_time: Duration) -> bool {
        if self.is_check_in_progress(kind, id) {
            warn!(%kind, id, "check already in progress");
            return false;
        }
        self.update_from_check(kind, id, max_time)
    }

    /// Installs a plugin from an explicit URI. Non-blocking.
    ///
    /// A fresh install has no name yet; a random one is assigned so the
    /// download can be tracked. An available entry for the plugin is created
    /// if none is recorded, then a download is dispatched as usual.
    pub fn install_plugin(&self, name: Option<&str>, uri: Url) -> bool {
        let name = match name {
            Some(n) => n.to_string(),
            None => rand::random::<u64>().to_string(),
        };
        let key = ArtifactKey::new(UpdateKind::Plugin, &name);
        self.state.ensure_available(
            &key,
            AvailableVersion::new(
                Version::new(""),
                Version::new(""),
                UpdateMethod::Http,
                vec![uri],
            ),
        );
        warn!(%name, "installing plugin");
        self.update(UpdateKind::Plugin, &name)
    }

    /// Stops the download for one artifact, invoking shutdown on its task.
    pub fn stop_update(&self, kind: UpdateKind, id: &str) {
        let removed = {
            let mut downloads = lock(&self.downloaders);
            let mut removed = Vec::new();
            downloads.retain(|d| {
                if d.task.kind() == kind && d.task.id() == id {
                    removed.push(Arc::clone(&d.task));
                    false
                } else {
                    true
                }
            });
            removed
        };
        for task in removed {
            task.shutdown();
        }
    }

    /// Stops every download in progress.
    pub fn stop_updates(&self) {
        let downloads = std::mem::take(&mut *lock(&self.downloaders));
        for download in downloads {
            download.task.shutdown();
        }
    }

    /// Is a download in progress for this artifact?
    #[must_use]
    pub fn is_update_in_progress(&self, kind: UpdateKind, id: &str) -> bool {
        lock(&self.downloaders)
            .iter()
            .any(|d| d.task.kind() == kind && d.task.id() == id)
    }

    /// Is any download in progress? Does not include checks.
    #[must_use]
    pub fn any_update_in_progress(&self) -> bool {
        !lock(&self.downloaders).is_empty()
    }

    // ---- reads ----

    /// The version recorded available by the last check or notification,
    /// if any.
    #[must_use]
    pub fn update_available(&self, kind: UpdateKind, id: &str) -> Option<Version> {
        self.state.available_version(&ArtifactKey::new(kind, id))
    }

    /// The version last downloaded but not yet installed, if any.
    #[must_use]
    pub fn update_downloaded(&self, kind: UpdateKind, id: &str) -> Option<Version> {
        self.state.downloaded_version(&ArtifactKey::new(kind, id))
    }

    /// The version currently installed, if known.
    #[must_use]
    pub fn installed(&self, kind: UpdateKind, id: &str) -> Option<Version> {
        self.state.installed_version(&ArtifactKey::new(kind, id))
    }

    /// Where to fetch an artifact with the given method: the recorded
    /// sources when a version is available, otherwise the configured
    /// properties (the signed URL list is shuffled across mirrors).
    #[must_use]
    pub fn update_urls(&self, kind: UpdateKind, id: &str, method: UpdateMethod) -> Vec<Url> {
        let key = ArtifactKey::new(kind, id);
        if let Some(uris) = self.state.sources_for(&key, method) {
            return uris;
        }
        match kind {
            UpdateKind::RouterSigned => {
                let configured = self
                    .host
                    .properties
                    .get(PROP_UPDATE_URL)
                    .unwrap_or_default();
                let mut uris: Vec<Url> = configured
                    .split([' ', ',', '\t', '\r', '\n'])
                    .filter(|s| !s.is_empty())
                    .filter_map(|s| Url::parse(s.trim()).ok())
                    .collect();
                shuffle(&mut uris);
                uris
            }
            UpdateKind::RouterUnsigned => self
                .host
                .properties
                .get(PROP_UNSIGNED_URL)
                .and_then(|u| Url::parse(&u).ok())
                .map(|u| vec![u])
                .unwrap_or_default(),
            UpdateKind::Plugin => self
                .host
                .plugins
                .plugins()
                .into_iter()
                .find(|p| p.name == id)
                .and_then(|p| p.update_url)
                .map(|u| vec![u])
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    // ---- status ----

    /// The status of any update current or last finished, or `""`.
    #[must_use]
    pub fn status(&self) -> String {
        self.status.get()
    }

    /// Publishes a status that stays until superseded.
    pub(crate) fn publish(&self, event: &StatusEvent) {
        self.status.set(event.render(self.host.translator.as_ref()));
    }

    /// Publishes a status that auto-expires after the configured quiet
    /// period unless superseded first.
    pub(crate) fn finish(&self, event: &StatusEvent) {
        self.finish_raw(event.render(self.host.translator.as_ref()));
    }

    pub(crate) fn finish_raw(&self, message: String) {
        self.status.set(message.clone());
        let status = Arc::clone(&self.status);
        self.host.scheduler.add_event(
            self.config.status_expiry(),
            Box::new(move || status.clear_if(&message)),
        );
    }

    // ---- debug ----

    /// Dumps all maps and task sets as sorted `[entry]<br>` lines.
    #[must_use]
    pub fn render_status_html(&self) -> String {
        let mut out = String::with_capacity(1024);
        out.push_str("<h2>Update Manager</h2>");
        out.push_str("<h3>Installed</h3>");
        render_entries(
            &mut out,
            self.state
                .snapshot_installed()
                .iter()
                .map(|(k, v)| format!("[{k}] = [{v}]")),
        );
        out.push_str("<h3>Available</h3>");
        render_entries(
            &mut out,
            self.state
                .snapshot_available()
                .iter()
                .map(|(k, v)| format!("[{k}] = [{v}]")),
        );
        out.push_str("<h3>Downloaded</h3>");
        render_entries(
            &mut out,
            self.state
                .snapshot_downloaded()
                .iter()
                .map(|(k, v)| format!("[{k}] = [{v}]")),
        );
        out.push_str("<h3>Registered Checkers</h3>");
        render_entries(
            &mut out,
            self.checkers.snapshot().iter().map(|r| format!("[{r}]")),
        );
        out.push_str("<h3>Registered Updaters</h3>");
        render_entries(
            &mut out,
            self.updaters.snapshot().iter().map(|r| format!("[{r}]")),
        );
        out.push_str("<h3>Active Checkers</h3>");
        render_entries(
            &mut out,
            lock(&self.active_checkers)
                .iter()
                .map(|t| format!("[{}]", task_label(t))),
        );
        out.push_str("<h3>Active Updaters</h3>");
        render_entries(
            &mut out,
            lock(&self.downloaders)
                .iter()
                .map(|d| format!("[{}]", task_label(&d.task))),
        );
        out
    }

    /// Failsafe sweep: drops table entries whose task crashed without
    /// calling back. Runs periodically once [`start`](Self::start) has
    /// armed the timers.
    pub fn reap_dead_tasks(&self) {
        lock(&self.active_checkers).retain(|t| {
            let alive = t.is_running();
            if !alive {
                warn!(kind = %t.kind(), id = t.id(), "failsafe remove checker");
            }
            alive
        });
        lock(&self.downloaders).retain(|d| {
            let alive = d.task.is_running();
            if !alive {
                warn!(kind = %d.task.kind(), id = d.task.id(), "failsafe remove downloader");
            }
            alive
        });
    }

    pub(crate) fn remove_downloader(&self, task: &Arc<dyn UpdateTask>) -> Option<Download> {
        let mut downloads = lock(&self.downloaders);
        let index = downloads.iter().position(|d| same_task(&d.task, task))?;
        Some(downloads.remove(index))
    }

    pub(crate) fn remove_active_checker(&self, task: &Arc<dyn UpdateTask>) {
        lock(&self.active_checkers).retain(|t| !same_task(t, task));
    }
}

fn render_entries(out: &mut String, entries: impl Iterator<Item = String>) {
    let mut lines: Vec<String> = entries.collect();
    lines.sort();
    for line in lines {
        out.push_str(&line);
        out.push_str("<br>");
    }
}

fn task_label(task: &Arc<dyn UpdateTask>) -> String {
    let key = ArtifactKey::new(task.kind(), task.id());
    match task.uri() {
        Some(uri) => format!("{key} {uri}"),
        None => key.to_string(),
    }
}

fn shuffle(uris: &mut [Url]) {
    use rand::seq::SliceRandom;
    uris.shuffle(&mut rand::thread_rng());
}
