//! Callbacks from running tasks, and the install dispatch they drive.

use std::path::Path;
use std::sync::Arc;

use tracing::{error, info, warn};
use url::Url;

use crate::artifact::{ArtifactKey, UpdateKind, UpdateMethod};
use crate::config::{InstallPolicy, PROP_LAST_UPDATE_TIME, PROP_UNSIGNED_AVAILABLE,
    PROP_UPDATE_POLICY};
use crate::state::AvailableOutcome;
use crate::status::StatusEvent;
use crate::task::UpdateTask;
use crate::version::Version;

use super::UpdateCoordinator;

impl UpdateCoordinator {
    /// A checker found (or was told about) a version. Returns true if it
    /// was newer than everything known for the artifact.
    ///
    /// News skips the three-tier bookkeeping entirely: the feed is applied
    /// by its checker, so the reported timestamp is recorded as installed.
    /// For router kinds an accepted version may immediately dispatch a
    /// download when the install policy allows and no router download is
    /// already in flight.
    pub fn notify_version_available(
        &self,
        kind: UpdateKind,
        id: &str,
        method: UpdateMethod,
        uris: Vec<Url>,
        new_version: &str,
        min_version: &str,
    ) -> bool {
        if kind == UpdateKind::News {
            self.state.note_installed(
                &ArtifactKey::singleton(UpdateKind::News),
                Some(Version::new(new_version)),
            );
            return true;
        }
        let key = ArtifactKey::new(kind, id);
        let version = Version::new(new_version);
        let outcome = self.state.record_available(
            &key,
            version.clone(),
            Version::new(min_version),
            method,
            uris,
        );
        if outcome != AvailableOutcome::Accepted {
            return false;
        }
        match kind {
            UpdateKind::RouterSigned | UpdateKind::RouterUnsigned => {
                if kind == UpdateKind::RouterUnsigned {
                    // survives a restart that happens before the download
                    self.host
                        .properties
                        .save(PROP_UNSIGNED_AVAILABLE, Some(new_version));
                }
                if self.should_install()
                    && !self.is_update_in_progress(UpdateKind::RouterSigned, "")
                    && !self.is_update_in_progress(UpdateKind::RouterUnsigned, "")
                {
                    self.update_from_check(kind, id, self.config.max_update_time());
                }
            }
            UpdateKind::Plugin => {
                self.finish(&StatusEvent::PluginVersionAvailable { version });
            }
            _ => {}
        }
        true
    }

    /// A checker finished, successfully or not. Wakes any bounded waiter.
    pub fn notify_check_complete(&self, task: &Arc<dyn UpdateTask>, newer: bool, success: bool) {
        info!(kind = %task.kind(), id = task.id(), "checker complete");
        self.remove_active_checker(task);
        if task.kind() == UpdateKind::Plugin {
            if !success {
                self.finish(&StatusEvent::PluginCheckFailed {
                    id: task.id().to_string(),
                });
            } else if !newer {
                self.finish(&StatusEvent::PluginUpToDate {
                    id: task.id().to_string(),
                });
            }
        }
        task.completion().notify_waiters();
    }

    /// Transfer progress from an updater.
    pub fn notify_progress(
        &self,
        _task: &Arc<dyn UpdateTask>,
        label: &str,
        transferred: u64,
        total: u64,
    ) {
        let fraction = if total == 0 {
            0.0
        } else {
            transferred as f64 / total as f64
        };
        self.publish(&StatusEvent::Progress {
            label: label.to_string(),
            fraction,
            transferred,
        });
    }

    /// A free-form status from a task. Stays until superseded.
    pub fn notify_status(&self, _task: Option<&Arc<dyn UpdateTask>>, status: &str) {
        self.status.set(status);
    }

    /// A free-form status from a task that auto-expires.
    pub fn notify_finished(&self, _task: Option<&Arc<dyn UpdateTask>>, status: &str) {
        self.finish_raw(status.to_string());
    }

    /// One source failed; the task will try its remaining URIs itself.
    pub fn notify_attempt_failed(
        &self,
        task: &Arc<dyn UpdateTask>,
        reason: &str,
        cause: Option<&(dyn std::error::Error + 'static)>,
    ) {
        warn!(
            kind = %task.kind(),
            id = task.id(),
            reason,
            cause = ?cause.map(ToString::to_string),
            "attempt failed"
        );
    }

    /// The task gave up. Fails over to the next planned updater when one is
    /// left, otherwise surfaces the failure.
    pub fn notify_task_failed(
        &self,
        task: &Arc<dyn UpdateTask>,
        reason: &str,
        cause: Option<&(dyn std::error::Error + 'static)>,
    ) {
        warn!(
            kind = %task.kind(),
            id = task.id(),
            reason,
            cause = ?cause.map(ToString::to_string),
            "task failed"
        );
        if let Some(download) = self.remove_downloader(task) {
            if !download.plan.is_empty() {
                let key = ArtifactKey::new(task.kind(), task.id());
                if let Some(sources) = self.state.sources(&key) {
                    // the failed download's own time budget is not carried
                    // across the failover; the default applies
                    let next = self.retry(
                        &key,
                        &sources,
                        download.plan,
                        self.config.max_update_time(),
                    );
                    if next.is_some() {
                        warn!(%key, "retrying download with next updater");
                    }
                }
            }
        }
        self.remove_active_checker(task);
        if task.kind() != UpdateKind::Dummy {
            if let Some(uri) = task.uri() {
                self.finish(&StatusEvent::TransferFailed {
                    url: uri.to_string(),
                });
            }
        }
    }

    /// An update finished downloading but is not yet verified; verify and
    /// dispatch installation by kind. Returns true if the payload was
    /// accepted; on a false return the task must follow up with
    /// [`notify_task_failed`](Self::notify_task_failed).
    ///
    /// `actual_version` may differ from the version requested. `file` is
    /// `None` when the updater installed the payload itself.
    pub async fn notify_complete(
        &self,
        task: &Arc<dyn UpdateTask>,
        actual_version: &str,
        file: Option<&Path>,
    ) -> bool {
        info!(kind = %task.kind(), id = task.id(), "updater complete");
        let version = Version::new(actual_version);
        let key = ArtifactKey::new(task.kind(), task.id());
        let accepted = match task.kind() {
            UpdateKind::Dummy | UpdateKind::News => true,
            UpdateKind::RouterSigned => match file {
                Some(file) => {
                    let ok = self.handle_signed_file(task.uri(), &version, file).await;
                    if ok {
                        self.state.note_downloaded(&key, version);
                    }
                    ok
                }
                None => {
                    warn!(%key, "signed update completed without a file");
                    false
                }
            },
            UpdateKind::RouterUnsigned => match file {
                Some(file) => {
                    let ok = self
                        .handle_unsigned_file(task.uri(), actual_version, file)
                        .await;
                    if ok {
                        self.host.properties.save(PROP_UNSIGNED_AVAILABLE, None);
                        self.state.note_downloaded(&key, version);
                    }
                    ok
                }
                None => {
                    warn!(%key, "unsigned update completed without a file");
                    false
                }
            },
            // the updater installed it
            _ => {
                self.state.note_installed(&key, Some(version));
                true
            }
        };
        if accepted {
            self.remove_downloader(task);
        }
        accepted
    }

    /// Verifies a signed update file and migrates it into the install slot.
    async fn handle_signed_file(
        &self,
        uri: Option<Url>,
        actual_version: &Version,
        file: &Path,
    ) -> bool {
        self.publish(&StatusEvent::Downloaded);
        let slot = self.config.update_file_path();
        let current = Version::new(self.config.router_version.clone());
        match self
            .host
            .verifier
            .migrate_verified(&current, file, &slot)
            .await
        {
            Ok(()) => {
                let now = self.host.clock.now_ms();
                self.host
                    .properties
                    .save(PROP_LAST_UPDATE_TIME, Some(&now.to_string()));
                self.apply_restart_policy(StatusEvent::VerifiedRestarting, "verified");
                true
            }
            Err(err) => {
                let url = uri.map(|u| u.to_string()).unwrap_or_default();
                error!(%err, %url, version = %actual_version, "signed update rejected");
                self.publish(&StatusEvent::VerifyFailed {
                    error: err.to_string(),
                    url,
                });
                false
            }
        }
    }

    /// Validates an unsigned archive and copies it into the install slot.
    /// `lastmod` is the archive's timestamp version in milliseconds.
    async fn handle_unsigned_file(&self, uri: Option<Url>, lastmod: &str, file: &Path) -> bool {
        if !self.host.validator.validate(file).await {
            let _ = tokio::fs::remove_file(file).await;
            let url = uri.map(|u| u.to_string()).unwrap_or_default();
            error!(%url, "corrupt archive");
            self.publish(&StatusEvent::CorruptArchive { url });
            return false;
        }
        self.publish(&StatusEvent::Downloaded);
        let slot = self.config.update_file_path();
        match tokio::fs::copy(file, &slot).await {
            Ok(_) => {
                let _ = tokio::fs::remove_file(file).await;
                let modtime = lastmod
                    .parse::<u64>()
                    .ok()
                    .filter(|m| *m > 0)
                    .unwrap_or_else(|| self.host.clock.now_ms());
                self.host
                    .properties
                    .save(PROP_LAST_UPDATE_TIME, Some(&modtime.to_string()));
                self.apply_restart_policy(StatusEvent::DownloadedRestarting, "downloaded");
                true
            }
            Err(err) => {
                error!(%err, slot = %slot.display(), "failed copy to install slot");
                self.publish(&StatusEvent::CopyFailed { path: slot });
                false
            }
        }
    }

    /// Restarts now under the `install` policy; otherwise the update sits
    /// in the slot until the next restart and the status is cleared.
    fn apply_restart_policy(&self, restarting: StatusEvent, what: &str) {
        if self.install_policy() == InstallPolicy::Install {
            error!("update was {what}, restarting to install it");
            self.publish(&restarting);
            self.host.service.restart_gracefully();
        } else {
            error!("update was {what}, will be installed at next restart");
            self.status.set("");
        }
    }

    pub(crate) fn install_policy(&self) -> InstallPolicy {
        InstallPolicy::from_property(self.host.properties.get(PROP_UPDATE_POLICY).as_deref())
    }

    /// Auto-install is off under the `notify` policy, and while an update
    /// already sits in the install slot waiting for a restart.
    pub(crate) fn should_install(&self) -> bool {
        if self.install_policy() == InstallPolicy::Notify {
            return false;
        }
        !self.config.update_file_path().exists()
    }
}
