//! The task, checker and updater contracts.
//!
//! Checkers and updaters are factories: asked for work, they either return a
//! not-yet-started [`UpdateTask`] or refuse with `None` so the coordinator can
//! try the next registrant. A task runs in its own worker once started and
//! reports back exclusively through the coordinator's notification methods.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use url::Url;

use crate::artifact::{UpdateKind, UpdateMethod};
use crate::version::Version;

/// A running (or startable) check or download.
///
/// Handles are held behind `Arc<dyn UpdateTask>`; the coordinator's tables
/// compare them by allocation identity, never by contents.
pub trait UpdateTask: Send + Sync {
    /// The artifact kind this task works on.
    fn kind(&self) -> UpdateKind;

    /// The artifact id (plugin name, or empty for singleton kinds).
    fn id(&self) -> &str;

    /// The source currently being fetched, for status display.
    fn uri(&self) -> Option<Url>;

    /// True while the worker is live. Tasks that crashed without calling
    /// back are swept out of the coordinator's tables on this signal.
    fn is_running(&self) -> bool;

    /// Launches the worker. Called at most once, after the task has been
    /// entered into the coordinator's tables.
    fn start(self: Arc<Self>);

    /// Advisory stop; the worker honors it at its next checkpoint.
    fn shutdown(&self);

    /// Completion signal fired when the task's check finishes, observed by
    /// bounded waits.
    fn completion(&self) -> &Notify;
}

/// Compares two task handles by allocation identity.
pub(crate) fn same_task(a: &Arc<dyn UpdateTask>, b: &Arc<dyn UpdateTask>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Determines whether a newer version of an artifact exists.
///
/// A checker reports findings through `notify_version_available` and signals
/// the end of the run with `notify_check_complete`.
pub trait Checker: Send + Sync {
    /// Returns a task that will perform the check, or `None` to refuse.
    ///
    /// `current` is the highest version already downloaded or installed, the
    /// baseline anything reported must exceed. The factory only constructs
    /// the task; it runs under the coordinator's launch lock and must not
    /// call back into the coordinator.
    fn check(
        &self,
        kind: UpdateKind,
        method: UpdateMethod,
        id: &str,
        current: Option<&Version>,
        max_time: Duration,
    ) -> Option<Arc<dyn UpdateTask>>;
}

/// Downloads (and possibly installs) an artifact.
///
/// An updater reports progress through `notify_progress`, per-source failures
/// through `notify_attempt_failed`, and ends with either `notify_complete` or
/// `notify_task_failed`.
pub trait Updater: Send + Sync {
    /// Returns a task that will fetch `new_version` from `sources`, or
    /// `None` to refuse the job.
    ///
    /// `max_time` is a courtesy budget; not every transport can honor it.
    fn update(
        &self,
        kind: UpdateKind,
        method: UpdateMethod,
        sources: &[Url],
        id: &str,
        new_version: &Version,
        max_time: Duration,
    ) -> Option<Arc<dyn UpdateTask>>;
}
