//! Failover across registered updaters for one artifact.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::artifact::{ArtifactKey, SourceMap, UpdateKind};
use crate::registry::RegisteredUpdater;
use crate::sync::lock;
use crate::task::UpdateTask;
use crate::version::Version;

use super::{Download, UpdateCoordinator};

impl UpdateCoordinator {
    /// Dispatches a download without the check-in-progress guard, so a
    /// checker task can trigger it from inside its own run.
    pub(crate) fn update_from_check(
        &self,
        kind: UpdateKind,
        id: &str,
        max_time: Duration,
    ) -> bool {
        if self.is_update_in_progress(kind, id) {
            warn!(%kind, id, "update already in progress");
            return false;
        }
        let key = ArtifactKey::new(kind, id);
        let Some(sources) = self.state.sources(&key) else {
            warn!(%kind, id, "no version available");
            return false;
        };
        let plan = self.updaters.sorted_for_kind(kind);
        self.retry(&key, &sources, plan, max_time).is_some()
    }

    /// Walks the remaining updater candidates in order and launches the
    /// first task one of them accepts.
    ///
    /// Each candidate is consumed from the plan before it is tried, so a
    /// failing updater is never retried within one plan; candidates
    /// unregistered since the plan was built are skipped. The launched task
    /// carries the rest of the plan for the next failover, and is entered
    /// into the downloader table before `start` so a callback racing the
    /// launch still finds it.
    pub(crate) fn retry(
        &self,
        key: &ArtifactKey,
        sources: &SourceMap,
        mut plan: Vec<RegisteredUpdater>,
        max_time: Duration,
    ) -> Option<Arc<dyn UpdateTask>> {
        while !plan.is_empty() {
            let candidate = plan.remove(0);
            if !self.updaters.contains(&candidate) {
                continue;
            }
            let new_version = self
                .state
                .available_version(key)
                .unwrap_or_else(|| Version::new(""));
            for (method, uris) in sources {
                if candidate.method != *method || candidate.kind != key.kind {
                    continue;
                }
                if let Some(task) = candidate.capability().update(
                    key.kind,
                    *method,
                    uris,
                    &key.id,
                    &new_version,
                    max_time,
                ) {
                    info!(entry = %candidate, "starting updater");
                    lock(&self.downloaders).push(Download {
                        task: Arc::clone(&task),
                        plan: plan.clone(),
                    });
                    task.clone().start();
                    return Some(task);
                }
                warn!(entry = %candidate, %method, "updater refused");
            }
        }
        warn!(%key, "nothing left to try");
        None
    }
}
