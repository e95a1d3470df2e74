//! Built-in no-op handler backing the DUMMY artifact kind.
//!
//! Registered at bootstrap so the callback plumbing can be exercised
//! without touching a real transport: its check task completes immediately
//! reporting nothing newer, and its update task fails immediately, driving
//! the failover path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::Notify;
use url::Url;

use crate::artifact::{UpdateKind, UpdateMethod};
use crate::coordinator::UpdateCoordinator;
use crate::task::{Checker, UpdateTask, Updater};
use crate::version::Version;

/// No-op checker/updater pair for [`UpdateKind::Dummy`].
pub struct DummyHandler {
    coordinator: Weak<UpdateCoordinator>,
}

impl DummyHandler {
    #[must_use]
    pub fn new(coordinator: Weak<UpdateCoordinator>) -> Arc<Self> {
        Arc::new(Self { coordinator })
    }
}

impl Checker for DummyHandler {
    fn check(
        &self,
        kind: UpdateKind,
        _method: UpdateMethod,
        _id: &str,
        _current: Option<&Version>,
        _max_time: Duration,
    ) -> Option<Arc<dyn UpdateTask>> {
        if kind != UpdateKind::Dummy {
            return None;
        }
        Some(Arc::new(DummyTask {
            mode: Mode::Check,
            coordinator: self.coordinator.clone(),
            running: AtomicBool::new(false),
            completion: Notify::new(),
        }))
    }
}

impl Updater for DummyHandler {
    fn update(
        &self,
        kind: UpdateKind,
        _method: UpdateMethod,
        _sources: &[Url],
        _id: &str,
        _new_version: &Version,
        _max_time: Duration,
    ) -> Option<Arc<dyn UpdateTask>> {
        if kind != UpdateKind::Dummy {
            return None;
        }
        Some(Arc::new(DummyTask {
            mode: Mode::Update,
            coordinator: self.coordinator.clone(),
            running: AtomicBool::new(false),
            completion: Notify::new(),
        }))
    }
}

#[derive(Clone, Copy)]
enum Mode {
    Check,
    Update,
}

struct DummyTask {
    mode: Mode,
    coordinator: Weak<UpdateCoordinator>,
    running: AtomicBool,
    completion: Notify,
}

impl UpdateTask for DummyTask {
    fn kind(&self) -> UpdateKind {
        UpdateKind::Dummy
    }

    fn id(&self) -> &str {
        ""
    }

    fn uri(&self) -> Option<Url> {
        None
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn start(self: Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);
        tokio::spawn(async move {
            let handle: Arc<dyn UpdateTask> = Arc::clone(&self) as Arc<dyn UpdateTask>;
            if let Some(coordinator) = self.coordinator.upgrade() {
                match self.mode {
                    Mode::Check => coordinator.notify_check_complete(&handle, false, true),
                    Mode::Update => {
                        coordinator.notify_task_failed(&handle, "dummy updater", None);
                    }
                }
            }
            self.running.store(false, Ordering::SeqCst);
        });
    }

    fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn completion(&self) -> &Notify {
        &self.completion
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CoordinatorConfig, RegistrationPolicy};
    use crate::host::{
        HostServices, IdentityTranslator, MemoryPropertyStore, NoPlugins, SystemClock,
        TokioScheduler,
    };
    use async_trait::async_trait;
    use std::path::Path;

    struct RejectAll;

    #[async_trait]
    impl crate::host::SignedVerifier for RejectAll {
        async fn migrate_verified(
            &self,
            _current: &Version,
            _from: &Path,
            _to: &Path,
        ) -> Result<(), crate::host::VerifyError> {
            Err(crate::host::VerifyError("unused".to_string()))
        }
    }

    #[async_trait]
    impl crate::host::ArchiveValidator for RejectAll {
        async fn validate(&self, _file: &Path) -> bool {
            false
        }
    }

    impl crate::host::ServiceControl for RejectAll {
        fn restart_gracefully(&self) {}
    }

    fn host() -> HostServices {
        let stub = Arc::new(RejectAll);
        HostServices {
            clock: Arc::new(SystemClock),
            properties: Arc::new(MemoryPropertyStore::new()),
            scheduler: Arc::new(TokioScheduler),
            plugins: Arc::new(NoPlugins),
            verifier: stub.clone(),
            validator: stub.clone(),
            service: stub,
            translator: Arc::new(IdentityTranslator),
        }
    }

    #[tokio::test]
    async fn test_dummy_check_completes_and_leaves_no_task_behind() {
        let coordinator = UpdateCoordinator::new(
            CoordinatorConfig::default(),
            host(),
            RegistrationPolicy::allow_all(),
        );
        let dummy = DummyHandler::new(Arc::downgrade(&coordinator));
        coordinator.register_checker(dummy, UpdateKind::Dummy, UpdateMethod::Dummy, 0);

        let found = coordinator
            .check_available(UpdateKind::Dummy, "", Duration::from_millis(500))
            .await;
        assert!(found.is_none());
        assert!(!coordinator.is_check_in_progress(UpdateKind::Dummy, ""));
    }

    #[tokio::test]
    async fn test_dummy_checker_refuses_other_kinds() {
        let coordinator = UpdateCoordinator::new(
            CoordinatorConfig::default(),
            host(),
            RegistrationPolicy::allow_all(),
        );
        let dummy = DummyHandler::new(Arc::downgrade(&coordinator));
        let task = dummy.check(
            UpdateKind::RouterSigned,
            UpdateMethod::Http,
            "",
            None,
            Duration::from_secs(1),
        );
        assert!(task.is_none());
    }
}
