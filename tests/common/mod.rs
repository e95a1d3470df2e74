//! Shared fixtures: manual tasks, mock checkers/updaters, host stubs.

#![allow(dead_code, unused_imports)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use url::Url;

use update_coordinator::{
    ArchiveValidator, Checker, Clock, CoordinatorConfig, HostServices, IdentityTranslator,
    MemoryPropertyStore, NoPlugins, RegistrationPolicy, Scheduler, ServiceControl, SignedVerifier,
    UpdateCoordinator, UpdateKind, UpdateMethod, UpdateTask, Updater, VerifyError, Version,
};

/// Installs a stderr subscriber once so coordinator logs show up under
/// `RUST_LOG=...`; repeated calls from other tests are no-ops.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .try_init();
}

pub fn uri(s: &str) -> Url {
    Url::parse(s).unwrap()
}

/// A task the test drives by hand: `start` only flips the running flag,
/// callbacks are issued explicitly.
pub struct ManualTask {
    kind: UpdateKind,
    id: String,
    uri: Option<Url>,
    running: AtomicBool,
    pub started: AtomicBool,
    pub shutdown_called: AtomicBool,
    completion: Notify,
}

impl ManualTask {
    pub fn new(kind: UpdateKind, id: &str) -> Arc<Self> {
        Self::with_uri(kind, id, None)
    }

    pub fn with_uri(kind: UpdateKind, id: &str, uri: Option<Url>) -> Arc<Self> {
        Arc::new(Self {
            kind,
            id: id.to_string(),
            uri,
            running: AtomicBool::new(false),
            started: AtomicBool::new(false),
            shutdown_called: AtomicBool::new(false),
            completion: Notify::new(),
        })
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub fn as_task(self: &Arc<Self>) -> Arc<dyn UpdateTask> {
        Arc::clone(self) as Arc<dyn UpdateTask>
    }
}

impl UpdateTask for ManualTask {
    fn kind(&self) -> UpdateKind {
        self.kind
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn uri(&self) -> Option<Url> {
        self.uri.clone()
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn start(self: Arc<Self>) {
        self.started.store(true, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
    }

    fn shutdown(&self) {
        self.shutdown_called.store(true, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
    }

    fn completion(&self) -> &Notify {
        &self.completion
    }
}

/// Checker returning a fresh [`ManualTask`] per call, or refusing.
pub struct MockChecker {
    accept: bool,
    pub calls: AtomicUsize,
    pub last_task: Mutex<Option<Arc<ManualTask>>>,
}

impl MockChecker {
    pub fn accepting() -> Arc<Self> {
        Arc::new(Self {
            accept: true,
            calls: AtomicUsize::new(0),
            last_task: Mutex::new(None),
        })
    }

    pub fn refusing() -> Arc<Self> {
        Arc::new(Self {
            accept: false,
            calls: AtomicUsize::new(0),
            last_task: Mutex::new(None),
        })
    }

    pub fn task(&self) -> Arc<ManualTask> {
        self.last_task.lock().unwrap().clone().unwrap()
    }
}

impl Checker for MockChecker {
    fn check(
        &self,
        kind: UpdateKind,
        _method: UpdateMethod,
        id: &str,
        _current: Option<&Version>,
        _max_time: Duration,
    ) -> Option<Arc<dyn UpdateTask>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.accept {
            return None;
        }
        let task = ManualTask::new(kind, id);
        *self.last_task.lock().unwrap() = Some(Arc::clone(&task));
        Some(task)
    }
}

/// Updater returning a fresh [`ManualTask`] per call, or refusing.
pub struct MockUpdater {
    accept: bool,
    pub calls: AtomicUsize,
    pub last_sources: Mutex<Vec<Url>>,
    pub last_task: Mutex<Option<Arc<ManualTask>>>,
}

impl MockUpdater {
    pub fn accepting() -> Arc<Self> {
        Arc::new(Self {
            accept: true,
            calls: AtomicUsize::new(0),
            last_sources: Mutex::new(Vec::new()),
            last_task: Mutex::new(None),
        })
    }

    pub fn refusing() -> Arc<Self> {
        Arc::new(Self {
            accept: false,
            calls: AtomicUsize::new(0),
            last_sources: Mutex::new(Vec::new()),
            last_task: Mutex::new(None),
        })
    }

    pub fn task(&self) -> Arc<ManualTask> {
        self.last_task.lock().unwrap().clone().unwrap()
    }
}

impl Updater for MockUpdater {
    fn update(
        &self,
        kind: UpdateKind,
        _method: UpdateMethod,
        sources: &[Url],
        id: &str,
        _new_version: &Version,
        _max_time: Duration,
    ) -> Option<Arc<dyn UpdateTask>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.accept {
            return None;
        }
        *self.last_sources.lock().unwrap() = sources.to_vec();
        let task = ManualTask::with_uri(kind, id, sources.first().cloned());
        *self.last_task.lock().unwrap() = Some(Arc::clone(&task));
        Some(task)
    }
}

/// Clock the test advances by hand.
pub struct ManualClock(pub AtomicU64);

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Scheduler that records closures for the test to fire explicitly.
#[derive(Default)]
pub struct RecordingScheduler {
    oneshots: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
    periodics: Mutex<Vec<Box<dyn Fn() + Send + Sync>>>,
}

impl RecordingScheduler {
    /// Fires and drains every recorded one-shot event.
    pub fn run_oneshots(&self) {
        let events = std::mem::take(&mut *self.oneshots.lock().unwrap());
        for event in events {
            event();
        }
    }

    /// Fires the `index`-th periodic event once.
    pub fn tick_periodic(&self, index: usize) {
        self.periodics.lock().unwrap()[index]();
    }

    pub fn periodic_count(&self) -> usize {
        self.periodics.lock().unwrap().len()
    }
}

impl Scheduler for RecordingScheduler {
    fn add_event(&self, _delay: Duration, event: Box<dyn FnOnce() + Send>) {
        self.oneshots.lock().unwrap().push(event);
    }

    fn add_periodic_event(&self, _period: Duration, event: Box<dyn Fn() + Send + Sync>) {
        self.periodics.lock().unwrap().push(event);
    }
}

/// Verifier that accepts or rejects everything.
pub struct StubVerifier {
    pub ok: bool,
}

#[async_trait]
impl SignedVerifier for StubVerifier {
    async fn migrate_verified(
        &self,
        _current: &Version,
        _from: &Path,
        _to: &Path,
    ) -> Result<(), VerifyError> {
        if self.ok {
            Ok(())
        } else {
            Err(VerifyError("Invalid signature".to_string()))
        }
    }
}

/// Validator that accepts or rejects everything.
pub struct StubValidator {
    pub ok: bool,
}

#[async_trait]
impl ArchiveValidator for StubValidator {
    async fn validate(&self, _file: &Path) -> bool {
        self.ok
    }
}

/// Records restart requests.
#[derive(Default)]
pub struct RecordingService {
    pub restarted: AtomicBool,
}

impl ServiceControl for RecordingService {
    fn restart_gracefully(&self) {
        self.restarted.store(true, Ordering::SeqCst);
    }
}

/// Handles on the host stubs backing a coordinator under test.
pub struct TestHost {
    pub clock: Arc<ManualClock>,
    pub properties: Arc<MemoryPropertyStore>,
    pub scheduler: Arc<RecordingScheduler>,
    pub service: Arc<RecordingService>,
}

/// Builds a coordinator over fully-stubbed host services.
pub fn build_coordinator(
    config: CoordinatorConfig,
    verifier_ok: bool,
    validator_ok: bool,
) -> (Arc<UpdateCoordinator>, TestHost) {
    init_tracing();
    let clock = Arc::new(ManualClock(AtomicU64::new(1_700_000_000_000)));
    let properties = Arc::new(MemoryPropertyStore::new());
    let scheduler = Arc::new(RecordingScheduler::default());
    let service = Arc::new(RecordingService::default());
    let host = HostServices {
        clock: clock.clone(),
        properties: properties.clone(),
        scheduler: scheduler.clone(),
        plugins: Arc::new(NoPlugins),
        verifier: Arc::new(StubVerifier { ok: verifier_ok }),
        validator: Arc::new(StubValidator { ok: validator_ok }),
        service: service.clone(),
        translator: Arc::new(IdentityTranslator),
    };
    let coordinator = UpdateCoordinator::new(config, host, RegistrationPolicy::allow_all());
    (
        coordinator,
        TestHost {
            clock,
            properties,
            scheduler,
            service,
        },
    )
}
