use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;

use crate::api::{ApiId, ApiNameRegistry, BuiltinApiNames, TraceEntry};
use crate::collector::{AsyncCopyCollector, FlushSummary};
use crate::config::TraceConfig;
use crate::policy::{Admission, InterceptionPolicy};
use crate::queue::QueueRegistry;
use crate::record::RecordWriter;
use crate::runtime::{AsyncCopyTime, QueueHandle, RuntimeBinding, SignalHandle};
use crate::store::TraceStore;
use crate::symbols::{DeviceCatalog, SymbolResolver};
use crate::window::{TimerKind, WindowController, WindowState};

/// External services the manager calls into.
pub struct Collaborators {
    pub runtime: Arc<dyn RuntimeBinding>,
    pub store: Arc<dyn TraceStore>,
    pub symbols: Arc<dyn SymbolResolver>,
    pub devices: Arc<dyn DeviceCatalog>,
    pub names: Box<dyn ApiNameRegistry>,
}

impl Collaborators {
    pub fn new(
        runtime: Arc<dyn RuntimeBinding>,
        store: Arc<dyn TraceStore>,
        symbols: Arc<dyn SymbolResolver>,
        devices: Arc<dyn DeviceCatalog>,
    ) -> Self {
        Self {
            runtime,
            store,
            symbols,
            devices,
            names: Box::new(BuiltinApiNames),
        }
    }
}

/// Per-process trace manager. Built once when the agent attaches and shared by
/// reference with every interception site; [`ApiInfoManager::shutdown`] (or
/// drop) is the detach.
pub struct ApiInfoManager {
    policy: InterceptionPolicy,
    window: WindowController,
    queues: QueueRegistry,
    collector: AsyncCopyCollector,
    runtime: Arc<dyn RuntimeBinding>,
    store: Arc<dyn TraceStore>,
    symbols: Arc<dyn SymbolResolver>,
    devices: Arc<dyn DeviceCatalog>,
    temp_dir: PathBuf,
}

impl ApiInfoManager {
    pub fn new(cfg: &TraceConfig, collaborators: Collaborators, timer_runtime: Option<Handle>) -> Self {
        let Collaborators {
            runtime,
            store,
            symbols,
            devices,
            names,
        } = collaborators;

        let manager = Self {
            policy: InterceptionPolicy::new(names, cfg.max_api_calls),
            window: WindowController::new(timer_runtime),
            queues: QueueRegistry::new(),
            collector: AsyncCopyCollector::new(runtime.clone()),
            runtime,
            store,
            symbols,
            devices,
            temp_dir: cfg.temp_dir.clone(),
        };

        for name in &cfg.api_filter {
            manager.add_api_to_filter(name);
        }
        if let Some(delay) = cfg.delay_start() {
            manager.enable_profile_delay_start(true, delay);
        }
        if let Some(duration) = cfg.duration() {
            manager.enable_profile_duration(true, duration);
        }

        tracing::info!(
            max_api_calls = cfg.max_api_calls,
            filtered = cfg.api_filter.len(),
            "trace manager attached"
        );
        manager
    }

    /// Starts the configured delay/duration gating.
    pub fn start(&self) {
        self.window.arm();
    }

    pub fn shutdown(&self) {
        self.window.shutdown();
        tracing::info!(
            traced = self.policy.traced_api_count(),
            "trace manager detached"
        );
    }

    pub fn add_api_to_filter(&self, name: &str) {
        self.policy.add_api_to_filter(name);
    }

    pub fn is_filtered(&self, api: ApiId) -> bool {
        self.policy.is_filtered(api)
    }

    pub fn should_intercept(&self, api: ApiId) -> bool {
        self.policy.should_intercept(api)
    }

    pub fn is_cap_reached(&self) -> bool {
        self.policy.is_cap_reached()
    }

    pub fn traced_api_count(&self) -> u64 {
        self.policy.traced_api_count()
    }

    /// Keeps or drops a freshly captured entry.
    pub fn admit_entry(&self, entry: TraceEntry) -> Admission {
        self.policy
            .admit_entry(entry, self.window.is_tracing(), self.store.as_ref())
    }

    pub fn add_queue(&self, queue: QueueHandle) {
        self.queues.add_queue(queue);
    }

    pub fn queue_index(&self, queue: QueueHandle) -> Option<usize> {
        self.queues.queue_index(queue)
    }

    pub fn add_async_copy_completion_signal(&self, signal: SignalHandle) {
        self.collector.add_async_copy_completion_signal(signal);
    }

    pub fn add_async_copy_timestamp(&self, record: AsyncCopyTime) {
        self.collector.add_async_copy_timestamp(record);
    }

    pub fn pending_async_copy_timestamps(&self) -> usize {
        self.collector.pending()
    }

    pub fn flush_non_api_timestamp_data(&self, pid: u32) -> FlushSummary {
        let writer = RecordWriter {
            runtime: self.runtime.as_ref(),
            symbols: self.symbols.as_ref(),
            devices: self.devices.as_ref(),
            queues: &self.queues,
        };
        self.collector
            .flush_non_api_timestamp_data(pid, &self.temp_dir, &writer)
    }

    pub fn enable_profile_delay_start(&self, enabled: bool, delay: Duration) {
        self.window.enable_profile_delay_start(enabled, delay);
    }

    pub fn enable_profile_duration(&self, enabled: bool, duration: Duration) {
        self.window.enable_profile_duration(enabled, duration);
    }

    pub fn is_profiler_delay_enabled(&self) -> Option<Duration> {
        self.window.is_profiler_delay_enabled()
    }

    pub fn is_profiler_duration_enabled(&self) -> Option<Duration> {
        self.window.is_profiler_duration_enabled()
    }

    pub fn create_timer(&self, kind: TimerKind, interval: Duration) {
        self.window.create_timer(kind, interval);
    }

    pub fn start_timer(&self, kind: TimerKind) {
        self.window.start_timer(kind);
    }

    pub fn resume_tracing(&self) {
        self.window.resume_tracing();
    }

    pub fn stop_tracing(&self) {
        self.window.stop_tracing();
    }

    pub fn is_tracing(&self) -> bool {
        self.window.is_tracing()
    }

    pub fn window_state(&self) -> WindowState {
        self.window.state()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::Payload;
    use crate::policy::DiscardReason;
    use crate::sim::SimulatedRuntime;
    use crate::store::MemoryTraceStore;
    use crate::symbols::{StaticDeviceCatalog, SymbolTable};

    fn setup(cfg: TraceConfig) -> (ApiInfoManager, Arc<MemoryTraceStore>) {
        let store = Arc::new(MemoryTraceStore::new());
        let collaborators = Collaborators::new(
            Arc::new(SimulatedRuntime::new()),
            store.clone(),
            Arc::new(SymbolTable::new()),
            Arc::new(StaticDeviceCatalog::new()),
        );
        (ApiInfoManager::new(&cfg, collaborators, None), store)
    }

    #[test]
    fn config_filters_are_applied() {
        let (manager, store) = setup(TraceConfig {
            api_filter: vec!["hsa_memory_copy".to_string(), "bogus".to_string()],
            ..Default::default()
        });

        assert!(manager.is_filtered(ApiId::MemoryCopy));
        assert_eq!(
            manager.admit_entry(TraceEntry::call(ApiId::MemoryCopy, 0, 1)),
            Admission::Discarded(DiscardReason::Filtered)
        );
        assert_eq!(
            manager.admit_entry(TraceEntry::call(ApiId::MemoryFree, 0, 1)),
            Admission::Stored
        );
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn cap_stops_growth() {
        let (manager, store) = setup(TraceConfig {
            max_api_calls: 3,
            ..Default::default()
        });

        for i in 0..10 {
            manager.admit_entry(TraceEntry::call(ApiId::Init, i, i + 1));
        }
        assert!(manager.is_cap_reached());
        assert_eq!(manager.traced_api_count(), 3);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn inactive_window_discards() {
        let (manager, store) = setup(TraceConfig::default());
        manager.stop_tracing();
        manager.add_queue(QueueHandle(0x9000));

        let admission = manager.admit_entry(TraceEntry::new(
            ApiId::QueueCreate,
            0,
            1,
            Payload::QueueCreate {
                queue: QueueHandle(0x9000),
            },
        ));
        assert_eq!(admission, Admission::Discarded(DiscardReason::Inactive));
        assert_eq!(manager.queue_index(QueueHandle(0x9000)), Some(0));
        assert!(store.is_empty());
    }

    #[test]
    fn gates_come_from_config() {
        let (manager, _) = setup(TraceConfig {
            delay_start_ms: Some(100),
            duration_ms: Some(0),
            ..Default::default()
        });
        assert_eq!(manager.is_profiler_delay_enabled(), Some(Duration::from_millis(100)));
        assert_eq!(manager.is_profiler_duration_enabled(), None);
        assert_eq!(manager.window_state(), WindowState::DelayPending);
        assert_eq!(
            manager.admit_entry(TraceEntry::call(ApiId::Init, 0, 1)),
            Admission::Discarded(DiscardReason::Inactive)
        );
    }
}
