use std::sync::Arc;

use hsa_trace::{
    ApiInfoManager, Collaborators, TraceConfig,
    sim::SimulatedRuntime,
    store::MemoryTraceStore,
    symbols::{StaticDeviceCatalog, SymbolTable},
};
use tempfile::TempDir;

pub struct Session {
    pub manager: Arc<ApiInfoManager>,
    pub runtime: Arc<SimulatedRuntime>,
    pub store: Arc<MemoryTraceStore>,
    pub symbols: Arc<SymbolTable>,
    pub dir: TempDir,
}

impl Session {
    pub fn new(cfg: TraceConfig, timer_runtime: Option<tokio::runtime::Handle>) -> Self {
        let dir = tempfile::tempdir().unwrap();

        let runtime = Arc::new(SimulatedRuntime::new());
        let store = Arc::new(MemoryTraceStore::new());
        let symbols = Arc::new(SymbolTable::new());
        let cfg = TraceConfig {
            temp_dir: dir.path().to_path_buf(),
            ..cfg
        };
        let manager = Arc::new(ApiInfoManager::new(
            &cfg,
            Collaborators::new(
                runtime.clone(),
                store.clone(),
                symbols.clone(),
                Arc::new(StaticDeviceCatalog::new()),
            ),
            timer_runtime,
        ));

        Self {
            manager,
            runtime,
            store,
            symbols,
            dir,
        }
    }

    pub fn read_lines(&self, file: &str) -> Vec<String> {
        std::fs::read_to_string(self.dir.path().join(file))
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }
}
