use std::fmt;
use std::str::FromStr;

use crate::runtime::{QueueHandle, SignalHandle};

macro_rules! hsa_apis {
    ($($variant:ident => $name:literal),* $(,)?) => {
        /// Identifies one intercepted runtime entry point.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[non_exhaustive]
        pub enum ApiId {
            $($variant),*
        }

        impl ApiId {
            pub const ALL: &'static [ApiId] = &[$(ApiId::$variant),*];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(ApiId::$variant => $name),*
                }
            }

            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $($name => Some(ApiId::$variant),)*
                    _ => None,
                }
            }
        }
    };
}

hsa_apis! {
    Init => "hsa_init",
    ShutDown => "hsa_shut_down",
    SystemGetInfo => "hsa_system_get_info",
    IterateAgents => "hsa_iterate_agents",
    AgentGetInfo => "hsa_agent_get_info",
    QueueCreate => "hsa_queue_create",
    QueueDestroy => "hsa_queue_destroy",
    QueueLoadWriteIndexRelaxed => "hsa_queue_load_write_index_relaxed",
    QueueStoreWriteIndexRelaxed => "hsa_queue_store_write_index_relaxed",
    QueueAddWriteIndexRelaxed => "hsa_queue_add_write_index_relaxed",
    SignalCreate => "hsa_signal_create",
    SignalDestroy => "hsa_signal_destroy",
    SignalLoadScacquire => "hsa_signal_load_scacquire",
    SignalStoreRelaxed => "hsa_signal_store_relaxed",
    SignalStoreScrelease => "hsa_signal_store_screlease",
    SignalWaitScacquire => "hsa_signal_wait_scacquire",
    MemoryAllocate => "hsa_memory_allocate",
    MemoryFree => "hsa_memory_free",
    MemoryCopy => "hsa_memory_copy",
    MemoryRegister => "hsa_memory_register",
    ExecutableCreate => "hsa_executable_create",
    ExecutableDestroy => "hsa_executable_destroy",
    ExecutableLoadCodeObject => "hsa_executable_load_code_object",
    ExecutableFreeze => "hsa_executable_freeze",
    ExecutableGetSymbol => "hsa_executable_get_symbol",
    ExecutableSymbolGetInfo => "hsa_executable_symbol_get_info",
    CodeObjectDeserialize => "hsa_code_object_deserialize",
    AmdMemoryAsyncCopy => "hsa_amd_memory_async_copy",
    AmdMemoryPoolAllocate => "hsa_amd_memory_pool_allocate",
    AmdMemoryPoolFree => "hsa_amd_memory_pool_free",
    AmdSignalAsyncHandler => "hsa_amd_signal_async_handler",
    AmdProfilingSetProfilerEnabled => "hsa_amd_profiling_set_profiler_enabled",
    AmdProfilingGetDispatchTime => "hsa_amd_profiling_get_dispatch_time",
    AmdProfilingGetAsyncCopyTime => "hsa_amd_profiling_get_async_copy_time",
}

impl fmt::Display for ApiId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("unknown API name: {0}")]
pub struct UnknownApiName(pub String);

impl FromStr for ApiId {
    type Err = UnknownApiName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ApiId::from_name(s).ok_or_else(|| UnknownApiName(s.to_string()))
    }
}

/// Resolves textual API names (from configuration) to identifiers.
pub trait ApiNameRegistry: Send + Sync {
    fn resolve(&self, name: &str) -> Option<ApiId>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinApiNames;

impl ApiNameRegistry for BuiltinApiNames {
    fn resolve(&self, name: &str) -> Option<ApiId> {
        ApiId::from_name(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Call { args: String, ret: String },
    QueueCreate { queue: QueueHandle },
    AsyncCopy { completion: SignalHandle },
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Call { args, ret } => write!(f, "({args}) = {ret}"),
            Payload::QueueCreate { queue } => write!(f, "queue={queue:#x}"),
            Payload::AsyncCopy { completion } => write!(f, "completion_signal={completion:#x}"),
        }
    }
}

/// One captured API call, prior to serialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEntry {
    pub api: ApiId,
    pub start: u64,
    pub end: u64,
    pub payload: Payload,
}

impl TraceEntry {
    pub fn new(api: ApiId, start: u64, end: u64, payload: Payload) -> Self {
        Self {
            api,
            start,
            end,
            payload,
        }
    }

    pub fn call(api: ApiId, start: u64, end: u64) -> Self {
        Self::new(
            api,
            start,
            end,
            Payload::Call {
                args: String::new(),
                ret: String::new(),
            },
        )
    }
}
