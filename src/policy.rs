use std::sync::atomic::{AtomicU64, Ordering};

use ahash::HashSet;
use parking_lot::RwLock;

use crate::api::{ApiId, ApiNameRegistry, TraceEntry};
use crate::store::TraceStore;

/// APIs whose side effects other collaborators depend on: profiled queue
/// creation and kernel symbol extraction.
pub const MUST_INTERCEPT: &[ApiId] = &[
    ApiId::QueueCreate,
    ApiId::ExecutableGetSymbol,
    ApiId::ExecutableSymbolGetInfo,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    Cap,
    Filtered,
    Inactive,
}

impl DiscardReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscardReason::Cap => "cap",
            DiscardReason::Filtered => "filtered",
            DiscardReason::Inactive => "inactive",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Stored,
    Discarded(DiscardReason),
}

pub struct InterceptionPolicy {
    names: Box<dyn ApiNameRegistry>,
    filter: RwLock<HashSet<ApiId>>,
    must_intercept: HashSet<ApiId>,
    traced: AtomicU64,
    // 0 means unlimited
    max_api_calls: u64,
}

impl InterceptionPolicy {
    pub fn new(names: Box<dyn ApiNameRegistry>, max_api_calls: u64) -> Self {
        Self {
            names,
            filter: RwLock::new(HashSet::default()),
            must_intercept: MUST_INTERCEPT.iter().copied().collect(),
            traced: AtomicU64::new(0),
            max_api_calls,
        }
    }

    pub fn add_api_to_filter(&self, name: &str) {
        match self.names.resolve(name) {
            Some(api) => {
                if self.filter.write().insert(api) {
                    tracing::debug!("filtering {api}");
                }
            }
            None => tracing::warn!("unknown API name = {name}"),
        }
    }

    pub fn is_filtered(&self, api: ApiId) -> bool {
        self.filter.read().contains(&api)
    }

    pub fn is_must_intercept(&self, api: ApiId) -> bool {
        self.must_intercept.contains(&api)
    }

    pub fn should_intercept(&self, api: ApiId) -> bool {
        !self.is_filtered(api) || self.is_must_intercept(api)
    }

    pub fn traced_api_count(&self) -> u64 {
        self.traced.load(Ordering::Acquire)
    }

    pub fn max_api_calls(&self) -> u64 {
        self.max_api_calls
    }

    pub fn is_cap_reached(&self) -> bool {
        self.max_api_calls != 0 && self.traced_api_count() >= self.max_api_calls
    }

    /// Single gating point for captured calls. An entry is either handed to
    /// `store` and counted, or dropped with the counter untouched.
    pub fn admit_entry(
        &self,
        entry: TraceEntry,
        tracing_active: bool,
        store: &dyn TraceStore,
    ) -> Admission {
        let verdict = if self.is_cap_reached() {
            Some(DiscardReason::Cap)
        } else if self.is_filtered(entry.api) {
            Some(DiscardReason::Filtered)
        } else if !tracing_active {
            Some(DiscardReason::Inactive)
        } else if !self.reserve_slot() {
            // another thread took the last slot between the check and now
            Some(DiscardReason::Cap)
        } else {
            None
        };

        match verdict {
            Some(reason) => {
                tracing::trace!("discarding {} ({})", entry.api, reason.as_str());
                metrics::counter!("hsa_trace_entries_discarded", "reason" => reason.as_str())
                    .increment(1);
                Admission::Discarded(reason)
            }
            None => {
                store.store(entry);
                metrics::counter!("hsa_trace_entries_admitted").increment(1);
                Admission::Stored
            }
        }
    }

    fn reserve_slot(&self) -> bool {
        let max = self.max_api_calls;
        self.traced
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                (max == 0 || count < max).then_some(count + 1)
            })
            .is_ok()
    }
}
