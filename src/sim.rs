use std::sync::atomic::{AtomicBool, Ordering};

use ahash::HashMap;
use parking_lot::Mutex;

use crate::runtime::{
    AgentHandle, AsyncCopyTime, KernelTime, RuntimeBinding, RuntimeError, SignalCondition,
    SignalHandle, SignalHandler, SignalValue,
};

const HSA_STATUS_ERROR_INVALID_SIGNAL: u32 = 0x100a;

struct Waiter {
    condition: SignalCondition,
    value: SignalValue,
    handler: SignalHandler,
}

#[derive(Default)]
struct SignalState {
    value: SignalValue,
    copy_time: Option<AsyncCopyTime>,
    waiters: Vec<Waiter>,
}

/// In-process stand-in for the compute runtime. Callers drive completions
/// explicitly, from whichever thread should play the runtime's callback thread.
pub struct SimulatedRuntime {
    agents: Mutex<HashMap<AgentHandle, u32>>,
    signals: Mutex<HashMap<SignalHandle, SignalState>>,
    kernel_times: Mutex<Vec<KernelTime>>,
    tools_loaded: AtomicBool,
}

impl Default for SimulatedRuntime {
    fn default() -> Self {
        Self {
            agents: Mutex::new(HashMap::default()),
            signals: Mutex::new(HashMap::default()),
            kernel_times: Mutex::new(Vec::new()),
            tools_loaded: AtomicBool::new(true),
        }
    }
}

impl SimulatedRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_agent(&self, agent: AgentHandle, chip_id: u32) {
        self.agents.lock().insert(agent, chip_id);
    }

    pub fn create_signal(&self, signal: SignalHandle, initial: SignalValue) {
        self.signals.lock().insert(
            signal,
            SignalState {
                value: initial,
                ..Default::default()
            },
        );
    }

    pub fn set_tools_loaded(&self, loaded: bool) {
        self.tools_loaded.store(loaded, Ordering::Relaxed);
    }

    pub fn push_kernel_time(&self, record: KernelTime) {
        self.kernel_times.lock().push(record);
    }

    pub fn pending_waiters(&self, signal: SignalHandle) -> usize {
        self.signals
            .lock()
            .get(&signal)
            .map_or(0, |state| state.waiters.len())
    }

    /// Finishes a copy: records its timing (if any), decrements the signal and
    /// runs every handler whose condition is now met on the calling thread.
    pub fn complete_async_copy(&self, signal: SignalHandle, time: Option<AsyncCopyTime>) {
        let (value, fired) = {
            let mut signals = self.signals.lock();
            let state = signals.entry(signal).or_default();
            state.value -= 1;
            state.copy_time = time;

            let value = state.value;
            let (fired, waiting): (Vec<_>, Vec<_>) = state
                .waiters
                .drain(..)
                .partition(|w| w.condition.is_met(value, w.value));
            state.waiters = waiting;
            (value, fired)
        };

        // handlers call back into the runtime, so the lock must be released
        let mut rearm = Vec::new();
        for mut waiter in fired {
            if (waiter.handler)(value) {
                rearm.push(waiter);
            }
        }

        if !rearm.is_empty() {
            self.signals
                .lock()
                .entry(signal)
                .or_default()
                .waiters
                .extend(rearm);
        }
    }
}

impl RuntimeBinding for SimulatedRuntime {
    fn agent_chip_id(&self, agent: AgentHandle) -> Result<u32, RuntimeError> {
        self.agents
            .lock()
            .get(&agent)
            .copied()
            .ok_or(RuntimeError::InvalidHandle("agent"))
    }

    fn signal_load(&self, signal: SignalHandle) -> SignalValue {
        self.signals.lock().get(&signal).map_or(0, |state| state.value)
    }

    fn signal_async_handler(
        &self,
        signal: SignalHandle,
        condition: SignalCondition,
        value: SignalValue,
        handler: SignalHandler,
    ) -> Result<(), RuntimeError> {
        let mut signals = self.signals.lock();
        let state = signals
            .get_mut(&signal)
            .ok_or(RuntimeError::InvalidHandle("signal"))?;
        state.waiters.push(Waiter {
            condition,
            value,
            handler,
        });
        Ok(())
    }

    fn async_copy_time(&self, signal: SignalHandle) -> Result<AsyncCopyTime, RuntimeError> {
        self.signals
            .lock()
            .get(&signal)
            .and_then(|state| state.copy_time)
            .ok_or(RuntimeError::Status {
                call: "hsa_amd_profiling_get_async_copy_time",
                status: HSA_STATUS_ERROR_INVALID_SIGNAL,
            })
    }

    fn tools_loaded(&self) -> bool {
        self.tools_loaded.load(Ordering::Relaxed)
    }

    fn kernel_time_count(&self) -> usize {
        self.kernel_times.lock().len()
    }

    fn copy_kernel_times(&self, records: &mut [KernelTime]) -> usize {
        let mut pending = self.kernel_times.lock();
        let count = records.len().min(pending.len());
        for (dst, src) in records.iter_mut().zip(pending.drain(..count)) {
            *dst = src;
        }
        count
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn handler_fires_once_condition_met() {
        let runtime = SimulatedRuntime::new();
        let signal = SignalHandle(1);
        runtime.create_signal(signal, 2);

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        runtime
            .signal_async_handler(
                signal,
                SignalCondition::Lt,
                1,
                Box::new(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    false
                }),
            )
            .unwrap();

        runtime.complete_async_copy(signal, None);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        runtime.complete_async_copy(signal, None);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(runtime.pending_waiters(signal), 0);
    }

    #[test]
    fn kernel_times_drain() {
        let runtime = SimulatedRuntime::new();
        for i in 0..3 {
            runtime.push_kernel_time(KernelTime {
                kernel: i,
                ..Default::default()
            });
        }

        let mut records = vec![KernelTime::default(); runtime.kernel_time_count()];
        assert_eq!(runtime.copy_kernel_times(&mut records), 3);
        assert_eq!(records[2].kernel, 2);
        assert_eq!(runtime.kernel_time_count(), 0);
    }
}
