use std::fmt;

/// Status code reported by the compute runtime when a call does not succeed.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("runtime call {call} failed with status {status:#x}")]
    Status { call: &'static str, status: u32 },

    #[error("invalid {0} handle")]
    InvalidHandle(&'static str),
}

macro_rules! opaque_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(pub u64);

        impl $name {
            pub fn handle(&self) -> u64 {
                self.0
            }
        }

        impl fmt::LowerHex for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::LowerHex::fmt(&self.0, f)
            }
        }
    };
}

opaque_handle!(
    /// A device agent (GPU or CPU) as seen by the runtime.
    AgentHandle
);
opaque_handle!(
    /// Address of a user-mode compute queue.
    QueueHandle
);
opaque_handle!(SignalHandle);

pub type SignalValue = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalCondition {
    Eq,
    Ne,
    Lt,
    Gte,
}

impl SignalCondition {
    pub fn is_met(&self, current: SignalValue, reference: SignalValue) -> bool {
        match self {
            SignalCondition::Eq => current == reference,
            SignalCondition::Ne => current != reference,
            SignalCondition::Lt => current < reference,
            SignalCondition::Gte => current >= reference,
        }
    }
}

/// Start and end of one kernel dispatch, as buffered by the runtime's tools module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KernelTime {
    pub kernel: u64,
    pub start: u64,
    pub end: u64,
    pub agent: AgentHandle,
    pub queue: QueueHandle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AsyncCopyTime {
    pub start: u64,
    pub end: u64,
}

/// Handler invoked by the runtime on one of its own threads. Returning `false`
/// tells the runtime to stop monitoring the signal.
pub type SignalHandler = Box<dyn FnMut(SignalValue) -> bool + Send + 'static>;

/// The subset of the compute runtime this crate calls into. Implementations
/// forward to the real (non-intercepted) entry points.
pub trait RuntimeBinding: Send + Sync + 'static {
    fn agent_chip_id(&self, agent: AgentHandle) -> Result<u32, RuntimeError>;

    fn signal_load(&self, signal: SignalHandle) -> SignalValue;

    fn signal_async_handler(
        &self,
        signal: SignalHandle,
        condition: SignalCondition,
        value: SignalValue,
        handler: SignalHandler,
    ) -> Result<(), RuntimeError>;

    fn async_copy_time(&self, signal: SignalHandle) -> Result<AsyncCopyTime, RuntimeError>;

    fn tools_loaded(&self) -> bool {
        true
    }

    /// Number of kernel timestamps currently buffered by the tools module.
    fn kernel_time_count(&self) -> usize;

    /// Copies up to `records.len()` buffered kernel timestamps and returns how
    /// many were written.
    fn copy_kernel_times(&self, records: &mut [KernelTime]) -> usize;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn lt_condition() {
        assert!(SignalCondition::Lt.is_met(0, 1));
        assert!(!SignalCondition::Lt.is_met(1, 1));
        assert!(SignalCondition::Gte.is_met(1, 1));
    }

    #[test]
    fn handle_hex() {
        assert_eq!(format!("{:#x}", QueueHandle(0xbeef)), "0xbeef");
    }
}
