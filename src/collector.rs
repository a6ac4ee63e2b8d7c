use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::TraceError;
use crate::record::{RecordWriter, write_async_copy_timestamp};
use crate::runtime::{
    AsyncCopyTime, KernelTime, RuntimeBinding, SignalCondition, SignalHandle, SignalHandler,
    SignalValue,
};

pub const KERNEL_TIMESTAMP_EXT: &str = ".kts";
pub const ASYNC_COPY_TIMESTAMP_EXT: &str = ".acts";

pub fn temp_file_name(dir: &Path, pid: u32, ext: &str) -> PathBuf {
    dir.join(format!("{pid}-0{ext}"))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushSummary {
    pub kernel_records: usize,
    pub async_copy_records: usize,
}

/// Collects async copy completion times delivered on runtime-owned threads.
pub struct AsyncCopyCollector {
    runtime: Arc<dyn RuntimeBinding>,
    timestamps: Arc<Mutex<Vec<AsyncCopyTime>>>,
}

impl AsyncCopyCollector {
    pub fn new(runtime: Arc<dyn RuntimeBinding>) -> Self {
        Self {
            runtime,
            timestamps: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn add_async_copy_timestamp(&self, record: AsyncCopyTime) {
        push_timestamp(&self.timestamps, record);
    }

    pub fn pending(&self) -> usize {
        self.timestamps.lock().len()
    }

    /// Arms a one-shot handler that records the copy's timing once the signal
    /// drops below its current value.
    pub fn add_async_copy_completion_signal(&self, signal: SignalHandle) {
        let value = self.runtime.signal_load(signal);
        let runtime: Weak<dyn RuntimeBinding> = Arc::downgrade(&self.runtime);
        let timestamps = self.timestamps.clone();

        let handler: SignalHandler = Box::new(move |_value: SignalValue| {
            let Some(runtime) = runtime.upgrade() else {
                tracing::error!("async copy handler for signal {signal:#x} outlived the runtime");
                return false;
            };

            match runtime.async_copy_time(signal) {
                Ok(record) => push_timestamp(&timestamps, record),
                Err(err) => {
                    tracing::error!("failed to get async copy time for signal {signal:#x}: {err}")
                }
            }

            // the caller re-registers the signal if it is reused
            false
        });

        if let Err(err) =
            self.runtime
                .signal_async_handler(signal, SignalCondition::Lt, value, handler)
        {
            tracing::error!("failed to register async handler on signal {signal:#x}: {err}");
        }
    }

    /// Drains buffered timestamps into the per-process temp files. Failures are
    /// logged and only affect the half they occur in.
    pub fn flush_non_api_timestamp_data(
        &self,
        pid: u32,
        dir: &Path,
        writer: &RecordWriter<'_>,
    ) -> FlushSummary {
        let mut summary = FlushSummary::default();

        if self.runtime.tools_loaded() {
            match flush_kernel_timestamps(pid, dir, writer) {
                Ok(count) => summary.kernel_records = count,
                Err(err) => tracing::error!("failed to flush kernel timestamps: {err}"),
            }
        } else {
            tracing::error!("tools lib not loaded, skipping kernel timestamps");
        }

        match self.flush_async_copy_timestamps(pid, dir) {
            Ok(count) => summary.async_copy_records = count,
            Err(err) => tracing::error!("failed to flush async copy timestamps: {err}"),
        }

        metrics::counter!("hsa_trace_flushed_records", "kind" => "kernel")
            .increment(summary.kernel_records as u64);
        metrics::counter!("hsa_trace_flushed_records", "kind" => "async_copy")
            .increment(summary.async_copy_records as u64);
        tracing::debug!(
            kernel = summary.kernel_records,
            async_copy = summary.async_copy_records,
            "flushed non-API timestamps"
        );
        summary
    }

    fn flush_async_copy_timestamps(&self, pid: u32, dir: &Path) -> Result<usize, TraceError> {
        // held across the write so callbacks cannot append into a half-written batch
        let mut timestamps = self.timestamps.lock();
        let path = temp_file_name(dir, pid, ASYNC_COPY_TIMESTAMP_EXT);
        let mut out = BufWriter::new(open_append(&path)?);

        for record in timestamps.iter() {
            write_async_copy_timestamp(&mut out, record)
                .and_then(|_| writeln!(out))
                .map_err(|err| TraceError::io(&path, err))?;
        }
        out.flush().map_err(|err| TraceError::io(&path, err))?;

        let count = timestamps.len();
        timestamps.clear();
        Ok(count)
    }
}

fn push_timestamp(timestamps: &Mutex<Vec<AsyncCopyTime>>, record: AsyncCopyTime) {
    timestamps.lock().push(record);
    metrics::counter!("hsa_trace_async_copy_records").increment(1);
}

fn flush_kernel_timestamps(
    pid: u32,
    dir: &Path,
    writer: &RecordWriter<'_>,
) -> Result<usize, TraceError> {
    let count = writer.runtime.kernel_time_count();
    if count == 0 {
        return Ok(0);
    }

    // the runtime drains on fill, so the output must be open first
    let path = temp_file_name(dir, pid, KERNEL_TIMESTAMP_EXT);
    let mut out = BufWriter::new(open_append(&path)?);

    let mut records: Vec<KernelTime> = Vec::new();
    records
        .try_reserve_exact(count)
        .map_err(|_| TraceError::Allocation("kernel timestamps"))?;
    records.resize(count, KernelTime::default());
    let filled = writer.runtime.copy_kernel_times(&mut records);
    records.truncate(filled);

    for record in &records {
        writer
            .write_kernel_timestamp(&mut out, record)
            .and_then(|_| writeln!(out))
            .map_err(|err| TraceError::io(&path, err))?;
    }
    out.flush().map_err(|err| TraceError::io(&path, err))?;

    Ok(records.len())
}

fn open_append(path: &Path) -> Result<File, TraceError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|err| TraceError::io(path, err))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::queue::QueueRegistry;
    use crate::runtime::{AgentHandle, QueueHandle};
    use crate::sim::SimulatedRuntime;
    use crate::symbols::{StaticDeviceCatalog, SymbolTable};

    fn read_lines(path: &Path) -> Vec<String> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn completion_signal_records_once() {
        let runtime = Arc::new(SimulatedRuntime::new());
        let collector = AsyncCopyCollector::new(runtime.clone());
        let signal = SignalHandle(0x10);
        runtime.create_signal(signal, 1);

        collector.add_async_copy_completion_signal(signal);
        assert_eq!(runtime.pending_waiters(signal), 1);

        runtime.complete_async_copy(signal, Some(AsyncCopyTime { start: 3, end: 8 }));
        assert_eq!(collector.pending(), 1);
        assert_eq!(runtime.pending_waiters(signal), 0);
    }

    #[test]
    fn failed_time_query_records_nothing() {
        let runtime = Arc::new(SimulatedRuntime::new());
        let collector = AsyncCopyCollector::new(runtime.clone());
        let signal = SignalHandle(0x11);
        runtime.create_signal(signal, 1);

        collector.add_async_copy_completion_signal(signal);
        runtime.complete_async_copy(signal, None);
        assert_eq!(collector.pending(), 0);
        assert_eq!(runtime.pending_waiters(signal), 0);
    }

    #[test]
    fn unknown_signal_is_logged_not_fatal() {
        let runtime = Arc::new(SimulatedRuntime::new());
        let collector = AsyncCopyCollector::new(runtime.clone());
        collector.add_async_copy_completion_signal(SignalHandle(0xdead));
        assert_eq!(collector.pending(), 0);
    }

    #[test]
    fn flush_writes_and_clears() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();
        let runtime = Arc::new(SimulatedRuntime::new());
        let collector = AsyncCopyCollector::new(runtime.clone());
        let symbols = SymbolTable::new();
        let devices = StaticDeviceCatalog::new();
        let queues = QueueRegistry::new();
        queues.add_queue(QueueHandle(0x500));
        let writer = RecordWriter {
            runtime: &*runtime,
            symbols: &symbols,
            devices: &devices,
            queues: &queues,
        };

        runtime.push_kernel_time(KernelTime {
            kernel: 1,
            start: 10,
            end: 20,
            agent: AgentHandle(2),
            queue: QueueHandle(0x500),
        });
        collector.add_async_copy_timestamp(AsyncCopyTime { start: 1, end: 2 });
        collector.add_async_copy_timestamp(AsyncCopyTime { start: 3, end: 4 });

        let summary = collector.flush_non_api_timestamp_data(77, dir, &writer);
        assert_eq!(
            summary,
            FlushSummary {
                kernel_records: 1,
                async_copy_records: 2
            }
        );
        assert_eq!(collector.pending(), 0);

        let summary = collector.flush_non_api_timestamp_data(77, dir, &writer);
        assert_eq!(summary, FlushSummary::default());

        let copies = read_lines(&temp_file_name(dir, 77, ASYNC_COPY_TIMESTAMP_EXT));
        assert_eq!(copies.len(), 2);
        assert_eq!(copies[1], format!("{:<21}{:<21}", 3, 4));
        let kernels = read_lines(&temp_file_name(dir, 77, KERNEL_TIMESTAMP_EXT));
        assert_eq!(kernels.len(), 1);
        assert!(kernels[0].starts_with(crate::record::UNKNOWN_KERNEL_NAME));
    }

    #[test]
    fn flush_appends_across_calls() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();
        let runtime = Arc::new(SimulatedRuntime::new());
        runtime.set_tools_loaded(false);
        let collector = AsyncCopyCollector::new(runtime.clone());
        let symbols = SymbolTable::new();
        let devices = StaticDeviceCatalog::new();
        let queues = QueueRegistry::new();
        let writer = RecordWriter {
            runtime: &*runtime,
            symbols: &symbols,
            devices: &devices,
            queues: &queues,
        };

        runtime.push_kernel_time(KernelTime::default());
        for i in 0..3 {
            collector.add_async_copy_timestamp(AsyncCopyTime { start: i, end: i + 1 });
            collector.flush_non_api_timestamp_data(5, dir, &writer);
        }

        assert_eq!(read_lines(&temp_file_name(dir, 5, ASYNC_COPY_TIMESTAMP_EXT)).len(), 3);
        // kernel half is skipped while the tools module is unavailable
        assert!(!temp_file_name(dir, 5, KERNEL_TIMESTAMP_EXT).exists());
        assert_eq!(runtime.kernel_time_count(), 1);
    }

    #[test]
    fn unwritable_dir_keeps_both_halves() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("missing");
        let runtime = Arc::new(SimulatedRuntime::new());
        let collector = AsyncCopyCollector::new(runtime.clone());
        let symbols = SymbolTable::new();
        let devices = StaticDeviceCatalog::new();
        let queues = QueueRegistry::new();
        let writer = RecordWriter {
            runtime: &*runtime,
            symbols: &symbols,
            devices: &devices,
            queues: &queues,
        };

        runtime.push_kernel_time(KernelTime::default());
        collector.add_async_copy_timestamp(AsyncCopyTime { start: 1, end: 2 });

        let summary = collector.flush_non_api_timestamp_data(9, &dir, &writer);
        assert_eq!(summary, FlushSummary::default());
        assert_eq!(runtime.kernel_time_count(), 1);
        assert_eq!(collector.pending(), 1);

        std::fs::create_dir(&dir).unwrap();
        let summary = collector.flush_non_api_timestamp_data(9, &dir, &writer);
        assert_eq!(
            summary,
            FlushSummary {
                kernel_records: 1,
                async_copy_records: 1
            }
        );
        assert_eq!(read_lines(&temp_file_name(&dir, 9, KERNEL_TIMESTAMP_EXT)).len(), 1);
    }
}
