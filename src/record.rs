use std::io::{self, Write};

use crate::queue::QueueRegistry;
use crate::runtime::{AsyncCopyTime, KernelTime, RuntimeBinding};
use crate::symbols::{DeviceCatalog, SymbolResolver};

pub const UNKNOWN_KERNEL_NAME: &str = "<UnknownKernelName>";
pub const UNKNOWN_DEVICE_NAME: &str = "<UnknownDeviceName>";

const KERNEL_NAME_WIDTH: usize = 50;
const HANDLE_WIDTH: usize = 21;
const TIME_WIDTH: usize = 21;
const DEVICE_NAME_WIDTH: usize = 64;
const QUEUE_INDEX_WIDTH: usize = 6;

/// Lookups needed to turn raw kernel timestamps into readable lines.
pub struct RecordWriter<'a> {
    pub runtime: &'a dyn RuntimeBinding,
    pub symbols: &'a dyn SymbolResolver,
    pub devices: &'a dyn DeviceCatalog,
    pub queues: &'a QueueRegistry,
}

impl RecordWriter<'_> {
    pub fn kernel_name(&self, record: &KernelTime) -> String {
        match self.symbols.kernel_name(record.kernel) {
            Some(name) if !name.is_empty() => {
                tracing::trace!("resolved code handle {:#x} to {name}", record.kernel);
                name
            }
            _ => UNKNOWN_KERNEL_NAME.to_string(),
        }
    }

    pub fn device_name(&self, record: &KernelTime) -> String {
        let chip_id = match self.runtime.agent_chip_id(record.agent) {
            Ok(chip_id) => chip_id,
            Err(err) => {
                tracing::error!("failed to query chip id of agent {:#x}: {err}", record.agent);
                return UNKNOWN_DEVICE_NAME.to_string();
            }
        };

        self.devices
            .device_name(chip_id)
            .unwrap_or_else(|| UNKNOWN_DEVICE_NAME.to_string())
    }

    /// Writes one kernel timestamp line, without the trailing newline.
    pub fn write_kernel_timestamp<W: Write>(
        &self,
        out: &mut W,
        record: &KernelTime,
    ) -> io::Result<()> {
        let name = self.kernel_name(record);
        // the name column always keeps at least one trailing space
        let name_width = KERNEL_NAME_WIDTH.max(name.len() + 1);
        let device = self.device_name(record);
        let queue_index = self.queues.queue_index(record.queue).unwrap_or(0);

        write!(out, "{name:<name_width$}")?;
        write!(out, "{:<HANDLE_WIDTH$}", format!("{:#x}", record.kernel))?;
        write!(out, "{:<TIME_WIDTH$}", record.start)?;
        write!(out, "{:<TIME_WIDTH$}", record.end)?;
        write!(out, "{device:<DEVICE_NAME_WIDTH$}")?;
        write!(out, "{:<HANDLE_WIDTH$}", format!("{:#x}", record.agent))?;
        write!(out, "{queue_index:<QUEUE_INDEX_WIDTH$}")?;
        write!(out, "{:<HANDLE_WIDTH$}", format!("{:#x}", record.queue))
    }
}

/// Writes one async copy timestamp line, without the trailing newline.
pub fn write_async_copy_timestamp<W: Write>(out: &mut W, record: &AsyncCopyTime) -> io::Result<()> {
    write!(out, "{:<TIME_WIDTH$}", record.start)?;
    write!(out, "{:<TIME_WIDTH$}", record.end)
}
