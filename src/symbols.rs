use ahash::HashMap;
use parking_lot::RwLock;

/// Read-only view of the finalizer's symbol bookkeeping.
pub trait SymbolResolver: Send + Sync {
    fn symbol_for_code(&self, code_handle: u64) -> Option<u64>;
    fn symbol_name(&self, symbol_handle: u64) -> Option<String>;

    fn kernel_name(&self, code_handle: u64) -> Option<String> {
        let symbol = self.symbol_for_code(code_handle)?;
        self.symbol_name(symbol)
    }
}

/// Symbol maps filled in by the must-intercept executable APIs.
#[derive(Default)]
pub struct SymbolTable {
    code_to_symbol: RwLock<HashMap<u64, u64>>,
    symbol_to_name: RwLock<HashMap<u64, String>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_code_symbol(&self, code_handle: u64, symbol_handle: u64) {
        self.code_to_symbol.write().insert(code_handle, symbol_handle);
    }

    pub fn insert_symbol_name(&self, symbol_handle: u64, name: impl Into<String>) {
        self.symbol_to_name.write().insert(symbol_handle, name.into());
    }
}

impl SymbolResolver for SymbolTable {
    fn symbol_for_code(&self, code_handle: u64) -> Option<u64> {
        self.code_to_symbol.read().get(&code_handle).copied()
    }

    fn symbol_name(&self, symbol_handle: u64) -> Option<String> {
        self.symbol_to_name.read().get(&symbol_handle).cloned()
    }
}

pub trait DeviceCatalog: Send + Sync {
    fn device_name(&self, chip_id: u32) -> Option<String>;
}

/// A small built-in chip id table. Hosts with a full device database provide
/// their own [`DeviceCatalog`].
#[derive(Debug, Clone, Default)]
pub struct StaticDeviceCatalog {
    extra: HashMap<u32, String>,
}

const KNOWN_DEVICES: &[(u32, &str)] = &[
    (0x1304, "Spectre"),
    (0x1305, "Spectre"),
    (0x1306, "Spectre"),
    (0x1307, "Spectre"),
    (0x130f, "Spectre"),
    (0x1309, "Spectre"),
    (0x1313, "Spectre"),
    (0x6920, "Tonga"),
    (0x6921, "Tonga"),
    (0x6938, "Tonga"),
    (0x7300, "Fiji"),
    (0x67df, "Ellesmere"),
    (0x67ef, "Baffin"),
    (0x6860, "gfx900"),
    (0x687f, "gfx900"),
    (0x66a0, "gfx906"),
    (0x66af, "gfx906"),
    (0x738c, "gfx908"),
    (0x740c, "gfx90a"),
];

impl StaticDeviceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, chip_id: u32, name: impl Into<String>) -> Self {
        self.extra.insert(chip_id, name.into());
        self
    }
}

impl DeviceCatalog for StaticDeviceCatalog {
    fn device_name(&self, chip_id: u32) -> Option<String> {
        if let Some(name) = self.extra.get(&chip_id) {
            return Some(name.clone());
        }

        KNOWN_DEVICES
            .iter()
            .find(|(id, _)| *id == chip_id)
            .map(|(_, name)| name.to_string())
    }
}
