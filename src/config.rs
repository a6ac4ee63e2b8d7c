use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::TraceError;

const ENV_PREFIX: &str = "HSA_TRACE";
const DEFAULT_MAX_API_CALLS: u64 = 1_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    /// Upper bound on recorded API calls. `0` disables the cap.
    pub max_api_calls: u64,
    pub api_filter: Vec<String>,
    pub delay_start_ms: Option<u64>,
    pub duration_ms: Option<u64>,
    pub temp_dir: PathBuf,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            max_api_calls: DEFAULT_MAX_API_CALLS,
            api_filter: Vec::new(),
            delay_start_ms: None,
            duration_ms: None,
            temp_dir: std::env::temp_dir(),
        }
    }
}

impl TraceConfig {
    /// Defaults, then the optional TOML file, then `HSA_TRACE_*` variables.
    pub fn load(path: Option<&Path>) -> Result<Self, TraceError> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(true));
        }

        let cfg = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("api_filter"),
            )
            .build()?;

        Ok(cfg.try_deserialize()?)
    }

    pub fn delay_start(&self) -> Option<Duration> {
        self.delay_start_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration_ms.filter(|ms| *ms > 0).map(Duration::from_millis)
    }
}
