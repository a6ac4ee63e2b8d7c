use std::{io, path::PathBuf};

use crate::window::TimerKind;

#[derive(thiserror::Error, Debug)]
pub enum TraceError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ::config::ConfigError),

    #[error("IO error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unable to allocate memory for {0}")]
    Allocation(&'static str),

    #[error("no timer runtime available for {0} timer")]
    TimerUnavailable(TimerKind),
}

impl TraceError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        TraceError::Io {
            path: path.into(),
            source,
        }
    }
}
