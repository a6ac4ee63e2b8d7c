pub mod api;
pub mod collector;
pub mod config;
pub mod error;
pub mod manager;
pub mod policy;
pub mod queue;
pub mod record;
pub mod runtime;
pub mod sim;
pub mod store;
pub mod symbols;
pub mod window;

pub use crate::api::{ApiId, Payload, TraceEntry};
pub use crate::config::TraceConfig;
pub use crate::error::TraceError;
pub use crate::manager::{ApiInfoManager, Collaborators};
pub use crate::policy::{Admission, DiscardReason};
