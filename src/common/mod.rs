//! Common utilities and types shared across nomad

pub mod config;
pub mod error;
pub mod metrics;
pub mod utils;

pub use config::{ClientConfig, Config, ServerConfig, StorageBackend};
pub use error::{Error, Result};
pub use metrics::NomadMetrics;
pub use utils::{format_bytes, join_display, local_host, local_user, parse_size, timestamp_now};
