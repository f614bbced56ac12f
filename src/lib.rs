//! # nomad
//!
//! Cluster-wide configuration changes, applied to every server or to none:
//! - Discovery of every server's mode, counter and change history
//! - Prepare / commit / rollback across all servers, unanimously
//! - Fencing with a per-server mutative message counter
//! - Takeover and recovery of changes left prepared by a lost client
//! - Partition and inconsistency detection before anything is mutated
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │            NomadClientProcess               │
//! │  discover → decide → prepare → commit       │
//! │                           └──→ rollback     │
//! └───────────┬─────────────────────────────────┘
//!             │ HTTP (JSON)
//!   ┌─────────┴──────────┬──────────────┐
//!   │                    │              │
//! ┌─▼──────────┐   ┌─────▼──────┐   ┌───▼──────────┐
//! │ Server 1   │   │ Server 2   │   │ Server 3     │
//! │ state      │   │ state      │   │ state        │
//! │ machine +  │   │ machine +  │   │ machine +    │
//! │ change log │   │ change log │   │ change log   │
//! └────────────┘   └────────────┘   └──────────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start a server
//! ```bash
//! nomad-server serve \
//!   --name node-1 \
//!   --bind 0.0.0.0:9410 \
//!   --db ./nomad-data
//! ```
//!
//! ### Use the CLI
//! ```bash
//! ENDPOINTS=http://node-1:9410,http://node-2:9410,http://node-3:9410
//!
//! nomad --endpoints $ENDPOINTS activate my-cluster
//! nomad --endpoints $ENDPOINTS set lease-time 20s
//! nomad --endpoints $ENDPOINTS resize offheap 512MB
//! nomad --endpoints $ENDPOINTS discover
//!
//! # Finish a change left prepared by a crashed client
//! nomad --endpoints $ENDPOINTS recover --force rollback
//! ```

#![allow(clippy::result_large_err)]

pub mod client;
pub mod common;
pub mod ops;
pub mod protocol;
pub mod server;
pub mod settings;

// Re-export commonly used types
pub use client::{NomadClientProcess, NomadEvent, Outcome};
pub use common::{Config, Error, Result};
pub use protocol::{ChangeApplicator, NomadChange};
pub use server::{NomadNode, NomadServer};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
