//! Server side of the protocol
//!
//! - [`store`]: change log storage trait, in-memory backend, framing
//! - [`rocks`]: RocksDB change log
//! - [`state_machine`]: fencing and the prepare/commit/rollback/takeover transitions
//! - [`handle`]: single-task serialization point
//! - [`http`]: HTTP API
//! - [`node`]: wiring and serve loop

pub mod handle;
pub mod http;
pub mod node;
pub mod rocks;
pub mod state_machine;
pub mod store;

pub use handle::ServerHandle;
pub use http::create_router;
pub use node::{open_store, NomadNode};
pub use rocks::RocksChangeStore;
pub use state_machine::NomadServer;
pub use store::{ChangeStore, MemoryChangeStore, ServerState};
