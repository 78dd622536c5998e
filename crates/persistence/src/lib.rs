//! Dual-tier persistence for engine state: a synchronous hot file and a
//! best-effort durable object-store blob, composed behind one gateway
//! (spec §4.6).

mod document;
mod durable_store;
mod error;
mod gateway;
mod hot_store;

pub use document::{StateDocument, MAX_EVALUATIONS, MAX_SESSIONS_INDEX};
pub use durable_store::DurableStore;
pub use error::{PersistenceError, Result};
pub use gateway::PersistenceGateway;
pub use hot_store::HotStore;
