//! Storage tiers and the hybrid router

pub mod backend;
pub mod durable;
pub mod fast_kv;
pub mod router;
pub mod vector;

pub use backend::{BackendHealth, BackendStats, MemoryBackend};
pub use durable::{DurableFilter, DurableStore};
pub use fast_kv::{FastKvStore, KindTtls};
pub use router::HybridRouter;
pub use vector::VectorStore;
