//! Mnemos - Persona-Scoped Tiered Memory
//!
//! A tiered memory store for cooperating AI agents: fast in-memory KV,
//! semantic vector index, and a durable SQLite archive behind a single
//! routing facade, wrapped in persona isolation, token auth, and
//! sliding-window rate limiting.

pub mod config;
pub mod embedding;
pub mod error;
pub mod lifecycle;
pub mod manager;
pub mod persona;
pub mod security;
pub mod storage;
pub mod types;

pub use error::{MemoryError, Result};
pub use manager::MemoryManager;
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
