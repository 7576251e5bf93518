//! Storage backends
//!
//! Both backends implement every store trait with the same semantics;
//! `MemoryStore` backs tests and development mode, `PgStore` production.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;
