//! In-process adapters for the broker and dedup cache ports.
//!
//! Used by the binary for local runs and by the test suites. Both expose
//! `set_available` so callers can simulate an outage.

pub mod broker;
pub mod cache;

pub use broker::InMemoryBroker;
pub use cache::InMemoryDedupCache;
