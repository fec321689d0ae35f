//! pollcast-sim: an in-memory stand-in for the hosted subscribe service.
//!
//! [`InMemoryService`] implements both collaborator traits, so one instance
//! can back any number of clients in a test. It holds polls open, records
//! presence, and can be told to fail.

pub mod service;

pub use service::{InMemoryService, ServiceConfig};

/// Install a fmt subscriber filtered by `POLLCAST_LOG`, falling back to
/// `RUST_LOG`, then `info`. Safe to call from every test.
pub fn init_tracing() {
    let filter = std::env::var("POLLCAST_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_test_writer()
        .try_init();
}
