//! Testing utilities for exercising the record sink.
//!
//! Provides tracing initialization for tests and a destination wrapper that records
//! calls and injects faults, so close-path behavior can be asserted without a real
//! storage backend.

pub mod destination;

use std::sync::Once;
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Initializes tracing output for tests.
///
/// Safe to call from every test; the subscriber is installed once per process. The
/// filter honors `RUST_LOG` and defaults to `info`.
pub fn init_test_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .init();
    });
}
