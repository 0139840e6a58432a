pub mod buffer;
pub mod concurrency;
pub mod config;
pub mod consumer;
pub mod destination;
pub mod error;
pub mod macros;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
pub mod workers;
