//! Concurrency utilities coordinating the consumer and the flush worker.

pub mod shutdown;
pub mod signal;
