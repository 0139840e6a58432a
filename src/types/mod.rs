//! Core domain types for the buffered record sink.

mod message;
mod stream;

pub use message::*;
pub use stream::*;
