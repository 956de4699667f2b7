//! Incremental relay protocol.
//!
//! - [`codec`]: event ↔ `data:` frame encoding
//! - [`adapter`]: provider chunks → canonical event sequence
//! - [`writer`]: event sequence → committed SSE response

pub mod adapter;
pub mod codec;
pub mod writer;

pub use adapter::{EventStream, UpstreamAdapter};
pub use codec::LogicalEvent;
pub use writer::RelayError;
