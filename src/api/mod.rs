//! # Operation API
//!
//! The client-facing surface: flat JSON field sets in, uniform result
//! envelopes out. Transport is left to the embedding process; the CLI drives
//! this facade directly.

pub mod envelope;
pub mod handlers;

pub use envelope::{Envelope, ErrorBody, ResultCode};
pub use handlers::{ApiResponse, ConnectionApi, Operation};
