//! Transport support between the [`Harness`](crate::agent::harness::Harness)
//! and the completion endpoint.
//!
//! - [`retry`]: exponential backoff around single attempts and whole streams.
//!   Never retries authentication failures.
//! - [`streaming`]: SSE parser producing a [`TextStream`](crate::TextStream)
//!   of content fragments.

pub mod retry;
pub mod streaming;

pub use retry::{RetryConfig, retry, retry_stream};
