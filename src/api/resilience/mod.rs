//! Retry handling for remote calls

pub mod retry;

pub use retry::{RetryConfig, RetryPolicy, RetryableError};
