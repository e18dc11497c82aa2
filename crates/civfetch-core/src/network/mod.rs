//! Network retry policy shared by batch downloads and registry maintenance.

mod retry;

pub use retry::{retry_async, RetryPolicy, RetryStats};
