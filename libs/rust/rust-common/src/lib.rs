//! Shared library for cross-cutting concerns in the workload-identity crates.
//!
//! This crate provides centralized implementations for:
//! - Error types with retryability classification
//! - HTTP client configuration and building
//! - Exponential backoff for periodic and retried work
//! - Tracing subscriber initialization
//! - In-process counters rendered as Prometheus text

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod http;
pub mod retry;
pub mod tracing_config;
pub mod metrics;

pub use error::{PlatformError, Retryable};
pub use http::{HttpConfig, build_http_client};
pub use metrics::Counter;
pub use retry::{RetryConfig, RetryPolicy};
pub use tracing_config::{TracingConfig, init_tracing};
