

pub mod cache;
pub mod config;
pub mod error;
pub mod retry;

pub use cache::{CircuitStats, FailureCircuitCache};
pub use config::ResolverConfig;
pub use error::{ResolverError, Result};
pub use retry::RetryPolicy;
