//! Dynamic boot configuration.
//!
//! Asks an upstream decision service which kernel and initrd a machine
//! should boot, caches the answer per MAC and coalesces concurrent
//! lookups.

mod cache;
mod retriever;
mod types;
mod upstream;

pub use cache::TtlCache;
pub use retriever::{BootConfigRetriever, CACHE_TTL, UPSTREAM_TIMEOUT};
pub use types::{BootConfigRequest, BootConfigResponse};
pub use upstream::{BootDecisionClient, HttpDecisionClient};

#[cfg(test)]
pub(crate) use retriever::test_support;
