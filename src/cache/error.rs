use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

type BoxError = Box<dyn StdError + Send + Sync>;

/// A failed provider fetch.
///
/// Shared between every caller that joined the same in-flight fetch, so the
/// inner error is reference-counted. Display and `source()` expose the
/// provider's error as-is; use [`UpstreamError::downcast_ref`] to recover
/// its concrete type.
#[derive(Clone)]
pub struct UpstreamError(Arc<dyn StdError + Send + Sync>);

impl UpstreamError {
    pub fn new(err: impl Into<BoxError>) -> Self {
        Self(Arc::from(err.into()))
    }

    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.0.downcast_ref::<E>()
    }

    pub fn inner(&self) -> &(dyn StdError + Send + Sync + 'static) {
        &*self.0
    }
}

impl fmt::Debug for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("UpstreamError").field(&self.0).finish()
    }
}

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl StdError for UpstreamError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&*self.0)
    }
}

/// Errors surfaced by the provider cache facade.
///
/// Durable-tier failures never appear here; the facade fails open on them.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error(transparent)]
    Upstream(UpstreamError),
    #[error("fetched value cannot be represented as JSON: {0}")]
    Encode(Arc<serde_json::Error>),
}

impl CacheError {
    pub fn upstream(&self) -> Option<&UpstreamError> {
        match self {
            CacheError::Upstream(err) => Some(err),
            CacheError::Encode(_) => None,
        }
    }
}

impl From<UpstreamError> for CacheError {
    fn from(err: UpstreamError) -> Self {
        CacheError::Upstream(err)
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Encode(Arc::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error, PartialEq)]
    #[error("rate limited by provider (retry in {retry_after}s)")]
    struct RateLimited {
        retry_after: u64,
    }

    #[test]
    fn upstream_error_is_returned_untouched() {
        let err = CacheError::from(UpstreamError::new(RateLimited { retry_after: 30 }));

        assert_eq!(err.to_string(), "rate limited by provider (retry in 30s)");
        let upstream = err.upstream().expect("upstream variant");
        assert_eq!(
            upstream.downcast_ref::<RateLimited>(),
            Some(&RateLimited { retry_after: 30 })
        );
    }

    #[test]
    fn clones_share_the_same_inner_error() {
        let err = UpstreamError::new("connection reset");
        let clone = err.clone();
        assert!(std::ptr::addr_eq(err.inner(), clone.inner()));
        assert_eq!(clone.to_string(), "connection reset");
    }
}
