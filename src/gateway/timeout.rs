//! Timeout decorator for gateways.

use super::{CommitBatch, GatewayError, RemoteGateway, RemoteSnapshot};
use crate::models::VersionToken;
use async_trait::async_trait;
use std::time::Duration;

/// Wraps a gateway so that slow calls fail as [`GatewayError::Network`].
#[derive(Debug, Clone)]
pub struct WithTimeout<G> {
    inner: G,
    limit: Duration,
}

impl<G> WithTimeout<G> {
    /// Wraps `inner` with a per-call time limit.
    #[must_use]
    pub const fn new(inner: G, limit: Duration) -> Self {
        Self { inner, limit }
    }

    /// Returns the wrapped gateway.
    #[must_use]
    pub const fn inner(&self) -> &G {
        &self.inner
    }

    fn elapsed(&self, operation: &str) -> GatewayError {
        metrics::counter!("gateway_timeouts_total", "operation" => operation.to_string())
            .increment(1);
        GatewayError::Network(format!(
            "{operation} timed out after {}ms",
            self.limit.as_millis()
        ))
    }
}

#[async_trait]
impl<G: RemoteGateway> RemoteGateway for WithTimeout<G> {
    async fn fetch_all(&self) -> Result<RemoteSnapshot, GatewayError> {
        tokio::time::timeout(self.limit, self.inner.fetch_all())
            .await
            .map_err(|_| self.elapsed("fetch_all"))?
    }

    async fn commit_batch(&self, batch: CommitBatch) -> Result<VersionToken, GatewayError> {
        tokio::time::timeout(self.limit, self.inner.commit_batch(batch))
            .await
            .map_err(|_| self.elapsed("commit_batch"))?
    }
}
