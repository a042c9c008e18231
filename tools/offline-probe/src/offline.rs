//! A network that is always down.

use async_trait::async_trait;
use furqaan_net::{Fetcher, NetError, Request, Response};

/// Fails every attempt, for checking what the worker serves during an outage.
pub struct OfflineFetcher;

#[async_trait]
impl Fetcher for OfflineFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        Err(NetError::Unreachable(format!(
            "{} (simulated outage)",
            request.url
        )))
    }
}
