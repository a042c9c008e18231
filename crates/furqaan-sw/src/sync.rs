//! Background sync extension point.

use async_trait::async_trait;
use tracing::info;

use crate::error::SwResult;

/// Work run when the platform fires the configured sync tag.
#[async_trait]
pub trait BackgroundSyncHook: Send + Sync {
    async fn run(&self, tag: &str) -> SwResult<()>;
}

/// Default hook: there is no deferred work yet, so it only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSyncHook;

#[async_trait]
impl BackgroundSyncHook for LoggingSyncHook {
    async fn run(&self, tag: &str) -> SwResult<()> {
        info!(tag, "Performing background sync");
        Ok(())
    }
}
