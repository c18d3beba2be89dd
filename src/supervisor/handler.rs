//! Event handlers registered with the supervisor

use crate::bus::GlobalEvent;
use async_trait::async_trait;
use std::sync::Arc;

/// Reacts to events of one exact type
///
/// A failing or panicking handler is logged and skipped; it never stops the
/// supervisor loop or the other handlers for the same event.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &GlobalEvent) -> anyhow::Result<()>;
}

/// Handler backed by a synchronous closure
pub struct FnHandler<F>(F);

#[async_trait]
impl<F> EventHandler for FnHandler<F>
where
    F: Fn(&GlobalEvent) -> anyhow::Result<()> + Send + Sync,
{
    async fn handle(&self, event: &GlobalEvent) -> anyhow::Result<()> {
        (self.0)(event)
    }
}

/// Wrap a closure as a shareable handler
pub fn handler_fn<F>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(&GlobalEvent) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(FnHandler(f))
}
