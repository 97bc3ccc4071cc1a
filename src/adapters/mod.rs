// =============================================================================
// Adapter contract — pull-style event sources
// =============================================================================

pub mod csv_replay;
pub mod live_ws;

use async_trait::async_trait;

use crate::types::Event;

/// A source of market-data events, either a bounded historical replay or an
/// unbounded live connection. `stream_events` is pull-style: the caller
/// drives the loop and decides when to stop asking for the next event.
#[async_trait]
pub trait Adapter: Send {
    /// Fetch the next event, or `None` once the source is exhausted
    /// (historical) or has been closed.
    async fn next_event(&mut self) -> anyhow::Result<Option<Event>>;

    /// Idempotent teardown. Must cause any in-flight `next_event` to return
    /// `Ok(None)` promptly.
    async fn close(&mut self);
}
