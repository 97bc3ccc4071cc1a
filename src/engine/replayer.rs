// =============================================================================
// Order Book Replayer — applies ORDERBOOK events to the book, tracks snapshot
// phase
// =============================================================================

use tracing::trace;

use crate::engine::orderbook::{BookTop, OrderBook};
use crate::types::{Event, Payload};

/// Drives an [`OrderBook`] from a stream of already-sanitized ORDERBOOK
/// events. Holds the single boolean that distinguishes "still receiving the
/// initial snapshot" from "applying live deltas".
pub struct OrderBookReplayer {
    book: OrderBook,
    snapshot_active: bool,
}

impl OrderBookReplayer {
    pub fn new(depth_limit: usize) -> Self {
        Self {
            book: OrderBook::new(depth_limit),
            snapshot_active: false,
        }
    }

    /// Apply one ORDERBOOK event. Events with an invalid side or
    /// non-numeric price/amount are silently dropped -- the sanitizer is
    /// expected to have already quarantined anything this malformed.
    pub fn on_event(&mut self, ev: &Event, now_us: i64) {
        let data = match &ev.payload {
            Payload::OrderBook(d) => d,
            _ => return,
        };
        let (Some(side), Some(price), Some(amount)) = (data.side, data.price, data.amount) else {
            return;
        };
        let is_snapshot = data.is_snapshot.unwrap_or(false);

        if is_snapshot {
            if !self.snapshot_active {
                // First snapshot row (or the first row after a run of
                // deltas) starts a fresh snapshot phase.
                self.book.clear();
                self.snapshot_active = true;
                trace!("orderbook replayer: snapshot phase started");
            }
            self.book
                .apply_snapshot(side, price, amount, now_us, ev.event_ts);
        } else {
            if self.snapshot_active {
                self.snapshot_active = false;
                trace!("orderbook replayer: first delta closes snapshot phase");
            }
            self.book
                .apply_delta(side, price, amount, now_us, ev.event_ts);
        }
    }

    /// Non-mutating, by-value view of top-of-book. Safe to call from the
    /// data-trust and hypothesis policies without taking ownership of the
    /// book itself.
    pub fn snapshot(&self) -> BookTop {
        self.book.top()
    }
}
