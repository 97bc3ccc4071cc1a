// =============================================================================
// Order Book — price -> amount ladders, best/mid/spread queries, depth trim
// =============================================================================

use std::collections::BTreeMap;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::types::Side;

/// Top-of-book snapshot. Every field is `None` until both sides have at
/// least one level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BookTop {
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
    pub mid: Option<f64>,
    pub spread: Option<f64>,
}

impl BookTop {
    /// `spread` in basis points relative to `mid`. `None` if either is
    /// unavailable or `mid` is non-positive.
    pub fn spread_bps(&self) -> Option<f64> {
        match (self.spread, self.mid) {
            (Some(spread), Some(mid)) if mid > 0.0 => Some(spread / mid * 10_000.0),
            _ => None,
        }
    }

    pub fn is_crossed(&self) -> bool {
        matches!((self.best_bid, self.best_ask), (Some(b), Some(a)) if b >= a)
    }
}

/// Price -> amount ladder for one exchange/symbol, rebuilt from snapshot and
/// delta rows by the [`OrderBookReplayer`].
///
/// Invariants: delta-written amounts are strictly positive (a non-positive
/// delta removes the level instead of writing it); a snapshot row writes
/// `amount` as given, so a malformed upstream snapshot can leave a
/// non-positive amount on the book until the next delta or re-snapshot
/// clears it. Neither side ever exceeds `depth_limit` entries (the replayer
/// trims the worst levels after every write). `best_bid <= best_ask` is
/// *not* enforced here -- a crossed market is observable and is the
/// data-trust policy's job to flag.
#[derive(Debug, Clone)]
pub struct OrderBook {
    bids: BTreeMap<OrderedFloat<f64>, f64>,
    asks: BTreeMap<OrderedFloat<f64>, f64>,
    depth_limit: usize,
    pub last_update_us: i64,
    pub last_event_ts: Option<i64>,
}

impl OrderBook {
    pub fn new(depth_limit: usize) -> Self {
        Self {
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            depth_limit,
            last_update_us: 0,
            last_event_ts: None,
        }
    }

    pub fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
    }

    /// Unconditionally write `amount` at `price` on `side`, even if
    /// non-positive. Used for both the initial and repeated rows of a
    /// snapshot; unlike a delta, a snapshot row is never treated as a
    /// removal.
    pub fn apply_snapshot(
        &mut self,
        side: Side,
        price: f64,
        amount: f64,
        now_us: i64,
        event_ts: Option<i64>,
    ) {
        let key = OrderedFloat(price);
        match side {
            Side::Bid => {
                self.bids.insert(key, amount);
            }
            Side::Ask => {
                self.asks.insert(key, amount);
            }
        }
        self.trim();
        self.last_update_us = now_us;
        self.last_event_ts = event_ts.or(self.last_event_ts);
    }

    /// Remove the level if `amount <= 0`, otherwise write it.
    pub fn apply_delta(
        &mut self,
        side: Side,
        price: f64,
        amount: f64,
        now_us: i64,
        event_ts: Option<i64>,
    ) {
        if amount <= 0.0 {
            self.remove_level(side, price);
        } else {
            self.write_level(side, price, amount);
        }
        self.trim();
        self.last_update_us = now_us;
        self.last_event_ts = event_ts.or(self.last_event_ts);
    }

    pub fn top(&self) -> BookTop {
        let best_bid = self.bids.keys().next_back().map(|k| k.0);
        let best_ask = self.asks.keys().next().map(|k| k.0);
        let (mid, spread) = match (best_bid, best_ask) {
            (Some(b), Some(a)) => (Some((b + a) / 2.0), Some(a - b)),
            _ => (None, None),
        };
        BookTop {
            best_bid,
            best_ask,
            mid,
            spread,
        }
    }

    pub fn bid_count(&self) -> usize {
        self.bids.len()
    }

    pub fn ask_count(&self) -> usize {
        self.asks.len()
    }

    fn write_level(&mut self, side: Side, price: f64, amount: f64) {
        if amount <= 0.0 {
            self.remove_level(side, price);
            return;
        }
        let key = OrderedFloat(price);
        match side {
            Side::Bid => {
                self.bids.insert(key, amount);
            }
            Side::Ask => {
                self.asks.insert(key, amount);
            }
        }
    }

    fn remove_level(&mut self, side: Side, price: f64) {
        let key = OrderedFloat(price);
        match side {
            Side::Bid => {
                self.bids.remove(&key);
            }
            Side::Ask => {
                self.asks.remove(&key);
            }
        }
    }

    /// Drop the lowest bids / highest asks until each side is within
    /// `depth_limit`.
    fn trim(&mut self) {
        while self.bids.len() > self.depth_limit {
            if let Some(lowest) = self.bids.keys().next().copied() {
                self.bids.remove(&lowest);
            } else {
                break;
            }
        }
        while self.asks.len() > self.depth_limit {
            if let Some(highest) = self.asks.keys().next_back().copied() {
                self.asks.remove(&highest);
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_is_none_until_both_sides_present() {
        let mut book = OrderBook::new(10);
        assert_eq!(book.top(), BookTop::default());
        book.apply_snapshot(Side::Bid, 100.0, 1.0, 0, None);
        assert!(book.top().best_ask.is_none());
        book.apply_snapshot(Side::Ask, 101.0, 1.0, 0, None);
        let top = book.top();
        assert_eq!(top.best_bid, Some(100.0));
        assert_eq!(top.best_ask, Some(101.0));
        assert_eq!(top.mid, Some(100.5));
        assert_eq!(top.spread, Some(1.0));
    }

    #[test]
    fn delta_with_nonpositive_amount_removes_level() {
        let mut book = OrderBook::new(10);
        book.apply_snapshot(Side::Bid, 100.0, 1.0, 0, None);
        assert_eq!(book.bid_count(), 1);
        book.apply_delta(Side::Bid, 100.0, 0.0, 0, None);
        assert_eq!(book.bid_count(), 0);
    }

    #[test]
    fn trims_lowest_bids_and_highest_asks() {
        let mut book = OrderBook::new(2);
        book.apply_snapshot(Side::Bid, 98.0, 1.0, 0, None);
        book.apply_snapshot(Side::Bid, 99.0, 1.0, 0, None);
        book.apply_snapshot(Side::Bid, 100.0, 1.0, 0, None);
        assert_eq!(book.bid_count(), 2);
        assert_eq!(book.top().best_bid, Some(100.0));

        book.apply_snapshot(Side::Ask, 103.0, 1.0, 0, None);
        book.apply_snapshot(Side::Ask, 102.0, 1.0, 0, None);
        book.apply_snapshot(Side::Ask, 101.0, 1.0, 0, None);
        assert_eq!(book.ask_count(), 2);
        assert_eq!(book.top().best_ask, Some(101.0));
    }

    #[test]
    fn crossed_market_is_observable_not_rejected() {
        let mut book = OrderBook::new(10);
        book.apply_snapshot(Side::Bid, 100.0, 1.0, 0, None);
        book.apply_snapshot(Side::Ask, 99.0, 1.0, 0, None);
        assert!(book.top().is_crossed());
    }

    #[test]
    fn invariant_amounts_always_positive() {
        let mut book = OrderBook::new(10);
        book.apply_snapshot(Side::Bid, 100.0, 5.0, 0, None);
        book.apply_delta(Side::Bid, 100.0, -1.0, 0, None);
        assert_eq!(book.bid_count(), 0);
    }
}
