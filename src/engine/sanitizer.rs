// =============================================================================
// Sanitizer — per-event field validation/repair, ticker carry-forward cache
// =============================================================================

use crate::types::{Event, Payload, Sanitization, TickerData};

fn worse(a: Sanitization, b: Sanitization) -> Sanitization {
    use Sanitization::*;
    match (a, b) {
        (Quarantine, _) | (_, Quarantine) => Quarantine,
        (Repair, _) | (_, Repair) => Repair,
        _ => Accept,
    }
}

/// Last seen non-null value for each ticker field. Never cleared -- a field
/// that was populated once stays available to fill later gaps for the
/// lifetime of the engine.
#[derive(Debug, Clone, Default)]
struct TickerCache {
    funding_timestamp: Option<i64>,
    funding_rate: Option<f64>,
    predicted_funding_rate: Option<f64>,
    open_interest: Option<f64>,
    last_price: Option<f64>,
    index_price: Option<f64>,
    mark_price: Option<f64>,
}

impl TickerCache {
    fn absorb(&mut self, d: &TickerData) {
        if d.funding_timestamp.is_some() {
            self.funding_timestamp = d.funding_timestamp;
        }
        if d.funding_rate.is_some() {
            self.funding_rate = d.funding_rate;
        }
        if d.predicted_funding_rate.is_some() {
            self.predicted_funding_rate = d.predicted_funding_rate;
        }
        if d.open_interest.is_some() {
            self.open_interest = d.open_interest;
        }
        if d.last_price.is_some() {
            self.last_price = d.last_price;
        }
        if d.index_price.is_some() {
            self.index_price = d.index_price;
        }
        if d.mark_price.is_some() {
            self.mark_price = d.mark_price;
        }
    }
}

/// Per-event field validation and repair. Holds the one piece of state that
/// crosses events: the ticker carry-forward cache.
pub struct Sanitizer {
    default_exchange: String,
    default_symbol: String,
    ticker_cache: TickerCache,
}

impl Sanitizer {
    pub fn new(default_exchange: String, default_symbol: String) -> Self {
        Self {
            default_exchange,
            default_symbol,
            ticker_cache: TickerCache::default(),
        }
    }

    /// Validate and, where possible, repair one event. Returns the verdict,
    /// the (possibly repaired) event, and a pipe-joined reason string --
    /// empty when the event was accepted outright. A mismatched exchange or
    /// symbol short-circuits straight to quarantine without running the
    /// stream-specific checks below.
    pub fn sanitize(&mut self, ev: Event) -> (Sanitization, Event, String) {
        let mut status = Sanitization::Accept;
        let mut reasons: Vec<String> = Vec::new();
        let mut exchange = ev.exchange.clone();
        let mut symbol = ev.symbol.clone();

        match &ev.exchange {
            None => {
                exchange = Some(self.default_exchange.clone());
                status = worse(status, Sanitization::Repair);
                reasons.push("repair_exchange_default".to_string());
            }
            Some(e) if *e != self.default_exchange => {
                return (Sanitization::Quarantine, ev, "missing_exchange".to_string());
            }
            Some(_) => {}
        }
        match &ev.symbol {
            None => {
                symbol = Some(self.default_symbol.clone());
                status = worse(status, Sanitization::Repair);
                reasons.push("repair_symbol_default".to_string());
            }
            Some(s) if *s != self.default_symbol => {
                return (Sanitization::Quarantine, ev, "missing_symbol".to_string());
            }
            Some(_) => {}
        }

        let (stream_status, stream_reason, payload) = match &ev.payload {
            Payload::Trade(d) => Self::check_trade(d, "trade_missing_fields"),
            Payload::Liquidation(d) => Self::check_trade(d, "liq_missing_fields"),
            Payload::OrderBook(d) => Self::check_orderbook(d),
            Payload::Ticker(d) => self.check_ticker(d),
        };
        status = worse(status, stream_status);
        if let Some(reason) = stream_reason {
            reasons.push(reason);
        }

        let reason = reasons.join("|");

        let out_ev = match status {
            Sanitization::Repair => Event {
                stream: ev.stream,
                exchange,
                symbol,
                event_ts: ev.event_ts,
                ingest_ts: ev.ingest_ts,
                event_id: ev.event_id.clone(),
                payload: payload.unwrap_or(ev.payload.clone()),
            },
            _ => ev,
        };

        (status, out_ev, reason)
    }

    fn check_trade(
        d: &crate::types::TradeData,
        missing_reason: &str,
    ) -> (Sanitization, Option<String>, Option<Payload>) {
        if d.price.is_some() && d.amount.is_some() && d.side.is_some() {
            (Sanitization::Accept, None, None)
        } else {
            (
                Sanitization::Quarantine,
                Some(missing_reason.to_string()),
                None,
            )
        }
    }

    fn check_orderbook(
        d: &crate::types::OrderBookData,
    ) -> (Sanitization, Option<String>, Option<Payload>) {
        if d.is_snapshot.is_none() {
            return (
                Sanitization::Quarantine,
                Some("orderbook_invalid_is_snapshot".to_string()),
                None,
            );
        }
        if d.side.is_some() && d.price.is_some() && d.amount.is_some() {
            (Sanitization::Accept, None, None)
        } else {
            (
                Sanitization::Quarantine,
                Some("orderbook_missing_fields".to_string()),
                None,
            )
        }
    }

    fn check_ticker(&mut self, d: &TickerData) -> (Sanitization, Option<String>, Option<Payload>) {
        let had_all_required_before = d.funding_timestamp.is_some()
            && d.funding_rate.is_some()
            && d.open_interest.is_some()
            && d.last_price.is_some()
            && d.index_price.is_some()
            && d.mark_price.is_some();

        self.ticker_cache.absorb(d);

        let merged = TickerData {
            funding_timestamp: d.funding_timestamp.or(self.ticker_cache.funding_timestamp),
            funding_rate: d.funding_rate.or(self.ticker_cache.funding_rate),
            predicted_funding_rate: d
                .predicted_funding_rate
                .or(self.ticker_cache.predicted_funding_rate),
            open_interest: d.open_interest.or(self.ticker_cache.open_interest),
            last_price: d.last_price.or(self.ticker_cache.last_price),
            index_price: d.index_price.or(self.ticker_cache.index_price),
            mark_price: d.mark_price.or(self.ticker_cache.mark_price),
        };

        let mut missing = Vec::new();
        if merged.funding_timestamp.is_none() {
            missing.push("funding_timestamp");
        }
        if merged.funding_rate.is_none() {
            missing.push("funding_rate");
        }
        if merged.open_interest.is_none() {
            missing.push("open_interest");
        }
        if merged.last_price.is_none() {
            missing.push("last_price");
        }
        if merged.index_price.is_none() {
            missing.push("index_price");
        }
        if merged.mark_price.is_none() {
            missing.push("mark_price");
        }

        if !missing.is_empty() {
            return (
                Sanitization::Quarantine,
                Some(format!("ticker_missing_fields:{}", missing.join(","))),
                None,
            );
        }

        if had_all_required_before {
            (Sanitization::Accept, None, None)
        } else {
            (
                Sanitization::Repair,
                Some("repair_ticker_merge_cache".to_string()),
                Some(Payload::Ticker(merged)),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OrderBookData, Side, Stream, TradeData};

    fn base_event(payload: Payload) -> Event {
        Event {
            stream: match &payload {
                Payload::Trade(_) => Stream::Trades,
                Payload::Liquidation(_) => Stream::Liquidations,
                Payload::OrderBook(_) => Stream::Orderbook,
                Payload::Ticker(_) => Stream::Ticker,
            },
            exchange: Some("binance-futures".into()),
            symbol: Some("btcusdt".into()),
            event_ts: Some(1),
            ingest_ts: 1,
            event_id: None,
            payload,
        }
    }

    fn full_ticker() -> TickerData {
        TickerData {
            funding_timestamp: Some(1),
            funding_rate: Some(0.0001),
            predicted_funding_rate: Some(0.0001),
            open_interest: Some(1000.0),
            last_price: Some(50_000.0),
            index_price: Some(50_001.0),
            mark_price: Some(50_002.0),
        }
    }

    fn sanitizer() -> Sanitizer {
        Sanitizer::new("binance-futures".into(), "btcusdt".into())
    }

    #[test]
    fn null_exchange_is_repaired_from_default() {
        let mut s = sanitizer();
        let mut ev = base_event(Payload::Trade(TradeData {
            price: Some(1.0),
            amount: Some(1.0),
            side: Some(Side::Bid),
        }));
        ev.exchange = None;
        let (status, out, reason) = s.sanitize(ev);
        assert_eq!(status, Sanitization::Repair);
        assert_eq!(reason, "repair_exchange_default");
        assert_eq!(out.exchange.as_deref(), Some("binance-futures"));
    }

    #[test]
    fn exchange_mismatch_is_quarantined() {
        let mut s = sanitizer();
        let mut ev = base_event(Payload::Trade(TradeData {
            price: Some(1.0),
            amount: Some(1.0),
            side: Some(Side::Bid),
        }));
        ev.exchange = Some("coinbase".into());
        let (status, _, reason) = s.sanitize(ev);
        assert_eq!(status, Sanitization::Quarantine);
        assert_eq!(reason, "missing_exchange");
    }

    #[test]
    fn symbol_mismatch_is_quarantined() {
        let mut s = sanitizer();
        let mut ev = base_event(Payload::Trade(TradeData {
            price: Some(1.0),
            amount: Some(1.0),
            side: Some(Side::Bid),
        }));
        ev.symbol = Some("ethusdt".into());
        let (status, _, reason) = s.sanitize(ev);
        assert_eq!(status, Sanitization::Quarantine);
        assert_eq!(reason, "missing_symbol");
    }

    #[test]
    fn trade_missing_required_field_is_quarantined() {
        let mut s = sanitizer();
        let ev = base_event(Payload::Trade(TradeData {
            price: Some(1.0),
            amount: None,
            side: Some(Side::Bid),
        }));
        let (status, _, reason) = s.sanitize(ev);
        assert_eq!(status, Sanitization::Quarantine);
        assert_eq!(reason, "trade_missing_fields");
    }

    #[test]
    fn orderbook_with_null_is_snapshot_is_invalid() {
        let mut s = sanitizer();
        let ev = base_event(Payload::OrderBook(OrderBookData {
            is_snapshot: None,
            side: Some(Side::Bid),
            price: Some(1.0),
            amount: Some(1.0),
        }));
        let (status, _, reason) = s.sanitize(ev);
        assert_eq!(status, Sanitization::Quarantine);
        assert_eq!(reason, "orderbook_invalid_is_snapshot");
    }

    #[test]
    fn orderbook_missing_price_is_quarantined() {
        let mut s = sanitizer();
        let ev = base_event(Payload::OrderBook(OrderBookData {
            is_snapshot: Some(false),
            side: Some(Side::Bid),
            price: None,
            amount: Some(1.0),
        }));
        let (status, _, reason) = s.sanitize(ev);
        assert_eq!(status, Sanitization::Quarantine);
        assert_eq!(reason, "orderbook_missing_fields");
    }

    /// First ticker complete, second drops open_interest and gets it back
    /// from the cache.
    #[test]
    fn ticker_gap_is_filled_from_cache() {
        let mut s = sanitizer();

        let first = base_event(Payload::Ticker(full_ticker()));
        let (status, _, reason) = s.sanitize(first);
        assert_eq!(status, Sanitization::Accept);
        assert_eq!(reason, "");

        let mut second_data = full_ticker();
        second_data.open_interest = None;
        let second = base_event(Payload::Ticker(second_data));
        let (status, out, reason) = s.sanitize(second);
        assert_eq!(status, Sanitization::Repair);
        assert_eq!(reason, "repair_ticker_merge_cache");
        match out.payload {
            Payload::Ticker(d) => assert_eq!(d.open_interest, Some(1000.0)),
            _ => panic!("expected ticker payload"),
        }
    }

    /// A required field that has never once arrived cannot be filled from an
    /// empty cache and quarantines the event.
    #[test]
    fn ticker_field_never_cached_is_quarantined() {
        let mut s = sanitizer();
        let mut never_has_index = full_ticker();
        never_has_index.index_price = None;

        let first = base_event(Payload::Ticker(never_has_index.clone()));
        let (status, _, reason) = s.sanitize(first);
        assert_eq!(status, Sanitization::Quarantine);
        assert_eq!(reason, "ticker_missing_fields:index_price");

        let second = base_event(Payload::Ticker(never_has_index));
        let (status, _, reason) = s.sanitize(second);
        assert_eq!(status, Sanitization::Quarantine);
        assert_eq!(reason, "ticker_missing_fields:index_price");
    }

    #[test]
    fn sanitize_is_idempotent_on_accepted_events() {
        let mut s = sanitizer();
        let ev = base_event(Payload::Trade(TradeData {
            price: Some(1.0),
            amount: Some(1.0),
            side: Some(Side::Bid),
        }));
        let (status1, out1, reason1) = s.sanitize(ev.clone());
        let (status2, out2, reason2) = s.sanitize(out1.clone());
        assert_eq!(status1, status2);
        assert_eq!(reason1, reason2);
        assert_eq!(out1.exchange, out2.exchange);
        assert_eq!(out1.symbol, out2.symbol);
    }
}
