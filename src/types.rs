// =============================================================================
// Core event model shared across the ingestion pipeline
// =============================================================================
//
// The upstream feeds (CSV replay, live WebSocket) hand the engine a dynamic,
// partially-populated record per row/message. We model that as a tagged sum:
// `Event` carries the fields common to every stream plus a `Payload` enum
// whose variant is fixed by `stream`. Downstream components (sanitizer,
// trust policy, hypothesis policy) pattern-match on the tag rather than
// probing a loosely-typed map.
// =============================================================================

use serde::{Deserialize, Serialize};

/// Which market-data channel an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stream {
    Trades,
    Orderbook,
    Liquidations,
    Ticker,
}

impl Stream {
    pub const ALL: [Stream; 4] = [
        Stream::Trades,
        Stream::Orderbook,
        Stream::Liquidations,
        Stream::Ticker,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stream::Trades => "trades",
            Stream::Orderbook => "orderbook",
            Stream::Liquidations => "liquidations",
            Stream::Ticker => "ticker",
        }
    }
}

impl std::fmt::Display for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Book side for orderbook/trade/liquidation events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Bid,
    Ask,
}

/// Trade or liquidation payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradeData {
    pub price: Option<f64>,
    pub amount: Option<f64>,
    pub side: Option<Side>,
}

/// Single orderbook row (one price level update, snapshot or delta).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderBookData {
    pub is_snapshot: Option<bool>,
    pub side: Option<Side>,
    pub price: Option<f64>,
    pub amount: Option<f64>,
}

/// Ticker payload. Every field is individually optional on the wire; the
/// sanitizer fills gaps from its carry-forward cache.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TickerData {
    pub funding_timestamp: Option<i64>,
    pub funding_rate: Option<f64>,
    pub predicted_funding_rate: Option<f64>,
    pub open_interest: Option<f64>,
    pub last_price: Option<f64>,
    pub index_price: Option<f64>,
    pub mark_price: Option<f64>,
}

/// The stream-specific body of an event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Payload {
    Trade(TradeData),
    Liquidation(TradeData),
    OrderBook(OrderBookData),
    Ticker(TickerData),
}

/// An immutable market-data event as it flows through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub stream: Stream,
    pub exchange: Option<String>,
    pub symbol: Option<String>,
    /// Microseconds since epoch, as recorded by the exchange. `None` when the
    /// source cannot supply one (pass-through in the time aligner).
    pub event_ts: Option<i64>,
    /// Microseconds since epoch, as recorded by the adapter on receipt.
    pub ingest_ts: i64,
    pub event_id: Option<String>,
    pub payload: Payload,
}

impl Event {
    pub fn trade_price(&self) -> Option<f64> {
        match &self.payload {
            Payload::Trade(t) | Payload::Liquidation(t) => t.price,
            _ => None,
        }
    }
}

// -----------------------------------------------------------------------------
// Engine state axes
// -----------------------------------------------------------------------------

/// Per-event field-validation verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sanitization {
    Accept,
    Repair,
    Quarantine,
}

impl Sanitization {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sanitization::Accept => "ACCEPT",
            Sanitization::Repair => "REPAIR",
            Sanitization::Quarantine => "QUARANTINE",
        }
    }
}

impl std::fmt::Display for Sanitization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Rolling-window stream-quality verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataTrust {
    Trusted,
    Degraded,
    Untrusted,
}

impl DataTrust {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataTrust::Trusted => "TRUSTED",
            DataTrust::Degraded => "DEGRADED",
            DataTrust::Untrusted => "UNTRUSTED",
        }
    }
}

impl std::fmt::Display for DataTrust {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Cross-source price-consensus verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Hypothesis {
    Valid,
    Weakening,
    Invalid,
}

impl Hypothesis {
    pub fn as_str(&self) -> &'static str {
        match self {
            Hypothesis::Valid => "VALID",
            Hypothesis::Weakening => "WEAKENING",
            Hypothesis::Invalid => "INVALID",
        }
    }
}

impl std::fmt::Display for Hypothesis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Final verdict handed to downstream trading logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    Allowed,
    Restricted,
    Halted,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Allowed => "ALLOWED",
            Decision::Restricted => "RESTRICTED",
            Decision::Halted => "HALTED",
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Snapshot of all four state-machine axes at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineState {
    pub sanitization: Sanitization,
    pub data_trust: DataTrust,
    pub hypothesis: Hypothesis,
    pub decision: Decision,
}

impl Default for EngineState {
    /// Initial values are the pessimistic variants on every axis.
    fn default() -> Self {
        Self {
            sanitization: Sanitization::Quarantine,
            data_trust: DataTrust::Degraded,
            hypothesis: Hypothesis::Weakening,
            decision: Decision::Restricted,
        }
    }
}
