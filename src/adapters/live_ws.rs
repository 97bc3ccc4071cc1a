// =============================================================================
// Live WebSocket Adapter — combined-stream ingestion + REST snapshot/poller
// =============================================================================
//
// Binance futures' combined-stream endpoint multiplexes aggTrade, diff depth,
// forced orders, and mark price onto one socket, plus the 24h ticker; each
// frame is unwrapped by its `stream` suffix into the matching typed `Event`.
// Two background tasks feed the same unbounded channel `next_event` drains:
// the socket reader below, and a REST open-interest poller that emits
// synthetic TICKER events carrying whatever ticker fields the reader has
// cached so far. Neither task loop-reconnects internally on a terminal
// error -- the channel just closes (or carries one final `Err`) and the
// supervisor in `src/runner.rs` is the one that rebuilds the adapter from
// scratch via its own reconnect loop.
// =============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::adapters::Adapter;
use crate::config::WsAdapterConfig;
use crate::types::{Event, OrderBookData, Payload, Side, Stream, TickerData, TradeData};

const WS_BASE: &str = "wss://fstream.binance.com/stream";

fn now_us() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as i64
}

fn ms_to_us(ms: i64) -> i64 {
    ms * 1_000
}

fn str_f64(v: &Value) -> Option<f64> {
    match v {
        Value::String(s) => s.parse::<f64>().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

fn str_i64(v: &Value) -> Option<i64> {
    match v {
        Value::String(s) => s.parse::<i64>().ok(),
        Value::Number(n) => n.as_i64(),
        _ => None,
    }
}

fn parse_side(v: &Value) -> Option<Side> {
    match v.as_str()?.to_ascii_uppercase().as_str() {
        "BUY" | "BID" => Some(Side::Bid),
        "SELL" | "ASK" => Some(Side::Ask),
        _ => None,
    }
}

/// Last-known ticker fields, shared between the socket reader (mark price,
/// 24h ticker) and the open-interest poller so the poller's synthetic event
/// carries the best available picture rather than just the OI figure.
#[derive(Debug, Clone, Default)]
struct TickerFields {
    funding_timestamp: Option<i64>,
    funding_rate: Option<f64>,
    predicted_funding_rate: Option<f64>,
    open_interest: Option<f64>,
    last_price: Option<f64>,
    index_price: Option<f64>,
    mark_price: Option<f64>,
}

impl TickerFields {
    fn to_event(&self, exchange: &str, symbol: &str, ts_us: i64) -> Event {
        Event {
            stream: Stream::Ticker,
            exchange: Some(exchange.to_string()),
            symbol: Some(symbol.to_string()),
            event_ts: Some(ts_us),
            ingest_ts: ts_us,
            event_id: None,
            payload: Payload::Ticker(TickerData {
                funding_timestamp: self.funding_timestamp,
                funding_rate: self.funding_rate,
                predicted_funding_rate: self.predicted_funding_rate,
                open_interest: self.open_interest,
                last_price: self.last_price,
                index_price: self.index_price,
                mark_price: self.mark_price,
            }),
        }
    }
}

type Cache = Arc<Mutex<TickerFields>>;

fn depth_url(rest_base: &str, symbol: &str, limit: u32) -> String {
    format!("{rest_base}/fapi/v1/depth?symbol={symbol}&limit={limit}")
}

fn open_interest_url(rest_base: &str, symbol: &str) -> String {
    format!("{rest_base}/fapi/v1/openInterest?symbol={symbol}")
}

/// Fetch the REST depth snapshot and turn it into a run of snapshot
/// ORDERBOOK events -- one per price level, exactly as a replayed snapshot
/// phase from the historical adapter would look.
async fn fetch_depth_snapshot(
    client: &reqwest::Client,
    rest_base: &str,
    exchange: &str,
    symbol: &str,
    limit: u32,
) -> Result<Vec<Event>> {
    let url = depth_url(rest_base, &symbol.to_uppercase(), limit);
    let body: Value = client
        .get(&url)
        .send()
        .await
        .context("depth snapshot REST request failed")?
        .error_for_status()
        .context("depth snapshot REST request returned an error status")?
        .json()
        .await
        .context("failed to parse depth snapshot response")?;

    let ts = now_us();
    let event_id = body.get("lastUpdateId").map(|v| v.to_string());
    let mut events = Vec::new();
    for (side, key) in [(Side::Bid, "bids"), (Side::Ask, "asks")] {
        let levels = body[key].as_array().context("depth snapshot missing levels array")?;
        for level in levels {
            let price = level.get(0).and_then(str_f64);
            let amount = level.get(1).and_then(str_f64);
            events.push(Event {
                stream: Stream::Orderbook,
                exchange: Some(exchange.to_string()),
                symbol: Some(symbol.to_string()),
                event_ts: Some(ts),
                ingest_ts: ts,
                event_id: event_id.clone(),
                payload: Payload::OrderBook(OrderBookData {
                    is_snapshot: Some(true),
                    side: Some(side),
                    price,
                    amount,
                }),
            });
        }
    }
    Ok(events)
}

/// Convert one combined-stream frame's `data` payload into an `Event`,
/// updating `cache` in place for anything the ticker poller should see.
fn frame_to_event(
    stream_name: &str,
    data: &Value,
    exchange: &str,
    symbol: &str,
    cache: &Cache,
) -> Option<Event> {
    let event_ts = data.get("E").and_then(str_i64).map(ms_to_us).unwrap_or_else(now_us);

    if stream_name.ends_with("@aggTrade") {
        let price = data.get("p").and_then(str_f64);
        let amount = data.get("q").and_then(str_f64);
        // Binance marks the taker side with `m` (true = buyer is maker, so
        // the taker -- and therefore the trade's aggressive side -- sold).
        let side = data.get("m").and_then(Value::as_bool).map(|buyer_is_maker| {
            if buyer_is_maker {
                Side::Ask
            } else {
                Side::Bid
            }
        });
        return Some(Event {
            stream: Stream::Trades,
            exchange: Some(exchange.to_string()),
            symbol: Some(symbol.to_string()),
            event_ts: Some(event_ts),
            ingest_ts: now_us(),
            event_id: data.get("a").map(|v| v.to_string()),
            payload: Payload::Trade(TradeData { price, amount, side }),
        });
    }

    if stream_name.ends_with("@forceOrder") {
        let order = data.get("o")?;
        let price = order.get("p").and_then(str_f64);
        let amount = order.get("q").and_then(str_f64);
        let side = order.get("S").and_then(parse_side);
        let event_id = order.get("i").map(|v| v.to_string());
        return Some(Event {
            stream: Stream::Liquidations,
            exchange: Some(exchange.to_string()),
            symbol: Some(symbol.to_string()),
            event_ts: Some(event_ts),
            ingest_ts: now_us(),
            event_id,
            payload: Payload::Liquidation(TradeData { price, amount, side }),
        });
    }

    // depthUpdate frames carry many levels per message and expand to more
    // than one Event; the reader loop below routes those to `depth_events`
    // directly instead of through this single-Event function.

    if stream_name.ends_with("@markPrice@1s") || stream_name.ends_with("@markPrice") {
        let mut c = cache.lock();
        c.mark_price = data.get("p").and_then(str_f64).or(c.mark_price);
        c.index_price = data.get("i").and_then(str_f64).or(c.index_price);
        c.funding_rate = data.get("r").and_then(str_f64).or(c.funding_rate);
        c.funding_timestamp = data.get("T").and_then(str_i64).map(ms_to_us).or(c.funding_timestamp);
        return Some(c.to_event(exchange, symbol, event_ts));
    }

    if stream_name.ends_with("@ticker") {
        let mut c = cache.lock();
        c.last_price = data.get("c").and_then(str_f64).or(c.last_price);
        return Some(c.to_event(exchange, symbol, event_ts));
    }

    None
}

/// `depthUpdate` frames carry a whole batch of price levels; expand them
/// into one ORDERBOOK delta Event per level so the replayer sees the same
/// shape it would from a CSV row.
fn depth_events(data: &Value, exchange: &str, symbol: &str) -> Vec<Event> {
    let event_ts = data.get("E").and_then(str_i64).map(ms_to_us).unwrap_or_else(now_us);
    let event_id = data.get("u").map(|v| v.to_string());
    let mut out = Vec::new();
    for (side, key) in [(Side::Bid, "b"), (Side::Ask, "a")] {
        let Some(rows) = data.get(key).and_then(Value::as_array) else {
            continue;
        };
        for row in rows {
            out.push(Event {
                stream: Stream::Orderbook,
                exchange: Some(exchange.to_string()),
                symbol: Some(symbol.to_string()),
                event_ts: Some(event_ts),
                ingest_ts: now_us(),
                event_id: event_id.clone(),
                payload: Payload::OrderBook(OrderBookData {
                    is_snapshot: Some(false),
                    side: Some(side),
                    price: row.get(0).and_then(str_f64),
                    amount: row.get(1).and_then(str_f64),
                }),
            });
        }
    }
    out
}

async fn run_reader(
    exchange: String,
    symbol: String,
    url: String,
    tx: mpsc::UnboundedSender<Result<Event>>,
    cache: Cache,
) {
    let (ws_stream, _resp) = match connect_async(&url).await {
        Ok(pair) => pair,
        Err(e) => {
            let _ = tx.send(Err(anyhow::anyhow!("websocket connect failed: {e}")));
            return;
        }
    };
    info!(symbol = %symbol, "live websocket connected");
    let (_write, mut read) = ws_stream.split();

    loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => {
                let frame: Value = match serde_json::from_str(&text) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(error = %e, "failed to parse combined-stream frame");
                        continue;
                    }
                };
                let Some(stream_name) = frame.get("stream").and_then(Value::as_str) else {
                    continue;
                };
                let Some(data) = frame.get("data") else {
                    continue;
                };

                if stream_name.contains("@depth") {
                    for ev in depth_events(data, &exchange, &symbol) {
                        if tx.send(Ok(ev)).is_err() {
                            return;
                        }
                    }
                    continue;
                }

                if let Some(ev) = frame_to_event(stream_name, data, &exchange, &symbol, &cache) {
                    if tx.send(Ok(ev)).is_err() {
                        return;
                    }
                }
            }
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
            Some(Ok(Message::Close(frame))) => {
                debug!(?frame, "live websocket closed by server");
                let _ = tx.send(Err(anyhow::anyhow!("websocket closed by server")));
                return;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                error!(symbol = %symbol, error = %e, "live websocket read error");
                let _ = tx.send(Err(anyhow::anyhow!("websocket read error: {e}")));
                return;
            }
            None => {
                warn!(symbol = %symbol, "live websocket stream ended");
                let _ = tx.send(Err(anyhow::anyhow!("websocket stream ended")));
                return;
            }
        }
    }
}

async fn run_oi_poller(
    client: reqwest::Client,
    rest_base: String,
    exchange: String,
    symbol: String,
    interval_ms: u64,
    retry_ms: u64,
    tx: mpsc::UnboundedSender<Result<Event>>,
    cache: Cache,
    stop: Arc<AtomicBool>,
) {
    let url = open_interest_url(&rest_base, &symbol.to_uppercase());
    loop {
        if stop.load(Ordering::Relaxed) {
            return;
        }
        let mut ok = false;
        match client.get(&url).send().await {
            Ok(resp) => match resp.error_for_status() {
                Ok(resp) => match resp.json::<Value>().await {
                    Ok(body) => {
                        let oi = body.get("openInterest").and_then(str_f64);
                        let ts = now_us();
                        let ev = {
                            let mut c = cache.lock();
                            if oi.is_some() {
                                c.open_interest = oi;
                            }
                            c.to_event(&exchange, &symbol, ts)
                        };
                        if tx.send(Ok(ev)).is_err() {
                            return;
                        }
                        ok = true;
                    }
                    Err(e) => warn!(error = %e, "failed to parse open interest response"),
                },
                Err(e) => warn!(error = %e, "open interest REST call returned an error status"),
            },
            Err(e) => warn!(error = %e, "open interest REST request failed"),
        }
        // A failed fetch retries sooner (`poll_interval_ms`) instead of
        // waiting the full open-interest cadence before trying again.
        let delay = if ok { interval_ms } else { retry_ms };
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
}

/// Live combined-stream adapter for one exchange/symbol. Owns the reader and
/// poller tasks and the channel they feed; `close()` tears both down and
/// drains the channel so any in-flight `next_event` returns promptly.
pub struct LiveWsAdapter {
    rx: mpsc::UnboundedReceiver<Result<Event>>,
    reader: JoinHandle<()>,
    poller: JoinHandle<()>,
    stop: Arc<AtomicBool>,
    closed: bool,
}

impl LiveWsAdapter {
    pub async fn open(exchange: &str, symbol: &str, cfg: &WsAdapterConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build REST client")?;

        let snapshot = fetch_depth_snapshot(
            &client,
            &cfg.rest_url_base,
            exchange,
            symbol,
            cfg.depth_snapshot_limit,
        )
        .await
        .context("failed to fetch initial depth snapshot")?;

        let lower = symbol.to_lowercase();
        let url = format!(
            "{WS_BASE}?streams={lower}@aggTrade/{lower}@depth@100ms/{lower}@forceOrder/{lower}@markPrice@1s/{lower}@ticker"
        );

        let (tx, mut rx) = mpsc::unbounded_channel::<Result<Event>>();
        for ev in snapshot {
            // The channel was just created and nothing else has sent to it
            // yet, so these are guaranteed to be drained before any live
            // frame the reader task produces.
            let _ = tx.send(Ok(ev));
        }

        let cache: Cache = Arc::new(Mutex::new(TickerFields::default()));
        let stop = Arc::new(AtomicBool::new(false));

        let reader = tokio::spawn(run_reader(
            exchange.to_string(),
            symbol.to_string(),
            url,
            tx.clone(),
            cache.clone(),
        ));

        let poller = tokio::spawn(run_oi_poller(
            client,
            cfg.rest_url_base.clone(),
            exchange.to_string(),
            symbol.to_string(),
            cfg.open_interest_interval_ms,
            cfg.poll_interval_ms,
            tx,
            cache,
            stop.clone(),
        ));

        // A connect failure inside `run_reader` surfaces as an `Err` on the
        // first `next_event()` call rather than failing `open()` itself --
        // the REST snapshot above is the only part of startup we block on
        // here, since it's the one piece the rest of the adapter depends on
        // having upfront.
        Ok(Self {
            rx,
            reader,
            poller,
            stop,
            closed: false,
        })
    }
}

#[async_trait]
impl Adapter for LiveWsAdapter {
    async fn next_event(&mut self) -> Result<Option<Event>> {
        if self.closed {
            return Ok(None);
        }
        match self.rx.recv().await {
            Some(Ok(ev)) => Ok(Some(ev)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    async fn close(&mut self) {
        self.closed = true;
        self.stop.store(true, Ordering::Relaxed);
        self.reader.abort();
        self.poller.abort();
        self.rx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agg_trade_frame_becomes_a_trade_event() {
        let cache: Cache = Arc::new(Mutex::new(TickerFields::default()));
        let data: Value = serde_json::json!({
            "e": "aggTrade", "E": 1_700_000_000_000i64, "a": 12345,
            "s": "BTCUSDT", "p": "100.50", "q": "0.01", "m": false
        });
        let ev = frame_to_event("btcusdt@aggTrade", &data, "binance-futures", "btcusdt", &cache)
            .expect("trade event");
        assert_eq!(ev.stream, Stream::Trades);
        assert_eq!(ev.event_id.as_deref(), Some("12345"));
        match ev.payload {
            Payload::Trade(d) => {
                assert_eq!(d.price, Some(100.50));
                assert_eq!(d.side, Some(Side::Bid));
            }
            _ => panic!("expected trade payload"),
        }
    }

    #[test]
    fn depth_update_expands_to_one_event_per_level() {
        let data: Value = serde_json::json!({
            "e": "depthUpdate", "E": 1_700_000_000_000i64, "u": 555,
            "b": [["100.0", "1.0"], ["99.5", "2.0"]],
            "a": [["100.5", "1.5"]]
        });
        let events = depth_events(&data, "binance-futures", "btcusdt");
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| e.event_id.as_deref() == Some("555")));
    }

    #[test]
    fn mark_price_frame_updates_the_shared_cache() {
        let cache: Cache = Arc::new(Mutex::new(TickerFields::default()));
        let data: Value = serde_json::json!({
            "e": "markPriceUpdate", "E": 1_700_000_000_000i64, "s": "BTCUSDT",
            "p": "100.1", "i": "100.05", "r": "0.0001", "T": 1_700_003_600_000i64
        });
        let ev = frame_to_event("btcusdt@markPrice@1s", &data, "binance-futures", "btcusdt", &cache)
            .expect("ticker event");
        assert_eq!(ev.stream, Stream::Ticker);
        assert_eq!(cache.lock().mark_price, Some(100.1));
        match ev.payload {
            Payload::Ticker(d) => assert_eq!(d.mark_price, Some(100.1)),
            _ => panic!("expected ticker payload"),
        }
    }

    #[test]
    fn force_order_frame_becomes_a_liquidation_event() {
        let cache: Cache = Arc::new(Mutex::new(TickerFields::default()));
        let data: Value = serde_json::json!({
            "e": "forceOrder", "E": 1_700_000_000_000i64,
            "o": { "s": "BTCUSDT", "S": "SELL", "p": "99.0", "q": "2.0", "i": 77 }
        });
        let ev = frame_to_event("btcusdt@forceOrder", &data, "binance-futures", "btcusdt", &cache)
            .expect("liquidation event");
        assert_eq!(ev.stream, Stream::Liquidations);
        assert_eq!(ev.event_id.as_deref(), Some("77"));
        match ev.payload {
            Payload::Liquidation(d) => {
                assert_eq!(d.price, Some(99.0));
                assert_eq!(d.side, Some(Side::Ask));
            }
            _ => panic!("expected liquidation payload"),
        }
    }
}
