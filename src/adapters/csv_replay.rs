// =============================================================================
// CSV Replay Adapter — merges four per-stream history files by ingest_ts
// =============================================================================
//
// Each of `trades`, `orderbook`, `liquidations`, `ticker` lives in its own
// `.csv` or `.csv.gz` file under `data_dir`. Rows are read lazily per stream
// and merged via a small k-way heap keyed on `local_timestamp` (our
// `ingest_ts`), tie-broken by read order, so the adapter never has to hold
// more than one pending row per stream in memory.
// =============================================================================

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use flate2::read::GzDecoder;
use tracing::info;

use crate::adapters::Adapter;
use crate::config::CsvAdapterConfig;
use crate::types::{Event, OrderBookData, Payload, Side, Stream, TickerData, TradeData};

fn field<'a>(headers: &csv::StringRecord, record: &'a csv::StringRecord, name: &str) -> Option<&'a str> {
    let idx = headers.iter().position(|h| h == name)?;
    record.get(idx).map(str::trim).filter(|s| !s.is_empty())
}

fn parse_f64(v: Option<&str>) -> Option<f64> {
    v.and_then(|s| s.parse::<f64>().ok()).filter(|f| f.is_finite())
}

fn parse_i64(v: Option<&str>) -> Option<i64> {
    v.and_then(|s| s.parse::<i64>().ok())
}

fn parse_bool(v: Option<&str>) -> Option<bool> {
    match v.map(|s| s.to_ascii_lowercase()) {
        Some(ref s) if s == "true" => Some(true),
        Some(ref s) if s == "false" => Some(false),
        _ => None,
    }
}

fn parse_side(v: Option<&str>) -> Option<Side> {
    match v.map(|s| s.to_ascii_lowercase()) {
        Some(ref s) if s == "bid" || s == "buy" => Some(Side::Bid),
        Some(ref s) if s == "ask" || s == "sell" => Some(Side::Ask),
        _ => None,
    }
}

fn required_columns(stream: Stream) -> &'static [&'static str] {
    match stream {
        Stream::Trades | Stream::Liquidations => {
            &["exchange", "symbol", "timestamp", "local_timestamp", "id", "side", "price", "amount"]
        }
        Stream::Orderbook => {
            &["exchange", "symbol", "timestamp", "local_timestamp", "is_snapshot", "side", "price", "amount"]
        }
        Stream::Ticker => &[
            "exchange",
            "symbol",
            "timestamp",
            "local_timestamp",
            "funding_timestamp",
            "funding_rate",
            "predicted_funding_rate",
            "open_interest",
            "last_price",
            "index_price",
            "mark_price",
        ],
    }
}

fn find_file(data_dir: &Path, stream: Stream) -> Result<PathBuf> {
    let name = stream.as_str();
    let gz = data_dir.join(format!("{name}.csv.gz"));
    if gz.exists() {
        return Ok(gz);
    }
    let plain = data_dir.join(format!("{name}.csv"));
    if plain.exists() {
        return Ok(plain);
    }
    anyhow::bail!("missing {name}.csv(.gz) under {}", data_dir.display())
}

fn row_to_event(stream: Stream, headers: &csv::StringRecord, record: &csv::StringRecord) -> Option<Event> {
    let exchange = field(headers, record, "exchange").map(String::from);
    let symbol = field(headers, record, "symbol").map(String::from);
    let event_ts = parse_i64(field(headers, record, "timestamp"));
    let ingest_ts = parse_i64(field(headers, record, "local_timestamp"))?;
    let event_id = field(headers, record, "id").map(String::from);

    let payload = match stream {
        Stream::Trades => Payload::Trade(TradeData {
            price: parse_f64(field(headers, record, "price")),
            amount: parse_f64(field(headers, record, "amount")),
            side: parse_side(field(headers, record, "side")),
        }),
        Stream::Liquidations => Payload::Liquidation(TradeData {
            price: parse_f64(field(headers, record, "price")),
            amount: parse_f64(field(headers, record, "amount")),
            side: parse_side(field(headers, record, "side")),
        }),
        Stream::Orderbook => Payload::OrderBook(OrderBookData {
            is_snapshot: parse_bool(field(headers, record, "is_snapshot")),
            side: parse_side(field(headers, record, "side")),
            price: parse_f64(field(headers, record, "price")),
            amount: parse_f64(field(headers, record, "amount")),
        }),
        Stream::Ticker => Payload::Ticker(TickerData {
            funding_timestamp: parse_i64(field(headers, record, "funding_timestamp")),
            funding_rate: parse_f64(field(headers, record, "funding_rate")),
            predicted_funding_rate: parse_f64(field(headers, record, "predicted_funding_rate")),
            open_interest: parse_f64(field(headers, record, "open_interest")),
            last_price: parse_f64(field(headers, record, "last_price")),
            index_price: parse_f64(field(headers, record, "index_price")),
            mark_price: parse_f64(field(headers, record, "mark_price")),
        }),
    };

    Some(Event {
        stream,
        exchange,
        symbol,
        event_ts,
        ingest_ts,
        event_id,
        payload,
    })
}

struct StreamReader {
    headers: csv::StringRecord,
    reader: csv::Reader<Box<dyn Read + Send>>,
}

impl StreamReader {
    fn open(stream: Stream, path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let source: Box<dyn Read + Send> = if path.extension().and_then(|e| e.to_str()) == Some("gz") {
            Box::new(GzDecoder::new(file))
        } else {
            Box::new(file)
        };
        let mut reader = csv::Reader::from_reader(source);
        let headers = reader
            .headers()
            .with_context(|| format!("failed to read header row of {}", path.display()))?
            .clone();
        for col in required_columns(stream) {
            if !headers.iter().any(|h| h == *col) {
                anyhow::bail!("{}: missing required column `{col}`", path.display());
            }
        }
        Ok(Self { headers, reader })
    }

    /// Read the next row that carries a usable `local_timestamp`. Rows
    /// missing it are skipped rather than stalling the whole stream.
    fn next_row(&mut self, stream: Stream) -> Result<Option<Event>> {
        let mut record = csv::StringRecord::new();
        loop {
            if !self.reader.read_record(&mut record)? {
                return Ok(None);
            }
            if let Some(ev) = row_to_event(stream, &self.headers, &record) {
                return Ok(Some(ev));
            }
        }
    }
}

/// Replays `{trades,orderbook,liquidations,ticker}.csv(.gz)` from a directory
/// as one ingest_ts-ordered sequence, pacing emission by `replay_speed`.
pub struct CsvAdapter {
    readers: Vec<StreamReader>,
    streams: Vec<Stream>,
    pending: Vec<Option<Event>>,
    heap: BinaryHeap<Reverse<(i64, u64, usize)>>,
    tie: u64,
    replay_speed: f64,
    max_replay_sleep_ms: u64,
    prev_ingest_us: Option<i64>,
    closed: bool,
}

impl CsvAdapter {
    pub fn open(data_dir: &Path, cfg: &CsvAdapterConfig) -> Result<Self> {
        let mut readers = Vec::with_capacity(4);
        let mut streams = Vec::with_capacity(4);
        for stream in Stream::ALL {
            let path = find_file(data_dir, stream)?;
            readers.push(StreamReader::open(stream, &path)?);
            streams.push(stream);
        }

        let mut pending: Vec<Option<Event>> = vec![None; readers.len()];
        let mut heap = BinaryHeap::new();
        let mut tie = 0u64;
        for idx in 0..readers.len() {
            if let Some(ev) = readers[idx].next_row(streams[idx])? {
                heap.push(Reverse((ev.ingest_ts, tie, idx)));
                pending[idx] = Some(ev);
                tie += 1;
            }
        }

        info!(dir = %data_dir.display(), "CSV replay adapter initialized");
        Ok(Self {
            readers,
            streams,
            pending,
            heap,
            tie,
            replay_speed: cfg.replay_speed,
            max_replay_sleep_ms: cfg.max_replay_sleep_ms,
            prev_ingest_us: None,
            closed: false,
        })
    }
}

#[async_trait]
impl Adapter for CsvAdapter {
    async fn next_event(&mut self) -> Result<Option<Event>> {
        if self.closed {
            return Ok(None);
        }
        let Some(Reverse((ingest_ts, _, idx))) = self.heap.pop() else {
            return Ok(None);
        };
        let ev = self.pending[idx]
            .take()
            .expect("heap entry must have a pending event");

        if self.replay_speed > 0.0 {
            if let Some(prev) = self.prev_ingest_us {
                let delta_us = ingest_ts - prev;
                if delta_us > 0 {
                    let sleep_ms = ((delta_us as f64 / 1_000.0) * self.replay_speed) as u64;
                    let sleep_ms = sleep_ms.min(self.max_replay_sleep_ms);
                    if sleep_ms > 0 {
                        tokio::time::sleep(Duration::from_millis(sleep_ms)).await;
                    }
                }
            }
        }
        self.prev_ingest_us = Some(ingest_ts);

        if let Some(next_ev) = self.readers[idx].next_row(self.streams[idx])? {
            self.heap.push(Reverse((next_ev.ingest_ts, self.tie, idx)));
            self.pending[idx] = Some(next_ev);
            self.tie += 1;
        }

        Ok(Some(ev))
    }

    async fn close(&mut self) {
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn cfg(replay_speed: f64) -> CsvAdapterConfig {
        CsvAdapterConfig {
            replay_speed,
            max_replay_sleep_ms: 1_000,
        }
    }

    fn write_csv(dir: &Path, name: &str, contents: &str) {
        let mut f = File::create(dir.join(name)).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
    }

    fn write_all_streams(dir: &Path) {
        write_csv(
            dir,
            "trades.csv",
            "exchange,symbol,timestamp,local_timestamp,id,side,price,amount\n\
             binance-futures,btcusdt,1000,1000,t1,buy,100.0,1.0\n\
             binance-futures,btcusdt,4000,4000,t2,sell,100.5,2.0\n",
        );
        write_csv(
            dir,
            "orderbook.csv",
            "exchange,symbol,timestamp,local_timestamp,is_snapshot,side,price,amount\n\
             binance-futures,btcusdt,2000,2000,true,bid,99.9,1.0\n",
        );
        write_csv(
            dir,
            "liquidations.csv",
            "exchange,symbol,timestamp,local_timestamp,id,side,price,amount\n",
        );
        write_csv(
            dir,
            "ticker.csv",
            "exchange,symbol,timestamp,local_timestamp,funding_timestamp,funding_rate,\
             predicted_funding_rate,open_interest,last_price,index_price,mark_price\n\
             binance-futures,btcusdt,3000,3000,3000,0.0001,0.0001,1000.0,100.1,100.1,100.1\n",
        );
    }

    #[test]
    fn missing_file_is_a_startup_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = CsvAdapter::open(dir.path(), &cfg(0.0)).unwrap_err();
        assert!(err.to_string().contains("trades.csv"));
    }

    #[test]
    fn missing_required_column_is_a_startup_error() {
        let dir = tempfile::tempdir().unwrap();
        write_csv(dir.path(), "trades.csv", "exchange,symbol,timestamp\n");
        write_csv(dir.path(), "orderbook.csv", "exchange,symbol,timestamp,local_timestamp,is_snapshot,side,price,amount\n");
        write_csv(dir.path(), "liquidations.csv", "exchange,symbol,timestamp,local_timestamp,id,side,price,amount\n");
        write_csv(
            dir.path(),
            "ticker.csv",
            "exchange,symbol,timestamp,local_timestamp,funding_timestamp,funding_rate,\
             predicted_funding_rate,open_interest,last_price,index_price,mark_price\n",
        );
        let err = CsvAdapter::open(dir.path(), &cfg(0.0)).unwrap_err();
        assert!(err.to_string().contains("missing required column"));
    }

    #[tokio::test]
    async fn merges_streams_in_ingest_ts_order() {
        let dir = tempfile::tempdir().unwrap();
        write_all_streams(dir.path());
        let mut adapter = CsvAdapter::open(dir.path(), &cfg(0.0)).unwrap();

        let mut order = Vec::new();
        while let Some(ev) = adapter.next_event().await.unwrap() {
            order.push((ev.ingest_ts, ev.stream));
        }
        assert_eq!(
            order,
            vec![
                (1000, Stream::Trades),
                (2000, Stream::Orderbook),
                (3000, Stream::Ticker),
                (4000, Stream::Trades),
            ]
        );
    }

    #[tokio::test]
    async fn close_stops_further_events() {
        let dir = tempfile::tempdir().unwrap();
        write_all_streams(dir.path());
        let mut adapter = CsvAdapter::open(dir.path(), &cfg(0.0)).unwrap();
        adapter.close().await;
        assert!(adapter.next_event().await.unwrap().is_none());
    }
}
