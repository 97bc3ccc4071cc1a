// =============================================================================
// DataTrustPolicy — rolling-window stream-quality scoring
// =============================================================================
//
// Two windows per stream, both trimmed to `window_events` and backed by
// running sums so every rate is an O(1) lookup rather than a window scan:
// the alignment window (emitted/late/forced per `TimeAligner` batch) and the
// sanitization window (a 0/1 quarantine flag per event). Book-derived and
// trade-derived checks layer on top per-event.
// =============================================================================

use std::collections::VecDeque;

use crate::config::DataTrustConfig;
use crate::engine::orderbook::BookTop;
use crate::engine::time_aligner::AlignStats;
use crate::types::{DataTrust, Event, Sanitization, Stream};

fn stream_idx(stream: Stream) -> usize {
    match stream {
        Stream::Trades => 0,
        Stream::Orderbook => 1,
        Stream::Liquidations => 2,
        Stream::Ticker => 3,
    }
}

struct AlignSample {
    emitted: u64,
    late: u64,
    forced: u64,
}

struct StreamTrust {
    window_events: usize,
    align_window: VecDeque<AlignSample>,
    emitted_sum: u64,
    late_sum: u64,
    forced_sum: u64,
    last_buffer_len: usize,
    san_window: VecDeque<bool>,
    quarantine_sum: usize,
    last_trade_price: Option<f64>,
    verdict: DataTrust,
    reason: String,
}

impl StreamTrust {
    fn new(window_events: usize) -> Self {
        Self {
            window_events,
            align_window: VecDeque::new(),
            emitted_sum: 0,
            late_sum: 0,
            forced_sum: 0,
            last_buffer_len: 0,
            san_window: VecDeque::new(),
            quarantine_sum: 0,
            last_trade_price: None,
            verdict: DataTrust::Trusted,
            reason: String::new(),
        }
    }

    fn push_align(&mut self, stats: &AlignStats) {
        self.align_window.push_back(AlignSample {
            emitted: stats.emitted,
            late: stats.late,
            forced: stats.forced_flush as u64,
        });
        self.emitted_sum += stats.emitted;
        self.late_sum += stats.late;
        self.forced_sum += stats.forced_flush as u64;
        while self.align_window.len() > self.window_events {
            if let Some(old) = self.align_window.pop_front() {
                self.emitted_sum -= old.emitted;
                self.late_sum -= old.late;
                self.forced_sum -= old.forced;
            }
        }
        self.last_buffer_len = stats.buffer_len;
    }

    fn push_sanitization(&mut self, quarantined: bool) {
        self.san_window.push_back(quarantined);
        if quarantined {
            self.quarantine_sum += 1;
        }
        while self.san_window.len() > self.window_events {
            if let Some(old) = self.san_window.pop_front() {
                if old {
                    self.quarantine_sum -= 1;
                }
            }
        }
    }

    fn q_rate(&self) -> f64 {
        if self.san_window.is_empty() {
            0.0
        } else {
            self.quarantine_sum as f64 / self.san_window.len() as f64
        }
    }

    fn late_rate(&self) -> f64 {
        self.late_sum as f64 / self.emitted_sum.max(1) as f64
    }

    fn forced_rate(&self) -> f64 {
        self.forced_sum as f64 / self.emitted_sum.max(1) as f64
    }
}

/// Scores per-stream and global data quality from alignment batches,
/// sanitization verdicts, and book/trade anomalies.
pub struct DataTrustPolicy {
    config: DataTrustConfig,
    streams: [StreamTrust; 4],
}

impl DataTrustPolicy {
    pub fn new(config: DataTrustConfig) -> Self {
        let window_events = config.window_events;
        Self {
            config,
            streams: [
                StreamTrust::new(window_events),
                StreamTrust::new(window_events),
                StreamTrust::new(window_events),
                StreamTrust::new(window_events),
            ],
        }
    }

    /// Absorb one `TimeAligner::align` result for `stream`.
    pub fn on_batch(&mut self, stream: Stream, stats: &AlignStats) {
        self.streams[stream_idx(stream)].push_align(stats);
    }

    /// Score one event after sanitization. `book_top` is the current
    /// top-of-book for the engine's single symbol, used for ORDERBOOK and
    /// TRADES checks regardless of which stream `ev` belongs to.
    pub fn on_event(
        &mut self,
        stream: Stream,
        san_state: Sanitization,
        ev: &Event,
        book_top: BookTop,
    ) -> (DataTrust, String) {
        let idx = stream_idx(stream);

        let quarantined = san_state == Sanitization::Quarantine;
        self.streams[idx].push_sanitization(quarantined);

        let q_rate = self.streams[idx].q_rate();
        let late_rate = self.streams[idx].late_rate();
        let forced_rate = self.streams[idx].forced_rate();
        let buf = self.streams[idx].last_buffer_len;

        let mut untrusted = Vec::new();
        let mut degraded = Vec::new();

        if q_rate >= self.config.quarantine_untrusted_rate {
            untrusted.push(format!("quarantine_rate={:.3}", q_rate));
        }
        if late_rate >= self.config.late_untrusted_rate {
            untrusted.push(format!("late_rate={:.3}", late_rate));
        }
        if forced_rate >= self.config.forced_flush_untrusted_rate {
            untrusted.push(format!("forced_rate={:.3}", forced_rate));
        }
        if buf >= self.config.buffer_len_untrusted {
            untrusted.push(format!("buffer_len={}", buf));
        }

        if quarantined {
            degraded.push("quarantine_event".to_string());
        }
        if late_rate >= self.config.late_degraded_rate {
            degraded.push(format!("late_rate={:.3}", late_rate));
        }
        if forced_rate >= self.config.forced_flush_degraded_rate {
            degraded.push(format!("forced_rate={:.3}", forced_rate));
        }
        if buf >= self.config.buffer_len_degraded {
            degraded.push(format!("buffer_len={}", buf));
        }

        if stream == Stream::Orderbook {
            if book_top.is_crossed() {
                untrusted.push("crossed_market".to_string());
            }
            if let Some(spread_bps) = book_top.spread_bps() {
                if spread_bps > self.config.spread_explode_bps {
                    degraded.push(format!("spread_explode_bps={:.2}", spread_bps));
                }
            }
        }

        if stream == Stream::Trades {
            if let Some(price) = ev.trade_price() {
                if let Some(mid) = book_top.mid {
                    if mid > 0.0 {
                        let diff_bps = (price - mid).abs() / mid * 10_000.0;
                        if diff_bps >= self.config.fat_finger_untrusted_bps {
                            untrusted.push(format!("fat_finger_bps={:.2}", diff_bps));
                        } else if diff_bps >= self.config.fat_finger_degraded_bps {
                            degraded.push(format!("fat_finger_bps={:.2}", diff_bps));
                        }
                    }
                }
                if let Some(last) = self.streams[idx].last_trade_price {
                    if last > 0.0 {
                        let jump_bps = (price - last).abs() / last * 10_000.0;
                        if jump_bps >= self.config.trade_jump_degraded_bps {
                            degraded.push(format!("trade_jump_bps={:.2}", jump_bps));
                        }
                    }
                }
                self.streams[idx].last_trade_price = Some(price);
            }
        }

        let verdict = if !untrusted.is_empty() {
            DataTrust::Untrusted
        } else if !degraded.is_empty() {
            DataTrust::Degraded
        } else {
            DataTrust::Trusted
        };

        let mut all_reasons = untrusted;
        all_reasons.extend(degraded);
        let reason = all_reasons.join(",");

        self.streams[idx].verdict = verdict;
        self.streams[idx].reason = reason;

        // The engine acts on the cross-stream picture, not one stream in
        // isolation, so `on_event` hands back the reduced global verdict
        // rather than just the stream it was given.
        self.global()
    }

    /// Reduce all four per-stream verdicts into one global verdict.
    pub fn global(&self) -> (DataTrust, String) {
        let untrusted: Vec<&str> = self
            .streams
            .iter()
            .filter(|s| s.verdict == DataTrust::Untrusted)
            .map(|s| s.reason.as_str())
            .filter(|r| !r.is_empty())
            .collect();
        if !untrusted.is_empty() {
            return (DataTrust::Untrusted, untrusted.join(","));
        }

        let degraded: Vec<&str> = self
            .streams
            .iter()
            .filter(|s| s.verdict == DataTrust::Degraded)
            .map(|s| s.reason.as_str())
            .filter(|r| !r.is_empty())
            .collect();
        if !degraded.is_empty() {
            return (DataTrust::Degraded, degraded.join(","));
        }

        (DataTrust::Trusted, String::new())
    }
}
