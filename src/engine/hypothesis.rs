// =============================================================================
// HypothesisPolicy — cross-source price consensus with stabilization hysteresis
// =============================================================================

use crate::config::HypothesisConfig;
use crate::engine::orderbook::BookTop;
use crate::types::{Event, Hypothesis, Payload};

fn admissible(v: Option<f64>) -> Option<f64> {
    v.filter(|x| x.is_finite() && *x > 0.0)
}

/// Cross-source price witnesses and the stabilization state machine that
/// turns their divergence into a VALID/WEAKENING/INVALID verdict.
pub struct HypothesisPolicy {
    weak_price_diverge_bps: f64,
    invalid_price_diverge_bps: f64,
    stable_min_duration_us: i64,

    last_mark: Option<f64>,
    last_index: Option<f64>,
    last_last: Option<f64>,

    state: Hypothesis,
    stable_since: Option<i64>,
}

impl HypothesisPolicy {
    pub fn new(config: &HypothesisConfig) -> Self {
        Self {
            weak_price_diverge_bps: config.weak_price_diverge_bps,
            invalid_price_diverge_bps: config.invalid_price_diverge_bps,
            stable_min_duration_us: config.stable_min_duration_ms * 1_000,
            last_mark: None,
            last_index: None,
            last_last: None,
            state: Hypothesis::Invalid,
            stable_since: None,
        }
    }

    /// Evaluate one event against the current set of price witnesses.
    pub fn verify(&mut self, ev: &Event, now_us: i64, book_top: BookTop) -> (Hypothesis, String) {
        if let Payload::Ticker(d) = &ev.payload {
            if d.mark_price.is_some() {
                self.last_mark = d.mark_price;
            }
            if d.index_price.is_some() {
                self.last_index = d.index_price;
            }
            if d.last_price.is_some() {
                self.last_last = d.last_price;
            }
        }

        let mut witnesses: Vec<(&'static str, f64)> = Vec::with_capacity(5);
        if let Some(v) = admissible(book_top.mid) {
            witnesses.push(("lob_mid", v));
        }
        if let Some(v) = admissible(self.last_mark) {
            witnesses.push(("mark", v));
        }
        if let Some(v) = admissible(self.last_index) {
            witnesses.push(("index", v));
        }
        if let Some(v) = admissible(self.last_last) {
            witnesses.push(("last", v));
        }
        match &ev.payload {
            Payload::Trade(_) => {
                if let Some(v) = admissible(ev.trade_price()) {
                    witnesses.push(("trade", v));
                }
            }
            Payload::Liquidation(_) => {
                if let Some(v) = admissible(ev.trade_price()) {
                    witnesses.push(("liquidations", v));
                }
            }
            _ => {}
        }

        if witnesses.len() < 4 {
            return (
                self.state,
                format!("insufficient_sources={}", witnesses.len()),
            );
        }

        let mut worst_bps = 0.0_f64;
        let mut worst_pair = String::new();
        for i in 0..witnesses.len() {
            for j in (i + 1)..witnesses.len() {
                let (key_i, p_i) = witnesses[i];
                let (key_j, p_j) = witnesses[j];
                let diff_bps = (p_i - p_j).abs() / p_j * 10_000.0;
                if diff_bps > worst_bps {
                    worst_bps = diff_bps;
                    worst_pair = format!("{}~{}", key_i, key_j);
                }
            }
        }

        if worst_bps >= self.invalid_price_diverge_bps {
            self.state = Hypothesis::Invalid;
            self.stable_since = None;
            return (
                self.state,
                format!(
                    "invalid_price_diverge={:.2} worst_pair={}",
                    worst_bps, worst_pair
                ),
            );
        }
        if worst_bps >= self.weak_price_diverge_bps {
            self.state = Hypothesis::Weakening;
            self.stable_since = None;
            return (
                self.state,
                format!(
                    "weak_price_diverge={:.2} worst_pair={}",
                    worst_bps, worst_pair
                ),
            );
        }

        let stable_since = *self.stable_since.get_or_insert(now_us);
        let elapsed = now_us - stable_since;
        if elapsed < self.stable_min_duration_us {
            return (
                self.state,
                format!("stabilizing elapsed_us={} worst_bps={:.2}", elapsed, worst_bps),
            );
        }
        self.state = Hypothesis::Valid;
        (self.state, format!("stable worst_bps={:.2}", worst_bps))
    }
}
