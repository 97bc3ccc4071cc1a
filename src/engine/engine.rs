// =============================================================================
// Engine — wires C1..C8 into ingest/set_decision/tick/shutdown
// =============================================================================
//
// Every event passes through the same pipeline: time alignment, sanitization,
// order-book replay (ORDERBOOK only), data-trust scoring, hypothesis
// verification, and finally the decision reducer. `set_decision` is the only
// place a decision-dwell span opens or closes, so every transition -- event
// driven or stall driven -- produces exactly one DECISION record for the span
// it closes and one STATE_TRANSITION record for the state it enters.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::engine::data_trust::DataTrustPolicy;
use crate::engine::decision;
use crate::engine::dwell::{EngineStats, EngineSummary};
use crate::engine::hypothesis::HypothesisPolicy;
use crate::engine::replayer::OrderBookReplayer;
use crate::engine::sanitizer::Sanitizer;
use crate::engine::time_aligner::TimeAligner;
use crate::output::OutputWriter;
use crate::types::{Decision, EngineState, Event, Sanitization, Stream};

/// Owns the full C1..C8 pipeline for one exchange/symbol and drives the four
/// state-machine axes to a single [`Decision`].
pub struct Engine {
    aligner: TimeAligner,
    sanitizer: Sanitizer,
    replayer: OrderBookReplayer,
    trust: DataTrustPolicy,
    hypothesis: HypothesisPolicy,

    state: EngineState,
    stats: EngineStats,
    output: Arc<OutputWriter>,

    last_ingest_us_by_stream: HashMap<Stream, i64>,
    stall_threshold_us: HashMap<Stream, i64>,

    decision_entry_us: i64,
    decision_reason: String,
}

impl Engine {
    pub fn new(config: &EngineConfig, output: Arc<OutputWriter>, now_us: i64) -> Self {
        let aligner = TimeAligner::new(
            config.time_alignment.allowed_lateness_ms * 1_000,
            config.time_alignment.max_buffer_ms * 1_000,
        );
        let sanitizer = Sanitizer::new(config.exchange.clone(), config.symbol.clone());
        let replayer = OrderBookReplayer::new(config.engine.orderbook_depth_limit);
        let trust = DataTrustPolicy::new(config.data_trust.clone());
        let hypothesis = HypothesisPolicy::new(&config.hypothesis);
        let state = EngineState::default();
        let stats = EngineStats::new(
            now_us,
            state.sanitization,
            state.data_trust,
            state.hypothesis,
            state.decision,
        );

        let stall_threshold_us = Stream::ALL
            .iter()
            .map(|s| (*s, config.stall_threshold_us(*s)))
            .collect();

        Self {
            aligner,
            sanitizer,
            replayer,
            trust,
            hypothesis,
            state,
            stats,
            output,
            last_ingest_us_by_stream: HashMap::new(),
            stall_threshold_us,
            decision_entry_us: now_us,
            decision_reason: String::new(),
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Feed one raw event from an adapter through the pipeline.
    pub fn ingest(&mut self, ev: Event, now_us: i64) {
        let stream = ev.stream;
        self.last_ingest_us_by_stream.insert(stream, now_us);

        let (aligned, align_stats) = self.aligner.align(ev);
        self.trust.on_batch(stream, &align_stats);

        for aligned_ev in aligned {
            self.process_one(aligned_ev, now_us);
        }
    }

    fn process_one(&mut self, ev: Event, now_us: i64) {
        // The book, the trust policy, and the hypothesis policy don't all
        // look at the same event: the replayer and trust policy see the
        // event as it arrived (pre-repair), while the hypothesis policy
        // sees the sanitizer's repaired copy. This mirrors how the two
        // policies are meant to answer different questions -- trust scores
        // what the source actually sent; hypothesis wants the best estimate
        // of price.
        let raw_ev = ev.clone();
        let (san_state, fixed_ev, san_reason) = self.sanitizer.sanitize(ev);
        self.state.sanitization = san_state;
        self.stats.sanitization_mut().switch(san_state.as_str(), now_us);

        if raw_ev.stream == Stream::Orderbook && san_state != Sanitization::Quarantine {
            self.replayer.on_event(&raw_ev, now_us);
        }
        let book_top = self.replayer.snapshot();

        let (trust_state, trust_reason) =
            self.trust
                .on_event(raw_ev.stream, san_state, &raw_ev, book_top);
        self.state.data_trust = trust_state;
        self.stats.data_trust_mut().switch(trust_state.as_str(), now_us);

        let (hypo_state, hypo_reason) = self.hypothesis.verify(&fixed_ev, now_us, book_top);
        self.state.hypothesis = hypo_state;
        self.stats.hypothesis_mut().switch(hypo_state.as_str(), now_us);

        let trigger = join_trigger(&[
            ("hypothesis", &hypo_reason),
            ("data_trust", &trust_reason),
            ("sanitization", &san_reason),
        ]);
        self.set_decision(now_us, trigger);

        self.stats
            .on_event(san_state, trust_state, hypo_state, self.state.decision);
    }

    /// Recompute the decision from the current trust/hypothesis state. Opens
    /// and closes decision-dwell spans and always emits a STATE_TRANSITION.
    fn set_decision(&mut self, now_us: i64, trigger: String) {
        let new_decision = decision::decide(self.state.data_trust, self.state.hypothesis);

        if new_decision != self.state.decision || trigger != self.decision_reason {
            let duration_ms = (now_us - self.decision_entry_us).max(0) / 1_000;
            self.output.write_decision(
                now_us,
                self.state.decision.as_str(),
                &self.decision_reason,
                duration_ms,
            );
            self.decision_entry_us = now_us;
            self.decision_reason = trigger.clone();
        }

        self.state.decision = new_decision;
        self.stats.decision_mut().switch(new_decision.as_str(), now_us);

        self.output.write_transition(
            now_us,
            self.state.data_trust.as_str(),
            self.state.hypothesis.as_str(),
            self.state.decision.as_str(),
            &trigger,
        );
    }

    /// Periodic heartbeat, independent of event arrival. Forces the pipeline
    /// to DEGRADED/WEAKENING if any stream has gone quiet past its
    /// stall threshold.
    pub fn tick(&mut self, now_us: i64) {
        let stalled: Vec<&'static str> = Stream::ALL
            .iter()
            .filter(|s| {
                let threshold = self.stall_threshold_us.get(*s).copied().unwrap_or(i64::MAX);
                match self.last_ingest_us_by_stream.get(*s) {
                    // Never seen a single event for this stream -- treat it
                    // as stalled from the start rather than overflow on the
                    // unbounded gap.
                    None => true,
                    Some(last) => now_us.saturating_sub(*last) > threshold,
                }
            })
            .map(|s| s.as_str())
            .collect();

        if stalled.is_empty() {
            return;
        }

        self.state.data_trust = crate::types::DataTrust::Degraded;
        self.state.hypothesis = crate::types::Hypothesis::Weakening;
        self.stats
            .data_trust_mut()
            .switch(self.state.data_trust.as_str(), now_us);
        self.stats
            .hypothesis_mut()
            .switch(self.state.hypothesis.as_str(), now_us);

        let trigger = format!("stall:{}", stalled.join(","));
        self.set_decision(now_us, trigger);

        self.stats.on_event(
            self.state.sanitization,
            self.state.data_trust,
            self.state.hypothesis,
            self.state.decision,
        );
    }

    /// Close the in-flight decision span and write the run summary.
    pub fn shutdown(&mut self, now_us: i64) -> EngineSummary {
        let duration_ms = (now_us - self.decision_entry_us).max(0) / 1_000;
        self.output.write_decision(
            now_us,
            self.state.decision.as_str(),
            &self.decision_reason,
            duration_ms,
        );
        let summary = self.stats.finalize(now_us);
        self.output.write_summary(&summary);
        summary
    }
}

/// Join the non-empty reasons in fixed precedence order -- hypothesis, then
/// data-trust, then sanitization -- each tagged with its axis name.
fn join_trigger(reasons: &[(&str, &str)]) -> String {
    reasons
        .iter()
        .filter(|(_, reason)| !reason.is_empty())
        .map(|(axis, reason)| format!("{}:{}", axis, reason))
        .collect::<Vec<_>>()
        .join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OrderBookData, Payload, Side, TickerData, TradeData};

    fn test_config() -> EngineConfig {
        use crate::config::*;
        EngineConfig {
            paths: PathsConfig {
                data_root: "/tmp/data".into(),
                phase: String::new(),
                log_root: "/tmp/logs".into(),
                output_root: "/tmp/out".into(),
            },
            exchange: "binance-futures".into(),
            symbol: "btcusdt".into(),
            engine: EngineTunables {
                tick_interval_ms: 1_000,
                trades_stall_threshold_ms: 5_000,
                orderbook_stall_threshold_ms: 5_000,
                liquidations_stall_threshold_ms: 5_000,
                ticker_stall_threshold_ms: 5_000,
                orderbook_depth_limit: 50,
            },
            time_alignment: TimeAlignmentConfig {
                allowed_lateness_ms: 0,
                max_buffer_ms: 0,
            },
            data_trust: DataTrustConfig::default(),
            hypothesis: HypothesisConfig {
                weak_price_diverge_bps: 10.0,
                invalid_price_diverge_bps: 50.0,
                stable_min_duration_ms: 0,
            },
            adapters: AdaptersConfig::default(),
        }
    }

    fn orderbook_ev(ts: i64, is_snapshot: bool, side: Side, price: f64, amount: f64) -> Event {
        Event {
            stream: Stream::Orderbook,
            exchange: Some("binance-futures".into()),
            symbol: Some("btcusdt".into()),
            event_ts: Some(ts),
            ingest_ts: ts,
            event_id: None,
            payload: Payload::OrderBook(OrderBookData {
                is_snapshot: Some(is_snapshot),
                side: Some(side),
                price: Some(price),
                amount: Some(amount),
            }),
        }
    }

    fn ticker_ev(ts: i64, mark: f64, index: f64, last: f64) -> Event {
        Event {
            stream: Stream::Ticker,
            exchange: Some("binance-futures".into()),
            symbol: Some("btcusdt".into()),
            event_ts: Some(ts),
            ingest_ts: ts,
            event_id: None,
            payload: Payload::Ticker(TickerData {
                funding_timestamp: Some(ts),
                funding_rate: Some(0.0001),
                predicted_funding_rate: Some(0.0001),
                open_interest: Some(1_000.0),
                last_price: Some(last),
                index_price: Some(index),
                mark_price: Some(mark),
            }),
        }
    }

    fn trade_ev(ts: i64, price: f64) -> Event {
        Event {
            stream: Stream::Trades,
            exchange: Some("binance-futures".into()),
            symbol: Some("btcusdt".into()),
            event_ts: Some(ts),
            ingest_ts: ts,
            event_id: None,
            payload: Payload::Trade(TradeData {
                price: Some(price),
                amount: Some(1.0),
                side: Some(Side::Bid),
            }),
        }
    }

    #[test]
    fn crossed_market_halts_the_engine() {
        let dir = tempfile::tempdir().unwrap();
        let output = Arc::new(OutputWriter::open(dir.path()).unwrap());
        let mut engine = Engine::new(&test_config(), output, 0);

        engine.ingest(orderbook_ev(1, true, Side::Bid, 100.0, 1.0), 1);
        engine.ingest(orderbook_ev(2, true, Side::Ask, 99.0, 1.0), 2);

        assert_eq!(engine.state().data_trust, crate::types::DataTrust::Untrusted);
        assert_eq!(engine.state().decision, Decision::Halted);
    }

    #[test]
    fn consensus_forms_after_four_corroborating_witnesses() {
        let dir = tempfile::tempdir().unwrap();
        let output = Arc::new(OutputWriter::open(dir.path()).unwrap());
        let mut engine = Engine::new(&test_config(), output, 0);

        engine.ingest(orderbook_ev(1, true, Side::Bid, 100.0, 1.0), 1);
        engine.ingest(orderbook_ev(2, true, Side::Ask, 100.1, 1.0), 2);
        engine.ingest(ticker_ev(3, 100.05, 100.05, 100.05), 3);
        engine.ingest(trade_ev(4, 100.05), 4);

        assert_eq!(engine.state().hypothesis, crate::types::Hypothesis::Valid);
        assert_eq!(engine.state().decision, Decision::Allowed);
    }

    #[test]
    fn a_stalled_stream_forces_restricted_on_tick() {
        let dir = tempfile::tempdir().unwrap();
        let output = Arc::new(OutputWriter::open(dir.path()).unwrap());
        let mut config = test_config();
        config.engine.trades_stall_threshold_ms = 1;
        config.engine.orderbook_stall_threshold_ms = 1;
        config.engine.liquidations_stall_threshold_ms = 1;
        config.engine.ticker_stall_threshold_ms = 1;
        let mut engine = Engine::new(&config, output, 0);

        engine.tick(10_000);

        assert_eq!(engine.state().data_trust, crate::types::DataTrust::Degraded);
        assert_eq!(engine.state().hypothesis, crate::types::Hypothesis::Weakening);
        assert_eq!(engine.state().decision, Decision::Restricted);
    }

    #[test]
    fn a_stall_tick_counts_toward_the_event_tallies() {
        let dir = tempfile::tempdir().unwrap();
        let output = Arc::new(OutputWriter::open(dir.path()).unwrap());
        let mut config = test_config();
        config.engine.trades_stall_threshold_ms = 1;
        config.engine.orderbook_stall_threshold_ms = 1;
        config.engine.liquidations_stall_threshold_ms = 1;
        config.engine.ticker_stall_threshold_ms = 1;
        let mut engine = Engine::new(&config, output, 0);

        engine.tick(10_000);
        let summary = engine.shutdown(20_000);

        assert_eq!(summary.total_events, 1);
        assert_eq!(summary.events_by_state.decision.get("RESTRICTED").copied(), Some(1));
    }

    #[test]
    fn shutdown_closes_the_in_flight_decision_span() {
        let dir = tempfile::tempdir().unwrap();
        let output = Arc::new(OutputWriter::open(dir.path()).unwrap());
        let mut engine = Engine::new(&test_config(), output, 0);

        engine.ingest(trade_ev(1, 100.0), 100);
        let summary = engine.shutdown(1_000);
        assert_eq!(summary.total_events, 1);

        let decisions = std::fs::read_to_string(dir.path().join("decisions.jsonl")).unwrap();
        assert!(!decisions.is_empty());
    }
}
