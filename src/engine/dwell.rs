// =============================================================================
// DwellTracker & EngineStats — per-state dwell times, entry counts, totals
// =============================================================================

use std::collections::HashMap;

use serde::{Serialize, Deserialize};

use crate::types::{DataTrust, Decision, Hypothesis, Sanitization};

/// Accumulated time and entry count for one label on one axis.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LabelTotals {
    pub total_us: i64,
    pub entries: u64,
}

/// Microsecond totals and per-entry averages, keyed by label, for a finished
/// or in-progress axis.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DwellSnapshot {
    pub total_us: HashMap<String, i64>,
    pub avg_us: HashMap<String, f64>,
}

/// Tracks how long a single state-machine axis spends in each label.
pub struct DwellTracker {
    current: String,
    enter_us: i64,
    totals: HashMap<String, LabelTotals>,
}

impl DwellTracker {
    pub fn new(initial_label: impl Into<String>, now_us: i64) -> Self {
        Self {
            current: initial_label.into(),
            enter_us: now_us,
            totals: HashMap::new(),
        }
    }

    /// No-op if `new_label` matches the current label; otherwise accumulates
    /// dwell time into the outgoing label and starts a fresh span.
    pub fn switch(&mut self, new_label: impl Into<String>, now_us: i64) {
        let new_label = new_label.into();
        if new_label == self.current {
            return;
        }
        self.accumulate(now_us);
        self.current = new_label;
        self.enter_us = now_us;
    }

    /// Flush the in-progress span without starting a new one. Idempotent if
    /// called repeatedly with the same `now_us`.
    pub fn close(&mut self, now_us: i64) {
        self.accumulate(now_us);
        self.enter_us = now_us;
    }

    fn accumulate(&mut self, now_us: i64) {
        let elapsed = (now_us - self.enter_us).max(0);
        let entry = self.totals.entry(self.current.clone()).or_default();
        entry.total_us += elapsed;
        entry.entries += 1;
    }

    pub fn snapshot(&self) -> DwellSnapshot {
        let mut total_us = HashMap::new();
        let mut avg_us = HashMap::new();
        for (label, totals) in &self.totals {
            total_us.insert(label.clone(), totals.total_us);
            let avg = if totals.entries > 0 {
                totals.total_us as f64 / totals.entries as f64
            } else {
                0.0
            };
            avg_us.insert(label.clone(), avg);
        }
        DwellSnapshot { total_us, avg_us }
    }
}

/// Per-axis dwell trackers plus running totals, closed out by `finalize`.
pub struct EngineStats {
    start_us: i64,
    sanitization: DwellTracker,
    data_trust: DwellTracker,
    hypothesis: DwellTracker,
    decision: DwellTracker,

    total_events: u64,
    sanitization_counts: HashMap<String, u64>,
    data_trust_counts: HashMap<String, u64>,
    hypothesis_counts: HashMap<String, u64>,
    decision_counts: HashMap<String, u64>,
}

impl EngineStats {
    pub fn new(
        now_us: i64,
        sanitization: Sanitization,
        data_trust: DataTrust,
        hypothesis: Hypothesis,
        decision: Decision,
    ) -> Self {
        Self {
            start_us: now_us,
            sanitization: DwellTracker::new(sanitization.as_str(), now_us),
            data_trust: DwellTracker::new(data_trust.as_str(), now_us),
            hypothesis: DwellTracker::new(hypothesis.as_str(), now_us),
            decision: DwellTracker::new(decision.as_str(), now_us),
            total_events: 0,
            sanitization_counts: HashMap::new(),
            data_trust_counts: HashMap::new(),
            hypothesis_counts: HashMap::new(),
            decision_counts: HashMap::new(),
        }
    }

    pub fn sanitization_mut(&mut self) -> &mut DwellTracker {
        &mut self.sanitization
    }
    pub fn data_trust_mut(&mut self) -> &mut DwellTracker {
        &mut self.data_trust
    }
    pub fn hypothesis_mut(&mut self) -> &mut DwellTracker {
        &mut self.hypothesis
    }
    pub fn decision_mut(&mut self) -> &mut DwellTracker {
        &mut self.decision
    }

    pub fn on_event(
        &mut self,
        sanitization: Sanitization,
        data_trust: DataTrust,
        hypothesis: Hypothesis,
        decision: Decision,
    ) {
        self.total_events += 1;
        *self
            .sanitization_counts
            .entry(sanitization.as_str().to_string())
            .or_default() += 1;
        *self
            .data_trust_counts
            .entry(data_trust.as_str().to_string())
            .or_default() += 1;
        *self
            .hypothesis_counts
            .entry(hypothesis.as_str().to_string())
            .or_default() += 1;
        *self
            .decision_counts
            .entry(decision.as_str().to_string())
            .or_default() += 1;
    }

    pub fn total_events(&self) -> u64 {
        self.total_events
    }

    pub fn quarantine_events(&self) -> u64 {
        *self
            .sanitization_counts
            .get(Sanitization::Quarantine.as_str())
            .unwrap_or(&0)
    }

    pub fn repair_events(&self) -> u64 {
        *self
            .sanitization_counts
            .get(Sanitization::Repair.as_str())
            .unwrap_or(&0)
    }

    /// Close all dwell spans and emit the final summary structure.
    pub fn finalize(&mut self, now_us: i64) -> EngineSummary {
        self.sanitization.close(now_us);
        self.data_trust.close(now_us);
        self.hypothesis.close(now_us);
        self.decision.close(now_us);

        EngineSummary {
            total_events: self.total_events,
            quarantine_events: self.quarantine_events(),
            repair_events: self.repair_events(),
            events_by_state: EventsByState {
                data_trust: self.data_trust_counts.clone(),
                hypothesis: self.hypothesis_counts.clone(),
                decision: self.decision_counts.clone(),
            },
            dwell: DwellByAxis {
                sanitization: self.sanitization.snapshot(),
                data_trust: self.data_trust.snapshot(),
                hypothesis: self.hypothesis.snapshot(),
                decision: self.decision.snapshot(),
            },
            uptime_us: (now_us - self.start_us).max(0),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventsByState {
    pub data_trust: HashMap<String, u64>,
    pub hypothesis: HashMap<String, u64>,
    pub decision: HashMap<String, u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DwellByAxis {
    pub sanitization: DwellSnapshot,
    pub data_trust: DwellSnapshot,
    pub hypothesis: DwellSnapshot,
    pub decision: DwellSnapshot,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineSummary {
    pub total_events: u64,
    pub quarantine_events: u64,
    pub repair_events: u64,
    pub events_by_state: EventsByState,
    pub dwell: DwellByAxis,
    #[serde(skip)]
    pub uptime_us: i64,
}
