// =============================================================================
// Output Writer — append-only JSON-lines transitions/decisions + summary.json
// =============================================================================
//
// Three files under `<output_root>/<mode>/`. The two JSONL files are opened
// once in append mode and guarded by a `parking_lot::Mutex` each, since
// writes are short and append-only -- a single lock per file is sufficient
// serialization. `summary.json` is written once, at shutdown.
// =============================================================================

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::warn;

use crate::engine::dwell::EngineSummary;

#[derive(Debug, Serialize)]
struct StateTransitionRecord<'a> {
    ts: i64,
    data_trust: &'a str,
    hypothesis: &'a str,
    decision: &'a str,
    trigger: &'a str,
}

#[derive(Debug, Serialize)]
struct DecisionRecord<'a> {
    ts: i64,
    action: &'a str,
    reason: &'a str,
    duration_ms: i64,
}

pub struct OutputWriter {
    state_transitions: Mutex<File>,
    decisions: Mutex<File>,
    output_dir: std::path::PathBuf,
}

impl OutputWriter {
    pub fn open(output_dir: &Path) -> anyhow::Result<Self> {
        fs::create_dir_all(output_dir)?;
        let state_transitions = OpenOptions::new()
            .create(true)
            .append(true)
            .open(output_dir.join("state_transitions.jsonl"))?;
        let decisions = OpenOptions::new()
            .create(true)
            .append(true)
            .open(output_dir.join("decisions.jsonl"))?;
        Ok(Self {
            state_transitions: Mutex::new(state_transitions),
            decisions: Mutex::new(decisions),
            output_dir: output_dir.to_path_buf(),
        })
    }

    pub fn write_transition(
        &self,
        ts: i64,
        data_trust: &str,
        hypothesis: &str,
        decision: &str,
        trigger: &str,
    ) {
        let record = StateTransitionRecord {
            ts,
            data_trust,
            hypothesis,
            decision,
            trigger,
        };
        self.append_line(&self.state_transitions, &record);
    }

    pub fn write_decision(&self, ts: i64, action: &str, reason: &str, duration_ms: i64) {
        let record = DecisionRecord {
            ts,
            action,
            reason,
            duration_ms,
        };
        self.append_line(&self.decisions, &record);
    }

    pub fn write_summary(&self, summary: &EngineSummary) {
        let path = self.output_dir.join("summary.json");
        match serde_json::to_string_pretty(summary) {
            Ok(body) => {
                if let Err(e) = fs::write(&path, body) {
                    warn!(error = %e, path = %path.display(), "failed to write summary.json");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize summary.json"),
        }
    }

    fn append_line<T: Serialize>(&self, file: &Mutex<File>, record: &T) {
        let line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "failed to serialize output record");
                return;
            }
        };
        let mut f = file.lock();
        if let Err(e) = writeln!(f, "{}", line) {
            warn!(error = %e, "failed to write output record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufRead;

    #[test]
    fn transitions_and_decisions_append_as_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let writer = OutputWriter::open(dir.path()).unwrap();
        writer.write_transition(1, "TRUSTED", "VALID", "ALLOWED", "");
        writer.write_transition(2, "DEGRADED", "VALID", "RESTRICTED", "quarantine_event");
        writer.write_decision(2, "RESTRICTED", "quarantine_event", 1);

        let transitions = fs::read_to_string(dir.path().join("state_transitions.jsonl")).unwrap();
        assert_eq!(transitions.lines().count(), 2);
        let first: serde_json::Value = serde_json::from_str(transitions.lines().next().unwrap()).unwrap();
        assert_eq!(first["decision"], "ALLOWED");

        let decisions = fs::File::open(dir.path().join("decisions.jsonl")).unwrap();
        let lines: Vec<_> = std::io::BufReader::new(decisions).lines().collect();
        assert_eq!(lines.len(), 1);
    }

    #[test]
    fn summary_is_written_as_pretty_json() {
        let dir = tempfile::tempdir().unwrap();
        let writer = OutputWriter::open(dir.path()).unwrap();
        let summary = EngineSummary::default();
        writer.write_summary(&summary);
        let body = fs::read_to_string(dir.path().join("summary.json")).unwrap();
        assert!(body.contains("total_events"));
    }
}
