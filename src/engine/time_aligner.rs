// =============================================================================
// Time Aligner — watermark-driven reorder buffer with bounded lateness
// =============================================================================
//
// Absorbs small out-of-order arrivals within `allowed_lateness_us`, then
// emits events in non-decreasing `event_ts` order. A bounded-lateness
// watermark means we never wait forever for a straggler: if the oldest
// buffered event falls further behind than `max_buffer_us`, the watermark is
// forced forward and the stragglers flush regardless.
// =============================================================================

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::types::Event;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlignStats {
    pub pushed: u64,
    pub emitted: u64,
    pub late: u64,
    pub forced_flush: bool,
    pub buffer_len: usize,
}

struct HeapEntry {
    event_ts: i64,
    tie: u64,
    event: Event,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.event_ts == other.event_ts && self.tie == other.tie
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.event_ts, self.tie).cmp(&(other.event_ts, other.tie))
    }
}

pub struct TimeAligner {
    allowed_lateness_us: i64,
    max_buffer_us: i64,
    last_event_ts: Option<i64>,
    /// Watermark as of the previous call, used to classify late arrivals.
    previous_watermark: Option<i64>,
    heap: BinaryHeap<Reverse<HeapEntry>>,
    tie_counter: u64,
}

impl TimeAligner {
    pub fn new(allowed_lateness_us: i64, max_buffer_us: i64) -> Self {
        Self {
            allowed_lateness_us,
            max_buffer_us,
            last_event_ts: None,
            previous_watermark: None,
            heap: BinaryHeap::new(),
            tie_counter: 0,
        }
    }

    /// Align one incoming event, returning the events newly emitted (in
    /// non-decreasing `event_ts` order) and the stats for this call.
    pub fn align(&mut self, ev: Event) -> (Vec<Event>, AlignStats) {
        let Some(event_ts) = ev.event_ts else {
            // Null event_ts passes through immediately and is never
            // compared against the ordering guarantee.
            return (
                vec![ev],
                AlignStats {
                    pushed: 1,
                    emitted: 1,
                    late: 0,
                    forced_flush: false,
                    buffer_len: self.heap.len(),
                },
            );
        };

        self.last_event_ts = Some(self.last_event_ts.map_or(event_ts, |t| t.max(event_ts)));

        let mut late = 0;
        if let Some(prev_wm) = self.previous_watermark {
            if event_ts < prev_wm {
                late = 1;
            }
        }

        self.tie_counter += 1;
        self.heap.push(Reverse(HeapEntry {
            event_ts,
            tie: self.tie_counter,
            event: ev,
        }));

        let mut watermark = self.last_event_ts.unwrap() - self.allowed_lateness_us;
        let mut forced_flush = false;

        if let Some(Reverse(oldest)) = self.heap.peek() {
            if watermark - oldest.event_ts > self.max_buffer_us {
                watermark = oldest.event_ts + self.max_buffer_us;
                forced_flush = true;
            }
        }

        let mut emitted_list = Vec::new();
        while let Some(Reverse(top)) = self.heap.peek() {
            if top.event_ts <= watermark {
                let Reverse(entry) = self.heap.pop().unwrap();
                emitted_list.push(entry.event);
            } else {
                break;
            }
        }

        self.previous_watermark = Some(watermark);

        let stats = AlignStats {
            pushed: 1,
            emitted: emitted_list.len() as u64,
            late,
            forced_flush,
            buffer_len: self.heap.len(),
        };
        (emitted_list, stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Payload, Stream, TradeData};

    fn ev(event_ts: i64) -> Event {
        Event {
            stream: Stream::Trades,
            exchange: None,
            symbol: None,
            event_ts: Some(event_ts),
            ingest_ts: event_ts,
            event_id: None,
            payload: Payload::Trade(TradeData::default()),
        }
    }

    fn ts_list(events: &[Event]) -> Vec<i64> {
        events.iter().map(|e| e.event_ts.unwrap()).collect()
    }

    #[test]
    fn out_of_order_arrival_is_absorbed_and_emitted_in_order() {
        let mut aligner = TimeAligner::new(100_000, 1_000_000);
        let (emitted, _) = aligner.align(ev(1_000_000));
        assert!(emitted.is_empty());

        // 900_000 arrives after 1_000_000 but within the lateness budget: the
        // watermark (still 900_000, since last_event_ts hasn't advanced) lets
        // it through right away without touching the still-buffered 1_000_000.
        let (emitted, _) = aligner.align(ev(900_000));
        assert_eq!(ts_list(&emitted), vec![900_000]);

        // A later arrival pushes the watermark past 1_000_000, flushing it.
        let (emitted, stats) = aligner.align(ev(1_200_000));
        assert_eq!(ts_list(&emitted), vec![1_000_000]);
        assert_eq!(stats.buffer_len, 1);
        assert!(!stats.forced_flush);
    }

    #[test]
    fn straggler_beyond_max_buffer_forces_the_watermark_forward() {
        let mut aligner = TimeAligner::new(100_000, 1_000_000);
        let (emitted, _) = aligner.align(ev(1_000_000));
        assert!(emitted.is_empty());
        let (emitted, stats) = aligner.align(ev(3_000_000));
        assert_eq!(ts_list(&emitted), vec![1_000_000]);
        assert!(stats.forced_flush);
        assert_eq!(stats.buffer_len, 1);
    }

    #[test]
    fn null_event_ts_passes_through_immediately() {
        let mut aligner = TimeAligner::new(100_000, 1_000_000);
        let mut no_ts = ev(0);
        no_ts.event_ts = None;
        let (emitted, stats) = aligner.align(no_ts);
        assert_eq!(emitted.len(), 1);
        assert_eq!(stats.emitted, 1);
        assert_eq!(stats.buffer_len, 0);
    }

    #[test]
    fn emission_order_is_non_decreasing() {
        let mut aligner = TimeAligner::new(50_000, 500_000);
        let mut out = Vec::new();
        for ts in [100_000, 80_000, 120_000, 200_000, 600_000, 650_000] {
            let (emitted, _) = aligner.align(ev(ts));
            out.extend(ts_list(&emitted));
        }
        let mut sorted = out.clone();
        sorted.sort();
        assert_eq!(out, sorted);
    }

    #[test]
    fn late_event_before_watermark_is_flagged() {
        let mut aligner = TimeAligner::new(10_000, 1_000_000);
        aligner.align(ev(1_000_000));
        // watermark is now 990_000; next event establishes a new watermark
        // of 1_090_000 and flushes everything <= that.
        let (_, stats) = aligner.align(ev(1_100_000));
        assert_eq!(stats.late, 0);
        // Now push something older than the watermark we just set.
        let (_, stats) = aligner.align(ev(500_000));
        assert_eq!(stats.late, 1);
    }
}
