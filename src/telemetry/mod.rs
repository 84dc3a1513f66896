//! Diagnostics telemetry collector.
//!
//! The collector keeps a bounded history of pipeline events plus running
//! counters and a rolling view of iteration slack. It is owned by the
//! control loop, so it needs no locking.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

pub mod events;

pub use events::PipelineEvent;

/// Running totals per event kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCounters {
    pub inferences_started: u64,
    pub classifications: u64,
    pub accepted: u64,
    pub timing_warnings: u64,
    pub command_changes: u64,
    pub faults: u64,
}

/// Slack statistics over the recent iterations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SlackStats {
    pub min_cycles: u32,
    pub avg_cycles: f64,
    pub sample_count: usize,
}

/// Snapshot of collector state for CLI reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub recent: Vec<PipelineEvent>,
    pub total_events: u64,
    pub dropped_events: u64,
    pub counters: EventCounters,
    pub slack: SlackStats,
}

/// Slack tracker maintains a rolling window to compute min/avg slack.
struct SlackTracker {
    samples: VecDeque<u32>,
    max_samples: usize,
}

impl SlackTracker {
    fn new(max_samples: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(max_samples),
            max_samples: max_samples.max(1),
        }
    }

    fn observe(&mut self, cycles: u32) {
        if self.samples.len() == self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(cycles);
    }

    fn stats(&self) -> SlackStats {
        let count = self.samples.len();
        if count == 0 {
            return SlackStats::default();
        }
        let sum: u64 = self.samples.iter().map(|&c| c as u64).sum();
        SlackStats {
            min_cycles: self.samples.iter().copied().min().unwrap_or(0),
            avg_cycles: sum as f64 / count as f64,
            sample_count: count,
        }
    }
}

/// Bounded event history with counters.
pub struct TelemetryCollector {
    history: VecDeque<PipelineEvent>,
    history_capacity: usize,
    total_events: u64,
    dropped_history: u64,
    counters: EventCounters,
    slack: SlackTracker,
}

impl TelemetryCollector {
    pub fn new(history_capacity: usize, slack_window: usize) -> Self {
        Self {
            history: VecDeque::with_capacity(history_capacity),
            history_capacity: history_capacity.max(1),
            total_events: 0,
            dropped_history: 0,
            counters: EventCounters::default(),
            slack: SlackTracker::new(slack_window),
        }
    }

    pub fn publish(&mut self, event: PipelineEvent) {
        self.total_events += 1;
        match &event {
            PipelineEvent::InferenceStarted { .. } => self.counters.inferences_started += 1,
            PipelineEvent::Classification { accepted, .. } => {
                self.counters.classifications += 1;
                if *accepted {
                    self.counters.accepted += 1;
                }
            }
            PipelineEvent::TimingWarning { .. } => self.counters.timing_warnings += 1,
            PipelineEvent::CommandChanged { .. } => self.counters.command_changes += 1,
            PipelineEvent::Fault { .. } => self.counters.faults += 1,
        }

        if self.history.len() == self.history_capacity {
            self.history.pop_front();
            self.dropped_history += 1;
        }
        self.history.push_back(event);
    }

    /// Record the measured slack of one iteration
    pub fn observe_slack(&mut self, cycles: u32) {
        self.slack.observe(cycles);
    }

    pub fn counters(&self) -> &EventCounters {
        &self.counters
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            recent: self.history.iter().cloned().collect(),
            total_events: self.total_events,
            dropped_events: self.dropped_history,
            counters: self.counters.clone(),
            slack: self.slack.stats(),
        }
    }
}

impl Default for TelemetryCollector {
    fn default() -> Self {
        Self::new(256, 124)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn warning(iteration: u64) -> PipelineEvent {
        PipelineEvent::TimingWarning {
            iteration,
            slack_cycles: 10,
        }
    }

    #[test]
    fn collector_preserves_order_within_history() {
        let mut collector = TelemetryCollector::new(3, 4);
        collector.publish(warning(1));
        collector.publish(PipelineEvent::InferenceStarted {
            line: 0,
            region: 1,
            accepted_bytes: 64,
        });
        collector.publish(PipelineEvent::Fault {
            code: 3003,
            message: "deadline".to_string(),
        });

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.recent.len(), 3);
        assert_eq!(snapshot.recent[0], warning(1));
        assert!(matches!(snapshot.recent[2], PipelineEvent::Fault { code: 3003, .. }));
        assert_eq!(snapshot.counters.faults, 1);
        assert_eq!(snapshot.counters.inferences_started, 1);
    }

    #[test]
    fn collector_drops_history_when_full() {
        let mut collector = TelemetryCollector::new(2, 4);
        collector.publish(warning(1));
        collector.publish(warning(2));
        collector.publish(warning(3));

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.recent.len(), 2);
        assert_eq!(snapshot.dropped_events, 1);
        assert_eq!(snapshot.total_events, 3);
        assert_eq!(snapshot.counters.timing_warnings, 3);
        assert_eq!(snapshot.recent[0], warning(2));
    }

    #[test]
    fn classification_counts_accepted() {
        let mut collector = TelemetryCollector::default();
        for accepted in [true, false, true] {
            collector.publish(PipelineEvent::Classification {
                iteration: 0,
                class_index: 7,
                label: "stop".to_string(),
                confidence: 0.95,
                accepted,
            });
        }
        assert_eq!(collector.counters().classifications, 3);
        assert_eq!(collector.counters().accepted, 2);
    }

    #[test]
    fn slack_window_rolls() {
        let mut collector = TelemetryCollector::new(4, 2);
        collector.observe_slack(100);
        collector.observe_slack(300);
        collector.observe_slack(500);

        let slack = collector.snapshot().slack;
        assert_eq!(slack.sample_count, 2);
        assert_eq!(slack.min_cycles, 300);
        assert_eq!(slack.avg_cycles, 400.0);
    }

    #[test]
    fn events_serialize_tagged() {
        let json = serde_json::to_string(&warning(5)).unwrap();
        assert_eq!(
            json,
            r#"{"type":"timing_warning","payload":{"iteration":5,"slack_cycles":10}}"#
        );
    }
}
