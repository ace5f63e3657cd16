//! Prometheus metrics for the dispatch loop

use prometheus::{IntCounter, IntGauge};
use tracing::info;

/// Dispatch loop counters
#[derive(Debug, Clone)]
pub struct DispatchMetrics {
    pub frames_total: IntCounter,
    pub unknown_tags_total: IntCounter,
    pub fatal_errors_total: IntCounter,
    pub session_steps: IntGauge,
    pub session_episodes: IntGauge,
}

impl DispatchMetrics {
    pub fn new() -> prometheus::Result<Self> {
        Ok(Self {
            frames_total: IntCounter::new(
                "morlglue_frames_total",
                "Experiment requests dispatched",
            )?,
            unknown_tags_total: IntCounter::new(
                "morlglue_unknown_tags_total",
                "Experiment requests with an unrecognized type tag",
            )?,
            fatal_errors_total: IntCounter::new(
                "morlglue_fatal_errors_total",
                "Runs aborted by an unrecoverable error",
            )?,
            session_steps: IntGauge::new("morlglue_session_steps", "Steps in the current episode")?,
            session_episodes: IntGauge::new(
                "morlglue_session_episodes",
                "Episodes completed in the current run",
            )?,
        })
    }

    /// Mirror the session counters
    pub fn observe_session(&self, steps: u32, episodes: u32) {
        self.session_steps.set(i64::from(steps));
        self.session_episodes.set(i64::from(episodes));
    }

    /// Log a one-line summary
    pub fn log_summary(&self) {
        info!(
            frames = self.frames_total.get(),
            unknown_tags = self.unknown_tags_total.get(),
            fatal_errors = self.fatal_errors_total.get(),
            steps = self.session_steps.get(),
            episodes = self.session_episodes.get(),
            "Dispatch summary"
        );
    }
}
