//! Outcome records for a driver run

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::phase::Phase;

/// What happened when one phase was applied to one plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PhaseOutcome {
    /// The phase did its work
    Completed {
        /// Short description of the work done
        detail: String,
    },
    /// Nothing to do for this plugin
    Skipped {
        /// Why the phase was a no-op
        reason: String,
    },
    /// The phase failed
    Failed {
        /// Error message
        error: String,
    },
}

impl PhaseOutcome {
    /// Completed outcome
    #[must_use]
    pub fn completed(detail: impl Into<String>) -> Self {
        Self::Completed {
            detail: detail.into(),
        }
    }

    /// Skipped outcome
    #[must_use]
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped {
            reason: reason.into(),
        }
    }

    /// Whether this outcome is a failure
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// One phase applied to one plugin
#[derive(Debug, Clone, Serialize)]
pub struct ReportEntry {
    /// Plugin name
    pub plugin: String,
    /// Phase applied
    pub phase: Phase,
    /// Result
    #[serde(flatten)]
    pub outcome: PhaseOutcome,
}

/// Record of a driver run, in execution order
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Phases requested for this run
    pub phases: Vec<Phase>,
    /// Run start
    pub started_at: DateTime<Utc>,
    /// Run end (set by [`RunReport::finish`])
    pub finished_at: Option<DateTime<Utc>>,
    /// Manifest rows ignored because they are disabled
    pub disabled: usize,
    /// Per-plugin outcomes
    pub entries: Vec<ReportEntry>,
    /// Set when a failure stopped the run early
    pub aborted: bool,
}

impl RunReport {
    /// Start a report for the given phases
    #[must_use]
    pub fn new(phases: &[Phase], disabled: usize) -> Self {
        Self {
            phases: phases.to_vec(),
            started_at: Utc::now(),
            finished_at: None,
            disabled,
            entries: Vec::new(),
            aborted: false,
        }
    }

    /// Append an outcome
    pub fn record(&mut self, plugin: &str, phase: Phase, outcome: PhaseOutcome) {
        self.entries.push(ReportEntry {
            plugin: plugin.to_string(),
            phase,
            outcome,
        });
    }

    /// Stamp the end time
    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Whether nothing failed and the run was not cut short
    #[must_use]
    pub fn is_success(&self) -> bool {
        !self.aborted && self.failures().next().is_none()
    }

    /// Failed entries
    pub fn failures(&self) -> impl Iterator<Item = &ReportEntry> {
        self.entries.iter().filter(|e| e.outcome.is_failure())
    }

    /// Phases applied to a plugin, in order
    #[must_use]
    pub fn phases_for(&self, plugin: &str) -> Vec<Phase> {
        self.entries
            .iter()
            .filter(|e| e.plugin == plugin)
            .map(|e| e.phase)
            .collect()
    }

    /// One summary line per requested phase
    #[must_use]
    pub fn summary(&self) -> Vec<String> {
        self.phases
            .iter()
            .map(|phase| {
                let (mut completed, mut skipped, mut failed) = (0, 0, 0);
                for entry in self.entries.iter().filter(|e| e.phase == *phase) {
                    match entry.outcome {
                        PhaseOutcome::Completed { .. } => completed += 1,
                        PhaseOutcome::Skipped { .. } => skipped += 1,
                        PhaseOutcome::Failed { .. } => failed += 1,
                    }
                }
                format!("{phase}: {completed} completed, {skipped} skipped, {failed} failed")
            })
            .collect()
    }
}
