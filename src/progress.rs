//! Progress reporting for pipeline runs.
//!
//! Each phase boundary emits a [`PhaseProgress`] event through a caller
//! supplied callback. Percent is clamped non-decreasing within one run so
//! consumers can drive a monotonic progress bar.

use serde::{Deserialize, Serialize};

/// Pipeline phase identifier carried in progress events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Structure,
    Parsing,
    Imports,
    Calls,
    Heritage,
    Communities,
    Processes,
    Complete,
    Error,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Structure => "structure",
            Phase::Parsing => "parsing",
            Phase::Imports => "imports",
            Phase::Calls => "calls",
            Phase::Heritage => "heritage",
            Phase::Communities => "communities",
            Phase::Processes => "processes",
            Phase::Complete => "complete",
            Phase::Error => "error",
        }
    }
}

/// Optional per-phase counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PhaseStats {
    pub files_processed: usize,
    pub total_files: usize,
    pub nodes_created: usize,
}

/// A single progress event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseProgress {
    pub phase: Phase,
    /// 0-100, non-decreasing within one run
    pub percent: u8,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<PhaseStats>,
}

/// Progress callback supplied by the caller.
pub type ProgressSink<'a> = dyn Fn(PhaseProgress) + 'a;

/// Reporter that enforces the non-decreasing percent contract.
pub struct ProgressReporter<'a> {
    sink: Option<&'a ProgressSink<'a>>,
    last_percent: u8,
}

impl<'a> ProgressReporter<'a> {
    pub fn new(sink: Option<&'a ProgressSink<'a>>) -> Self {
        Self {
            sink,
            last_percent: 0,
        }
    }

    /// Emit an event. Percent lower than a previously reported value is
    /// raised to that value.
    pub fn report(&mut self, phase: Phase, percent: u8, message: &str, stats: Option<PhaseStats>) {
        let clamped = percent.min(100).max(self.last_percent);
        self.last_percent = clamped;
        if let Some(sink) = self.sink {
            sink(PhaseProgress {
                phase,
                percent: clamped,
                message: message.to_string(),
                stats,
            });
        }
    }
}
