//! Per-stream append offsets for resumed runs.

use std::collections::BTreeMap;
use std::fmt;

/// One of the independent append-only record sequences composing a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StreamKind {
    /// Logged metric history.
    History,
    /// System/telemetry events.
    Events,
    /// Captured console output.
    Output,
}

impl StreamKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamKind::History => "history",
            StreamKind::Events => "events",
            StreamKind::Output => "output",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Count of records the remote service already holds, per stream.
///
/// Local writers continue appending at these positions so the combined
/// remote+local stream has no gap and no duplicate record. Offsets never
/// move backwards.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StreamOffsets(BTreeMap<StreamKind, u64>);

impl StreamOffsets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the offset for `kind` to at least `count`.
    pub fn advance_to(&mut self, kind: StreamKind, count: u64) {
        let entry = self.0.entry(kind).or_insert(0);
        if count > *entry {
            *entry = count;
        }
    }

    /// Current offset for `kind`; zero when nothing was recorded yet.
    pub fn get(&self, kind: StreamKind) -> u64 {
        self.0.get(&kind).copied().unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (StreamKind, u64)> + '_ {
        self.0.iter().map(|(kind, count)| (*kind, *count))
    }
}
