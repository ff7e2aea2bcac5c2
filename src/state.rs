//! Local in-memory run state mutated by reconciliation.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::run_config::RunConfig;
use crate::stream::StreamOffsets;

/// Names a run attempt; used only for diagnostics and user-facing messages.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RunIdentity {
    pub project: String,
    pub run_id: String,
}

impl RunIdentity {
    pub fn new(project: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            run_id: run_id.into(),
        }
    }
}

impl fmt::Display for RunIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.project, self.run_id)
    }
}

/// Whether this session continues an existing run or starts a fresh one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RunKind {
    #[default]
    New,
    Resume,
}

/// A staged summary update; the value stays in its serialized form.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryItem {
    pub key: String,
    pub value_json: String,
}

/// Mutable state owned by the current run session.
///
/// Reconciliation is the only writer during the resume handshake; the
/// session's stream writers read it afterwards to pick append positions and
/// seed summary/config/tags.
#[derive(Clone, Debug, Default)]
pub struct RunState {
    pub offsets: StreamOffsets,
    /// First step the session will log. Only ever advances.
    pub starting_step: i64,
    /// Elapsed runtime baseline, in seconds.
    pub runtime: u32,
    /// Staged summary updates, replaced wholesale by a resume merge.
    pub summary: Vec<SummaryItem>,
    pub config: RunConfig,
    /// Set at most once by resumption; explicit session tags always win.
    pub tags: Vec<String>,
    pub kind: RunKind,
}

impl RunState {
    pub fn new(config: RunConfig, tags: Vec<String>) -> Self {
        Self {
            config,
            tags,
            ..Self::default()
        }
    }

    /// Advance the starting step; it never moves backwards.
    pub(crate) fn advance_starting_step(&mut self, step: i64) {
        if step > self.starting_step {
            self.starting_step = step;
        }
    }
}
