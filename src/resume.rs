//! Resume reconciliation: the decision gate and the state merge.
//!
//! Runs exactly once per resume handshake, after the remote snapshot fetch
//! and before the session accepts steady-state records. The decision gate
//! crosses the caller's policy with whether the run has ever started; the
//! merge then folds stream offsets, history tail, summary, config and tags
//! into local state. Sub-merge failures are collected and logged, and
//! escalated only under `ResumePolicy::Must`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{error, warn};

use crate::error::Transience;
use crate::settings::ResumePolicy;
use crate::snapshot::{run_has_started, ResumeStatusResponse, RunBucket};
use crate::state::{RunIdentity, RunKind, RunState, SummaryItem};
use crate::stream::StreamKind;

/// Wire names of the counters inside a serialized history record.
const STEP_KEY: &str = "_step";
const RUNTIME_KEY: &str = "_runtime";

/// Outbound error code, surfaced to the end user.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Usage,
    Unknown,
}

/// Outbound error shape consumed by the session's IPC layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub message: String,
    pub code: ErrorCode,
}

/// A single sub-merge failure.
///
/// These are collected during the merge and never propagated past it; only
/// the decision gate, which knows the active policy, escalates.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("no history tail found in resume response")]
    MissingHistoryTail,
    #[error("failed to decode history tail: {0}")]
    HistoryTailDecode(#[source] serde_json::Error),
    #[error("failed to decode history tail record: {0}")]
    HistoryRecordDecode(#[source] serde_json::Error),
    #[error("no summary metrics found in resume response")]
    MissingSummary,
    #[error("failed to decode summary metrics: {0}")]
    SummaryDecode(#[source] serde_json::Error),
    #[error("no config found in resume response")]
    MissingConfig,
    #[error("failed to decode config: {0}")]
    ConfigDecode(#[source] serde_json::Error),
}

/// Fatal reconciliation failure, surfaced to the caller.
#[derive(Debug, Error)]
pub enum ResumeError {
    #[error("resume is 'must' for a run that has never started ({identity})")]
    MustForUnstartedRun { identity: RunIdentity },
    #[error("resume is 'never' for a run that already exists ({identity})")]
    NeverForStartedRun { identity: RunIdentity },
    #[error("failed to merge resume state for run {identity}")]
    MergeFailed { identity: RunIdentity },
}

impl ResumeError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ResumeError::MustForUnstartedRun { .. } | ResumeError::NeverForStartedRun { .. } => {
                ErrorCode::Usage
            }
            ResumeError::MergeFailed { .. } => ErrorCode::Unknown,
        }
    }

    pub fn transience(&self) -> Transience {
        match self {
            ResumeError::MustForUnstartedRun { .. } | ResumeError::NeverForStartedRun { .. } => {
                Transience::Permanent
            }
            ResumeError::MergeFailed { .. } => Transience::Unknown,
        }
    }

    /// The user-facing result record. Messages are actionable: they name
    /// the run and the exact policy value to use instead.
    pub fn to_error_info(&self) -> ErrorInfo {
        ErrorInfo {
            message: self.user_message(),
            code: self.code(),
        }
    }

    fn user_message(&self) -> String {
        match self {
            ResumeError::MustForUnstartedRun { identity } => format!(
                "You provided an invalid value for the `resume` argument. \
                 The value 'must' is not a valid option for resuming a run \
                 ({identity}) that has never been started. Please check your \
                 inputs and try again with a valid value for the `resume` \
                 argument.\nIf you are trying to start a new run, please omit \
                 the `resume` argument or use `resume='allow'`"
            ),
            ResumeError::NeverForStartedRun { identity } => format!(
                "You provided an invalid value for the `resume` argument. \
                 The value 'never' is not a valid option for resuming a run \
                 ({identity}) that already exists. Please check your inputs \
                 and try again with a valid value for the `resume` argument.\n"
            ),
            ResumeError::MergeFailed { identity } => format!(
                "The run ({identity}) failed to resume, and the `resume` \
                 argument was set to 'must'. Please check your inputs and try \
                 again with a valid value for the `resume` argument.\n"
            ),
        }
    }
}

/// Policy and identity for one reconciliation attempt.
#[derive(Clone, Debug)]
pub struct ResumeContext {
    identity: RunIdentity,
    policy: ResumePolicy,
}

impl ResumeContext {
    pub fn new(identity: RunIdentity, policy: ResumePolicy) -> Self {
        Self { identity, policy }
    }

    /// Decide whether resumption is legal and, when it is, merge the remote
    /// snapshot into `state`.
    ///
    /// Must complete before the session accepts steady-state records: the
    /// offsets and starting step/runtime it establishes are what lets local
    /// writers continue the remote streams without gaps or duplicates.
    pub fn reconcile(
        &self,
        state: &mut RunState,
        response: &ResumeStatusResponse,
    ) -> Result<(), ResumeError> {
        let bucket = response.bucket();

        // A bucket without the started marker is a run that was pre-created
        // but never executed; for policy purposes it does not exist.
        if !run_has_started(bucket) {
            if self.policy == ResumePolicy::Must {
                return Err(ResumeError::MustForUnstartedRun {
                    identity: self.identity.clone(),
                });
            }
            // Brand-new run: nothing to merge, leave state untouched.
            return Ok(());
        }

        if self.policy == ResumePolicy::Never {
            return Err(ResumeError::NeverForStartedRun {
                identity: self.identity.clone(),
            });
        }

        // A started run always has a bucket.
        let Some(bucket) = bucket else {
            return Ok(());
        };

        let soft = self.merge(state, bucket);
        if !soft.is_empty() && self.policy == ResumePolicy::Must {
            return Err(ResumeError::MergeFailed {
                identity: self.identity.clone(),
            });
        }

        state.kind = RunKind::Resume;
        Ok(())
    }

    /// Fold the bucket into local state.
    ///
    /// Offsets are established first and unconditionally: downstream writers
    /// depend on them even when a later sub-merge fails. The four sub-mergers
    /// then run over disjoint slices of the bucket and of local state, with
    /// failures collected rather than propagated.
    fn merge(&self, state: &mut RunState, bucket: &RunBucket) -> Vec<MergeError> {
        state
            .offsets
            .advance_to(StreamKind::History, bucket.history_line_count.unwrap_or(0));
        state
            .offsets
            .advance_to(StreamKind::Events, bucket.events_line_count.unwrap_or(0));
        state
            .offsets
            .advance_to(StreamKind::Output, bucket.log_line_count.unwrap_or(0));

        let mut soft = Vec::new();
        let mut absorb = |err: MergeError| {
            error!(run = %self.identity, "resume merge step failed: {err}");
            soft.push(err);
        };

        let history_offset = state.offsets.get(StreamKind::History);
        match recover_history(bucket.history_tail.as_deref(), history_offset) {
            Ok(update) => {
                if let Some(step) = update.starting_step {
                    state.advance_starting_step(step);
                }
                if let Some(runtime) = update.runtime {
                    state.runtime = runtime;
                }
            }
            Err(err) => absorb(err),
        }

        match recover_summary(bucket.summary_metrics.as_deref()) {
            Ok(items) => state.summary = items,
            Err(err) => absorb(err),
        }

        match recover_config(bucket.config.as_deref()) {
            Ok(resumed) => state.config.merge_resumed(resumed),
            Err(err) => absorb(err),
        }

        // Tags set explicitly by the session always win; remote tags are
        // taken only when the session supplied none. An absent tag list is
        // a valid untagged run, not a failure.
        if let Some(tags) = bucket.tags.as_deref() {
            if state.tags.is_empty() {
                state.tags.extend(tags.iter().cloned());
            }
        }

        soft
    }
}

/// Partial update recovered from the history tail.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct HistoryUpdate {
    starting_step: Option<i64>,
    runtime: Option<u32>,
}

/// Recover the last step and runtime from the history tail.
///
/// The tail is a JSON array of serialized records; element 0 holds the most
/// recently recorded step. An empty tail is a run that started but never
/// logged history, which is valid and yields no update. Either counter may
/// be absent from the record; absence leaves the corresponding field unset.
fn recover_history(
    tail_json: Option<&str>,
    history_offset: u64,
) -> Result<HistoryUpdate, MergeError> {
    let raw = tail_json.ok_or(MergeError::MissingHistoryTail)?;
    let records: Vec<String> =
        serde_json::from_str(raw).map_err(MergeError::HistoryTailDecode)?;

    let mut update = HistoryUpdate::default();
    let Some(latest) = records.first() else {
        return Ok(update);
    };
    let record: BTreeMap<String, Value> =
        serde_json::from_str(latest).map_err(MergeError::HistoryRecordDecode)?;

    if let Some(step) = record.get(STEP_KEY).and_then(Value::as_f64) {
        // Continue after the last recorded step. A zero step with no prior
        // history offset is a fresh run and must not be bumped.
        if step > 0.0 || history_offset > 0 {
            update.starting_step = Some(step as i64 + 1);
        }
    }
    if let Some(runtime) = record.get(RUNTIME_KEY).and_then(Value::as_f64) {
        update.runtime = Some(runtime as u32);
    }

    Ok(update)
}

/// Stage the remote summary as update records, one per key.
fn recover_summary(summary_json: Option<&str>) -> Result<Vec<SummaryItem>, MergeError> {
    let raw = summary_json.ok_or(MergeError::MissingSummary)?;
    let summary: BTreeMap<String, Value> =
        serde_json::from_str(raw).map_err(MergeError::SummaryDecode)?;

    Ok(summary
        .into_iter()
        .map(|(key, value)| SummaryItem {
            key,
            value_json: value.to_string(),
        })
        .collect())
}

/// Unwrap the `{key: {"value": v, ...}}` convention of the remote config.
///
/// An entry whose value is not a mapping is an anomaly: it is logged and
/// skipped, never merged and never escalated. A mapping without a "value"
/// entry is skipped silently.
fn recover_config(config_json: Option<&str>) -> Result<BTreeMap<String, Value>, MergeError> {
    let raw = config_json.ok_or(MergeError::MissingConfig)?;
    let outer: BTreeMap<String, Value> =
        serde_json::from_str(raw).map_err(MergeError::ConfigDecode)?;

    let mut resumed = BTreeMap::new();
    for (key, entry) in outer {
        match entry {
            Value::Object(mut fields) => {
                if let Some(value) = fields.remove("value") {
                    resumed.insert(key, value);
                }
            }
            _ => warn!("resume config entry '{key}' is not a mapping, skipping"),
        }
    }
    Ok(resumed)
}
