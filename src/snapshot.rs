//! Wire types for the remote resume-status query response.
//!
//! The backend answers the resume-status query with a nullable model/bucket
//! envelope; null at either level means the run was never created. Every
//! bucket field is optional: the response is assembled from independent
//! backend columns and any of them may be missing.

use serde::{Deserialize, Serialize};

/// Marker token written into the started blob once a run begins producing
/// data. A bucket pre-created ahead of time (e.g. by a scheduler) lacks it.
const RUN_STARTED_TOKEN: &str = "\"t\":";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeStatusResponse {
    #[serde(default)]
    pub model: Option<ResumeStatusModel>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeStatusModel {
    #[serde(default)]
    pub bucket: Option<RunBucket>,
}

/// The remote service's last-known view of a run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunBucket {
    /// Records the backend has durably stored, per stream.
    pub history_line_count: Option<u64>,
    pub events_line_count: Option<u64>,
    pub log_line_count: Option<u64>,
    /// JSON array of serialized history records, newest first.
    pub history_tail: Option<String>,
    /// Serialized key/value summary mapping.
    pub summary_metrics: Option<String>,
    /// Serialized config mapping, conventionally `{key: {"value": v, ...}}`.
    pub config: Option<String>,
    pub tags: Option<Vec<String>>,
    /// Opaque blob whose started token distinguishes a run that actually
    /// produced data from one that was merely pre-created.
    pub started_marker_blob: Option<String>,
}

impl ResumeStatusResponse {
    /// Flatten the nullable envelope: null at the model or bucket level is
    /// "snapshot absent."
    pub fn bucket(&self) -> Option<&RunBucket> {
        self.model.as_ref().and_then(|model| model.bucket.as_ref())
    }
}

/// Whether the run has ever produced output.
///
/// False when the snapshot is absent, and also when a bucket exists but its
/// started blob lacks the marker token: for policy purposes a pre-created
/// but never-executed run does not exist.
pub fn run_has_started(bucket: Option<&RunBucket>) -> bool {
    match bucket {
        None => false,
        Some(bucket) => bucket
            .started_marker_blob
            .as_deref()
            .is_some_and(|blob| blob.contains(RUN_STARTED_TOKEN)),
    }
}
