//! Local resume reconciliation for a run-tracking client daemon.
//!
//! When a client reattaches to a previously known run, this crate decides
//! whether resumption is legal under the caller's policy and, if so, folds
//! the remote run's last-known state (stream offsets, history tail, summary,
//! config, tags) into the local in-memory run state so that subsequent local
//! writes continue the remote stream without gaps or duplication.
//!
//! The engine is a pure, synchronous computation over an already-fetched
//! snapshot: transport, retries and authentication live with the caller.

#![forbid(unsafe_code)]

pub mod error;
pub mod resume;
pub mod run_config;
pub mod settings;
pub mod snapshot;
pub mod state;
pub mod stream;

pub use error::{Error, Transience};
pub type Result<T> = std::result::Result<T, Error>;

// Re-export the working set at the crate root for convenience.
pub use resume::{ErrorCode, ErrorInfo, MergeError, ResumeContext, ResumeError};
pub use run_config::RunConfig;
pub use settings::{ResumePolicy, ResumeSettings};
pub use snapshot::{run_has_started, ResumeStatusResponse, RunBucket};
pub use state::{RunIdentity, RunKind, RunState, SummaryItem};
pub use stream::{StreamKind, StreamOffsets};
