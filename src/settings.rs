//! Resume policy and process-level resume settings.

use std::fmt;

/// How the caller wants a previously known remote run handled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ResumePolicy {
    /// No resume requested. The default for any unrecognized value.
    #[default]
    None,
    /// The run must already exist and have started; otherwise fail.
    Must,
    /// Resume if the run has started, start fresh otherwise.
    Allow,
    /// The run must not already exist; otherwise fail.
    Never,
}

impl ResumePolicy {
    /// Resolve a user-supplied policy string.
    ///
    /// Matching is exact and case-sensitive; anything else (including the
    /// empty string) means no resume. Total: never fails.
    pub fn resolve(raw: &str) -> Self {
        match raw {
            "must" => ResumePolicy::Must,
            "allow" => ResumePolicy::Allow,
            "never" => ResumePolicy::Never,
            _ => ResumePolicy::None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResumePolicy::None => "none",
            ResumePolicy::Must => "must",
            ResumePolicy::Allow => "allow",
            ResumePolicy::Never => "never",
        }
    }
}

impl From<&str> for ResumePolicy {
    fn from(raw: &str) -> Self {
        ResumePolicy::resolve(raw)
    }
}

impl fmt::Display for ResumePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process-level resume settings, resolved once at session startup.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResumeSettings {
    pub policy: ResumePolicy,
}

impl ResumeSettings {
    pub fn new(policy: ResumePolicy) -> Self {
        Self { policy }
    }
}

/// Apply environment overrides on top of explicit configuration.
pub fn apply_env_overrides(settings: &mut ResumeSettings) {
    if let Ok(raw) = std::env::var("RUNWEAVE_RESUME") {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            settings.policy = ResumePolicy::resolve(trimmed);
        }
    }
}
