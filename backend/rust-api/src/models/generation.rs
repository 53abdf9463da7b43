use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// One configured backend model. Lower priority values are tried first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelCandidate {
    pub identifier: String,
    pub priority: usize,
}

impl ModelCandidate {
    /// Builds the ordered candidate list from configuration order.
    pub fn from_identifiers<I, S>(identifiers: I) -> Vec<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        identifiers
            .into_iter()
            .enumerate()
            .map(|(priority, identifier)| ModelCandidate {
                identifier: identifier.into(),
                priority,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    RateLimited,
    NotFound,
    ParseError,
    OtherError,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Success => "success",
            AttemptOutcome::RateLimited => "rate_limited",
            AttemptOutcome::NotFound => "not_found",
            AttemptOutcome::ParseError => "parse_error",
            AttemptOutcome::OtherError => "other_error",
        }
    }
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record of a single call to a single candidate. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationAttempt {
    pub candidate: ModelCandidate,
    pub round: u32,
    pub outcome: AttemptOutcome,
    pub elapsed: Duration,
    /// Delay applied after this attempt before the next one, if any.
    pub backoff: Option<Duration>,
}
