//! Candidate/round state machine driving remote quiz generation.
//!
//! Per request the controller walks `Trying(round, candidate)` states over
//! the ordered candidate list until one attempt yields a valid quiz
//! (`Succeeded`) or every round is spent (`Exhausted`). Rate-limited
//! attempts sleep for a jittered base delay before advancing; every other
//! failure advances immediately. A larger delay separates rounds.
//!
//! Worst case wall-clock time is bounded by
//! `rounds * (candidates * (call latency + rate-limit delay) + round delay)`
//! and additionally by the optional request deadline.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::GenerationConfig;
use crate::metrics::{GENERATION_ATTEMPTS_TOTAL, GENERATION_BACKOFF_SECONDS};
use crate::models::{
    AttemptOutcome, GenerationAttempt, GenerationRequest, ModelCandidate, QuizPayload,
};
use crate::services::ai_backend::{attempt, CompletionBackend};
use crate::services::quiz_parser;
use crate::utils::retry::with_jitter;

#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub rounds: u32,
    pub rate_limit_backoff: Duration,
    pub rate_limit_jitter: Option<Duration>,
    pub round_backoff: Duration,
}

impl BackoffPolicy {
    pub fn from_config(config: &GenerationConfig) -> Self {
        Self {
            rounds: config.rounds.max(1),
            rate_limit_backoff: config.rate_limit_backoff,
            rate_limit_jitter: Some(config.rate_limit_jitter),
            round_backoff: config.round_backoff,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExhaustionReason {
    NoCandidates,
    AllCandidatesFailed,
    DeadlineExceeded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerState {
    /// Rounds are 1-based; candidate indexes follow priority order.
    Trying { round: u32, candidate_index: usize },
    RoundBackoff { next_round: u32 },
    Succeeded { payload: QuizPayload, model: String },
    Exhausted(ExhaustionReason),
}

/// Next state after a failed attempt at `(round, candidate_index)`.
pub fn after_failure(
    round: u32,
    candidate_index: usize,
    candidate_count: usize,
    rounds: u32,
) -> ControllerState {
    if candidate_index + 1 < candidate_count {
        ControllerState::Trying {
            round,
            candidate_index: candidate_index + 1,
        }
    } else if round < rounds {
        ControllerState::RoundBackoff {
            next_round: round + 1,
        }
    } else {
        ControllerState::Exhausted(ExhaustionReason::AllCandidatesFailed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
    Succeeded { payload: QuizPayload, model: String },
    Exhausted(ExhaustionReason),
}

#[derive(Debug, Clone)]
pub struct GenerationReport {
    pub outcome: GenerationOutcome,
    pub attempts: Vec<GenerationAttempt>,
}

impl GenerationReport {
    pub fn saw_rate_limit(&self) -> bool {
        self.attempts
            .iter()
            .any(|a| a.outcome == AttemptOutcome::RateLimited)
    }
}

pub struct GenerationController {
    backend: Arc<dyn CompletionBackend>,
    candidates: Vec<ModelCandidate>,
    policy: BackoffPolicy,
}

impl GenerationController {
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        candidates: Vec<ModelCandidate>,
        policy: BackoffPolicy,
    ) -> Self {
        Self {
            backend,
            candidates,
            policy,
        }
    }

    pub fn candidates(&self) -> &[ModelCandidate] {
        &self.candidates
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Runs the state machine to a terminal state. Never fails: exhaustion
    /// (including an expired deadline) is reported in the outcome.
    pub async fn run(
        &self,
        request: &GenerationRequest,
        prompt: &str,
        deadline: Option<Instant>,
    ) -> GenerationReport {
        let mut attempts = Vec::new();
        let mut state = if self.candidates.is_empty() {
            ControllerState::Exhausted(ExhaustionReason::NoCandidates)
        } else {
            ControllerState::Trying {
                round: 1,
                candidate_index: 0,
            }
        };

        loop {
            state = match state {
                ControllerState::Trying {
                    round,
                    candidate_index,
                } => {
                    self.try_candidate(request, prompt, deadline, round, candidate_index, &mut attempts)
                        .await
                }
                ControllerState::RoundBackoff { next_round } => {
                    tracing::info!(
                        next_round,
                        delay_ms = self.policy.round_backoff.as_millis() as u64,
                        "All candidates failed this round; backing off"
                    );
                    GENERATION_BACKOFF_SECONDS
                        .with_label_values(&["round"])
                        .observe(self.policy.round_backoff.as_secs_f64());
                    match within_deadline(deadline, tokio::time::sleep(self.policy.round_backoff))
                        .await
                    {
                        Some(()) => ControllerState::Trying {
                            round: next_round,
                            candidate_index: 0,
                        },
                        None => ControllerState::Exhausted(ExhaustionReason::DeadlineExceeded),
                    }
                }
                ControllerState::Succeeded { payload, model } => {
                    return GenerationReport {
                        outcome: GenerationOutcome::Succeeded { payload, model },
                        attempts,
                    };
                }
                ControllerState::Exhausted(reason) => {
                    tracing::warn!(
                        ?reason,
                        attempts = attempts.len(),
                        "Remote quiz generation exhausted"
                    );
                    return GenerationReport {
                        outcome: GenerationOutcome::Exhausted(reason),
                        attempts,
                    };
                }
            };
        }
    }

    async fn try_candidate(
        &self,
        request: &GenerationRequest,
        prompt: &str,
        deadline: Option<Instant>,
        round: u32,
        candidate_index: usize,
        attempts: &mut Vec<GenerationAttempt>,
    ) -> ControllerState {
        let candidate = &self.candidates[candidate_index];
        tracing::info!(model = %candidate.identifier, round, "Trying model");

        let started = Instant::now();
        let Some(result) =
            within_deadline(deadline, attempt(self.backend.as_ref(), candidate, prompt)).await
        else {
            return ControllerState::Exhausted(ExhaustionReason::DeadlineExceeded);
        };

        let evaluated = match result {
            Ok(raw) => self.evaluate(&raw, request, candidate),
            Err(err) => {
                tracing::warn!(model = %candidate.identifier, round, error = %err, "Model attempt failed");
                Err(err.outcome())
            }
        };
        let outcome = match &evaluated {
            Ok(_) => AttemptOutcome::Success,
            Err(outcome) => *outcome,
        };
        GENERATION_ATTEMPTS_TOTAL
            .with_label_values(&[candidate.identifier.as_str(), outcome.as_str()])
            .inc();

        let mut record = GenerationAttempt {
            candidate: candidate.clone(),
            round,
            outcome,
            elapsed: started.elapsed(),
            backoff: None,
        };

        if let Ok(payload) = evaluated {
            tracing::info!(model = %candidate.identifier, round, "Successfully generated quiz");
            attempts.push(record);
            return ControllerState::Succeeded {
                payload,
                model: candidate.identifier.clone(),
            };
        }

        let next = after_failure(
            round,
            candidate_index,
            self.candidates.len(),
            self.policy.rounds,
        );

        if outcome == AttemptOutcome::RateLimited
            && !matches!(next, ControllerState::Exhausted(_))
        {
            let wait = with_jitter(self.policy.rate_limit_backoff, self.policy.rate_limit_jitter);
            record.backoff = Some(wait);
            attempts.push(record);
            GENERATION_BACKOFF_SECONDS
                .with_label_values(&["rate_limited"])
                .observe(wait.as_secs_f64());
            tracing::info!(
                model = %candidate.identifier,
                delay_ms = wait.as_millis() as u64,
                "Rate limited; waiting before next candidate"
            );
            if within_deadline(deadline, tokio::time::sleep(wait)).await.is_none() {
                return ControllerState::Exhausted(ExhaustionReason::DeadlineExceeded);
            }
        } else {
            attempts.push(record);
        }

        next
    }

    /// Parse plus question-count policy: surplus questions are dropped,
    /// a shortfall counts as a parse failure for this candidate.
    fn evaluate(
        &self,
        raw: &str,
        request: &GenerationRequest,
        candidate: &ModelCandidate,
    ) -> Result<QuizPayload, AttemptOutcome> {
        let mut payload = quiz_parser::parse(raw).map_err(|err| {
            tracing::warn!(model = %candidate.identifier, error = %err, "Model output rejected");
            AttemptOutcome::ParseError
        })?;

        let wanted = request.question_count as usize;
        let got = payload.questions.len();
        if got < wanted {
            tracing::warn!(
                model = %candidate.identifier,
                wanted,
                got,
                "Model returned too few questions"
            );
            return Err(AttemptOutcome::ParseError);
        }
        if got > wanted {
            tracing::debug!(model = %candidate.identifier, wanted, got, "Truncating surplus questions");
            payload.questions.truncate(wanted);
        }
        Ok(payload)
    }
}

async fn within_deadline<F: Future>(deadline: Option<Instant>, fut: F) -> Option<F::Output> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, fut).await.ok(),
        None => Some(fut.await),
    }
}
