use thiserror::Error;

use crate::job::JobId;

/// Named error kinds surfaced by [`Round`](crate::round::Round) and
/// [`QueueRound`](crate::queue_round::QueueRound) mutators.
///
/// Every variant is raised *before* any field covered by the invariants in
/// `SPEC_FULL.md` §3 is written to, so a caller that sees an `Err` can assume the
/// round is exactly as it was before the call.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum RoundError {
    #[error("queue '{0}' is already registered for this round")]
    DuplicateQueue(String),

    #[error("queue '{0}' has no registered QueueRound")]
    UnknownQueue(String),

    #[error("job '{0}' already has a recorded decision this round")]
    DuplicateJobDecision(JobId),

    #[error("job '{0}' cannot be evicted from its current state")]
    InvalidEviction(JobId),

    #[error("job '{0}' was recorded successful without pod requirements")]
    MissingPodRequirements(JobId),
}

/// Raised constructing a [`GangDecision`](crate::gang::GangDecision).
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum GangError {
    #[error("a gang decision must contain at least one job")]
    Empty,
}
