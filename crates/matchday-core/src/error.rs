// Error types surfaced by the league core.

use thiserror::Error;

use crate::model::{MatchId, MatchStatus, PlayerId};

/// Errors returned by [`crate::service::LeagueService`] operations.
///
/// Validation variants are caller mistakes and are never retried. `Store`
/// wraps anything that went wrong below the domain layer; the surrounding
/// transaction has already been rolled back when it is returned.
#[derive(Debug, Error)]
pub enum MatchdayError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("player {player_id} is not an admin of this league")]
    NotAdmin { player_id: PlayerId },

    #[error("player {player_id} is not a captain of match {match_id}")]
    NotCaptain { player_id: PlayerId, match_id: MatchId },

    #[error("player {player_id} did not take part in match {match_id}")]
    NotParticipant { player_id: PlayerId, match_id: MatchId },

    #[error("players cannot vote for themselves")]
    SelfVote,

    #[error("match timing field `{field}` is required")]
    MissingMatchTiming { field: &'static str },

    #[error("invalid schedule: {message}")]
    InvalidSchedule { message: String },

    #[error("invalid roster: {message}")]
    InvalidRoster { message: String },

    #[error("invalid goals: {message}")]
    InvalidGoals { message: String },

    #[error("invalid payload: {message}")]
    InvalidPayload { message: String },

    #[error("match {match_id} has no uploaded result to confirm")]
    ResultNotUploaded { match_id: MatchId },

    #[error("cannot {action} while match is {status}")]
    InvalidTransition {
        action: &'static str,
        status: MatchStatus,
    },

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl From<rusqlite::Error> for MatchdayError {
    fn from(err: rusqlite::Error) -> Self {
        MatchdayError::Store(err.into())
    }
}

impl MatchdayError {
    /// Whether the error was caused by the request itself rather than by the
    /// store. Callers map these to client errors.
    pub fn is_validation(&self) -> bool {
        !matches!(self, MatchdayError::Store(_))
    }
}

pub type Result<T, E = MatchdayError> = std::result::Result<T, E>;
