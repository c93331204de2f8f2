use crate::calendar::CalendarError;
use ulid::Ulid;

use crate::model::{StateCode, UnitId};

#[derive(Debug)]
pub enum EngineError {
    NotFound(UnitId),
    AlreadyExists(UnitId),
    /// Default states must be non-negative; negatives mean "tentative".
    InvalidDefaultState(StateCode),
    LimitExceeded(&'static str),
    Calendar(CalendarError),
    /// The calendar returned no outcome for an event it was given.
    MissingOutcome(Ulid),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "unit not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "unit already exists: {id}"),
            EngineError::InvalidDefaultState(state) => {
                write!(f, "default state must be non-negative, got {state}")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Calendar(e) => write!(f, "{e}"),
            EngineError::MissingOutcome(id) => write!(f, "no outcome reported for event {id}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Calendar(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CalendarError> for EngineError {
    fn from(e: CalendarError) -> Self {
        match e {
            CalendarError::UnitNotFound(id) => EngineError::NotFound(id),
            other => EngineError::Calendar(other),
        }
    }
}
