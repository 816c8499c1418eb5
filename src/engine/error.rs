use ulid::Ulid;

use crate::model::{BookingStatus, Span};

/// What kind of record a `NotFound` refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Room,
    Booking,
    GuestAccess,
    Alarm,
}

impl Entity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Entity::Room => "room",
            Entity::Booking => "booking",
            Entity::GuestAccess => "guest access permission",
            Entity::Alarm => "alarm",
        }
    }
}

/// Lifecycle operations on a booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    CheckIn,
    CheckOut,
    Cancel,
}

impl Transition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transition::CheckIn => "check-in",
            Transition::CheckOut => "check-out",
            Transition::Cancel => "cancel",
        }
    }

    pub fn target(&self) -> BookingStatus {
        match self {
            Transition::CheckIn => BookingStatus::CheckedIn,
            Transition::CheckOut => BookingStatus::CheckedOut,
            Transition::Cancel => BookingStatus::Cancelled,
        }
    }

    pub fn allowed_from(&self, from: BookingStatus) -> bool {
        match self {
            Transition::CheckIn => from == BookingStatus::Confirmed,
            Transition::CheckOut => from == BookingStatus::CheckedIn,
            Transition::Cancel => {
                matches!(from, BookingStatus::Confirmed | BookingStatus::CheckedIn)
            }
        }
    }
}

#[derive(Debug)]
pub enum EngineError {
    NotFound(Entity, Ulid),
    AlreadyExists(Ulid),
    Forbidden {
        user: Ulid,
        action: &'static str,
    },
    /// Overlaps the given live booking on the same room.
    Conflict(Ulid),
    InvalidState {
        id: Ulid,
        reason: &'static str,
    },
    InvalidTransition {
        id: Ulid,
        from: BookingStatus,
        action: Transition,
    },
    OutOfRange {
        window: Span,
        stay: Span,
    },
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
    LimitExceeded(&'static str),
    /// Storage failure. The only kind worth retrying.
    Unavailable(String),
}

impl EngineError {
    /// Stable machine-readable code for the calling layer.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::NotFound(..) => "not_found",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::Forbidden { .. } => "forbidden",
            EngineError::Conflict(_) => "conflict",
            EngineError::InvalidState { .. } => "invalid_state",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::OutOfRange { .. } => "out_of_range",
            EngineError::InvalidField { .. } => "invalid_field",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::Unavailable(_) => "unavailable",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Unavailable(_))
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(entity, id) => write!(f, "{} not found: {id}", entity.as_str()),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Forbidden { user, action } => {
                write!(f, "user {user} is not allowed to {action}")
            }
            EngineError::Conflict(id) => {
                write!(f, "room is already booked for these dates (conflicts with booking {id})")
            }
            EngineError::InvalidState { id, reason } => write!(f, "{id}: {reason}"),
            EngineError::InvalidTransition { id, from, action } => write!(
                f,
                "cannot {} booking {id}: status is {from}",
                action.as_str()
            ),
            EngineError::OutOfRange { window, stay } => write!(
                f,
                "window [{}, {}) is not within booking period [{}, {})",
                window.start, window.end, stay.start, stay.end
            ),
            EngineError::InvalidField { field, reason } => write!(f, "invalid {field}: {reason}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Unavailable(e) => write!(f, "storage unavailable: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
