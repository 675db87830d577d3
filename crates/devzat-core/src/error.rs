//! Narrow, matchable error types for the domain boundaries that need to
//! branch on *kind* of failure (command input, authorization, RPC status
//! mapping). Everything else propagates as [`anyhow::Error`], mirroring how
//! the teacher (`libshpool`) uses `anyhow` pervasively and only reaches for
//! a dedicated enum where callers need to match (`shpool_protocol`'s wire
//! enums play that role there; here it's `DevzatError`).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DevzatError {
    #[error("invalid room name: {0}")]
    InvalidRoomName(String),

    #[error("room {0} not found")]
    RoomNotFound(String),

    #[error("user {0} not found")]
    UserNotFound(String),

    #[error("name {0} is already taken in this room")]
    NameTaken(String),

    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("unknown color: {0}")]
    UnknownColor(String),

    #[error("{0} is not an admin")]
    Unauthorized(String),

    #[error("room {0} is not empty")]
    RoomNotEmpty(String),

    #[error("cannot remove #main")]
    CannotRemoveMain,

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("banned")]
    Banned,

    #[error("image too large: {0}")]
    ImageTooLarge(String),

    #[error("image fetch failed: {0}")]
    ImageFetchFailed(String),

    #[error("invalid plugin token")]
    InvalidToken,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl From<&DevzatError> for tonic::Code {
    fn from(e: &DevzatError) -> tonic::Code {
        match e {
            DevzatError::RoomNotFound(_) | DevzatError::UserNotFound(_) => tonic::Code::NotFound,
            DevzatError::InvalidRoomName(_)
            | DevzatError::InvalidName(_)
            | DevzatError::InvalidTimezone(_)
            | DevzatError::UnknownColor(_) => tonic::Code::InvalidArgument,
            DevzatError::Unauthorized(_) | DevzatError::InvalidToken => {
                tonic::Code::Unauthenticated
            }
            DevzatError::RateLimited(_) => tonic::Code::ResourceExhausted,
            _ => tonic::Code::Internal,
        }
    }
}

impl From<DevzatError> for tonic::Status {
    fn from(e: DevzatError) -> tonic::Status {
        let code = tonic::Code::from(&e);
        tonic::Status::new(code, e.to_string())
    }
}
