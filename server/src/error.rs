use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use mukatte_protocol::IdentityError;
use thiserror::Error;

use crate::deck::DeckError;

/// Failures reported synchronously to whoever asked the coordinator for something.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("invalid identity: {0}")]
    SlotIdentityInvalid(String),

    #[error("room {0:?} already has two players")]
    RoomFull(String),

    #[error("room {0:?} does not exist")]
    RoomNotFound(String),

    #[error("identity is not seated in any room")]
    NotInAnyRoom,

    #[error("cannot deal a new board: {0}")]
    ResourceUnavailable(#[from] DeckError),
}

impl From<IdentityError> for CoordinatorError {
    fn from(e: IdentityError) -> Self {
        CoordinatorError::SlotIdentityInvalid(e.to_string())
    }
}

impl CoordinatorError {
    pub fn status(&self) -> StatusCode {
        match self {
            CoordinatorError::SlotIdentityInvalid(_) | CoordinatorError::RoomNotFound(_) => {
                StatusCode::BAD_REQUEST
            }
            CoordinatorError::RoomFull(_) => StatusCode::CONFLICT,
            CoordinatorError::NotInAnyRoom => StatusCode::FORBIDDEN,
            CoordinatorError::ResourceUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for CoordinatorError {
    fn into_response(self) -> Response {
        match &self {
            CoordinatorError::ResourceUnavailable(_) => tracing::error!("{self}"),
            _ => tracing::debug!("request rejected: {self}"),
        }
        (self.status(), self.to_string()).into_response()
    }
}
