use thiserror::Error;

/// Errors surfaced by the reservation core.
///
/// The first group are business outcomes the caller is expected to handle;
/// the storage variants mean the whole operation was rolled back.
#[derive(Debug, Error)]
pub enum ParkingError {
    #[error("User already has an active parking reservation")]
    AlreadyBooked,

    #[error("No available spots in this parking lot")]
    NoAvailableSpot,

    #[error("No active reservation found")]
    NoActiveReservation,

    #[error("Parking lot still has occupied spots")]
    LotOccupied,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Caller is not allowed to perform this operation")]
    Forbidden,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("SQL error: {0}")]
    Sql(#[from] rusqlite::Error),
}

impl ParkingError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }
}
