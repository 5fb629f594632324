// Domain types - pure, no database access
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::parking::error::ParkingError;

/// Upper bound on the declared capacity of a single lot.
pub const MAX_SPOTS_PER_LOT: i64 = 10_000;

const MICROS_PER_HOUR: f64 = 3_600_000_000.0;

/// New types for compile-time safety
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LotId(pub i64);

impl fmt::Display for LotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpotId(pub i64);

impl fmt::Display for SpotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReservationId(pub i64);

impl fmt::Display for ReservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::User => "user",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Self::Admin),
            "user" => Some(Self::User),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Occupancy of a single spot. Stored as a one-letter code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpotStatus {
    Available,
    Occupied,
}

impl SpotStatus {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Available => "A",
            Self::Occupied => "O",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "A" => Some(Self::Available),
            "O" => Some(Self::Occupied),
            _ => None,
        }
    }
}

/// The authenticated caller of a core operation.
///
/// Built by the web layer from the session and passed explicitly into every
/// call; the core never looks at request or session state itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub role: Role,
}

impl Identity {
    pub fn admin(user_id: UserId) -> Self {
        Self {
            user_id,
            role: Role::Admin,
        }
    }

    pub fn user(user_id: UserId) -> Self {
        Self {
            user_id,
            role: Role::User,
        }
    }

    pub fn require_admin(&self) -> Result<(), ParkingError> {
        match self.role {
            Role::Admin => Ok(()),
            Role::User => Err(ParkingError::Forbidden),
        }
    }

    pub fn require_user(&self) -> Result<(), ParkingError> {
        match self.role {
            Role::User => Ok(()),
            Role::Admin => Err(ParkingError::Forbidden),
        }
    }
}

/// A parking lot with both its declared capacity and its physical spot rows.
///
/// The two diverge when a shrink is blocked by occupied spots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParkingLot {
    pub id: LotId,
    pub prime_location_name: String,
    pub price: f64,
    pub address: String,
    pub pin_code: String,
    pub declared_capacity: i64,
    pub actual_spot_count: i64,
    pub created_at: DateTime<Utc>,
}

impl ParkingLot {
    /// Spot rows kept beyond the declared capacity because they were occupied
    /// when the lot was shrunk.
    pub fn excess_spots(&self) -> i64 {
        (self.actual_spot_count - self.declared_capacity).max(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParkingSpot {
    pub id: SpotId,
    pub lot_id: LotId,
    pub spot_number: i64,
    pub status: SpotStatus,
}

/// Lot metadata and capacity as submitted by an administrator, used both to
/// create a lot and to edit one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LotInput {
    pub prime_location_name: String,
    pub price: f64,
    pub address: String,
    pub pin_code: String,
    pub maximum_number_of_spots: i64,
}

impl LotInput {
    pub fn validate(&self) -> Result<(), ParkingError> {
        if self.prime_location_name.trim().is_empty() {
            return Err(ParkingError::InvalidInput(
                "Location name cannot be empty".into(),
            ));
        }
        if self.address.trim().is_empty() {
            return Err(ParkingError::InvalidInput("Address cannot be empty".into()));
        }
        if self.pin_code.trim().is_empty() {
            return Err(ParkingError::InvalidInput("Pin code cannot be empty".into()));
        }
        if !self.price.is_finite() || self.price < 0.0 {
            return Err(ParkingError::InvalidInput(
                "Price must be a non-negative number".into(),
            ));
        }
        validate_capacity(self.maximum_number_of_spots)
    }
}

pub fn validate_capacity(capacity: i64) -> Result<(), ParkingError> {
    if !(0..=MAX_SPOTS_PER_LOT).contains(&capacity) {
        return Err(ParkingError::InvalidInput(format!(
            "Number of spots must be between 0 and {}",
            MAX_SPOTS_PER_LOT
        )));
    }
    Ok(())
}

/// A claim by a user on a spot. Active until released, then closed for good.
///
/// `lot_id`, `lot_name` and `spot_number` are copied at booking time;
/// `spot_id` is cleared once the spot row is deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub spot_id: Option<SpotId>,
    pub user_id: UserId,
    pub lot_id: LotId,
    pub lot_name: String,
    pub spot_number: i64,
    pub parking_timestamp: DateTime<Utc>,
    pub leaving_timestamp: Option<DateTime<Utc>>,
    pub parking_cost: Option<f64>,
    pub is_active: bool,
}

impl Reservation {
    pub fn is_closed(&self) -> bool {
        !self.is_active
    }

    /// Transition: Active → Closed
    ///
    /// A `now` earlier than the parking timestamp is clamped to it, so the
    /// closed reservation always has `leaving >= parking` and a non-negative
    /// cost.
    pub fn close(self, now: DateTime<Utc>, price_per_hour: f64) -> Result<Self, ParkingError> {
        if self.is_closed() {
            return Err(ParkingError::NoActiveReservation);
        }

        let leaving = now.max(self.parking_timestamp);
        let cost = parking_cost(self.parking_timestamp, Some(leaving), price_per_hour);

        Ok(Self {
            leaving_timestamp: Some(leaving),
            parking_cost: Some(cost),
            is_active: false,
            ..self
        })
    }
}

/// Duration-based cost, rounded to two decimals.
///
/// Zero when the reservation has not ended.
pub fn parking_cost(
    parked_at: DateTime<Utc>,
    left_at: Option<DateTime<Utc>>,
    price_per_hour: f64,
) -> f64 {
    let Some(left_at) = left_at else {
        return 0.0;
    };

    let micros = (left_at - parked_at)
        .num_microseconds()
        .unwrap_or(i64::MAX)
        .max(0);
    let hours = micros as f64 / MICROS_PER_HOUR;

    round_cents(hours * price_per_hour)
}

/// Round half away from zero to two decimal places.
pub fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

/// Spot rows to add and remove when a lot's capacity changes.
///
/// Driven by the current row count: growing adds `new_capacity - count`
/// spots numbered from `count + 1` upward, skipping numbers still held by
/// spots left over from a blocked shrink. Shrinking removes the available
/// spots numbered above the new capacity; occupied spots are never touched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResizePlan {
    pub create: Vec<i64>,
    pub remove: Vec<SpotId>,
}

impl ResizePlan {
    pub fn compute(existing: &[ParkingSpot], new_capacity: i64) -> Self {
        let count = existing.len() as i64;

        if new_capacity > count {
            let used: BTreeSet<i64> = existing.iter().map(|s| s.spot_number).collect();
            let create = ((count + 1)..)
                .filter(|n| !used.contains(n))
                .take((new_capacity - count) as usize)
                .collect();
            return Self {
                create,
                remove: Vec::new(),
            };
        }

        if new_capacity < count {
            let mut removable: Vec<&ParkingSpot> = existing
                .iter()
                .filter(|s| s.spot_number > new_capacity && s.status == SpotStatus::Available)
                .collect();
            removable.sort_by_key(|s| s.spot_number);
            return Self {
                create: Vec::new(),
                remove: removable.into_iter().map(|s| s.id).collect(),
            };
        }

        Self::default()
    }

    pub fn is_noop(&self) -> bool {
        self.create.is_empty() && self.remove.is_empty()
    }
}
