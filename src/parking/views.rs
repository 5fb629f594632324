use serde::Serialize;

use crate::parking::domain::{LotId, ParkingLot, ParkingSpot, Reservation};

/// One row of the public availability listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LotAvailability {
    pub lot_id: LotId,
    pub name: String,
    pub available_count: i64,
    pub total_declared: i64,
    pub price: f64,
}

/// A spot together with the reservation currently holding it, if any.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpotStatusView {
    #[serde(flatten)]
    pub spot: ParkingSpot,
    pub active_reservation: Option<Reservation>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LotOccupancy {
    pub lot: ParkingLot,
    pub occupied: i64,
    /// Declared capacity minus occupied spots, floored at zero.
    pub available: i64,
}

/// Totals shown on the administrator dashboard.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardStats {
    pub total_lots: i64,
    pub total_spots: i64,
    pub occupied_spots: i64,
    pub available_spots: i64,
    pub total_users: i64,
    pub lots: Vec<LotOccupancy>,
}
