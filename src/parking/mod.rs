pub mod domain;
pub mod error;
pub mod repository;
pub mod views;

pub use domain::{Identity, LotId, LotInput, ParkingLot, Reservation, Role, SpotId, UserId};
pub use error::ParkingError;
pub use repository::{DynParkingRepository, ParkingRepository, SqliteParkingRepository};
