// Repository pattern - isolates all database side effects
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::Arc;

use crate::db::models::{
    format_timestamp, optional_timestamp_column, timestamp_column, User, USER_COLUMNS,
};
use crate::parking::domain::*;
use crate::parking::error::ParkingError;
use crate::parking::views::{DashboardStats, LotAvailability, LotOccupancy, SpotStatusView};
use crate::state::DbPool;

const LOT_COLUMNS: &str = "l.id, l.prime_location_name, l.price, l.address, l.pin_code, \
     l.maximum_number_of_spots, \
     (SELECT COUNT(*) FROM parking_spots s WHERE s.lot_id = l.id), \
     l.created_at";

const RESERVATION_COLUMNS: &str = "id, spot_id, user_id, lot_id, lot_name, spot_number, \
     parking_timestamp, leaving_timestamp, parking_cost, is_active";

const SPOT_COLUMNS: &str = "id, lot_id, spot_number, status";

/// Repository trait - every core operation
///
/// Each mutating operation runs as one immediate transaction: it either
/// commits all of its writes or none of them.
#[async_trait]
pub trait ParkingRepository: Send + Sync {
    /// Create a lot and spots `1..=capacity`, all available
    async fn create_lot(&self, who: &Identity, input: LotInput)
        -> Result<ParkingLot, ParkingError>;

    /// Change a lot's declared capacity, adding or removing spot rows
    async fn resize_lot(
        &self,
        who: &Identity,
        lot_id: LotId,
        new_capacity: i64,
    ) -> Result<ParkingLot, ParkingError>;

    /// Apply an edit: metadata and capacity together
    async fn update_lot(
        &self,
        who: &Identity,
        lot_id: LotId,
        input: LotInput,
    ) -> Result<ParkingLot, ParkingError>;

    /// Delete a lot and its spots, refused while any spot is occupied
    async fn delete_lot(&self, who: &Identity, lot_id: LotId) -> Result<(), ParkingError>;

    /// Claim the lowest-numbered available spot in a lot
    async fn book(
        &self,
        who: &Identity,
        lot_id: LotId,
        now: DateTime<Utc>,
    ) -> Result<Reservation, ParkingError>;

    /// Close the caller's active reservation and bill it
    async fn release(&self, who: &Identity, now: DateTime<Utc>)
        -> Result<Reservation, ParkingError>;

    async fn get_lot(&self, lot_id: LotId) -> Result<ParkingLot, ParkingError>;

    async fn list_lots(&self) -> Result<Vec<ParkingLot>, ParkingError>;

    async fn lot_availability(&self) -> Result<Vec<LotAvailability>, ParkingError>;

    async fn spot_status(&self, spot_id: SpotId) -> Result<SpotStatusView, ParkingError>;

    /// Every spot of a lot with its active reservation (admin)
    async fn lot_spots(
        &self,
        who: &Identity,
        lot_id: LotId,
    ) -> Result<Vec<SpotStatusView>, ParkingError>;

    async fn active_reservation(
        &self,
        user_id: UserId,
    ) -> Result<Option<Reservation>, ParkingError>;

    /// All reservations of a user, newest first
    async fn reservation_history(&self, user_id: UserId)
        -> Result<Vec<Reservation>, ParkingError>;

    async fn dashboard_stats(&self, who: &Identity) -> Result<DashboardStats, ParkingError>;

    /// Registered users with the `user` role (admin)
    async fn list_users(&self, who: &Identity) -> Result<Vec<User>, ParkingError>;
}

/// SQLite implementation
pub struct SqliteParkingRepository {
    pool: DbPool,
}

impl SqliteParkingRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

/// Run `f` inside `BEGIN IMMEDIATE` ... `COMMIT`, rolling back on any error.
///
/// IMMEDIATE takes the write lock up front so two writers cannot both read
/// the same free spot before either commits.
fn immediate<T>(
    conn: &Connection,
    f: impl FnOnce(&Connection) -> Result<T, ParkingError>,
) -> Result<T, ParkingError> {
    conn.execute_batch("BEGIN IMMEDIATE")?;

    let result = f(conn).and_then(|value| {
        conn.execute_batch("COMMIT")?;
        Ok(value)
    });

    if result.is_err() {
        if let Err(e) = conn.execute_batch("ROLLBACK") {
            tracing::error!("Rollback failed: {}", e);
        }
    }

    result
}

fn lot_from_row(row: &Row<'_>) -> rusqlite::Result<ParkingLot> {
    Ok(ParkingLot {
        id: LotId(row.get(0)?),
        prime_location_name: row.get(1)?,
        price: row.get(2)?,
        address: row.get(3)?,
        pin_code: row.get(4)?,
        declared_capacity: row.get(5)?,
        actual_spot_count: row.get(6)?,
        created_at: timestamp_column(row, 7)?,
    })
}

fn spot_from_row(row: &Row<'_>) -> rusqlite::Result<ParkingSpot> {
    let code: String = row.get(3)?;
    let status = SpotStatus::from_code(&code).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            Type::Text,
            format!("unknown spot status '{}'", code).into(),
        )
    })?;

    Ok(ParkingSpot {
        id: SpotId(row.get(0)?),
        lot_id: LotId(row.get(1)?),
        spot_number: row.get(2)?,
        status,
    })
}

fn reservation_from_row(row: &Row<'_>) -> rusqlite::Result<Reservation> {
    Ok(Reservation {
        id: ReservationId(row.get(0)?),
        spot_id: row.get::<_, Option<i64>>(1)?.map(SpotId),
        user_id: UserId(row.get(2)?),
        lot_id: LotId(row.get(3)?),
        lot_name: row.get(4)?,
        spot_number: row.get(5)?,
        parking_timestamp: timestamp_column(row, 6)?,
        leaving_timestamp: optional_timestamp_column(row, 7)?,
        parking_cost: row.get(8)?,
        is_active: row.get(9)?,
    })
}

fn load_lot(conn: &Connection, lot_id: LotId) -> Result<ParkingLot, ParkingError> {
    let result = conn.query_row(
        &format!("SELECT {} FROM parking_lots l WHERE l.id = ?1", LOT_COLUMNS),
        params![lot_id.0],
        lot_from_row,
    );

    match result {
        Ok(lot) => Ok(lot),
        Err(rusqlite::Error::QueryReturnedNoRows) => {
            Err(ParkingError::not_found(format!("parking lot {}", lot_id)))
        }
        Err(e) => Err(e.into()),
    }
}

fn load_spots(conn: &Connection, lot_id: LotId) -> Result<Vec<ParkingSpot>, ParkingError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM parking_spots WHERE lot_id = ?1 ORDER BY spot_number",
        SPOT_COLUMNS
    ))?;
    let spots = stmt
        .query_map(params![lot_id.0], spot_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(spots)
}

fn active_reservation_for_user(
    conn: &Connection,
    user_id: UserId,
) -> Result<Option<Reservation>, ParkingError> {
    let reservation = conn
        .query_row(
            &format!(
                "SELECT {} FROM reservations WHERE user_id = ?1 AND is_active = 1",
                RESERVATION_COLUMNS
            ),
            params![user_id.0],
            reservation_from_row,
        )
        .optional()?;
    Ok(reservation)
}

fn active_reservation_for_spot(
    conn: &Connection,
    spot_id: SpotId,
) -> Result<Option<Reservation>, ParkingError> {
    let reservation = conn
        .query_row(
            &format!(
                "SELECT {} FROM reservations WHERE spot_id = ?1 AND is_active = 1",
                RESERVATION_COLUMNS
            ),
            params![spot_id.0],
            reservation_from_row,
        )
        .optional()?;
    Ok(reservation)
}

fn spot_view(conn: &Connection, spot: ParkingSpot) -> Result<SpotStatusView, ParkingError> {
    let active_reservation = match spot.status {
        SpotStatus::Occupied => active_reservation_for_spot(conn, spot.id)?,
        SpotStatus::Available => None,
    };
    Ok(SpotStatusView {
        spot,
        active_reservation,
    })
}

fn insert_spots(conn: &Connection, lot_id: LotId, numbers: &[i64]) -> Result<(), ParkingError> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO parking_spots (lot_id, status, spot_number) VALUES (?1, ?2, ?3)",
    )?;
    for number in numbers {
        stmt.execute(params![lot_id.0, SpotStatus::Available.code(), number])?;
    }
    Ok(())
}

/// Bring a lot's spot rows in line with `new_capacity` and record it as the
/// declared capacity, whatever the resulting row count.
fn apply_resize(
    conn: &Connection,
    lot_id: LotId,
    new_capacity: i64,
) -> Result<ResizePlan, ParkingError> {
    let existing = load_spots(conn, lot_id)?;
    let plan = ResizePlan::compute(&existing, new_capacity);

    insert_spots(conn, lot_id, &plan.create)?;

    for spot_id in &plan.remove {
        // History keeps its snapshot; only the link to the row goes
        conn.execute(
            "UPDATE reservations SET spot_id = NULL WHERE spot_id = ?1",
            params![spot_id.0],
        )?;
        conn.execute(
            "DELETE FROM parking_spots WHERE id = ?1 AND status = ?2",
            params![spot_id.0, SpotStatus::Available.code()],
        )?;
    }

    conn.execute(
        "UPDATE parking_lots SET maximum_number_of_spots = ?1 WHERE id = ?2",
        params![new_capacity, lot_id.0],
    )?;

    Ok(plan)
}

fn count(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<i64, ParkingError> {
    Ok(conn.query_row(sql, params, |row| row.get(0))?)
}

#[async_trait]
impl ParkingRepository for SqliteParkingRepository {
    async fn create_lot(
        &self,
        who: &Identity,
        input: LotInput,
    ) -> Result<ParkingLot, ParkingError> {
        who.require_admin()?;
        input.validate()?;

        let conn = self.pool.get()?;
        let lot = immediate(&conn, |conn| {
            conn.execute(
                "INSERT INTO parking_lots
                 (prime_location_name, price, address, pin_code, maximum_number_of_spots)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    input.prime_location_name.trim(),
                    input.price,
                    input.address.trim(),
                    input.pin_code.trim(),
                    input.maximum_number_of_spots,
                ],
            )?;
            let lot_id = LotId(conn.last_insert_rowid());

            let numbers: Vec<i64> = (1..=input.maximum_number_of_spots).collect();
            insert_spots(conn, lot_id, &numbers)?;

            load_lot(conn, lot_id)
        })?;

        tracing::info!(
            lot_id = %lot.id,
            spots = lot.actual_spot_count,
            "Parking lot created"
        );
        Ok(lot)
    }

    async fn resize_lot(
        &self,
        who: &Identity,
        lot_id: LotId,
        new_capacity: i64,
    ) -> Result<ParkingLot, ParkingError> {
        who.require_admin()?;
        validate_capacity(new_capacity)?;

        let conn = self.pool.get()?;
        let (lot, plan) = immediate(&conn, |conn| {
            load_lot(conn, lot_id)?;
            let plan = apply_resize(conn, lot_id, new_capacity)?;
            Ok((load_lot(conn, lot_id)?, plan))
        })?;

        tracing::info!(
            lot_id = %lot_id,
            declared = lot.declared_capacity,
            actual = lot.actual_spot_count,
            created = plan.create.len(),
            removed = plan.remove.len(),
            "Parking lot resized"
        );
        Ok(lot)
    }

    async fn update_lot(
        &self,
        who: &Identity,
        lot_id: LotId,
        input: LotInput,
    ) -> Result<ParkingLot, ParkingError> {
        who.require_admin()?;
        input.validate()?;

        let conn = self.pool.get()?;
        let lot = immediate(&conn, |conn| {
            load_lot(conn, lot_id)?;
            conn.execute(
                "UPDATE parking_lots
                 SET prime_location_name = ?1, price = ?2, address = ?3, pin_code = ?4
                 WHERE id = ?5",
                params![
                    input.prime_location_name.trim(),
                    input.price,
                    input.address.trim(),
                    input.pin_code.trim(),
                    lot_id.0,
                ],
            )?;
            apply_resize(conn, lot_id, input.maximum_number_of_spots)?;
            load_lot(conn, lot_id)
        })?;

        if lot.excess_spots() > 0 {
            tracing::info!(
                lot_id = %lot_id,
                excess = lot.excess_spots(),
                "Occupied spots kept above declared capacity"
            );
        }
        tracing::info!(lot_id = %lot_id, "Parking lot updated");
        Ok(lot)
    }

    async fn delete_lot(&self, who: &Identity, lot_id: LotId) -> Result<(), ParkingError> {
        who.require_admin()?;

        let conn = self.pool.get()?;
        immediate(&conn, |conn| {
            load_lot(conn, lot_id)?;

            let occupied = count(
                conn,
                "SELECT COUNT(*) FROM parking_spots WHERE lot_id = ?1 AND status = ?2",
                params![lot_id.0, SpotStatus::Occupied.code()],
            )?;
            if occupied > 0 {
                return Err(ParkingError::LotOccupied);
            }

            conn.execute(
                "UPDATE reservations SET spot_id = NULL
                 WHERE spot_id IN (SELECT id FROM parking_spots WHERE lot_id = ?1)",
                params![lot_id.0],
            )?;
            conn.execute(
                "DELETE FROM parking_spots WHERE lot_id = ?1",
                params![lot_id.0],
            )?;
            conn.execute("DELETE FROM parking_lots WHERE id = ?1", params![lot_id.0])?;
            Ok(())
        })?;

        tracing::info!(lot_id = %lot_id, "Parking lot deleted");
        Ok(())
    }

    async fn book(
        &self,
        who: &Identity,
        lot_id: LotId,
        now: DateTime<Utc>,
    ) -> Result<Reservation, ParkingError> {
        who.require_user()?;

        let conn = self.pool.get()?;
        let reservation = immediate(&conn, |conn| {
            let user_exists = count(
                conn,
                "SELECT COUNT(*) FROM users WHERE id = ?1",
                params![who.user_id.0],
            )?;
            if user_exists == 0 {
                return Err(ParkingError::not_found(format!("user {}", who.user_id)));
            }

            if active_reservation_for_user(conn, who.user_id)?.is_some() {
                return Err(ParkingError::AlreadyBooked);
            }

            let lot = load_lot(conn, lot_id)?;

            let spot = conn
                .query_row(
                    &format!(
                        "SELECT {} FROM parking_spots
                         WHERE lot_id = ?1 AND status = ?2
                         ORDER BY spot_number LIMIT 1",
                        SPOT_COLUMNS
                    ),
                    params![lot_id.0, SpotStatus::Available.code()],
                    spot_from_row,
                )
                .optional()?
                .ok_or(ParkingError::NoAvailableSpot)?;

            conn.execute(
                "INSERT INTO reservations
                 (spot_id, user_id, lot_id, lot_name, spot_number, parking_timestamp, is_active)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1)",
                params![
                    spot.id.0,
                    who.user_id.0,
                    lot.id.0,
                    lot.prime_location_name,
                    spot.spot_number,
                    format_timestamp(now),
                ],
            )?;
            let reservation_id = ReservationId(conn.last_insert_rowid());

            conn.execute(
                "UPDATE parking_spots SET status = ?1 WHERE id = ?2",
                params![SpotStatus::Occupied.code(), spot.id.0],
            )?;

            Ok(Reservation {
                id: reservation_id,
                spot_id: Some(spot.id),
                user_id: who.user_id,
                lot_id: lot.id,
                lot_name: lot.prime_location_name,
                spot_number: spot.spot_number,
                parking_timestamp: now,
                leaving_timestamp: None,
                parking_cost: None,
                is_active: true,
            })
        })?;

        tracing::info!(
            user_id = %reservation.user_id,
            lot_id = %reservation.lot_id,
            spot_number = reservation.spot_number,
            "Spot booked"
        );
        Ok(reservation)
    }

    async fn release(
        &self,
        who: &Identity,
        now: DateTime<Utc>,
    ) -> Result<Reservation, ParkingError> {
        who.require_user()?;

        let conn = self.pool.get()?;
        let closed = immediate(&conn, |conn| {
            let active = active_reservation_for_user(conn, who.user_id)?
                .ok_or(ParkingError::NoActiveReservation)?;

            // An occupied spot cannot be removed, so an active reservation
            // always still has its spot and lot
            let spot_id = active.spot_id.ok_or_else(|| {
                ParkingError::not_found(format!("spot of reservation {}", active.id))
            })?;
            let price: f64 = conn
                .query_row(
                    "SELECT l.price FROM parking_spots s
                     JOIN parking_lots l ON l.id = s.lot_id
                     WHERE s.id = ?1",
                    params![spot_id.0],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or_else(|| ParkingError::not_found(format!("parking spot {}", spot_id)))?;

            let closed = active.close(now, price)?;

            conn.execute(
                "UPDATE reservations
                 SET leaving_timestamp = ?1, parking_cost = ?2, is_active = 0
                 WHERE id = ?3",
                params![
                    closed.leaving_timestamp.map(format_timestamp),
                    closed.parking_cost,
                    closed.id.0,
                ],
            )?;
            conn.execute(
                "UPDATE parking_spots SET status = ?1 WHERE id = ?2",
                params![SpotStatus::Available.code(), spot_id.0],
            )?;

            Ok(closed)
        })?;

        tracing::info!(
            user_id = %closed.user_id,
            lot_id = %closed.lot_id,
            spot_number = closed.spot_number,
            cost = closed.parking_cost.unwrap_or_default(),
            "Spot released"
        );
        Ok(closed)
    }

    async fn get_lot(&self, lot_id: LotId) -> Result<ParkingLot, ParkingError> {
        let conn = self.pool.get()?;
        load_lot(&conn, lot_id)
    }

    async fn list_lots(&self) -> Result<Vec<ParkingLot>, ParkingError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM parking_lots l ORDER BY l.id",
            LOT_COLUMNS
        ))?;
        let lots = stmt
            .query_map([], lot_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(lots)
    }

    async fn lot_availability(&self) -> Result<Vec<LotAvailability>, ParkingError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT l.id, l.prime_location_name, l.maximum_number_of_spots, l.price,
                    (SELECT COUNT(*) FROM parking_spots s WHERE s.lot_id = l.id AND s.status = ?1)
             FROM parking_lots l ORDER BY l.id",
        )?;
        let rows = stmt
            .query_map(params![SpotStatus::Available.code()], |row| {
                Ok(LotAvailability {
                    lot_id: LotId(row.get(0)?),
                    name: row.get(1)?,
                    total_declared: row.get(2)?,
                    price: row.get(3)?,
                    available_count: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    async fn spot_status(&self, spot_id: SpotId) -> Result<SpotStatusView, ParkingError> {
        let conn = self.pool.get()?;
        let spot = conn
            .query_row(
                &format!("SELECT {} FROM parking_spots WHERE id = ?1", SPOT_COLUMNS),
                params![spot_id.0],
                spot_from_row,
            )
            .optional()?
            .ok_or_else(|| ParkingError::not_found(format!("parking spot {}", spot_id)))?;

        spot_view(&conn, spot)
    }

    async fn lot_spots(
        &self,
        who: &Identity,
        lot_id: LotId,
    ) -> Result<Vec<SpotStatusView>, ParkingError> {
        who.require_admin()?;

        let conn = self.pool.get()?;
        load_lot(&conn, lot_id)?;
        load_spots(&conn, lot_id)?
            .into_iter()
            .map(|spot| spot_view(&conn, spot))
            .collect()
    }

    async fn active_reservation(
        &self,
        user_id: UserId,
    ) -> Result<Option<Reservation>, ParkingError> {
        let conn = self.pool.get()?;
        active_reservation_for_user(&conn, user_id)
    }

    async fn reservation_history(
        &self,
        user_id: UserId,
    ) -> Result<Vec<Reservation>, ParkingError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM reservations WHERE user_id = ?1
             ORDER BY parking_timestamp DESC, id DESC",
            RESERVATION_COLUMNS
        ))?;
        let history = stmt
            .query_map(params![user_id.0], reservation_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(history)
    }

    async fn dashboard_stats(&self, who: &Identity) -> Result<DashboardStats, ParkingError> {
        who.require_admin()?;

        let lots = self.list_lots().await?;

        let conn = self.pool.get()?;
        let total_spots = count(&conn, "SELECT COUNT(*) FROM parking_spots", [])?;
        let occupied_spots = count(
            &conn,
            "SELECT COUNT(*) FROM parking_spots WHERE status = ?1",
            params![SpotStatus::Occupied.code()],
        )?;
        let total_users = count(
            &conn,
            "SELECT COUNT(*) FROM users WHERE role = ?1",
            params![Role::User.as_str()],
        )?;

        let mut occupancy = Vec::with_capacity(lots.len());
        for lot in lots {
            let occupied = count(
                &conn,
                "SELECT COUNT(*) FROM parking_spots WHERE lot_id = ?1 AND status = ?2",
                params![lot.id.0, SpotStatus::Occupied.code()],
            )?;
            occupancy.push(LotOccupancy {
                available: (lot.declared_capacity - occupied).max(0),
                occupied,
                lot,
            });
        }

        Ok(DashboardStats {
            total_lots: occupancy.len() as i64,
            total_spots,
            occupied_spots,
            available_spots: total_spots - occupied_spots,
            total_users,
            lots: occupancy,
        })
    }

    async fn list_users(&self, who: &Identity) -> Result<Vec<User>, ParkingError> {
        who.require_admin()?;

        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM users WHERE role = ?1 ORDER BY id",
            USER_COLUMNS
        ))?;
        let users = stmt
            .query_map(params![Role::User.as_str()], User::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }
}

/// Type alias for Arc-wrapped repository (for AppState)
pub type DynParkingRepository = Arc<dyn ParkingRepository>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    fn create_test_repo() -> (SqliteParkingRepository, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let pool = db::create_pool(&db_path).unwrap();
        db::run_migrations(&pool).unwrap();

        (SqliteParkingRepository::new(pool), temp_dir)
    }

    fn insert_user(repo: &SqliteParkingRepository, username: &str, role: Role) -> Identity {
        let conn = repo.pool.get().unwrap();
        conn.execute(
            "INSERT INTO users (username, password_hash, role) VALUES (?1, 'x', ?2)",
            params![username, role.as_str()],
        )
        .unwrap();
        Identity {
            user_id: UserId(conn.last_insert_rowid()),
            role,
        }
    }

    fn lot_input(name: &str, price: f64, spots: i64) -> LotInput {
        LotInput {
            prime_location_name: name.into(),
            price,
            address: "1 Main St".into(),
            pin_code: "560001".into(),
            maximum_number_of_spots: spots,
        }
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap()
    }

    fn spot_numbers(views: &[SpotStatusView]) -> Vec<i64> {
        views.iter().map(|v| v.spot.spot_number).collect()
    }

    fn active_count(repo: &SqliteParkingRepository, user_id: UserId) -> i64 {
        let conn = repo.pool.get().unwrap();
        conn.query_row(
            "SELECT COUNT(*) FROM reservations WHERE user_id = ?1 AND is_active = 1",
            params![user_id.0],
            |row| row.get(0),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn create_lot_creates_numbered_available_spots() {
        let (repo, _temp) = create_test_repo();
        let admin = insert_user(&repo, "admin", Role::Admin);

        let lot = repo
            .create_lot(&admin, lot_input("Central", 10.0, 4))
            .await
            .unwrap();
        assert_eq!(lot.declared_capacity, 4);
        assert_eq!(lot.actual_spot_count, 4);

        let spots = repo.lot_spots(&admin, lot.id).await.unwrap();
        assert_eq!(spot_numbers(&spots), vec![1, 2, 3, 4]);
        assert!(spots
            .iter()
            .all(|v| v.spot.status == SpotStatus::Available && v.active_reservation.is_none()));
    }

    #[tokio::test]
    async fn admin_operations_reject_regular_users() {
        let (repo, _temp) = create_test_repo();
        let admin = insert_user(&repo, "admin", Role::Admin);
        let user = insert_user(&repo, "alice", Role::User);

        let result = repo.create_lot(&user, lot_input("Central", 10.0, 2)).await;
        assert!(matches!(result, Err(ParkingError::Forbidden)));

        let lot = repo
            .create_lot(&admin, lot_input("Central", 10.0, 2))
            .await
            .unwrap();
        assert!(matches!(
            repo.resize_lot(&user, lot.id, 5).await,
            Err(ParkingError::Forbidden)
        ));
        assert!(matches!(
            repo.delete_lot(&user, lot.id).await,
            Err(ParkingError::Forbidden)
        ));
        assert!(matches!(
            repo.book(&admin, lot.id, noon()).await,
            Err(ParkingError::Forbidden)
        ));
    }

    #[tokio::test]
    async fn book_claims_lowest_numbered_spot() {
        let (repo, _temp) = create_test_repo();
        let admin = insert_user(&repo, "admin", Role::Admin);
        let alice = insert_user(&repo, "alice", Role::User);
        let bob = insert_user(&repo, "bob", Role::User);

        let lot = repo
            .create_lot(&admin, lot_input("Central", 10.0, 3))
            .await
            .unwrap();

        let first = repo.book(&alice, lot.id, noon()).await.unwrap();
        let second = repo.book(&bob, lot.id, noon()).await.unwrap();

        assert_eq!(first.spot_number, 1);
        assert_eq!(second.spot_number, 2);
        assert!(first.is_active);
        assert_eq!(first.parking_timestamp, noon());
        assert_eq!(first.lot_name, "Central");

        let status = repo.spot_status(first.spot_id.unwrap()).await.unwrap();
        assert_eq!(status.spot.status, SpotStatus::Occupied);
        assert_eq!(status.active_reservation, Some(first));
    }

    #[tokio::test]
    async fn second_booking_fails_with_already_booked() {
        let (repo, _temp) = create_test_repo();
        let admin = insert_user(&repo, "admin", Role::Admin);
        let alice = insert_user(&repo, "alice", Role::User);

        let lot_a = repo
            .create_lot(&admin, lot_input("A", 10.0, 2))
            .await
            .unwrap();
        let lot_b = repo
            .create_lot(&admin, lot_input("B", 10.0, 2))
            .await
            .unwrap();

        repo.book(&alice, lot_a.id, noon()).await.unwrap();
        let result = repo.book(&alice, lot_b.id, noon()).await;
        assert!(matches!(result, Err(ParkingError::AlreadyBooked)));
        assert_eq!(active_count(&repo, alice.user_id), 1);

        // lot B untouched
        let availability = repo.lot_availability().await.unwrap();
        let b = availability.iter().find(|a| a.lot_id == lot_b.id).unwrap();
        assert_eq!(b.available_count, 2);
    }

    #[tokio::test]
    async fn booking_a_full_lot_fails_and_creates_nothing() {
        let (repo, _temp) = create_test_repo();
        let admin = insert_user(&repo, "admin", Role::Admin);
        let alice = insert_user(&repo, "alice", Role::User);
        let bob = insert_user(&repo, "bob", Role::User);

        let lot = repo
            .create_lot(&admin, lot_input("Tiny", 10.0, 1))
            .await
            .unwrap();
        repo.book(&alice, lot.id, noon()).await.unwrap();

        let result = repo.book(&bob, lot.id, noon()).await;
        assert!(matches!(result, Err(ParkingError::NoAvailableSpot)));
        assert!(repo.reservation_history(bob.user_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn booking_an_empty_lot_fails() {
        let (repo, _temp) = create_test_repo();
        let admin = insert_user(&repo, "admin", Role::Admin);
        let alice = insert_user(&repo, "alice", Role::User);

        let lot = repo
            .create_lot(&admin, lot_input("Empty", 10.0, 0))
            .await
            .unwrap();
        let result = repo.book(&alice, lot.id, noon()).await;
        assert!(matches!(result, Err(ParkingError::NoAvailableSpot)));
    }

    #[tokio::test]
    async fn booking_missing_lot_is_not_found() {
        let (repo, _temp) = create_test_repo();
        let alice = insert_user(&repo, "alice", Role::User);

        let result = repo.book(&alice, LotId(404), noon()).await;
        assert!(matches!(result, Err(ParkingError::NotFound(_))));
    }

    #[tokio::test]
    async fn booking_for_unknown_user_is_not_found() {
        let (repo, _temp) = create_test_repo();
        let admin = insert_user(&repo, "admin", Role::Admin);
        let lot = repo
            .create_lot(&admin, lot_input("Central", 10.0, 1))
            .await
            .unwrap();

        let ghost = Identity::user(UserId(9999));
        let result = repo.book(&ghost, lot.id, noon()).await;
        assert!(matches!(result, Err(ParkingError::NotFound(_))));
    }

    #[tokio::test]
    async fn release_computes_cost_and_frees_spot() {
        let (repo, _temp) = create_test_repo();
        let admin = insert_user(&repo, "admin", Role::Admin);
        let alice = insert_user(&repo, "alice", Role::User);

        let lot = repo
            .create_lot(&admin, lot_input("Central", 10.0, 2))
            .await
            .unwrap();
        let booked = repo.book(&alice, lot.id, noon()).await.unwrap();

        let released = repo
            .release(&alice, noon() + Duration::minutes(90))
            .await
            .unwrap();

        assert_eq!(released.id, booked.id);
        assert!(!released.is_active);
        assert_eq!(released.parking_cost, Some(15.0));
        assert_eq!(
            released.leaving_timestamp,
            Some(noon() + Duration::minutes(90))
        );

        let status = repo.spot_status(booked.spot_id.unwrap()).await.unwrap();
        assert_eq!(status.spot.status, SpotStatus::Available);
        assert!(status.active_reservation.is_none());
        assert!(repo.active_reservation(alice.user_id).await.unwrap().is_none());

        // persisted, not just returned
        let history = repo.reservation_history(alice.user_id).await.unwrap();
        assert_eq!(history, vec![released]);
    }

    #[tokio::test]
    async fn immediate_release_has_ordered_timestamps_and_non_negative_cost() {
        let (repo, _temp) = create_test_repo();
        let admin = insert_user(&repo, "admin", Role::Admin);
        let alice = insert_user(&repo, "alice", Role::User);

        let lot = repo
            .create_lot(&admin, lot_input("Central", 25.0, 1))
            .await
            .unwrap();
        repo.book(&alice, lot.id, Utc::now()).await.unwrap();
        let released = repo.release(&alice, Utc::now()).await.unwrap();

        let leaving = released.leaving_timestamp.unwrap();
        assert!(leaving >= released.parking_timestamp);
        assert!(released.parking_cost.unwrap() >= 0.0);
    }

    #[tokio::test]
    async fn release_without_active_reservation_mutates_nothing() {
        let (repo, _temp) = create_test_repo();
        let admin = insert_user(&repo, "admin", Role::Admin);
        let alice = insert_user(&repo, "alice", Role::User);
        let bob = insert_user(&repo, "bob", Role::User);

        let lot = repo
            .create_lot(&admin, lot_input("Central", 10.0, 2))
            .await
            .unwrap();
        repo.book(&alice, lot.id, noon()).await.unwrap();

        let result = repo.release(&bob, noon()).await;
        assert!(matches!(result, Err(ParkingError::NoActiveReservation)));

        let spots = repo.lot_spots(&admin, lot.id).await.unwrap();
        let statuses: Vec<SpotStatus> = spots.iter().map(|v| v.spot.status).collect();
        assert_eq!(statuses, vec![SpotStatus::Occupied, SpotStatus::Available]);
    }

    #[tokio::test]
    async fn at_most_one_active_reservation_per_user_across_sequences() {
        let (repo, _temp) = create_test_repo();
        let admin = insert_user(&repo, "admin", Role::Admin);
        let alice = insert_user(&repo, "alice", Role::User);

        let lot = repo
            .create_lot(&admin, lot_input("Central", 10.0, 3))
            .await
            .unwrap();

        for round in 0..3 {
            let t = noon() + Duration::hours(round);
            repo.book(&alice, lot.id, t).await.unwrap();
            let _ = repo.book(&alice, lot.id, t).await;
            assert_eq!(active_count(&repo, alice.user_id), 1);
            repo.release(&alice, t + Duration::minutes(30)).await.unwrap();
            let _ = repo.release(&alice, t + Duration::minutes(31)).await;
            assert_eq!(active_count(&repo, alice.user_id), 0);
        }

        let history = repo.reservation_history(alice.user_id).await.unwrap();
        assert_eq!(history.len(), 3);
        // newest first
        assert!(history[0].parking_timestamp > history[2].parking_timestamp);
        assert!(history.iter().all(|r| r.parking_cost == Some(5.0)));
    }

    #[tokio::test]
    async fn resize_down_with_all_spots_available() {
        let (repo, _temp) = create_test_repo();
        let admin = insert_user(&repo, "admin", Role::Admin);

        let lot = repo
            .create_lot(&admin, lot_input("Central", 10.0, 5))
            .await
            .unwrap();
        let lot = repo.resize_lot(&admin, lot.id, 2).await.unwrap();

        assert_eq!(lot.declared_capacity, 2);
        assert_eq!(lot.actual_spot_count, 2);
        let spots = repo.lot_spots(&admin, lot.id).await.unwrap();
        assert_eq!(spot_numbers(&spots), vec![1, 2]);
    }

    #[tokio::test]
    async fn resize_down_keeps_occupied_spot() {
        let (repo, _temp) = create_test_repo();
        let admin = insert_user(&repo, "admin", Role::Admin);
        let users: Vec<Identity> = (0..5)
            .map(|i| insert_user(&repo, &format!("user{}", i), Role::User))
            .collect();

        let lot = repo
            .create_lot(&admin, lot_input("Central", 10.0, 5))
            .await
            .unwrap();

        // fill all five, then free 1-4 so only #5 stays occupied
        for user in &users {
            repo.book(user, lot.id, noon()).await.unwrap();
        }
        for user in &users[..4] {
            repo.release(user, noon() + Duration::hours(1)).await.unwrap();
        }

        let lot = repo.resize_lot(&admin, lot.id, 2).await.unwrap();
        assert_eq!(lot.declared_capacity, 2);
        assert_eq!(lot.actual_spot_count, 3);
        assert_eq!(lot.excess_spots(), 1);

        let spots = repo.lot_spots(&admin, lot.id).await.unwrap();
        assert_eq!(spot_numbers(&spots), vec![1, 2, 5]);
        assert_eq!(spots[2].spot.status, SpotStatus::Occupied);

        // closed history for the removed spots is detached but intact
        let history = repo.reservation_history(users[3].user_id).await.unwrap();
        assert_eq!(history[0].spot_id, None);
        assert_eq!(history[0].spot_number, 4);

        // the occupant can still release
        let released = repo
            .release(&users[4], noon() + Duration::hours(2))
            .await
            .unwrap();
        assert_eq!(released.parking_cost, Some(20.0));
    }

    #[tokio::test]
    async fn resize_up_numbers_past_occupied_leftovers() {
        let (repo, _temp) = create_test_repo();
        let admin = insert_user(&repo, "admin", Role::Admin);
        let users: Vec<Identity> = (0..3)
            .map(|i| insert_user(&repo, &format!("user{}", i), Role::User))
            .collect();

        let lot = repo
            .create_lot(&admin, lot_input("Central", 10.0, 3))
            .await
            .unwrap();
        for user in &users {
            repo.book(user, lot.id, noon()).await.unwrap();
        }
        repo.release(&users[1], noon()).await.unwrap();

        // 1 and 3 occupied: shrink to 1 removes only #2
        let lot_after = repo.resize_lot(&admin, lot.id, 1).await.unwrap();
        assert_eq!(lot_after.actual_spot_count, 2);

        // two rows, so two new spots: 3 is taken, 4 and 5 are used
        let grown = repo.resize_lot(&admin, lot.id, 4).await.unwrap();
        assert_eq!(grown.declared_capacity, 4);
        assert_eq!(grown.actual_spot_count, 4);
        let spots = repo.lot_spots(&admin, lot.id).await.unwrap();
        assert_eq!(spot_numbers(&spots), vec![1, 3, 4, 5]);
    }

    #[tokio::test]
    async fn resize_compares_against_actual_row_count() {
        let (repo, _temp) = create_test_repo();
        let admin = insert_user(&repo, "admin", Role::Admin);
        let users: Vec<Identity> = (0..5)
            .map(|i| insert_user(&repo, &format!("user{}", i), Role::User))
            .collect();

        let lot = repo
            .create_lot(&admin, lot_input("Central", 10.0, 5))
            .await
            .unwrap();
        for user in &users {
            repo.book(user, lot.id, noon()).await.unwrap();
        }
        for user in &users[..4] {
            repo.release(user, noon()).await.unwrap();
        }

        // #5 occupied blocks part of the shrink: {1, 2, 5}
        let shrunk = repo.resize_lot(&admin, lot.id, 2).await.unwrap();
        assert_eq!(shrunk.actual_spot_count, 3);

        // three rows and capacity 3: nothing changes
        let same = repo.resize_lot(&admin, lot.id, 3).await.unwrap();
        assert_eq!(same.declared_capacity, 3);
        assert_eq!(same.actual_spot_count, 3);
        let spots = repo.lot_spots(&admin, lot.id).await.unwrap();
        assert_eq!(spot_numbers(&spots), vec![1, 2, 5]);

        // capacity 4: exactly one new spot
        let grown = repo.resize_lot(&admin, lot.id, 4).await.unwrap();
        assert_eq!(grown.actual_spot_count, 4);
        let spots = repo.lot_spots(&admin, lot.id).await.unwrap();
        assert_eq!(spot_numbers(&spots), vec![1, 2, 4, 5]);
    }

    #[tokio::test]
    async fn resize_rejects_negative_capacity_and_missing_lot() {
        let (repo, _temp) = create_test_repo();
        let admin = insert_user(&repo, "admin", Role::Admin);

        assert!(matches!(
            repo.resize_lot(&admin, LotId(1), -1).await,
            Err(ParkingError::InvalidInput(_))
        ));
        assert!(matches!(
            repo.resize_lot(&admin, LotId(1), 3).await,
            Err(ParkingError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn update_lot_changes_metadata_and_capacity() {
        let (repo, _temp) = create_test_repo();
        let admin = insert_user(&repo, "admin", Role::Admin);

        let lot = repo
            .create_lot(&admin, lot_input("Central", 10.0, 2))
            .await
            .unwrap();

        let updated = repo
            .update_lot(
                &admin,
                lot.id,
                LotInput {
                    prime_location_name: "Central Plaza".into(),
                    price: 12.5,
                    address: "2 Main St".into(),
                    pin_code: "560002".into(),
                    maximum_number_of_spots: 6,
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.prime_location_name, "Central Plaza");
        assert_eq!(updated.price, 12.5);
        assert_eq!(updated.address, "2 Main St");
        assert_eq!(updated.declared_capacity, 6);
        assert_eq!(updated.actual_spot_count, 6);
        assert_eq!(updated.created_at, lot.created_at);
    }

    #[tokio::test]
    async fn release_bills_at_current_lot_price() {
        let (repo, _temp) = create_test_repo();
        let admin = insert_user(&repo, "admin", Role::Admin);
        let alice = insert_user(&repo, "alice", Role::User);

        let lot = repo
            .create_lot(&admin, lot_input("Central", 10.0, 1))
            .await
            .unwrap();
        repo.book(&alice, lot.id, noon()).await.unwrap();
        repo.update_lot(&admin, lot.id, lot_input("Central", 20.0, 1))
            .await
            .unwrap();

        let released = repo
            .release(&alice, noon() + Duration::minutes(30))
            .await
            .unwrap();
        assert_eq!(released.parking_cost, Some(10.0));
    }

    #[tokio::test]
    async fn delete_lot_with_occupied_spot_deletes_nothing() {
        let (repo, _temp) = create_test_repo();
        let admin = insert_user(&repo, "admin", Role::Admin);
        let alice = insert_user(&repo, "alice", Role::User);

        let lot = repo
            .create_lot(&admin, lot_input("Central", 10.0, 3))
            .await
            .unwrap();
        repo.book(&alice, lot.id, noon()).await.unwrap();

        let result = repo.delete_lot(&admin, lot.id).await;
        assert!(matches!(result, Err(ParkingError::LotOccupied)));

        let still_there = repo.get_lot(lot.id).await.unwrap();
        assert_eq!(still_there.actual_spot_count, 3);
    }

    #[tokio::test]
    async fn delete_idle_lot_removes_lot_and_spots_but_keeps_history() {
        let (repo, _temp) = create_test_repo();
        let admin = insert_user(&repo, "admin", Role::Admin);
        let alice = insert_user(&repo, "alice", Role::User);

        let lot = repo
            .create_lot(&admin, lot_input("Central", 10.0, 3))
            .await
            .unwrap();
        repo.book(&alice, lot.id, noon()).await.unwrap();
        repo.release(&alice, noon() + Duration::hours(1)).await.unwrap();

        repo.delete_lot(&admin, lot.id).await.unwrap();

        assert!(matches!(
            repo.get_lot(lot.id).await,
            Err(ParkingError::NotFound(_))
        ));
        let conn = repo.pool.get().unwrap();
        let spots: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM parking_spots WHERE lot_id = ?1",
                params![lot.id.0],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(spots, 0);
        drop(conn);

        let history = repo.reservation_history(alice.user_id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].spot_id, None);
        assert_eq!(history[0].lot_name, "Central");
        assert_eq!(history[0].spot_number, 1);
        assert_eq!(history[0].parking_cost, Some(10.0));
    }

    #[tokio::test]
    async fn delete_missing_lot_is_not_found() {
        let (repo, _temp) = create_test_repo();
        let admin = insert_user(&repo, "admin", Role::Admin);

        assert!(matches!(
            repo.delete_lot(&admin, LotId(42)).await,
            Err(ParkingError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn lot_availability_reports_declared_and_available() {
        let (repo, _temp) = create_test_repo();
        let admin = insert_user(&repo, "admin", Role::Admin);
        let alice = insert_user(&repo, "alice", Role::User);

        let lot = repo
            .create_lot(&admin, lot_input("Central", 7.5, 4))
            .await
            .unwrap();
        repo.book(&alice, lot.id, noon()).await.unwrap();

        let availability = repo.lot_availability().await.unwrap();
        assert_eq!(
            availability,
            vec![LotAvailability {
                lot_id: lot.id,
                name: "Central".into(),
                available_count: 3,
                total_declared: 4,
                price: 7.5,
            }]
        );
    }

    #[tokio::test]
    async fn spot_status_of_missing_spot_is_not_found() {
        let (repo, _temp) = create_test_repo();
        assert!(matches!(
            repo.spot_status(SpotId(77)).await,
            Err(ParkingError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn dashboard_stats_totals() {
        let (repo, _temp) = create_test_repo();
        let admin = insert_user(&repo, "admin", Role::Admin);
        let alice = insert_user(&repo, "alice", Role::User);
        insert_user(&repo, "bob", Role::User);

        let a = repo
            .create_lot(&admin, lot_input("A", 10.0, 3))
            .await
            .unwrap();
        repo.create_lot(&admin, lot_input("B", 10.0, 2))
            .await
            .unwrap();
        repo.book(&alice, a.id, noon()).await.unwrap();

        let stats = repo.dashboard_stats(&admin).await.unwrap();
        assert_eq!(stats.total_lots, 2);
        assert_eq!(stats.total_spots, 5);
        assert_eq!(stats.occupied_spots, 1);
        assert_eq!(stats.available_spots, 4);
        assert_eq!(stats.total_users, 2);
        assert_eq!(stats.lots[0].occupied, 1);
        assert_eq!(stats.lots[0].available, 2);

        assert!(matches!(
            repo.dashboard_stats(&alice).await,
            Err(ParkingError::Forbidden)
        ));
    }

    #[tokio::test]
    async fn list_users_returns_only_regular_users() {
        let (repo, _temp) = create_test_repo();
        let admin = insert_user(&repo, "admin", Role::Admin);
        insert_user(&repo, "alice", Role::User);
        insert_user(&repo, "bob", Role::User);

        let users = repo.list_users(&admin).await.unwrap();
        let names: Vec<&str> = users.iter().map(|u| u.username.as_str()).collect();
        assert_eq!(names, vec!["alice", "bob"]);
    }

    #[tokio::test]
    async fn failed_transaction_rolls_back() {
        let (repo, _temp) = create_test_repo();
        let conn = repo.pool.get().unwrap();

        let result: Result<(), ParkingError> = immediate(&conn, |conn| {
            conn.execute(
                "INSERT INTO parking_lots
                 (prime_location_name, price, address, pin_code, maximum_number_of_spots)
                 VALUES ('Doomed', 1.0, 'x', 'y', 1)",
                [],
            )?;
            Err(ParkingError::LotOccupied)
        });
        assert!(result.is_err());

        let lots: i64 = conn
            .query_row("SELECT COUNT(*) FROM parking_lots", [], |row| row.get(0))
            .unwrap();
        assert_eq!(lots, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_bookings_never_share_a_spot() {
        let (repo, _temp) = create_test_repo();
        let admin = insert_user(&repo, "admin", Role::Admin);
        let users: Vec<Identity> = (0..6)
            .map(|i| insert_user(&repo, &format!("user{}", i), Role::User))
            .collect();

        let lot = repo
            .create_lot(&admin, lot_input("Busy", 10.0, 4))
            .await
            .unwrap();

        let lot_id = lot.id;
        let repo = Arc::new(repo);
        // every booking starts only once all of them are ready
        let start = Arc::new(std::sync::Barrier::new(users.len()));
        let mut handles = Vec::new();
        for user in users {
            let repo = Arc::clone(&repo);
            let start = Arc::clone(&start);
            handles.push(tokio::task::spawn_blocking(move || {
                start.wait();
                tokio::runtime::Handle::current()
                    .block_on(repo.book(&user, lot_id, Utc::now()))
            }));
        }

        let mut booked = Vec::new();
        let mut full = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(reservation) => booked.push(reservation.spot_number),
                Err(ParkingError::NoAvailableSpot) => full += 1,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }

        booked.sort();
        assert_eq!(booked, vec![1, 2, 3, 4]);
        assert_eq!(full, 2);
    }
}
