use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::extractors::CurrentUser;
use crate::parking::domain::{LotId, Reservation};
use crate::parking::views::LotAvailability;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/user/dashboard", get(dashboard))
        .route("/user/book", post(book))
        .route("/user/release", post(release))
}

#[derive(Serialize)]
struct UserDashboard {
    username: String,
    active_reservation: Option<Reservation>,
    history: Vec<Reservation>,
    lots: Vec<LotAvailability>,
}

#[derive(Deserialize)]
struct BookRequest {
    lot_id: LotId,
}

async fn dashboard(
    user: CurrentUser,
    State(state): State<AppState>,
) -> AppResult<Json<UserDashboard>> {
    user.identity().require_user()?;

    let active_reservation = state.parking.active_reservation(user.id).await?;
    let history = state.parking.reservation_history(user.id).await?;
    let lots = state.parking.lot_availability().await?;

    Ok(Json(UserDashboard {
        username: user.username,
        active_reservation,
        history,
        lots,
    }))
}

async fn book(
    user: CurrentUser,
    State(state): State<AppState>,
    Json(req): Json<BookRequest>,
) -> AppResult<(StatusCode, Json<Reservation>)> {
    let reservation = state
        .parking
        .book(&user.identity(), req.lot_id, Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(reservation)))
}

async fn release(
    user: CurrentUser,
    State(state): State<AppState>,
) -> AppResult<Json<Reservation>> {
    let reservation = state.parking.release(&user.identity(), Utc::now()).await?;
    Ok(Json(reservation))
}
