use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::db::models::User;
use crate::error::AppResult;
use crate::extractors::CurrentUser;
use crate::parking::domain::{LotId, LotInput, ParkingLot};
use crate::parking::views::{DashboardStats, SpotStatusView};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/admin/dashboard", get(dashboard))
        .route("/admin/lots", get(list_lots).post(create_lot))
        .route(
            "/admin/lots/{lot_id}",
            get(get_lot).put(update_lot).delete(delete_lot),
        )
        .route("/admin/lots/{lot_id}/spots", get(lot_spots))
        .route("/admin/users", get(list_users))
}

async fn dashboard(
    user: CurrentUser,
    State(state): State<AppState>,
) -> AppResult<Json<DashboardStats>> {
    Ok(Json(state.parking.dashboard_stats(&user.identity()).await?))
}

async fn list_lots(
    user: CurrentUser,
    State(state): State<AppState>,
) -> AppResult<Json<Vec<ParkingLot>>> {
    user.identity().require_admin()?;
    Ok(Json(state.parking.list_lots().await?))
}

async fn create_lot(
    user: CurrentUser,
    State(state): State<AppState>,
    Json(input): Json<LotInput>,
) -> AppResult<(StatusCode, Json<ParkingLot>)> {
    let lot = state.parking.create_lot(&user.identity(), input).await?;
    Ok((StatusCode::CREATED, Json(lot)))
}

async fn get_lot(
    user: CurrentUser,
    State(state): State<AppState>,
    Path(lot_id): Path<i64>,
) -> AppResult<Json<ParkingLot>> {
    user.identity().require_admin()?;
    Ok(Json(state.parking.get_lot(LotId(lot_id)).await?))
}

/// Edit metadata and capacity in one step
async fn update_lot(
    user: CurrentUser,
    State(state): State<AppState>,
    Path(lot_id): Path<i64>,
    Json(input): Json<LotInput>,
) -> AppResult<Json<ParkingLot>> {
    let lot = state
        .parking
        .update_lot(&user.identity(), LotId(lot_id), input)
        .await?;
    Ok(Json(lot))
}

async fn delete_lot(
    user: CurrentUser,
    State(state): State<AppState>,
    Path(lot_id): Path<i64>,
) -> AppResult<Json<Value>> {
    state
        .parking
        .delete_lot(&user.identity(), LotId(lot_id))
        .await?;
    Ok(Json(json!({ "deleted": lot_id })))
}

async fn lot_spots(
    user: CurrentUser,
    State(state): State<AppState>,
    Path(lot_id): Path<i64>,
) -> AppResult<Json<Vec<SpotStatusView>>> {
    let spots = state
        .parking
        .lot_spots(&user.identity(), LotId(lot_id))
        .await?;
    Ok(Json(spots))
}

async fn list_users(user: CurrentUser, State(state): State<AppState>) -> AppResult<Json<Vec<User>>> {
    Ok(Json(state.parking.list_users(&user.identity()).await?))
}
