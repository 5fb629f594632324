use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};

use crate::error::AppResult;
use crate::parking::domain::SpotId;
use crate::parking::views::{LotAvailability, SpotStatusView};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/lot-availability", get(lot_availability))
        .route("/api/spot-status/{spot_id}", get(spot_status))
}

/// Available spots per lot, no login required
async fn lot_availability(State(state): State<AppState>) -> AppResult<Json<Vec<LotAvailability>>> {
    Ok(Json(state.parking.lot_availability().await?))
}

async fn spot_status(
    State(state): State<AppState>,
    Path(spot_id): Path<i64>,
) -> AppResult<Json<SpotStatusView>> {
    Ok(Json(state.parking.spot_status(SpotId(spot_id)).await?))
}
