use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::DispatchError;
use crate::models::driver::{AvailabilityBlock, Driver};
use crate::models::slot::TimeSlot;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/drivers", post(create_driver).get(list_drivers))
        .route(
            "/drivers/:id/availability",
            post(create_availability).get(list_availability),
        )
        .route("/drivers/:id/slots", get(list_slots))
}

#[derive(Deserialize)]
pub struct CreateDriverRequest {
    pub name: String,
}

#[derive(Deserialize)]
pub struct CreateAvailabilityRequest {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

async fn create_driver(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateDriverRequest>,
) -> Result<Json<Driver>, DispatchError> {
    if payload.name.trim().is_empty() {
        return Err(DispatchError::BadRequest("name cannot be empty".to_string()));
    }

    let driver = Driver {
        id: Uuid::new_v4(),
        name: payload.name,
        updated_at: Utc::now(),
    };

    state.drivers.insert(driver.id, driver.clone());
    Ok(Json(driver))
}

async fn list_drivers(State(state): State<Arc<AppState>>) -> Json<Vec<Driver>> {
    let drivers = state
        .drivers
        .iter()
        .map(|entry| entry.value().clone())
        .collect();
    Json(drivers)
}

async fn create_availability(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CreateAvailabilityRequest>,
) -> Result<Json<AvailabilityBlock>, DispatchError> {
    if !state.drivers.contains_key(&id) {
        return Err(DispatchError::NotFound(format!("driver {id} not found")));
    }
    if payload.end <= payload.start {
        return Err(DispatchError::BadRequest(
            "availability end must be after start".to_string(),
        ));
    }

    let block = AvailabilityBlock {
        id: Uuid::new_v4(),
        driver_id: id,
        start: payload.start,
        end: payload.end,
    };

    state.availability.insert(block.id, block.clone());
    Ok(Json(block))
}

async fn list_availability(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<AvailabilityBlock>>, DispatchError> {
    if !state.drivers.contains_key(&id) {
        return Err(DispatchError::NotFound(format!("driver {id} not found")));
    }

    let mut blocks: Vec<AvailabilityBlock> = state
        .availability
        .iter()
        .filter(|entry| entry.driver_id == id)
        .map(|entry| entry.value().clone())
        .collect();
    blocks.sort_by_key(|block| block.start);

    Ok(Json(blocks))
}

async fn list_slots(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<TimeSlot>>, DispatchError> {
    if !state.drivers.contains_key(&id) {
        return Err(DispatchError::NotFound(format!("driver {id} not found")));
    }

    let mut slots: Vec<TimeSlot> = state
        .slots
        .iter()
        .filter(|entry| entry.driver_id == id)
        .map(|entry| entry.value().clone())
        .collect();
    slots.sort_by_key(|slot| slot.start);

    Ok(Json(slots))
}
