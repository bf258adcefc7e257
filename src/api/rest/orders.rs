use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::coordinator;
use crate::engine::lifecycle;
use crate::engine::ranking::DriverCandidate;
use crate::engine::slots::SlotWindow;
use crate::error::DispatchError;
use crate::geo::GeoPoint;
use crate::models::order::{DropStop, Order, OrderStatus, OrderStatusEntry};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", post(create_order))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/candidates", get(list_candidates))
        .route("/orders/:id/assign", post(assign_order))
        .route("/orders/:id/release", post(release_order))
        .route("/orders/:id/status", post(transition_order))
        .route("/orders/:id/log", get(status_log))
}

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub pickup_at: DateTime<Utc>,
    pub pickup: Option<GeoPoint>,
    #[serde(default)]
    pub stops: Vec<DropStop>,
    pub estimated_duration_minutes: i64,
}

#[derive(Deserialize)]
pub struct AssignRequest {
    pub driver_id: Uuid,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Deserialize)]
pub struct TransitionRequest {
    pub status: OrderStatus,
    pub reason: Option<String>,
}

async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<Json<Order>, DispatchError> {
    if payload.estimated_duration_minutes <= 0 {
        return Err(DispatchError::BadRequest(
            "estimated duration must be positive".to_string(),
        ));
    }

    let order = Order {
        id: Uuid::new_v4(),
        pickup_at: payload.pickup_at,
        pickup: payload.pickup,
        stops: payload.stops,
        status: OrderStatus::OrderPlaced,
        driver_id: None,
        estimated_duration_minutes: payload.estimated_duration_minutes,
        estimated_end: None,
        created_at: Utc::now(),
    };

    state.orders.insert(order.id, order.clone());
    state.append_status_log(order.id, OrderStatus::OrderPlaced, "order placed".to_string());

    Ok(Json(order))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, DispatchError> {
    let order = state
        .orders
        .get(&id)
        .ok_or_else(|| DispatchError::NotFound(format!("order {id} not found")))?;

    Ok(Json(order.value().clone()))
}

/// Empty output means no driver can cover the order; the caller should
/// offer a reschedule rather than treat it as a failure.
async fn list_candidates(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<DriverCandidate>>, DispatchError> {
    let order = state
        .orders
        .get(&id)
        .map(|order| order.clone())
        .ok_or_else(|| DispatchError::NotFound(format!("order {id} not found")))?;

    let ranked = coordinator::propose_assignment(&state, &order)?;
    Ok(Json(ranked))
}

async fn assign_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AssignRequest>,
) -> Result<Json<Order>, DispatchError> {
    let window = SlotWindow {
        start: payload.start,
        end: payload.end,
    };

    let order = coordinator::commit_assignment(&state, id, payload.driver_id, window).await?;
    Ok(Json(order))
}

/// Gives the order's slot back to the driver's free schedule. Idempotent;
/// normally driven by the lifecycle but exposed for manual reassignment.
async fn release_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, DispatchError> {
    let order = state
        .orders
        .get(&id)
        .map(|order| order.clone())
        .ok_or_else(|| DispatchError::NotFound(format!("order {id} not found")))?;

    coordinator::release_assignment(&state, id);
    Ok(Json(order))
}

async fn transition_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<TransitionRequest>,
) -> Result<Json<Order>, DispatchError> {
    let order =
        lifecycle::transition(&state, id, payload.status, payload.reason.as_deref()).await?;
    Ok(Json(order))
}

async fn status_log(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<OrderStatusEntry>>, DispatchError> {
    if !state.orders.contains_key(&id) {
        return Err(DispatchError::NotFound(format!("order {id} not found")));
    }

    Ok(Json(state.status_log_for(id)))
}
