use tracing::info;
use uuid::Uuid;

use crate::config::DispatchConfig;
use crate::engine::coordinator;
use crate::error::DispatchError;
use crate::models::order::{Order, OrderStatus};
use crate::state::AppState;

/// The order state machine. `delivered` and `cancelled` are terminal except
/// for the manual reactivation edge and, when enabled, the delivered
/// correction edge.
pub fn can_transition(from: OrderStatus, to: OrderStatus, cfg: &DispatchConfig) -> bool {
    use OrderStatus::*;

    match (from, to) {
        (OrderPlaced, DriverAssigned | Cancelled) => true,
        (DriverAssigned, TruckLeftWarehouse | Cancelled) => true,
        (TruckLeftWarehouse, ArrivedAtPickup | Cancelled) => true,
        (ArrivedAtPickup, ItemsBeingDelivered | Delivered | Cancelled) => true,
        (ItemsBeingDelivered, Delivered | Cancelled) => true,
        (Delivered, ArrivedAtPickup) => cfg.allow_delivered_correction,
        (Cancelled, OrderPlaced) => true,
        _ => false,
    }
}

fn requires_reason(from: OrderStatus, to: OrderStatus) -> bool {
    to == OrderStatus::Cancelled
        || (from == OrderStatus::Cancelled && to == OrderStatus::OrderPlaced)
}

/// Moves an order to `new_status`, running the side effects the edge
/// demands. Either the status changes and exactly one log row is appended,
/// or nothing changes and an error comes back; input errors are rejected
/// before any write.
pub async fn transition(
    state: &AppState,
    order_id: Uuid,
    new_status: OrderStatus,
    reason: Option<&str>,
) -> Result<Order, DispatchError> {
    let reason = reason.map(str::trim).filter(|reason| !reason.is_empty());

    let current = state
        .orders
        .get(&order_id)
        .map(|order| order.clone())
        .ok_or_else(|| DispatchError::NotFound(format!("order {order_id} not found")))?;
    let from = current.status;

    if !can_transition(from, new_status, &state.dispatch) {
        return Err(DispatchError::InvalidTransition {
            from,
            to: new_status,
        });
    }
    if requires_reason(from, new_status) && reason.is_none() {
        return Err(DispatchError::MissingReason);
    }

    // Entering driver_assigned without a pre-chosen driver goes through the
    // coordinator, which owns the reservation write and its log row.
    if new_status == OrderStatus::DriverAssigned {
        let ranked = coordinator::propose_assignment(state, &current)?;
        let pick = ranked
            .first()
            .and_then(|candidate| {
                candidate
                    .slots
                    .first()
                    .map(|window| (candidate.driver_id, *window))
            })
            .ok_or(DispatchError::NoCandidateDrivers)?;

        return coordinator::commit_assignment(state, order_id, pick.0, pick.1).await;
    }

    let reactivating = from == OrderStatus::Cancelled && new_status == OrderStatus::OrderPlaced;

    let updated = {
        let mut order = state
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| DispatchError::Persistence(format!("order {order_id} disappeared")))?;

        // A concurrent transition may have won; reject rather than apply a
        // stale edge.
        if order.status != from {
            return Err(DispatchError::InvalidTransition {
                from: order.status,
                to: new_status,
            });
        }

        order.status = new_status;
        if reactivating {
            order.driver_id = None;
            order.estimated_end = None;
        }
        order.clone()
    };

    // Slot ownership side effects. All of these are idempotent.
    let leaving_assignment =
        from == OrderStatus::DriverAssigned && new_status != OrderStatus::TruckLeftWarehouse;
    if leaving_assignment || new_status == OrderStatus::Cancelled || reactivating {
        coordinator::release_assignment(state, order_id);
    }
    if new_status == OrderStatus::Delivered {
        coordinator::complete_slot(state, order_id);
    }

    let description = match reason {
        Some(reason) => reason.to_string(),
        None => format!("status changed to {new_status}"),
    };
    state.append_status_log(order_id, new_status, description);

    info!(order_id = %order_id, from = %from, to = %new_status, "order transitioned");
    Ok(updated)
}
