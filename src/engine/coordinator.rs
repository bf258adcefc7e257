use std::time::{Duration as StdDuration, Instant};

use chrono::{Duration, NaiveTime};
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::ranking::{rank_candidates, DriverCandidate};
use crate::engine::slots::{candidate_slots, SlotWindow};
use crate::engine::travel::travel_origin;
use crate::error::DispatchError;
use crate::models::order::{DriverNotification, Order, OrderStatus};
use crate::models::slot::{SlotStatus, TimeSlot};
use crate::state::AppState;

/// Read-only: every driver with availability on the order's pickup day,
/// ranked best-first. An empty list is a valid outcome the caller must
/// answer with a reschedule or escalation path, not a failure.
pub fn propose_assignment(
    state: &AppState,
    order: &Order,
) -> Result<Vec<DriverCandidate>, DispatchError> {
    let started = Instant::now();

    let day = order.pickup_at.date_naive();
    let day_start = day.and_time(NaiveTime::MIN).and_utc();
    let day_end = day_start + Duration::days(1);

    // Snapshots keep the per-driver computation free of map locks.
    let orders: Vec<Order> = state.orders.iter().map(|e| e.value().clone()).collect();

    let mut candidates = Vec::new();

    for driver_entry in state.drivers.iter() {
        let driver = driver_entry.value();

        let blocks: Vec<_> = state
            .availability
            .iter()
            .filter(|e| e.driver_id == driver.id && e.overlaps(day_start, day_end))
            .map(|e| e.value().clone())
            .collect();
        if blocks.is_empty() {
            continue;
        }

        let existing: Vec<TimeSlot> = state
            .slots
            .iter()
            .filter(|e| e.driver_id == driver.id && e.start < day_end && e.end > day_start)
            .map(|e| e.value().clone())
            .collect();

        let origin = travel_origin(driver.id, &orders, order.pickup_at, state.dispatch.depot);
        let estimate = state
            .estimator
            .estimate(Some(&origin), order.pickup.as_ref());

        let required = order.estimated_duration_minutes
            + estimate.map_or(0, |estimate| estimate.travel_minutes);
        let slots = candidate_slots(&blocks, &existing, required, day, &state.dispatch);

        let workload_minutes = orders
            .iter()
            .filter(|other| {
                other.driver_id == Some(driver.id)
                    && other.status != OrderStatus::Cancelled
                    && other.pickup_at >= day_start
                    && other.pickup_at < day_end
                    && other
                        .estimated_end
                        .is_some_and(|end| end < order.pickup_at)
            })
            .map(|other| other.estimated_duration_minutes)
            .sum();

        candidates.push(DriverCandidate {
            driver_id: driver.id,
            driver_name: driver.name.clone(),
            distance_km: estimate.map(|estimate| estimate.distance_km),
            travel_minutes: estimate.map_or(0, |estimate| estimate.travel_minutes),
            workload_minutes,
            slots,
        });
    }

    let ranked = rank_candidates(candidates, state.dispatch.distance_bucket_km);

    state
        .metrics
        .proposal_latency_seconds
        .observe(started.elapsed().as_secs_f64());

    Ok(ranked)
}

enum Reservation {
    Created(Uuid),
    Reused(Uuid),
}

/// The only mutating entry point of the assignment path. Reserves the slot
/// with compare-and-set semantics, then updates the order; if the order
/// update fails the reservation is reversed before the error surfaces, so a
/// slot is never left owned by an order that was not updated.
pub async fn commit_assignment(
    state: &AppState,
    order_id: Uuid,
    driver_id: Uuid,
    window: SlotWindow,
) -> Result<Order, DispatchError> {
    if window.end <= window.start {
        return Err(DispatchError::BadRequest(
            "slot end must be after slot start".to_string(),
        ));
    }

    if !state.orders.contains_key(&order_id) {
        return Err(DispatchError::NotFound(format!("order {order_id} not found")));
    }
    let driver_name = state
        .drivers
        .get(&driver_id)
        .map(|driver| driver.name.clone())
        .ok_or_else(|| DispatchError::NotFound(format!("driver {driver_id} not found")))?;

    let reservation = reserve_slot(state, order_id, driver_id, window).await?;

    match assign_order(state, order_id, driver_id, window) {
        Ok(order) => {
            state.append_status_log(
                order_id,
                OrderStatus::DriverAssigned,
                format!("driver {driver_name} assigned"),
            );

            let notification = DriverNotification {
                driver_id,
                order_id,
                pickup_time_formatted: window.start.format("%Y-%m-%d %H:%M").to_string(),
            };
            let _ = state.notification_tx.send(notification);

            state
                .metrics
                .assignments_total
                .with_label_values(&["success"])
                .inc();
            info!(order_id = %order_id, driver_id = %driver_id, start = %window.start, "driver assigned");
            Ok(order)
        }
        Err(err) => {
            undo_reservation(state, &reservation);
            state
                .metrics
                .assignments_total
                .with_label_values(&["error"])
                .inc();
            warn!(order_id = %order_id, error = %err, "assignment rolled back");
            Err(err)
        }
    }
}

/// Compare-and-set on the slot store under the driver's schedule lock: an
/// exact-interval available slot is reused, a fresh interval is created, and
/// anything already booked in the way is a conflict the caller may retry.
async fn reserve_slot(
    state: &AppState,
    order_id: Uuid,
    driver_id: Uuid,
    window: SlotWindow,
) -> Result<Reservation, DispatchError> {
    let lock = state.schedule_lock(driver_id);
    let timeout = StdDuration::from_millis(state.dispatch.lock_timeout_ms);
    let _guard = tokio::time::timeout(timeout, lock.lock())
        .await
        .map_err(|_| {
            DispatchError::Persistence("timed out waiting for driver schedule".to_string())
        })?;

    // A slot must lie inside time the driver declared workable.
    let covered = state.availability.iter().any(|block| {
        block.driver_id == driver_id && block.start <= window.start && window.end <= block.end
    });
    if !covered {
        return Err(DispatchError::BadRequest(format!(
            "slot {} - {} lies outside the driver's declared availability",
            window.start, window.end
        )));
    }

    let buffer = Duration::minutes(state.dispatch.buffer_minutes);

    let mut exact: Option<(Uuid, SlotStatus)> = None;
    for entry in state.slots.iter() {
        let slot = entry.value();
        if slot.driver_id != driver_id {
            continue;
        }
        if slot.start == window.start && slot.end == window.end {
            exact = Some((slot.id, slot.status));
            continue;
        }
        if slot.is_booked()
            && window.start < slot.end + buffer
            && slot.start - buffer < window.end
        {
            state.metrics.slot_conflicts_total.inc();
            return Err(DispatchError::SlotConflict(format!(
                "interval {} - {} is already booked",
                slot.start, slot.end
            )));
        }
    }

    match exact {
        Some((slot_id, SlotStatus::Available)) => {
            let mut slot = state.slots.get_mut(&slot_id).ok_or_else(|| {
                DispatchError::Persistence("slot vanished during reservation".to_string())
            })?;
            slot.status = SlotStatus::Scheduled;
            slot.order_id = Some(order_id);
            Ok(Reservation::Reused(slot_id))
        }
        Some((_, _)) => {
            state.metrics.slot_conflicts_total.inc();
            Err(DispatchError::SlotConflict(format!(
                "slot {} - {} was taken by another order",
                window.start, window.end
            )))
        }
        None => {
            let slot = TimeSlot {
                id: Uuid::new_v4(),
                driver_id,
                start: window.start,
                end: window.end,
                status: SlotStatus::Scheduled,
                order_id: Some(order_id),
            };
            let slot_id = slot.id;
            state.slots.insert(slot_id, slot);
            Ok(Reservation::Created(slot_id))
        }
    }
}

fn assign_order(
    state: &AppState,
    order_id: Uuid,
    driver_id: Uuid,
    window: SlotWindow,
) -> Result<Order, DispatchError> {
    let mut order = state
        .orders
        .get_mut(&order_id)
        .ok_or_else(|| DispatchError::Persistence(format!("order {order_id} disappeared")))?;

    if !crate::engine::lifecycle::can_transition(
        order.status,
        OrderStatus::DriverAssigned,
        &state.dispatch,
    ) {
        return Err(DispatchError::InvalidTransition {
            from: order.status,
            to: OrderStatus::DriverAssigned,
        });
    }

    order.driver_id = Some(driver_id);
    order.pickup_at = window.start;
    order.estimated_end = Some(window.end);
    order.status = OrderStatus::DriverAssigned;

    Ok(order.clone())
}

fn undo_reservation(state: &AppState, reservation: &Reservation) {
    match reservation {
        Reservation::Created(slot_id) => {
            state.slots.remove(slot_id);
        }
        Reservation::Reused(slot_id) => {
            if let Some(mut slot) = state.slots.get_mut(slot_id) {
                slot.status = SlotStatus::Available;
                slot.order_id = None;
            }
        }
    }
}

/// Frees whatever scheduled slot the order currently owns. Safe to call
/// when no slot is attached; calling it twice equals calling it once.
pub fn release_assignment(state: &AppState, order_id: Uuid) {
    let slot_id = state.slots.iter().find_map(|entry| {
        let slot = entry.value();
        if slot.order_id == Some(order_id) && slot.status == SlotStatus::Scheduled {
            Some(slot.id)
        } else {
            None
        }
    });

    if let Some(slot_id) = slot_id {
        if let Some(mut slot) = state.slots.get_mut(&slot_id) {
            slot.status = SlotStatus::Available;
            slot.order_id = None;
            info!(order_id = %order_id, slot_id = %slot_id, "slot released");
        }
    }
}

/// Marks the order's scheduled slot as completed when the order is
/// delivered; the slot keeps its order reference for the audit trail.
pub fn complete_slot(state: &AppState, order_id: Uuid) {
    let slot_id = state.slots.iter().find_map(|entry| {
        let slot = entry.value();
        if slot.order_id == Some(order_id) && slot.status == SlotStatus::Scheduled {
            Some(slot.id)
        } else {
            None
        }
    });

    if let Some(slot_id) = slot_id {
        if let Some(mut slot) = state.slots.get_mut(&slot_id) {
            slot.status = SlotStatus::Completed;
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};

    use super::*;
    use crate::config::DispatchConfig;
    use crate::geo::GeoPoint;
    use crate::models::driver::{AvailabilityBlock, Driver};

    fn state() -> AppState {
        AppState::new(16, DispatchConfig::default())
    }

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, hour, minute, 0).unwrap()
    }

    fn add_driver(state: &AppState, seed: u128, name: &str) -> Uuid {
        let id = Uuid::from_u128(seed);
        state.drivers.insert(
            id,
            Driver {
                id,
                name: name.to_string(),
                updated_at: Utc::now(),
            },
        );
        id
    }

    fn add_availability(state: &AppState, driver_id: Uuid, start: DateTime<Utc>, end: DateTime<Utc>) {
        let block = AvailabilityBlock {
            id: Uuid::new_v4(),
            driver_id,
            start,
            end,
        };
        state.availability.insert(block.id, block);
    }

    fn add_order(state: &AppState, pickup_at: DateTime<Utc>, minutes: i64) -> Uuid {
        let order = Order {
            id: Uuid::new_v4(),
            pickup_at,
            pickup: Some(GeoPoint {
                lat: 52.53,
                lng: 13.41,
            }),
            stops: Vec::new(),
            status: OrderStatus::OrderPlaced,
            driver_id: None,
            estimated_duration_minutes: minutes,
            estimated_end: None,
            created_at: Utc::now(),
        };
        let id = order.id;
        state.orders.insert(id, order);
        id
    }

    #[test]
    fn propose_skips_drivers_without_availability() {
        let state = state();
        add_driver(&state, 1, "Ada");
        let with_blocks = add_driver(&state, 2, "Grace");
        add_availability(&state, with_blocks, at(8, 0), at(18, 0));

        let order_id = add_order(&state, at(10, 0), 60);
        let order = state.orders.get(&order_id).expect("order").clone();

        let ranked = propose_assignment(&state, &order).expect("propose");
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].driver_id, with_blocks);
        assert!(!ranked[0].slots.is_empty());
    }

    struct FixedEstimator {
        distance_km: f64,
        travel_minutes: i64,
    }

    impl crate::engine::travel::TravelEstimator for FixedEstimator {
        fn estimate(
            &self,
            _origin: Option<&GeoPoint>,
            _pickup: Option<&GeoPoint>,
        ) -> Option<crate::engine::travel::TravelEstimate> {
            Some(crate::engine::travel::TravelEstimate {
                distance_km: self.distance_km,
                travel_minutes: self.travel_minutes,
            })
        }
    }

    #[test]
    fn propose_runs_through_an_injected_estimator() {
        let state = AppState::with_estimator(
            16,
            DispatchConfig::default(),
            std::sync::Arc::new(FixedEstimator {
                distance_km: 42.0,
                travel_minutes: 60,
            }),
        );
        let driver_id = add_driver(&state, 1, "Ada");
        add_availability(&state, driver_id, at(8, 0), at(18, 0));
        let order_id = add_order(&state, at(10, 0), 60);
        let order = state.orders.get(&order_id).expect("order").clone();

        let ranked = propose_assignment(&state, &order).expect("propose");
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].distance_km, Some(42.0));
        assert_eq!(ranked[0].travel_minutes, 60);

        // 60 minutes of work plus the stubbed 60 of travel fills two hours.
        let first = ranked[0].slots[0];
        assert_eq!((first.end - first.start).num_minutes(), 120);
    }

    #[test]
    fn propose_with_no_drivers_is_empty_not_an_error() {
        let state = state();
        let order_id = add_order(&state, at(10, 0), 60);
        let order = state.orders.get(&order_id).expect("order").clone();

        let ranked = propose_assignment(&state, &order).expect("propose");
        assert!(ranked.is_empty());
    }

    #[tokio::test]
    async fn commit_reserves_the_slot_and_updates_the_order() {
        let state = state();
        let driver_id = add_driver(&state, 1, "Ada");
        add_availability(&state, driver_id, at(8, 0), at(18, 0));
        let order_id = add_order(&state, at(10, 0), 60);

        let mut notifications = state.notification_tx.subscribe();
        let window = SlotWindow {
            start: at(10, 0),
            end: at(11, 0),
        };

        let order = commit_assignment(&state, order_id, driver_id, window)
            .await
            .expect("commit");

        assert_eq!(order.status, OrderStatus::DriverAssigned);
        assert_eq!(order.driver_id, Some(driver_id));
        assert_eq!(order.pickup_at, window.start);
        assert_eq!(order.estimated_end, Some(window.end));

        let slot = state
            .slots
            .iter()
            .find(|entry| entry.order_id == Some(order_id))
            .expect("slot reserved");
        assert_eq!(slot.status, SlotStatus::Scheduled);
        assert_eq!(slot.start, window.start);

        let log = state.status_log_for(order_id);
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].status, OrderStatus::DriverAssigned);

        let notification = notifications.try_recv().expect("notification emitted");
        assert_eq!(notification.driver_id, driver_id);
        assert_eq!(notification.order_id, order_id);
        assert_eq!(notification.pickup_time_formatted, "2025-06-02 10:00");
    }

    #[tokio::test]
    async fn losing_a_slot_race_is_a_conflict() {
        let state = state();
        let driver_id = add_driver(&state, 1, "Ada");
        add_availability(&state, driver_id, at(8, 0), at(18, 0));
        let first = add_order(&state, at(10, 0), 60);
        let second = add_order(&state, at(10, 0), 60);

        let window = SlotWindow {
            start: at(10, 0),
            end: at(11, 0),
        };

        let (a, b) = tokio::join!(
            commit_assignment(&state, first, driver_id, window),
            commit_assignment(&state, second, driver_id, window),
        );

        let outcomes = [a, b];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        let loss = outcomes
            .iter()
            .find_map(|r| r.as_ref().err())
            .expect("one commit loses");
        assert!(matches!(loss, DispatchError::SlotConflict(_)));

        let scheduled: Vec<_> = state
            .slots
            .iter()
            .filter(|entry| entry.status == SlotStatus::Scheduled)
            .map(|entry| entry.order_id)
            .collect();
        assert_eq!(scheduled.len(), 1);
    }

    #[tokio::test]
    async fn commit_outside_declared_availability_is_rejected() {
        let state = state();
        let driver_id = add_driver(&state, 1, "Ada");
        add_availability(&state, driver_id, at(9, 0), at(17, 0));
        let order_id = add_order(&state, at(22, 0), 60);

        let err = commit_assignment(
            &state,
            order_id,
            driver_id,
            SlotWindow {
                start: at(22, 0),
                end: at(23, 0),
            },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, DispatchError::BadRequest(_)));
        assert!(state.slots.is_empty());
        assert!(state.status_log_for(order_id).is_empty());

        let order = state.orders.get(&order_id).expect("order exists");
        assert_eq!(order.status, OrderStatus::OrderPlaced);
        assert!(order.driver_id.is_none());
    }

    #[tokio::test]
    async fn window_straddling_a_block_edge_is_rejected() {
        let state = state();
        let driver_id = add_driver(&state, 1, "Ada");
        add_availability(&state, driver_id, at(9, 0), at(17, 0));
        let order_id = add_order(&state, at(16, 30), 60);

        // Starts inside the block but runs past its end.
        let err = commit_assignment(
            &state,
            order_id,
            driver_id,
            SlotWindow {
                start: at(16, 30),
                end: at(17, 30),
            },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, DispatchError::BadRequest(_)));
        assert!(state.slots.is_empty());
    }

    #[tokio::test]
    async fn buffered_neighbor_also_conflicts() {
        let state = state();
        let driver_id = add_driver(&state, 1, "Ada");
        add_availability(&state, driver_id, at(8, 0), at(18, 0));
        let first = add_order(&state, at(10, 0), 60);
        let second = add_order(&state, at(11, 0), 60);

        commit_assignment(
            &state,
            first,
            driver_id,
            SlotWindow {
                start: at(10, 0),
                end: at(11, 0),
            },
        )
        .await
        .expect("first commit");

        // 11:00 start sits inside the 10-minute buffer after the booking.
        let err = commit_assignment(
            &state,
            second,
            driver_id,
            SlotWindow {
                start: at(11, 0),
                end: at(12, 0),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DispatchError::SlotConflict(_)));
    }

    #[tokio::test]
    async fn failed_order_update_rolls_the_reservation_back() {
        let state = state();
        let driver_id = add_driver(&state, 1, "Ada");
        add_availability(&state, driver_id, at(8, 0), at(18, 0));
        let order_id = add_order(&state, at(10, 0), 60);
        state
            .orders
            .get_mut(&order_id)
            .expect("order exists")
            .status = OrderStatus::Delivered;

        let err = commit_assignment(
            &state,
            order_id,
            driver_id,
            SlotWindow {
                start: at(10, 0),
                end: at(11, 0),
            },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, DispatchError::InvalidTransition { .. }));
        assert!(state
            .slots
            .iter()
            .all(|entry| entry.status != SlotStatus::Scheduled));
        assert!(state.status_log_for(order_id).is_empty());
    }

    #[tokio::test]
    async fn reused_available_slot_is_restored_on_rollback() {
        let state = state();
        let driver_id = add_driver(&state, 1, "Ada");
        add_availability(&state, driver_id, at(8, 0), at(18, 0));
        let order_id = add_order(&state, at(10, 0), 60);
        state
            .orders
            .get_mut(&order_id)
            .expect("order exists")
            .status = OrderStatus::Delivered;

        let slot = TimeSlot {
            id: Uuid::new_v4(),
            driver_id,
            start: at(10, 0),
            end: at(11, 0),
            status: SlotStatus::Available,
            order_id: None,
        };
        let slot_id = slot.id;
        state.slots.insert(slot_id, slot);

        let err = commit_assignment(
            &state,
            order_id,
            driver_id,
            SlotWindow {
                start: at(10, 0),
                end: at(11, 0),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidTransition { .. }));

        let slot = state.slots.get(&slot_id).expect("slot kept");
        assert_eq!(slot.status, SlotStatus::Available);
        assert!(slot.order_id.is_none());
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let state = state();
        let driver_id = add_driver(&state, 1, "Ada");
        add_availability(&state, driver_id, at(8, 0), at(18, 0));
        let order_id = add_order(&state, at(10, 0), 60);

        commit_assignment(
            &state,
            order_id,
            driver_id,
            SlotWindow {
                start: at(10, 0),
                end: at(11, 0),
            },
        )
        .await
        .expect("commit");

        release_assignment(&state, order_id);
        let after_first: Vec<TimeSlot> = state.slots.iter().map(|e| e.value().clone()).collect();

        release_assignment(&state, order_id);
        let after_second: Vec<TimeSlot> = state.slots.iter().map(|e| e.value().clone()).collect();

        assert_eq!(after_first.len(), after_second.len());
        assert_eq!(after_first[0].status, SlotStatus::Available);
        assert_eq!(after_second[0].status, SlotStatus::Available);
        assert!(after_second[0].order_id.is_none());
    }

    #[tokio::test]
    async fn commit_reuses_an_exact_available_slot() {
        let state = state();
        let driver_id = add_driver(&state, 1, "Ada");
        add_availability(&state, driver_id, at(8, 0), at(18, 0));
        let order_id = add_order(&state, at(10, 0), 60);

        let slot = TimeSlot {
            id: Uuid::new_v4(),
            driver_id,
            start: at(10, 0),
            end: at(11, 0),
            status: SlotStatus::Available,
            order_id: None,
        };
        let slot_id = slot.id;
        state.slots.insert(slot_id, slot);

        commit_assignment(
            &state,
            order_id,
            driver_id,
            SlotWindow {
                start: at(10, 0),
                end: at(11, 0),
            },
        )
        .await
        .expect("commit");

        assert_eq!(state.slots.len(), 1);
        let slot = state.slots.get(&slot_id).expect("slot kept");
        assert_eq!(slot.status, SlotStatus::Scheduled);
        assert_eq!(slot.order_id, Some(order_id));
    }
}
