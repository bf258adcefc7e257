use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

use crate::config::DispatchConfig;
use crate::engine::travel::{HaversineEstimator, TravelEstimator};
use crate::models::driver::{AvailabilityBlock, Driver};
use crate::models::order::{DriverNotification, Order, OrderStatus, OrderStatusEntry};
use crate::models::slot::TimeSlot;
use crate::observability::metrics::Metrics;

pub struct AppState {
    pub drivers: DashMap<Uuid, Driver>,
    pub availability: DashMap<Uuid, AvailabilityBlock>,
    pub slots: DashMap<Uuid, TimeSlot>,
    pub orders: DashMap<Uuid, Order>,
    status_log: DashMap<Uuid, Vec<OrderStatusEntry>>,
    // One mutex per driver serializes slot reservation for that driver's day.
    schedule_locks: DashMap<Uuid, Arc<Mutex<()>>>,
    pub notification_tx: broadcast::Sender<DriverNotification>,
    pub metrics: Metrics,
    pub dispatch: DispatchConfig,
    pub estimator: Arc<dyn TravelEstimator>,
}

impl AppState {
    pub fn new(event_buffer_size: usize, dispatch: DispatchConfig) -> Self {
        let estimator = Arc::new(HaversineEstimator {
            avg_speed_kmh: dispatch.avg_speed_kmh,
        });
        Self::with_estimator(event_buffer_size, dispatch, estimator)
    }

    /// Swaps the great-circle heuristic for another distance oracle, e.g. a
    /// routing API client.
    pub fn with_estimator(
        event_buffer_size: usize,
        dispatch: DispatchConfig,
        estimator: Arc<dyn TravelEstimator>,
    ) -> Self {
        let (notification_tx, _unused_rx) = broadcast::channel(event_buffer_size);

        Self {
            drivers: DashMap::new(),
            availability: DashMap::new(),
            slots: DashMap::new(),
            orders: DashMap::new(),
            status_log: DashMap::new(),
            schedule_locks: DashMap::new(),
            notification_tx,
            metrics: Metrics::new(),
            dispatch,
            estimator,
        }
    }

    pub fn schedule_lock(&self, driver_id: Uuid) -> Arc<Mutex<()>> {
        self.schedule_locks
            .entry(driver_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    /// Appends one row to the order's status history. Rows are write-once;
    /// nothing ever edits or removes them.
    pub fn append_status_log(&self, order_id: Uuid, status: OrderStatus, description: String) {
        let entry = OrderStatusEntry {
            order_id,
            status,
            description,
            at: Utc::now(),
        };

        self.status_log.entry(order_id).or_default().push(entry);
        self.metrics
            .transitions_total
            .with_label_values(&[status.as_str()])
            .inc();
    }

    pub fn status_log_for(&self, order_id: Uuid) -> Vec<OrderStatusEntry> {
        self.status_log
            .get(&order_id)
            .map(|rows| rows.clone())
            .unwrap_or_default()
    }
}
