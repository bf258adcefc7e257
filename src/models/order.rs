use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::GeoPoint;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    OrderPlaced,
    DriverAssigned,
    TruckLeftWarehouse,
    ArrivedAtPickup,
    ItemsBeingDelivered,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::OrderPlaced => "order_placed",
            OrderStatus::DriverAssigned => "driver_assigned",
            OrderStatus::TruckLeftWarehouse => "truck_left_warehouse",
            OrderStatus::ArrivedAtPickup => "arrived_at_pickup",
            OrderStatus::ItemsBeingDelivered => "items_being_delivered",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One drop-off stop of an order, visited in `sequence` order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DropStop {
    pub location: GeoPoint,
    pub sequence: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub pickup_at: DateTime<Utc>,
    pub pickup: Option<GeoPoint>,
    pub stops: Vec<DropStop>,
    pub status: OrderStatus,
    pub driver_id: Option<Uuid>,
    pub estimated_duration_minutes: i64,
    pub estimated_end: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// The coordinates of the last drop-off stop, by sequence number.
    pub fn last_dropoff(&self) -> Option<GeoPoint> {
        self.stops
            .iter()
            .max_by_key(|stop| stop.sequence)
            .map(|stop| stop.location)
    }
}

/// Append-only record of a status change. Never mutated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderStatusEntry {
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub description: String,
    pub at: DateTime<Utc>,
}

/// Outbound payload emitted once per successful assignment commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverNotification {
    pub driver_id: Uuid,
    pub order_id: Uuid,
    pub pickup_time_formatted: String,
}
