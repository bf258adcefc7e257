use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Available,
    Scheduled,
    Completed,
}

/// A concrete sub-interval of a driver's day. A scheduled slot is owned by
/// exactly one order; an available slot owns none.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSlot {
    pub id: Uuid,
    pub driver_id: Uuid,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub status: SlotStatus,
    pub order_id: Option<Uuid>,
}

impl TimeSlot {
    /// Whether this slot blocks other bookings, i.e. is scheduled or completed.
    pub fn is_booked(&self) -> bool {
        matches!(self.status, SlotStatus::Scheduled | SlotStatus::Completed)
    }
}
