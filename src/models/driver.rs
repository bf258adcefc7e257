use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Driver {
    pub id: Uuid,
    pub name: String,
    pub updated_at: DateTime<Utc>,
}

/// A continuous interval a driver has declared as workable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityBlock {
    pub id: Uuid,
    pub driver_id: Uuid,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl AvailabilityBlock {
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start < end && start < self.end
    }
}
