use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::slots::SlotWindow;

/// One driver's offer for an order: where they would come from, how loaded
/// they already are, and which windows they could take.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverCandidate {
    pub driver_id: Uuid,
    pub driver_name: String,
    pub distance_km: Option<f64>,
    pub travel_minutes: i64,
    pub workload_minutes: i64,
    pub slots: Vec<SlotWindow>,
}

impl DriverCandidate {
    /// Distances within one bucket rank equal; the raw number never breaks
    /// a tie because the estimate is too noisy to split hairs over.
    fn distance_bucket(&self, bucket_km: f64) -> i64 {
        match self.distance_km {
            Some(distance) if bucket_km > 0.0 => (distance / bucket_km).floor() as i64,
            Some(_) => 0,
            None => i64::MAX,
        }
    }
}

/// Orders candidates best-first: nearest distance bucket, then lightest
/// workload. Drivers without a single feasible window are dropped; drivers
/// without a distance estimate go last, ordered among themselves by workload.
pub fn rank_candidates(
    mut candidates: Vec<DriverCandidate>,
    bucket_km: f64,
) -> Vec<DriverCandidate> {
    candidates.retain(|candidate| !candidate.slots.is_empty());
    candidates
        .sort_by_key(|candidate| (candidate.distance_bucket(bucket_km), candidate.workload_minutes));
    candidates
}
