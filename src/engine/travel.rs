use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::{haversine_km, travel_minutes, GeoPoint};
use crate::models::order::{Order, OrderStatus};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TravelEstimate {
    pub distance_km: f64,
    pub travel_minutes: i64,
}

/// Distance/duration oracle between an origin and a pickup point. The
/// default is a great-circle heuristic; a routing API fits behind the same
/// contract. Missing coordinates on either end yield `None`, never a
/// fabricated number.
pub trait TravelEstimator: Send + Sync {
    fn estimate(&self, origin: Option<&GeoPoint>, pickup: Option<&GeoPoint>)
        -> Option<TravelEstimate>;
}

pub struct HaversineEstimator {
    pub avg_speed_kmh: f64,
}

impl TravelEstimator for HaversineEstimator {
    fn estimate(
        &self,
        origin: Option<&GeoPoint>,
        pickup: Option<&GeoPoint>,
    ) -> Option<TravelEstimate> {
        let origin = origin?;
        let pickup = pickup?;

        let distance_km = haversine_km(origin, pickup);
        Some(TravelEstimate {
            distance_km,
            travel_minutes: travel_minutes(distance_km, self.avg_speed_kmh),
        })
    }
}

/// Where the driver starts the trip to the pickup: the last drop-off of
/// their latest same-day order that finishes before the pickup, or the depot
/// when no such order exists.
pub fn travel_origin<'a, I>(
    driver_id: Uuid,
    orders: I,
    pickup_at: DateTime<Utc>,
    depot: GeoPoint,
) -> GeoPoint
where
    I: IntoIterator<Item = &'a Order>,
{
    let day_start = pickup_at.date_naive().and_time(chrono::NaiveTime::MIN).and_utc();

    orders
        .into_iter()
        .filter(|order| {
            order.driver_id == Some(driver_id)
                && order.status != OrderStatus::Cancelled
                && order.pickup_at >= day_start
                && order.pickup_at < day_start + Duration::days(1)
        })
        .filter_map(|order| {
            let end = order.estimated_end?;
            if end < pickup_at {
                Some((end, order))
            } else {
                None
            }
        })
        .max_by_key(|(end, _)| *end)
        .and_then(|(_, order)| order.last_dropoff())
        .unwrap_or(depot)
}
