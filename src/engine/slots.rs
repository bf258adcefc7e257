use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::DispatchConfig;
use crate::models::driver::AvailabilityBlock;
use crate::models::slot::TimeSlot;

/// A candidate booking window. Both ends sit on the slot grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SlotWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

pub fn round_up_minutes(minutes: i64, granularity: i64) -> i64 {
    if granularity <= 0 {
        return minutes;
    }
    (minutes + granularity - 1).div_euclid(granularity) * granularity
}

fn align_up(t: DateTime<Utc>, origin: DateTime<Utc>, grid_minutes: i64) -> DateTime<Utc> {
    let grid_secs = grid_minutes * 60;
    if grid_secs <= 0 {
        return t;
    }
    let elapsed = (t - origin).num_seconds().max(0);
    origin + Duration::seconds((elapsed + grid_secs - 1).div_euclid(grid_secs) * grid_secs)
}

/// Produces every window of the required length that fits inside one of the
/// driver's availability blocks on `day` without touching an existing booking
/// once that booking is padded by the buffer on both ends.
///
/// The required duration is rounded up to the duration granularity first so
/// the same numeric duration always yields identically sized offers, then up
/// to the grid so windows occupy whole grid cells. An empty result is a
/// normal outcome, not an error.
pub fn candidate_slots(
    blocks: &[AvailabilityBlock],
    existing: &[TimeSlot],
    required_minutes: i64,
    day: NaiveDate,
    cfg: &DispatchConfig,
) -> Vec<SlotWindow> {
    let rounded = round_up_minutes(required_minutes, cfg.duration_granularity_minutes);
    let window_minutes = round_up_minutes(rounded, cfg.slot_grid_minutes);
    if window_minutes <= 0 {
        return Vec::new();
    }
    let window = Duration::minutes(window_minutes);
    let step = Duration::minutes(cfg.slot_grid_minutes.max(1));
    let buffer = Duration::minutes(cfg.buffer_minutes);

    let day_start = day.and_time(NaiveTime::MIN).and_utc();
    let day_end = day_start + Duration::days(1);

    let booked: Vec<(DateTime<Utc>, DateTime<Utc>)> = existing
        .iter()
        .filter(|slot| slot.is_booked())
        .map(|slot| (slot.start - buffer, slot.end + buffer))
        .collect();

    let mut out: Vec<SlotWindow> = Vec::new();

    for block in blocks {
        let block_start = block.start.max(day_start);
        let block_end = block.end.min(day_end);

        let mut cursor = align_up(block_start, day_start, cfg.slot_grid_minutes);
        while cursor + window <= block_end {
            let end = cursor + window;
            let clashes = booked
                .iter()
                .any(|(busy_start, busy_end)| cursor < *busy_end && *busy_start < end);
            if !clashes {
                out.push(SlotWindow { start: cursor, end });
            }
            cursor += step;
        }
    }

    out.sort_by_key(|w| w.start);
    out.dedup_by_key(|w| w.start);
    out
}
