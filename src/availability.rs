use std::sync::Arc;
use std::time::Duration;

use ulid::Ulid;

use crate::error::MarketError;
use crate::model::DateRange;
use crate::store::{ReservationStore, bounded};

/// Decides whether a listing is free for a range.
///
/// Reads the store on every call. A `true` answer is advisory: only
/// `ReservationStore::try_insert` decides who gets the nights.
#[derive(Clone)]
pub struct AvailabilityEvaluator {
    reservations: Arc<dyn ReservationStore>,
    timeout: Duration,
}

impl AvailabilityEvaluator {
    pub fn new(reservations: Arc<dyn ReservationStore>, timeout: Duration) -> Self {
        Self {
            reservations,
            timeout,
        }
    }

    pub async fn is_available(&self, listing_id: Ulid, range: DateRange) -> Result<bool, MarketError> {
        Ok(self.first_conflict(listing_id, range).await?.is_none())
    }

    /// The earliest reservation holding any night of `range`.
    pub async fn first_conflict(
        &self,
        listing_id: Ulid,
        range: DateRange,
    ) -> Result<Option<Ulid>, MarketError> {
        let overlapping = bounded(
            self.timeout,
            self.reservations.find_overlapping(listing_id, range),
        )
        .await?;
        Ok(overlapping
            .iter()
            .min_by_key(|r| r.range.start)
            .map(|r| r.id))
    }

    /// Booked spans inside `window`, clipped to it and merged.
    pub async fn booked_within(
        &self,
        listing_id: Ulid,
        window: DateRange,
    ) -> Result<Vec<DateRange>, MarketError> {
        let overlapping = bounded(
            self.timeout,
            self.reservations.find_overlapping(listing_id, window),
        )
        .await?;
        let mut spans: Vec<DateRange> = overlapping
            .iter()
            .map(|r| DateRange::new(r.range.start.max(window.start), r.range.end.min(window.end)))
            .collect();
        spans.sort_by_key(|s| s.start);
        Ok(merge_ranges(&spans))
    }
}

// ── Range arithmetic ─────────────────────────────────────

/// Merge sorted overlapping/adjacent ranges into disjoint ranges.
pub fn merge_ranges(sorted: &[DateRange]) -> Vec<DateRange> {
    let mut merged: Vec<DateRange> = Vec::new();
    for &range in sorted {
        if let Some(last) = merged.last_mut()
            && range.start <= last.end
        {
            last.end = last.end.max(range.end);
            continue;
        }
        merged.push(range);
    }
    merged
}

/// `base` minus `to_remove`. Both inputs sorted by start and internally disjoint.
pub fn subtract_ranges(base: &[DateRange], to_remove: &[DateRange]) -> Vec<DateRange> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < b.end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(DateRange::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < b.end {
            result.push(DateRange::new(current_start, b.end));
        }
    }

    result
}
