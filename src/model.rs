use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::config::BookingPolicy;
use crate::error::RangeError;

/// Integer cents; never floating point.
pub type Cents = i64;

/// Opaque user identifier resolved by the surrounding application.
pub type UserId = String;

/// Half-open calendar range `[start, end)`: `end` is the checkout day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Unchecked constructor. Use [`DateRange::validate`] before trusting the range.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Calendar nights in `[start, end)`. Zero or negative for malformed ranges.
    pub fn nights(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    pub fn validate(&self, today: NaiveDate, policy: &BookingPolicy) -> Result<(), RangeError> {
        if self.start >= self.end {
            return Err(RangeError::Empty {
                start: self.start,
                end: self.end,
            });
        }
        if policy.reject_past_dates && self.start < today {
            return Err(RangeError::InPast {
                start: self.start,
                today,
            });
        }
        let nights = self.nights();
        if nights > i64::from(policy.max_stay_nights) {
            return Err(RangeError::TooLong {
                nights,
                max: policy.max_stay_nights,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub id: Ulid,
    pub owner_user_id: UserId,
    pub title: String,
    pub description: String,
    pub image_src: String,
    pub category: String,
    pub room_count: u32,
    pub bathroom_count: u32,
    pub guest_count: u32,
    pub location_value: String,
    pub price_per_night: Cents,
    pub created_at: DateTime<Utc>,
}

/// Attributes supplied by a host when publishing a listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingDraft {
    pub title: String,
    pub description: String,
    pub image_src: String,
    pub category: String,
    pub room_count: u32,
    pub bathroom_count: u32,
    pub guest_count: u32,
    pub location_value: String,
    pub price_per_night: Cents,
}

impl ListingDraft {
    pub fn into_listing(self, id: Ulid, owner_user_id: UserId, created_at: DateTime<Utc>) -> Listing {
        Listing {
            id,
            owner_user_id,
            title: self.title,
            description: self.description,
            image_src: self.image_src,
            category: self.category,
            room_count: self.room_count,
            bathroom_count: self.bathroom_count,
            guest_count: self.guest_count,
            location_value: self.location_value,
            price_per_night: self.price_per_night,
            created_at,
        }
    }
}

/// Partial update: `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub image_src: Option<String>,
    pub category: Option<String>,
    pub room_count: Option<u32>,
    pub bathroom_count: Option<u32>,
    pub guest_count: Option<u32>,
    pub location_value: Option<String>,
    pub price_per_night: Option<Cents>,
}

impl ListingPatch {
    pub fn apply_to(&self, listing: &mut Listing) {
        if let Some(v) = &self.title {
            listing.title = v.clone();
        }
        if let Some(v) = &self.description {
            listing.description = v.clone();
        }
        if let Some(v) = &self.image_src {
            listing.image_src = v.clone();
        }
        if let Some(v) = &self.category {
            listing.category = v.clone();
        }
        if let Some(v) = self.room_count {
            listing.room_count = v;
        }
        if let Some(v) = self.bathroom_count {
            listing.bathroom_count = v;
        }
        if let Some(v) = self.guest_count {
            listing.guest_count = v;
        }
        if let Some(v) = &self.location_value {
            listing.location_value = v.clone();
        }
        if let Some(v) = self.price_per_night {
            listing.price_per_night = v;
        }
    }
}

/// Exact-match attribute predicates, AND-combined. `None` means unconstrained.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingFilter {
    pub category: Option<String>,
    pub room_count: Option<u32>,
    pub bathroom_count: Option<u32>,
    pub guest_count: Option<u32>,
    pub location_value: Option<String>,
    pub owner_user_id: Option<UserId>,
}

impl ListingFilter {
    pub fn matches(&self, listing: &Listing) -> bool {
        self.category.as_ref().is_none_or(|c| *c == listing.category)
            && self.room_count.is_none_or(|n| n == listing.room_count)
            && self.bathroom_count.is_none_or(|n| n == listing.bathroom_count)
            && self.guest_count.is_none_or(|n| n == listing.guest_count)
            && self
                .location_value
                .as_ref()
                .is_none_or(|l| *l == listing.location_value)
            && self
                .owner_user_id
                .as_ref()
                .is_none_or(|u| *u == listing.owner_user_id)
    }
}

/// Newest first, ties broken by id so repeated reads return the same sequence.
pub fn newest_listings_first(listings: &mut [Listing]) {
    listings.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
}

pub fn newest_reservations_first(reservations: &mut [Reservation]) {
    reservations.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub listing_id: Ulid,
    pub user_id: UserId,
    pub range: DateRange,
    pub total_price: Cents,
    pub created_at: DateTime<Utc>,
}

/// Result of the conditional insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Committed(Reservation),
    /// Lost to an already-committed overlapping reservation.
    Conflict(Ulid),
}

/// Selectors for reservation views; supplied selectors are AND-combined.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationQuery {
    pub listing_id: Option<Ulid>,
    pub user_id: Option<UserId>,
    pub owner_user_id: Option<UserId>,
}

impl ReservationQuery {
    pub fn is_empty(&self) -> bool {
        self.listing_id.is_none() && self.user_id.is_none() && self.owner_user_id.is_none()
    }
}

/// A listing and its reservations. One of these sits behind each per-listing lock.
#[derive(Debug, Clone)]
pub struct ListingState {
    pub listing: Listing,
    /// Sorted by `range.start`.
    pub reservations: Vec<Reservation>,
    /// Set once the listing is deleted; waiters holding a stale handle see it.
    pub retired: bool,
}

impl ListingState {
    pub fn new(listing: Listing) -> Self {
        Self {
            listing,
            reservations: Vec::new(),
            retired: false,
        }
    }

    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .binary_search_by_key(&reservation.range.start, |r| r.range.start)
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    /// Reservations whose range overlaps `query`.
    /// Entries at or past `right_bound` start on or after `query.end` and cannot overlap.
    pub fn overlapping(&self, query: &DateRange) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.range.start < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.range.end > query.start)
    }

    /// Reservations still occupying a night on or after `today`.
    pub fn has_reservations_after(&self, today: NaiveDate) -> bool {
        self.reservations.iter().any(|r| r.range.end > today)
    }
}

/// WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ListingCreated { listing: Listing },
    ListingUpdated { listing: Listing },
    ListingDeleted { id: Ulid },
    ReservationCommitted { reservation: Reservation },
    ReservationCancelled { id: Ulid, listing_id: Ulid },
}

impl Event {
    /// The listing whose lock must be held to apply this event.
    pub fn listing_id(&self) -> Ulid {
        match self {
            Event::ListingCreated { listing } | Event::ListingUpdated { listing } => listing.id,
            Event::ListingDeleted { id } => *id,
            Event::ReservationCommitted { reservation } => reservation.listing_id,
            Event::ReservationCancelled { listing_id, .. } => *listing_id,
        }
    }
}

// ── Views handed to the surrounding application ──────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingView {
    pub id: String,
    pub user_id: UserId,
    pub title: String,
    pub description: String,
    pub image_src: String,
    pub category: String,
    pub room_count: u32,
    pub bathroom_count: u32,
    pub guest_count: u32,
    pub location_value: String,
    pub price: Cents,
    pub created_at: DateTime<Utc>,
}

impl From<&Listing> for ListingView {
    fn from(l: &Listing) -> Self {
        Self {
            id: l.id.to_string(),
            user_id: l.owner_user_id.clone(),
            title: l.title.clone(),
            description: l.description.clone(),
            image_src: l.image_src.clone(),
            category: l.category.clone(),
            room_count: l.room_count,
            bathroom_count: l.bathroom_count,
            guest_count: l.guest_count,
            location_value: l.location_value.clone(),
            price: l.price_per_night,
            created_at: l.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationView {
    pub id: String,
    pub listing_id: String,
    pub user_id: UserId,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub total_price: Cents,
    pub created_at: DateTime<Utc>,
    pub listing: ListingView,
}

impl ReservationView {
    pub fn new(reservation: &Reservation, listing: &Listing) -> Self {
        Self {
            id: reservation.id.to_string(),
            listing_id: reservation.listing_id.to_string(),
            user_id: reservation.user_id.clone(),
            start_date: reservation.range.start,
            end_date: reservation.range.end,
            total_price: reservation.total_price,
            created_at: reservation.created_at,
            listing: ListingView::from(listing),
        }
    }
}

/// Booked and free nights of one listing inside a window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalendarView {
    pub listing_id: String,
    pub window: DateRange,
    pub booked: Vec<DateRange>,
    pub free: Vec<DateRange>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn r(start: &str, end: &str) -> DateRange {
        DateRange::new(d(start), d(end))
    }

    fn reservation(start: &str, end: &str) -> Reservation {
        Reservation {
            id: Ulid::new(),
            listing_id: Ulid::new(),
            user_id: "guest".into(),
            range: r(start, end),
            total_price: 0,
            created_at: Utc::now(),
        }
    }

    fn state() -> ListingState {
        ListingState::new(ListingDraft::default().into_listing(Ulid::new(), "host".into(), Utc::now()))
    }

    fn policy() -> BookingPolicy {
        BookingPolicy {
            reject_past_dates: true,
            max_stay_nights: 30,
            ..BookingPolicy::default()
        }
    }

    #[test]
    fn overlap_half_open_boundary() {
        assert!(!r("2024-01-01", "2024-01-05").overlaps(&r("2024-01-05", "2024-01-09")));
        assert!(r("2024-01-01", "2024-01-05").overlaps(&r("2024-01-04", "2024-01-09")));
    }

    #[test]
    fn overlap_is_symmetric() {
        let ranges = [
            r("2024-01-01", "2024-01-05"),
            r("2024-01-04", "2024-01-09"),
            r("2024-01-05", "2024-01-06"),
            r("2023-12-30", "2024-01-02"),
            r("2024-01-02", "2024-01-03"),
            r("2024-02-01", "2024-02-10"),
        ];
        for a in &ranges {
            for b in &ranges {
                assert_eq!(a.overlaps(b), b.overlaps(a), "{a:?} vs {b:?}");
            }
        }
    }

    #[test]
    fn overlap_containment_and_identity() {
        let outer = r("2024-03-01", "2024-03-31");
        let inner = r("2024-03-10", "2024-03-11");
        assert!(outer.overlaps(&inner));
        assert!(inner.overlaps(&outer));
        assert!(outer.overlaps(&outer));
    }

    #[test]
    fn nights_counts_calendar_days() {
        assert_eq!(r("2024-06-01", "2024-06-04").nights(), 3);
        assert_eq!(r("2024-02-28", "2024-03-01").nights(), 2); // leap year
    }

    #[test]
    fn validate_rejects_zero_length_and_reversed() {
        let today = d("2024-01-01");
        assert!(matches!(
            r("2024-06-01", "2024-06-01").validate(today, &policy()),
            Err(RangeError::Empty { .. })
        ));
        assert!(matches!(
            r("2024-06-05", "2024-06-01").validate(today, &policy()),
            Err(RangeError::Empty { .. })
        ));
    }

    #[test]
    fn validate_past_start_follows_policy() {
        let today = d("2024-06-10");
        let range = r("2024-06-09", "2024-06-12");
        assert!(matches!(
            range.validate(today, &policy()),
            Err(RangeError::InPast { .. })
        ));
        let lenient = BookingPolicy {
            reject_past_dates: false,
            ..policy()
        };
        assert!(range.validate(today, &lenient).is_ok());
        // Starting today is fine.
        assert!(r("2024-06-10", "2024-06-11").validate(today, &policy()).is_ok());
    }

    #[test]
    fn validate_caps_span() {
        let today = d("2024-01-01");
        assert!(r("2024-01-01", "2024-01-31").validate(today, &policy()).is_ok());
        assert!(matches!(
            r("2024-01-01", "2024-02-01").validate(today, &policy()),
            Err(RangeError::TooLong { nights: 31, max: 30 })
        ));
    }

    #[test]
    fn filter_absent_fields_match_everything() {
        let listing = ListingDraft {
            category: "Cabins".into(),
            room_count: 2,
            location_value: "NO".into(),
            ..ListingDraft::default()
        }
        .into_listing(Ulid::new(), "host".into(), Utc::now());

        assert!(ListingFilter::default().matches(&listing));
        let f = ListingFilter {
            category: Some("Cabins".into()),
            room_count: Some(2),
            ..ListingFilter::default()
        };
        assert!(f.matches(&listing));
        let f = ListingFilter {
            category: Some("Cabins".into()),
            room_count: Some(3),
            ..ListingFilter::default()
        };
        assert!(!f.matches(&listing));
        let f = ListingFilter {
            owner_user_id: Some("someone-else".into()),
            ..ListingFilter::default()
        };
        assert!(!f.matches(&listing));
    }

    #[test]
    fn patch_touches_only_supplied_fields() {
        let mut listing = ListingDraft {
            title: "Old".into(),
            price_per_night: 100,
            guest_count: 2,
            ..ListingDraft::default()
        }
        .into_listing(Ulid::new(), "host".into(), Utc::now());
        ListingPatch {
            title: Some("New".into()),
            ..ListingPatch::default()
        }
        .apply_to(&mut listing);
        assert_eq!(listing.title, "New");
        assert_eq!(listing.price_per_night, 100);
        assert_eq!(listing.guest_count, 2);
    }

    #[test]
    fn reservations_kept_sorted_by_start() {
        let mut ls = state();
        ls.insert_reservation(reservation("2024-03-10", "2024-03-12"));
        ls.insert_reservation(reservation("2024-01-10", "2024-01-12"));
        ls.insert_reservation(reservation("2024-02-10", "2024-02-12"));
        let starts: Vec<_> = ls.reservations.iter().map(|r| r.range.start).collect();
        assert_eq!(starts, vec![d("2024-01-10"), d("2024-02-10"), d("2024-03-10")]);
    }

    #[test]
    fn overlapping_skips_adjacent_and_distant() {
        let mut ls = state();
        ls.insert_reservation(reservation("2024-06-01", "2024-06-04"));
        ls.insert_reservation(reservation("2024-06-10", "2024-06-12"));
        ls.insert_reservation(reservation("2024-07-01", "2024-07-05"));

        let hits: Vec<_> = ls.overlapping(&r("2024-06-04", "2024-06-11")).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].range, r("2024-06-10", "2024-06-12"));

        assert_eq!(ls.overlapping(&r("2024-06-04", "2024-06-10")).count(), 0);
        assert_eq!(ls.overlapping(&r("2024-05-01", "2024-08-01")).count(), 3);
    }

    #[test]
    fn overlapping_finds_long_stay_spanning_query() {
        let mut ls = state();
        ls.insert_reservation(reservation("2024-01-01", "2024-12-31"));
        assert_eq!(ls.overlapping(&r("2024-06-01", "2024-06-02")).count(), 1);
    }

    #[test]
    fn remove_reservation_by_id() {
        let mut ls = state();
        let keep = reservation("2024-01-01", "2024-01-02");
        let gone = reservation("2024-02-01", "2024-02-02");
        let gone_id = gone.id;
        ls.insert_reservation(keep.clone());
        ls.insert_reservation(gone);
        assert_eq!(ls.remove_reservation(gone_id).map(|r| r.id), Some(gone_id));
        assert!(ls.remove_reservation(Ulid::new()).is_none());
        assert_eq!(ls.reservations, vec![keep]);
    }

    #[test]
    fn active_reservations_measured_by_checkout() {
        let mut ls = state();
        ls.insert_reservation(reservation("2024-06-01", "2024-06-04"));
        assert!(ls.has_reservations_after(d("2024-06-03")));
        // Checkout day has passed its last night.
        assert!(!ls.has_reservations_after(d("2024-06-04")));
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::ReservationCommitted {
            reservation: reservation("2024-06-01", "2024-06-04"),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }

    #[test]
    fn reservation_view_uses_iso_dates() {
        let listing = ListingDraft::default().into_listing(Ulid::new(), "host".into(), Utc::now());
        let mut res = reservation("2024-06-01", "2024-06-04");
        res.listing_id = listing.id;
        let json = serde_json::to_value(ReservationView::new(&res, &listing)).unwrap();
        assert_eq!(json["startDate"], "2024-06-01");
        assert_eq!(json["endDate"], "2024-06-04");
        assert_eq!(json["listing"]["userId"], "host");
    }
}
