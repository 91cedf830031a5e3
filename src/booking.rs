use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};
use ulid::Ulid;

use crate::availability::AvailabilityEvaluator;
use crate::clock::Clock;
use crate::config::BookingPolicy;
use crate::error::MarketError;
use crate::model::{Cents, DateRange, InsertOutcome, Listing, Reservation};
use crate::observability::BOOKINGS_TOTAL;
use crate::store::{ListingCatalog, ReservationStore, bounded};

/// Turns a booking request into a committed reservation or a typed refusal.
///
/// Steps, each of which may reject:
/// 1. the listing exists and the guest is not its owner (unless policy allows),
/// 2. the range is valid,
/// 3. an advisory availability check,
/// 4. the store's atomic `try_insert`, which has the final word.
#[derive(Clone)]
pub struct BookingService {
    catalog: Arc<dyn ListingCatalog>,
    reservations: Arc<dyn ReservationStore>,
    availability: AvailabilityEvaluator,
    clock: Arc<dyn Clock>,
    policy: BookingPolicy,
}

impl BookingService {
    pub fn new(
        catalog: Arc<dyn ListingCatalog>,
        reservations: Arc<dyn ReservationStore>,
        availability: AvailabilityEvaluator,
        clock: Arc<dyn Clock>,
        policy: BookingPolicy,
    ) -> Self {
        Self {
            catalog,
            reservations,
            availability,
            clock,
            policy,
        }
    }

    pub async fn book(
        &self,
        listing_id: Ulid,
        user_id: &str,
        range: DateRange,
    ) -> Result<(Reservation, Listing), MarketError> {
        let result = self.book_inner(listing_id, user_id, range).await;
        let outcome = match &result {
            Ok(_) => "committed",
            Err(e) => e.kind(),
        };
        metrics::counter!(BOOKINGS_TOTAL, "outcome" => outcome).increment(1);
        match &result {
            Ok((reservation, _)) => info!(
                "booked {listing_id} [{}, {}) for {user_id} as {}",
                range.start, range.end, reservation.id
            ),
            Err(e) if e.is_fault() => tracing::warn!("booking {listing_id} for {user_id} failed: {e}"),
            Err(e) => debug!("booking {listing_id} for {user_id} rejected: {e}"),
        }
        result
    }

    async fn book_inner(
        &self,
        listing_id: Ulid,
        user_id: &str,
        range: DateRange,
    ) -> Result<(Reservation, Listing), MarketError> {
        let timeout = self.policy.store_timeout;

        // Received
        let listing = bounded(timeout, self.catalog.get_by_id(listing_id))
            .await?
            .ok_or_else(|| MarketError::NotFound(listing_id.to_string()))?;
        if listing.owner_user_id == user_id && !self.policy.allow_self_booking {
            return Err(MarketError::SelfBooking);
        }

        // Validated
        range.validate(self.clock.today(), &self.policy)?;
        let total_price = total_price(listing.price_per_night, &range)?;

        // AvailabilityChecked
        if let Some(existing) = self.availability.first_conflict(listing_id, range).await? {
            return Err(MarketError::BookingConflict(existing.to_string()));
        }

        // Committed | Rejected
        let candidate = Reservation {
            id: Ulid::new(),
            listing_id,
            user_id: user_id.to_string(),
            range,
            total_price,
            created_at: Utc::now(),
        };
        match bounded(timeout, self.reservations.try_insert(candidate)).await? {
            InsertOutcome::Committed(reservation) => Ok((reservation, listing)),
            InsertOutcome::Conflict(existing) => Err(MarketError::BookingConflict(existing.to_string())),
        }
    }
}

/// `price_per_night × nights`, refusing rather than wrapping on overflow.
pub fn total_price(price_per_night: Cents, range: &DateRange) -> Result<Cents, MarketError> {
    price_per_night
        .checked_mul(range.nights())
        .ok_or_else(|| MarketError::InvalidInput("total price overflows".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::NaiveDate;

    use crate::clock::FixedClock;
    use crate::engine::Engine;
    use crate::error::RangeError;
    use crate::model::ListingDraft;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn r(start: &str, end: &str) -> DateRange {
        DateRange::new(d(start), d(end))
    }

    fn service_with(engine: &Arc<Engine>, policy: BookingPolicy) -> BookingService {
        BookingService::new(
            engine.clone(),
            engine.clone(),
            AvailabilityEvaluator::new(engine.clone(), policy.store_timeout),
            Arc::new(FixedClock(d("2024-01-01"))),
            policy,
        )
    }

    fn service(engine: &Arc<Engine>) -> BookingService {
        service_with(engine, BookingPolicy::default())
    }

    async fn listing(engine: &Engine, price: Cents) -> Listing {
        let draft = ListingDraft {
            category: "Cabins".into(),
            guest_count: 2,
            price_per_night: price,
            ..ListingDraft::default()
        };
        engine.create("host", draft).await.unwrap()
    }

    #[tokio::test]
    async fn books_free_listing_at_nightly_rate() {
        let engine = Arc::new(Engine::in_memory());
        let l = listing(&engine, 100).await;
        let (reservation, booked_listing) = service(&engine)
            .book(l.id, "guest", r("2024-06-01", "2024-06-04"))
            .await
            .unwrap();
        assert_eq!(reservation.total_price, 300);
        assert_eq!(reservation.user_id, "guest");
        assert_eq!(booked_listing, l);
        assert_eq!(engine.list_by_listing(l.id).await.unwrap(), vec![reservation]);
    }

    #[tokio::test]
    async fn overlapping_booking_is_a_conflict() {
        let engine = Arc::new(Engine::in_memory());
        let l = listing(&engine, 100).await;
        let svc = service(&engine);
        let (early, _) = svc.book(l.id, "g1", r("2024-06-01", "2024-06-04")).await.unwrap();
        svc.book(l.id, "g1b", r("2024-06-10", "2024-06-12")).await.unwrap();

        // Overlaps both; the earliest held span is reported.
        let second = svc.book(l.id, "g2", r("2024-06-03", "2024-06-11")).await;
        match second {
            Err(MarketError::BookingConflict(existing)) => assert_eq!(existing, early.id.to_string()),
            other => panic!("expected a conflict, got {other:?}"),
        }
        assert_eq!(engine.list_by_listing(l.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn checkout_day_is_bookable() {
        let engine = Arc::new(Engine::in_memory());
        let l = listing(&engine, 100).await;
        let svc = service(&engine);
        svc.book(l.id, "g1", r("2024-06-01", "2024-06-04")).await.unwrap();
        let (second, _) = svc.book(l.id, "g2", r("2024-06-04", "2024-06-06")).await.unwrap();
        assert_eq!(second.total_price, 200);
    }

    #[tokio::test]
    async fn empty_and_reversed_ranges_are_invalid() {
        let engine = Arc::new(Engine::in_memory());
        let l = listing(&engine, 100).await;
        let svc = service(&engine);
        for range in [r("2024-06-04", "2024-06-04"), r("2024-06-04", "2024-06-01")] {
            let result = svc.book(l.id, "guest", range).await;
            assert!(matches!(
                result,
                Err(MarketError::InvalidRange(RangeError::Empty { .. }))
            ));
        }
        assert!(engine.list_by_listing(l.id).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_identical_bookings_have_one_winner() {
        let engine = Arc::new(Engine::in_memory());
        let l = listing(&engine, 100).await;
        let svc = service(&engine);

        let mut handles = Vec::new();
        for i in 0..16 {
            let svc = svc.clone();
            let id = l.id;
            handles.push(tokio::spawn(async move {
                svc.book(id, &format!("guest-{i}"), r("2024-06-01", "2024-06-04")).await
            }));
        }

        let mut wins = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(_) => wins += 1,
                Err(MarketError::BookingConflict(_)) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(wins, 1);
        assert_eq!(engine.list_by_listing(l.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_listing_is_not_found() {
        let engine = Arc::new(Engine::in_memory());
        let result = service(&engine)
            .book(Ulid::new(), "guest", r("2024-06-01", "2024-06-02"))
            .await;
        assert!(matches!(result, Err(MarketError::NotFound(_))));
    }

    #[tokio::test]
    async fn self_booking_follows_policy() {
        let engine = Arc::new(Engine::in_memory());
        let l = listing(&engine, 100).await;

        let refused = service(&engine).book(l.id, "host", r("2024-06-01", "2024-06-02")).await;
        assert!(matches!(refused, Err(MarketError::SelfBooking)));

        let permissive = BookingPolicy {
            allow_self_booking: true,
            ..BookingPolicy::default()
        };
        let allowed = service_with(&engine, permissive)
            .book(l.id, "host", r("2024-06-01", "2024-06-02"))
            .await;
        assert!(allowed.is_ok());
    }

    #[tokio::test]
    async fn past_and_overlong_stays_are_invalid() {
        let engine = Arc::new(Engine::in_memory());
        let l = listing(&engine, 100).await;
        let policy = BookingPolicy {
            max_stay_nights: 7,
            ..BookingPolicy::default()
        };
        let svc = service_with(&engine, policy);

        let past = svc.book(l.id, "guest", r("2023-12-30", "2024-01-02")).await;
        assert!(matches!(
            past,
            Err(MarketError::InvalidRange(RangeError::InPast { .. }))
        ));
        let long = svc.book(l.id, "guest", r("2024-06-01", "2024-06-09")).await;
        assert!(matches!(
            long,
            Err(MarketError::InvalidRange(RangeError::TooLong { nights: 8, max: 7 }))
        ));
        // Starting today is allowed.
        assert!(svc.book(l.id, "guest", r("2024-01-01", "2024-01-02")).await.is_ok());
    }

    #[test]
    fn total_price_refuses_overflow() {
        assert_eq!(total_price(12_50, &r("2024-06-01", "2024-06-03")).unwrap(), 25_00);
        assert!(matches!(
            total_price(i64::MAX, &r("2024-06-01", "2024-06-03")),
            Err(MarketError::InvalidInput(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_store_times_out() {
        struct Stalled;

        #[async_trait::async_trait]
        impl ListingCatalog for Stalled {
            async fn create(&self, _: &str, _: ListingDraft) -> Result<Listing, crate::store::StoreError> {
                unimplemented!()
            }
            async fn get_by_id(&self, _: Ulid) -> Result<Option<Listing>, crate::store::StoreError> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(None)
            }
            async fn update(
                &self,
                _: Ulid,
                _: &str,
                _: crate::model::ListingPatch,
            ) -> Result<Listing, crate::store::StoreError> {
                unimplemented!()
            }
            async fn delete(&self, _: Ulid, _: &str, _: NaiveDate) -> Result<(), crate::store::StoreError> {
                unimplemented!()
            }
            async fn query_by_attributes(
                &self,
                _: &crate::model::ListingFilter,
            ) -> Result<Vec<Listing>, crate::store::StoreError> {
                unimplemented!()
            }
        }

        let engine = Arc::new(Engine::in_memory());
        let policy = BookingPolicy {
            store_timeout: Duration::from_millis(100),
            ..BookingPolicy::default()
        };
        let svc = BookingService::new(
            Arc::new(Stalled),
            engine.clone(),
            AvailabilityEvaluator::new(engine, policy.store_timeout),
            Arc::new(FixedClock(d("2024-01-01"))),
            policy,
        );
        let result = svc.book(Ulid::new(), "guest", r("2024-06-01", "2024-06-02")).await;
        assert!(matches!(result, Err(MarketError::Timeout)));
    }
}
