use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;
use ulid::Ulid;

use crate::availability::{AvailabilityEvaluator, subtract_ranges};
use crate::booking::BookingService;
use crate::clock::Clock;
use crate::config::BookingPolicy;
use crate::engine::Engine;
use crate::error::{MarketError, RangeError, Result};
use crate::model::*;
use crate::search::SearchService;
use crate::store::{ListingCatalog, ReservationStore, bounded};

/// The operations the surrounding application calls.
///
/// Wires the two stores, the clock and the policy into the search and
/// booking services, and turns domain records into serializable views.
pub struct Marketplace {
    catalog: Arc<dyn ListingCatalog>,
    reservations: Arc<dyn ReservationStore>,
    availability: AvailabilityEvaluator,
    search: SearchService,
    booking: BookingService,
    clock: Arc<dyn Clock>,
    policy: BookingPolicy,
}

impl Marketplace {
    pub fn new(
        catalog: Arc<dyn ListingCatalog>,
        reservations: Arc<dyn ReservationStore>,
        clock: Arc<dyn Clock>,
        policy: BookingPolicy,
    ) -> Self {
        let availability = AvailabilityEvaluator::new(reservations.clone(), policy.store_timeout);
        let search = SearchService::new(
            catalog.clone(),
            availability.clone(),
            clock.clone(),
            policy.clone(),
        );
        let booking = BookingService::new(
            catalog.clone(),
            reservations.clone(),
            availability.clone(),
            clock.clone(),
            policy.clone(),
        );
        Self {
            catalog,
            reservations,
            availability,
            search,
            booking,
            clock,
            policy,
        }
    }

    /// Both stores backed by one engine.
    pub fn from_engine(engine: Arc<Engine>, clock: Arc<dyn Clock>, policy: BookingPolicy) -> Self {
        Self::new(engine.clone(), engine, clock, policy)
    }

    pub async fn search(
        &self,
        filter: &ListingFilter,
        range: Option<DateRange>,
    ) -> Result<Vec<ListingView>> {
        let listings = self.search.search(filter, range).await?;
        Ok(listings.iter().map(ListingView::from).collect())
    }

    pub async fn get_listing(&self, id: Ulid) -> Result<ListingView> {
        self.fetch_listing(id).await.map(|l| ListingView::from(&l))
    }

    pub async fn create_listing(&self, draft: ListingDraft, owner_user_id: &str) -> Result<ListingView> {
        let listing = bounded(
            self.policy.store_timeout,
            self.catalog.create(owner_user_id, draft),
        )
        .await?;
        Ok(ListingView::from(&listing))
    }

    pub async fn update_listing(
        &self,
        id: Ulid,
        owner_user_id: &str,
        patch: ListingPatch,
    ) -> Result<ListingView> {
        let listing = bounded(
            self.policy.store_timeout,
            self.catalog.update(id, owner_user_id, patch),
        )
        .await?;
        Ok(ListingView::from(&listing))
    }

    pub async fn delete_listing(&self, id: Ulid, owner_user_id: &str) -> Result<()> {
        bounded(
            self.policy.store_timeout,
            self.catalog.delete(id, owner_user_id, self.clock.today()),
        )
        .await
    }

    pub async fn book(&self, listing_id: Ulid, user_id: &str, range: DateRange) -> Result<ReservationView> {
        let (reservation, listing) = self.booking.book(listing_id, user_id, range).await?;
        Ok(ReservationView::new(&reservation, &listing))
    }

    /// Allowed for the guest who booked and for the listing's owner.
    pub async fn cancel_reservation(&self, reservation_id: Ulid, user_id: &str) -> Result<()> {
        let timeout = self.policy.store_timeout;
        let reservation = bounded(timeout, self.reservations.get_reservation(reservation_id))
            .await?
            .ok_or_else(|| MarketError::NotFound(reservation_id.to_string()))?;
        let listing = self.fetch_listing(reservation.listing_id).await?;

        if reservation.user_id != user_id && listing.owner_user_id != user_id {
            return Err(MarketError::NotOwner {
                listing: listing.id.to_string(),
                user: user_id.to_string(),
            });
        }

        bounded(timeout, self.reservations.cancel(reservation_id)).await?;
        info!("reservation {reservation_id} cancelled by {user_id}");
        Ok(())
    }

    /// Supplied selectors are AND-combined; no selector at all yields nothing.
    pub async fn list_reservations(&self, query: &ReservationQuery) -> Result<Vec<ReservationView>> {
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let timeout = self.policy.store_timeout;

        let base = if let Some(listing_id) = query.listing_id {
            bounded(timeout, self.reservations.list_by_listing(listing_id)).await?
        } else if let Some(user_id) = &query.user_id {
            bounded(timeout, self.reservations.list_by_user(user_id)).await?
        } else if let Some(owner) = &query.owner_user_id {
            bounded(timeout, self.reservations.list_by_listing_owner(owner)).await?
        } else {
            Vec::new()
        };

        let mut listings: HashMap<Ulid, Option<Listing>> = HashMap::new();
        let mut views = Vec::with_capacity(base.len());
        for reservation in &base {
            if query.user_id.as_ref().is_some_and(|u| *u != reservation.user_id) {
                continue;
            }
            let listing = match listings.get(&reservation.listing_id) {
                Some(cached) => cached.clone(),
                None => {
                    let fetched = bounded(timeout, self.catalog.get_by_id(reservation.listing_id)).await?;
                    listings.insert(reservation.listing_id, fetched.clone());
                    fetched
                }
            };
            // Listing deleted since the reservation list was read.
            let Some(listing) = listing else { continue };
            if query
                .owner_user_id
                .as_ref()
                .is_some_and(|o| *o != listing.owner_user_id)
            {
                continue;
            }
            views.push(ReservationView::new(reservation, &listing));
        }
        Ok(views)
    }

    /// Booked and free spans of a listing inside `window`.
    pub async fn calendar(&self, listing_id: Ulid, window: DateRange) -> Result<CalendarView> {
        if window.start >= window.end {
            return Err(MarketError::InvalidRange(RangeError::Empty {
                start: window.start,
                end: window.end,
            }));
        }
        self.fetch_listing(listing_id).await?;
        let booked = self.availability.booked_within(listing_id, window).await?;
        let free = subtract_ranges(&[window], &booked);
        Ok(CalendarView {
            listing_id: listing_id.to_string(),
            window,
            booked,
            free,
        })
    }

    async fn fetch_listing(&self, id: Ulid) -> Result<Listing> {
        bounded(self.policy.store_timeout, self.catalog.get_by_id(id))
            .await?
            .ok_or_else(|| MarketError::NotFound(id.to_string()))
    }
}
