//! Persistence seams. The services only ever see these traits; [`crate::engine::Engine`]
//! implements both, and other backends can be swapped in behind them.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;
use ulid::Ulid;

use crate::error::MarketError;
use crate::model::*;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(Ulid),

    #[error("{user} does not own listing {listing}")]
    NotOwner { listing: Ulid, user: UserId },

    #[error("listing {0} has active reservations")]
    HasActiveReservations(Ulid),

    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),

    #[error("WAL error: {0}")]
    WalError(String),
}

/// Sole owner of listing records.
#[async_trait]
pub trait ListingCatalog: Send + Sync {
    async fn create(&self, owner_user_id: &str, draft: ListingDraft) -> Result<Listing, StoreError>;

    async fn get_by_id(&self, id: Ulid) -> Result<Option<Listing>, StoreError>;

    async fn update(
        &self,
        id: Ulid,
        owner_user_id: &str,
        patch: ListingPatch,
    ) -> Result<Listing, StoreError>;

    /// Refused while any reservation on the listing checks out after `today`;
    /// older reservations are removed with the listing.
    async fn delete(&self, id: Ulid, owner_user_id: &str, today: NaiveDate) -> Result<(), StoreError>;

    /// Newest first. An empty result is not an error.
    async fn query_by_attributes(&self, filter: &ListingFilter) -> Result<Vec<Listing>, StoreError>;
}

/// Sole owner of reservation records.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn find_overlapping(
        &self,
        listing_id: Ulid,
        range: DateRange,
    ) -> Result<Vec<Reservation>, StoreError>;

    async fn get_reservation(&self, id: Ulid) -> Result<Option<Reservation>, StoreError>;

    /// The three list views are newest first.
    async fn list_by_listing(&self, listing_id: Ulid) -> Result<Vec<Reservation>, StoreError>;

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Reservation>, StoreError>;

    async fn list_by_listing_owner(&self, owner_user_id: &str) -> Result<Vec<Reservation>, StoreError>;

    /// Atomic check-and-insert. Of any two concurrent calls with overlapping
    /// ranges on the same listing at most one returns `Committed`.
    async fn try_insert(&self, candidate: Reservation) -> Result<InsertOutcome, StoreError>;

    /// Removes the reservation, freeing its nights.
    async fn cancel(&self, id: Ulid) -> Result<Reservation, StoreError>;
}

/// Run a store call under the request's time limit.
pub async fn bounded<T, F>(limit: Duration, call: F) -> Result<T, MarketError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(MarketError::from),
        Err(_) => Err(MarketError::Timeout),
    }
}
