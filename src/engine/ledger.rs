use async_trait::async_trait;
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::store::{ReservationStore, StoreError};

use super::conflict::{first_conflict, validate_owner};
use super::Engine;

impl Engine {
    /// Collect reservations across all listings matching `keep`.
    async fn collect_reservations(
        &self,
        keep: impl Fn(&ListingState, &Reservation) -> bool + Send,
    ) -> Vec<Reservation> {
        let mut out = Vec::new();
        for state in self.all_states() {
            let guard = state.read().await;
            let ls: &ListingState = &guard;
            if ls.retired {
                continue;
            }
            out.extend(ls.reservations.iter().filter(|r| keep(ls, *r)).cloned());
        }
        newest_reservations_first(&mut out);
        out
    }
}

#[async_trait]
impl ReservationStore for Engine {
    async fn find_overlapping(
        &self,
        listing_id: Ulid,
        range: DateRange,
    ) -> Result<Vec<Reservation>, StoreError> {
        let state = self
            .get_state(&listing_id)
            .ok_or(StoreError::NotFound(listing_id))?;
        let ls = state.read().await;
        if ls.retired {
            return Err(StoreError::NotFound(listing_id));
        }
        Ok(ls.overlapping(&range).cloned().collect())
    }

    async fn get_reservation(&self, id: Ulid) -> Result<Option<Reservation>, StoreError> {
        let Some(listing_id) = self.tables.reservation_index.get(&id).map(|e| *e.value()) else {
            return Ok(None);
        };
        let Some(state) = self.get_state(&listing_id) else {
            return Ok(None);
        };
        let ls = state.read().await;
        Ok(ls.reservations.iter().find(|r| r.id == id).cloned())
    }

    async fn list_by_listing(&self, listing_id: Ulid) -> Result<Vec<Reservation>, StoreError> {
        let Some(state) = self.get_state(&listing_id) else {
            return Ok(Vec::new());
        };
        let ls = state.read().await;
        let mut out = ls.reservations.clone();
        newest_reservations_first(&mut out);
        Ok(out)
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Reservation>, StoreError> {
        Ok(self.collect_reservations(|_, r| r.user_id == user_id).await)
    }

    async fn list_by_listing_owner(&self, owner_user_id: &str) -> Result<Vec<Reservation>, StoreError> {
        Ok(self
            .collect_reservations(|ls, _| ls.listing.owner_user_id == owner_user_id)
            .await)
    }

    async fn try_insert(&self, candidate: Reservation) -> Result<InsertOutcome, StoreError> {
        validate_owner(&candidate.user_id)?;
        let listing_id = candidate.listing_id;

        let gate = self.enter_mutation().await;
        let guard = self.lock_listing(listing_id).await?;
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_LISTING {
            return Err(StoreError::LimitExceeded("too many reservations on listing"));
        }
        // Re-checked under the write lock: this, not any earlier availability
        // probe, is what keeps reservations on a listing pairwise disjoint.
        if let Some(existing) = first_conflict(&guard, &candidate.range) {
            debug!(
                "reservation on {listing_id} [{}, {}) conflicts with {}",
                candidate.range.start, candidate.range.end, existing.id
            );
            return Ok(InsertOutcome::Conflict(existing.id));
        }

        let event = Event::ReservationCommitted {
            reservation: candidate.clone(),
        };
        self.commit(gate, Some(guard), event).await?;
        info!(
            "reservation {} committed on {listing_id} [{}, {})",
            candidate.id, candidate.range.start, candidate.range.end
        );
        Ok(InsertOutcome::Committed(candidate))
    }

    async fn cancel(&self, id: Ulid) -> Result<Reservation, StoreError> {
        let listing_id = self
            .tables
            .reservation_index
            .get(&id)
            .map(|e| *e.value())
            .ok_or(StoreError::NotFound(id))?;

        let gate = self.enter_mutation().await;
        let guard = self.lock_listing(listing_id).await?;
        let reservation = guard
            .reservations
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or(StoreError::NotFound(id))?;

        let event = Event::ReservationCancelled { id, listing_id };
        self.commit(gate, Some(guard), event).await?;
        info!("reservation {id} on {listing_id} cancelled");
        Ok(reservation)
    }
}
