use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::store::{ListingCatalog, StoreError};

use super::conflict::{validate_listing, validate_owner};
use super::Engine;

#[async_trait]
impl ListingCatalog for Engine {
    async fn create(&self, owner_user_id: &str, draft: ListingDraft) -> Result<Listing, StoreError> {
        validate_owner(owner_user_id)?;
        if self.listing_count() >= MAX_LISTINGS {
            return Err(StoreError::LimitExceeded("too many listings"));
        }
        let listing = draft.into_listing(Ulid::new(), owner_user_id.to_string(), Utc::now());
        validate_listing(&listing)?;

        let gate = self.enter_mutation().await;
        let event = Event::ListingCreated {
            listing: listing.clone(),
        };
        self.commit(gate, None, event).await?;
        metrics::gauge!(crate::observability::LISTINGS_ACTIVE).set(self.listing_count() as f64);
        info!("listing {} created by {owner_user_id}", listing.id);
        Ok(listing)
    }

    async fn get_by_id(&self, id: Ulid) -> Result<Option<Listing>, StoreError> {
        let Some(state) = self.get_state(&id) else {
            return Ok(None);
        };
        let ls = state.read().await;
        Ok((!ls.retired).then(|| ls.listing.clone()))
    }

    async fn update(
        &self,
        id: Ulid,
        owner_user_id: &str,
        patch: ListingPatch,
    ) -> Result<Listing, StoreError> {
        let gate = self.enter_mutation().await;
        let guard = self.lock_listing(id).await?;
        if guard.listing.owner_user_id != owner_user_id {
            return Err(StoreError::NotOwner {
                listing: id,
                user: owner_user_id.to_string(),
            });
        }

        let mut updated = guard.listing.clone();
        patch.apply_to(&mut updated);
        validate_listing(&updated)?;

        let event = Event::ListingUpdated {
            listing: updated.clone(),
        };
        self.commit(gate, Some(guard), event).await?;
        info!("listing {id} updated");
        Ok(updated)
    }

    async fn delete(&self, id: Ulid, owner_user_id: &str, today: NaiveDate) -> Result<(), StoreError> {
        let gate = self.enter_mutation().await;
        let guard = self.lock_listing(id).await?;
        if guard.listing.owner_user_id != owner_user_id {
            return Err(StoreError::NotOwner {
                listing: id,
                user: owner_user_id.to_string(),
            });
        }
        // Holding the write lock keeps a concurrent try_insert from slipping in.
        if guard.has_reservations_after(today) {
            return Err(StoreError::HasActiveReservations(id));
        }

        let cascaded = guard.reservations.len();
        self.commit(gate, Some(guard), Event::ListingDeleted { id }).await?;
        metrics::gauge!(crate::observability::LISTINGS_ACTIVE).set(self.listing_count() as f64);
        info!("listing {id} deleted ({cascaded} past reservations removed)");
        Ok(())
    }

    async fn query_by_attributes(&self, filter: &ListingFilter) -> Result<Vec<Listing>, StoreError> {
        let mut matched = Vec::new();
        for state in self.all_states() {
            let ls = state.read().await;
            if !ls.retired && filter.matches(&ls.listing) {
                matched.push(ls.listing.clone());
            }
        }
        newest_listings_first(&mut matched);
        Ok(matched)
    }
}
