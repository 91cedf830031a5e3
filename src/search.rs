use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::debug;

use crate::availability::AvailabilityEvaluator;
use crate::clock::Clock;
use crate::config::BookingPolicy;
use crate::error::MarketError;
use crate::limits::SEARCH_PROBE_CONCURRENCY;
use crate::model::{DateRange, Listing, ListingFilter};
use crate::store::{ListingCatalog, bounded};

/// Attribute filtering first, then availability filtering.
#[derive(Clone)]
pub struct SearchService {
    catalog: Arc<dyn ListingCatalog>,
    availability: AvailabilityEvaluator,
    clock: Arc<dyn Clock>,
    policy: BookingPolicy,
}

impl SearchService {
    pub fn new(
        catalog: Arc<dyn ListingCatalog>,
        availability: AvailabilityEvaluator,
        clock: Arc<dyn Clock>,
        policy: BookingPolicy,
    ) -> Self {
        Self {
            catalog,
            availability,
            clock,
            policy,
        }
    }

    /// Listings matching `filter`, newest first. With a range, only those with
    /// no reservation on any night of it.
    pub async fn search(
        &self,
        filter: &ListingFilter,
        range: Option<DateRange>,
    ) -> Result<Vec<Listing>, MarketError> {
        if let Some(range) = &range {
            range.validate(self.clock.today(), &self.policy)?;
        }

        let candidates = bounded(
            self.policy.store_timeout,
            self.catalog.query_by_attributes(filter),
        )
        .await?;

        let Some(range) = range else {
            return Ok(candidates);
        };

        let total = candidates.len();
        // `buffered` yields in input order, so newest-first survives the fan-out.
        let probed: Vec<Option<Listing>> = stream::iter(candidates)
            .map(|listing| async move {
                match self.availability.is_available(listing.id, range).await {
                    Ok(true) => Ok(Some(listing)),
                    Ok(false) => Ok(None),
                    // Deleted between the attribute query and the probe.
                    Err(MarketError::NotFound(_)) => Ok(None),
                    Err(e) => Err(e),
                }
            })
            .buffered(SEARCH_PROBE_CONCURRENCY)
            .try_collect()
            .await?;
        let available: Vec<Listing> = probed.into_iter().flatten().collect();

        debug!(
            "search [{}, {}): {} of {total} candidates available",
            range.start,
            range.end,
            available.len()
        );
        Ok(available)
    }
}
