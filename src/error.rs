use chrono::NaiveDate;
use thiserror::Error;

use crate::store::StoreError;

/// Why a date range was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeError {
    #[error("range [{start}, {end}) is empty: checkout must be after check-in")]
    Empty { start: NaiveDate, end: NaiveDate },

    #[error("check-in {start} is before today ({today})")]
    InPast { start: NaiveDate, today: NaiveDate },

    #[error("stay of {nights} nights exceeds the maximum of {max}")]
    TooLong { nights: i64, max: u32 },

    #[error("malformed date range: {0}")]
    Malformed(String),
}

/// Every outcome the marketplace reports to its caller.
///
/// All variants except `Timeout` and `StoreFault` are expected business
/// outcomes; callers render them as messages, not as crashes.
#[derive(Debug, Error)]
pub enum MarketError {
    #[error("invalid range: {0}")]
    InvalidRange(#[from] RangeError),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{user} does not own listing {listing}")]
    NotOwner { listing: String, user: String },

    #[error("owners cannot book their own listing")]
    SelfBooking,

    #[error("requested nights are already booked (conflicts with reservation {0})")]
    BookingConflict(String),

    #[error("listing {0} has active reservations")]
    HasActiveReservations(String),

    #[error("store did not respond within the time limit")]
    Timeout,

    #[error("store fault: {0}")]
    StoreFault(String),
}

impl MarketError {
    /// Stable machine-readable name used on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            MarketError::InvalidRange(_) => "InvalidRange",
            MarketError::InvalidInput(_) => "InvalidInput",
            MarketError::NotFound(_) => "NotFound",
            MarketError::NotOwner { .. } => "NotOwner",
            MarketError::SelfBooking => "SelfBooking",
            MarketError::BookingConflict(_) => "BookingConflict",
            MarketError::HasActiveReservations(_) => "HasActiveReservations",
            MarketError::Timeout => "Timeout",
            MarketError::StoreFault(_) => "StoreFault",
        }
    }

    /// Faults that indicate an unhealthy store rather than a business rule.
    pub fn is_fault(&self) -> bool {
        matches!(self, MarketError::Timeout | MarketError::StoreFault(_))
    }
}

impl From<StoreError> for MarketError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => MarketError::NotFound(id.to_string()),
            StoreError::NotOwner { listing, user } => MarketError::NotOwner {
                listing: listing.to_string(),
                user,
            },
            StoreError::HasActiveReservations(id) => {
                MarketError::HasActiveReservations(id.to_string())
            }
            StoreError::LimitExceeded(msg) => MarketError::InvalidInput(msg.to_string()),
            StoreError::WalError(msg) => MarketError::StoreFault(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, MarketError>;

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn store_errors_map_onto_taxonomy() {
        let id = Ulid::new();
        assert_eq!(MarketError::from(StoreError::NotFound(id)).kind(), "NotFound");
        assert_eq!(
            MarketError::from(StoreError::HasActiveReservations(id)).kind(),
            "HasActiveReservations"
        );
        assert_eq!(
            MarketError::from(StoreError::LimitExceeded("too many listings")).kind(),
            "InvalidInput"
        );
        let fault = MarketError::from(StoreError::WalError("disk full".into()));
        assert_eq!(fault.kind(), "StoreFault");
        assert!(fault.is_fault());
    }

    #[test]
    fn business_outcomes_are_not_faults() {
        assert!(!MarketError::SelfBooking.is_fault());
        assert!(!MarketError::BookingConflict("x".into()).is_fault());
        assert!(MarketError::Timeout.is_fault());
    }

    #[test]
    fn range_errors_read_naturally() {
        let e = MarketError::from(RangeError::TooLong { nights: 400, max: 365 });
        assert_eq!(e.to_string(), "invalid range: stay of 400 nights exceeds the maximum of 365");
    }
}
