use crate::limits::*;
use crate::model::*;
use crate::store::StoreError;

/// First committed reservation occupying any night of `range`, if there is one.
pub(super) fn first_conflict<'a>(ls: &'a ListingState, range: &DateRange) -> Option<&'a Reservation> {
    ls.overlapping(range).next()
}

pub(super) fn validate_owner(user_id: &str) -> Result<(), StoreError> {
    if user_id.is_empty() {
        return Err(StoreError::LimitExceeded("user id is empty"));
    }
    if user_id.len() > MAX_USER_ID_LEN {
        return Err(StoreError::LimitExceeded("user id too long"));
    }
    Ok(())
}

/// Checked on the listing a create or update would produce, so a patch can never
/// reach a state a fresh listing could not.
pub(super) fn validate_listing(listing: &Listing) -> Result<(), StoreError> {
    if listing.category.trim().is_empty() {
        return Err(StoreError::LimitExceeded("category is required"));
    }
    check_text(
        &listing.title,
        &listing.description,
        &[&listing.image_src, &listing.category, &listing.location_value],
    )?;
    check_counts(listing.room_count, listing.bathroom_count, listing.guest_count)?;
    check_price(listing.price_per_night)
}

fn check_text(title: &str, description: &str, fields: &[&String]) -> Result<(), StoreError> {
    if title.len() > MAX_TITLE_LEN {
        return Err(StoreError::LimitExceeded("title too long"));
    }
    if description.len() > MAX_DESCRIPTION_LEN {
        return Err(StoreError::LimitExceeded("description too long"));
    }
    if fields.iter().any(|f| f.len() > MAX_FIELD_LEN) {
        return Err(StoreError::LimitExceeded("field too long"));
    }
    Ok(())
}

fn check_counts(rooms: u32, bathrooms: u32, guests: u32) -> Result<(), StoreError> {
    if rooms > MAX_COUNT || bathrooms > MAX_COUNT || guests > MAX_COUNT {
        return Err(StoreError::LimitExceeded("count out of range"));
    }
    Ok(())
}

fn check_price(price: Cents) -> Result<(), StoreError> {
    if !(0..=MAX_PRICE_PER_NIGHT).contains(&price) {
        return Err(StoreError::LimitExceeded("price out of range"));
    }
    Ok(())
}
