//! The one place where string-typed request data becomes typed values.
//!
//! Query parameters arrive as strings and listing forms carry counts and
//! prices as either JSON numbers or numeric strings. Everything past this
//! module sees only `ListingFilter`, `DateRange`, `ListingDraft` and friends.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate};
use serde::Deserialize;
use thiserror::Error;
use ulid::Ulid;

use crate::error::{MarketError, RangeError};
use crate::model::{Cents, DateRange, ListingDraft, ListingFilter, ListingPatch};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParamError {
    #[error("{field}: '{value}' is not a whole number")]
    BadNumber { field: &'static str, value: String },

    #[error("{field}: '{value}' is not a date (expected YYYY-MM-DD)")]
    BadDate { field: &'static str, value: String },

    #[error("startDate and endDate must be given together")]
    HalfRange,

    #[error("{0} is required")]
    Missing(&'static str),

    #[error("'{0}' is not a valid id")]
    BadId(String),

    #[error("malformed listing form: {0}")]
    Form(String),
}

impl From<ParamError> for MarketError {
    fn from(e: ParamError) -> Self {
        match e {
            ParamError::BadDate { .. } | ParamError::HalfRange => {
                MarketError::InvalidRange(RangeError::Malformed(e.to_string()))
            }
            // Nothing can be stored under an id that does not parse.
            ParamError::BadId(id) => MarketError::NotFound(id),
            other => MarketError::InvalidInput(other.to_string()),
        }
    }
}

pub fn parse_id(raw: &str) -> Result<Ulid, ParamError> {
    Ulid::from_string(raw.trim()).map_err(|_| ParamError::BadId(raw.to_string()))
}

/// `YYYY-MM-DD`, or a full RFC 3339 timestamp reduced to its calendar date.
pub fn parse_date(field: &'static str, raw: &str) -> Result<NaiveDate, ParamError> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| DateTime::parse_from_rfc3339(raw).map(|dt| dt.date_naive()))
        .map_err(|_| ParamError::BadDate {
            field,
            value: raw.to_string(),
        })
}

pub fn parse_range(start: &str, end: &str) -> Result<DateRange, ParamError> {
    Ok(DateRange::new(
        parse_date("startDate", start)?,
        parse_date("endDate", end)?,
    ))
}

fn parse_count(field: &'static str, raw: &str) -> Result<u32, ParamError> {
    raw.trim().parse().map_err(|_| ParamError::BadNumber {
        field,
        value: raw.to_string(),
    })
}

/// Search query parameters. Absent and empty values leave a predicate unset.
pub fn parse_search_params(
    params: &HashMap<String, String>,
) -> Result<(ListingFilter, Option<DateRange>), ParamError> {
    let get = |key: &str| params.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());

    let filter = ListingFilter {
        category: get("category").map(str::to_string),
        room_count: get("roomCount").map(|v| parse_count("roomCount", v)).transpose()?,
        bathroom_count: get("bathroomCount")
            .map(|v| parse_count("bathroomCount", v))
            .transpose()?,
        guest_count: get("guestCount").map(|v| parse_count("guestCount", v)).transpose()?,
        location_value: get("locationValue").map(str::to_string),
        owner_user_id: get("userId").map(str::to_string),
    };

    let range = match (get("startDate"), get("endDate")) {
        (Some(start), Some(end)) => Some(parse_range(start, end)?),
        (None, None) => None,
        _ => return Err(ParamError::HalfRange),
    };

    Ok((filter, range))
}

// ── Listing forms ────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(serde_json::Number),
    Text(String),
}

impl NumberOrString {
    fn to_i64(&self, field: &'static str) -> Result<i64, ParamError> {
        let parsed = match self {
            NumberOrString::Number(n) => n.as_i64(),
            NumberOrString::Text(s) => s.trim().parse().ok(),
        };
        parsed.ok_or_else(|| ParamError::BadNumber {
            field,
            value: match self {
                NumberOrString::Number(n) => n.to_string(),
                NumberOrString::Text(s) => s.clone(),
            },
        })
    }

    fn to_count(&self, field: &'static str) -> Result<u32, ParamError> {
        let n = self.to_i64(field)?;
        u32::try_from(n).map_err(|_| ParamError::BadNumber {
            field,
            value: n.to_string(),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
struct Location {
    value: String,
}

/// Listing form as posted by the host UI.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListingForm {
    title: Option<String>,
    description: Option<String>,
    image_src: Option<String>,
    category: Option<String>,
    room_count: Option<NumberOrString>,
    bathroom_count: Option<NumberOrString>,
    guest_count: Option<NumberOrString>,
    location: Option<Location>,
    price: Option<NumberOrString>,
}

impl ListingForm {
    fn from_value(value: serde_json::Value) -> Result<Self, ParamError> {
        serde_json::from_value(value).map_err(|e| ParamError::Form(e.to_string()))
    }
}

fn required<'a>(field: &'static str, v: &'a Option<NumberOrString>) -> Result<&'a NumberOrString, ParamError> {
    v.as_ref().ok_or(ParamError::Missing(field))
}

fn optional_count(field: &'static str, v: &Option<NumberOrString>) -> Result<Option<u32>, ParamError> {
    v.as_ref().map(|n| n.to_count(field)).transpose()
}

/// Form for a new listing. Counts and price are required; text fields default to empty.
pub fn parse_listing_form(value: serde_json::Value) -> Result<ListingDraft, ParamError> {
    let form = ListingForm::from_value(value)?;
    let price: Cents = required("price", &form.price)?.to_i64("price")?;
    Ok(ListingDraft {
        title: form.title.unwrap_or_default(),
        description: form.description.unwrap_or_default(),
        image_src: form.image_src.unwrap_or_default(),
        category: form.category.ok_or(ParamError::Missing("category"))?,
        room_count: required("roomCount", &form.room_count)?.to_count("roomCount")?,
        bathroom_count: required("bathroomCount", &form.bathroom_count)?.to_count("bathroomCount")?,
        guest_count: required("guestCount", &form.guest_count)?.to_count("guestCount")?,
        location_value: form.location.map(|l| l.value).unwrap_or_default(),
        price_per_night: price,
    })
}

/// Form for an edit: absent fields stay as they are.
pub fn parse_listing_patch(value: serde_json::Value) -> Result<ListingPatch, ParamError> {
    let form = ListingForm::from_value(value)?;
    Ok(ListingPatch {
        title: form.title,
        description: form.description,
        image_src: form.image_src,
        category: form.category,
        room_count: optional_count("roomCount", &form.room_count)?,
        bathroom_count: optional_count("bathroomCount", &form.bathroom_count)?,
        guest_count: optional_count("guestCount", &form.guest_count)?,
        location_value: form.location.map(|l| l.value),
        price_per_night: form.price.as_ref().map(|p| p.to_i64("price")).transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn search_params_become_filter_and_range() {
        let (filter, range) = parse_search_params(&params(&[
            ("category", "Cabins"),
            ("roomCount", "2"),
            ("guestCount", " 4 "),
            ("locationValue", "PT"),
            ("startDate", "2024-06-01"),
            ("endDate", "2024-06-04T00:00:00.000Z"),
        ]))
        .unwrap();
        assert_eq!(filter.category.as_deref(), Some("Cabins"));
        assert_eq!(filter.room_count, Some(2));
        assert_eq!(filter.guest_count, Some(4));
        assert_eq!(filter.bathroom_count, None);
        assert_eq!(filter.location_value.as_deref(), Some("PT"));
        assert_eq!(range, Some(DateRange::new(d("2024-06-01"), d("2024-06-04"))));
    }

    #[test]
    fn empty_values_are_absent() {
        let (filter, range) =
            parse_search_params(&params(&[("category", ""), ("startDate", ""), ("endDate", " ")]))
                .unwrap();
        assert_eq!(filter, ListingFilter::default());
        assert_eq!(range, None);
    }

    #[test]
    fn non_numeric_count_is_rejected() {
        let err = parse_search_params(&params(&[("roomCount", "abc")])).unwrap_err();
        assert_eq!(
            err,
            ParamError::BadNumber {
                field: "roomCount",
                value: "abc".into()
            }
        );
        assert_eq!(MarketError::from(err).kind(), "InvalidInput");
    }

    #[test]
    fn half_or_malformed_range_is_invalid_range() {
        let half = parse_search_params(&params(&[("startDate", "2024-06-01")])).unwrap_err();
        assert_eq!(half, ParamError::HalfRange);
        assert_eq!(MarketError::from(half).kind(), "InvalidRange");

        let bad = parse_search_params(&params(&[("startDate", "June 1"), ("endDate", "2024-06-04")]))
            .unwrap_err();
        assert!(matches!(bad, ParamError::BadDate { field: "startDate", .. }));
        assert_eq!(MarketError::from(bad).kind(), "InvalidRange");
    }

    #[test]
    fn listing_form_accepts_numbers_and_numeric_strings() {
        let draft = parse_listing_form(json!({
            "title": "Lake cabin",
            "category": "Cabins",
            "roomCount": "3",
            "bathroomCount": 1,
            "guestCount": 6,
            "location": { "value": "FI" },
            "price": "120"
        }))
        .unwrap();
        assert_eq!(draft.title, "Lake cabin");
        assert_eq!(draft.room_count, 3);
        assert_eq!(draft.bathroom_count, 1);
        assert_eq!(draft.guest_count, 6);
        assert_eq!(draft.location_value, "FI");
        assert_eq!(draft.price_per_night, 120);
        assert_eq!(draft.description, "");
    }

    #[test]
    fn listing_form_rejects_garbage_and_missing_fields() {
        let garbage = parse_listing_form(json!({
            "category": "Cabins", "roomCount": "abc", "bathroomCount": 1,
            "guestCount": 1, "price": 10
        }));
        assert!(matches!(garbage, Err(ParamError::BadNumber { field: "roomCount", .. })));

        let negative = parse_listing_form(json!({
            "category": "Cabins", "roomCount": -2, "bathroomCount": 1,
            "guestCount": 1, "price": 10
        }));
        assert!(matches!(negative, Err(ParamError::BadNumber { field: "roomCount", .. })));

        let missing = parse_listing_form(json!({ "category": "Cabins" }));
        assert!(matches!(missing, Err(ParamError::Missing(_))));

        let wrong_shape = parse_listing_form(json!("a cabin"));
        assert!(matches!(wrong_shape, Err(ParamError::Form(_))));
    }

    #[test]
    fn patch_keeps_absent_fields_unset() {
        let patch = parse_listing_patch(json!({ "price": 99, "location": { "value": "NO" } })).unwrap();
        assert_eq!(
            patch,
            ListingPatch {
                price_per_night: Some(99),
                location_value: Some("NO".into()),
                ..ListingPatch::default()
            }
        );
    }

    #[test]
    fn bad_id_reads_as_not_found() {
        let err = parse_id("not-a-ulid").unwrap_err();
        assert_eq!(MarketError::from(err).kind(), "NotFound");
        let id = Ulid::new();
        assert_eq!(parse_id(&id.to_string()).unwrap(), id);
    }
}
