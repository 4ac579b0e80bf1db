//! Compact rotation metadata for stores that cannot hold tags.
//!
//! Some stores (Azure DevOps service connections) only offer a free-text
//! description field, so the expiry and next rotation dates are written there as
//! `expires-on:YYYY-MM-DD;next-rotation-on:YYYY-MM-DD`.

use chrono::NaiveDate;

const EXPIRES_ON: &str = "expires-on";
const NEXT_ROTATION_ON: &str = "next-rotation-on";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Renders the expiry and next rotation dates as a magic string.
#[must_use]
pub fn create_magic_string(expires_on: NaiveDate, next_rotation_on: NaiveDate) -> String {
    format!(
        "{EXPIRES_ON}:{};{NEXT_ROTATION_ON}:{}",
        expires_on.format(DATE_FORMAT),
        next_rotation_on.format(DATE_FORMAT)
    )
}

/// Parses a magic string into `(expires_on, next_rotation_on)`.
///
/// Returns `None` for anything that is not exactly the shape produced by
/// [`create_magic_string`].
#[must_use]
pub fn parse_magic_string(raw: &str) -> Option<(NaiveDate, NaiveDate)> {
    let (expires, next) = raw.trim().split_once(';')?;
    let expires = parse_field(expires, EXPIRES_ON)?;
    let next = parse_field(next, NEXT_ROTATION_ON)?;
    Some((expires, next))
}

fn parse_field(field: &str, expected_name: &str) -> Option<NaiveDate> {
    let (name, value) = field.split_once(':')?;
    if name != expected_name || value.len() != 10 {
        return None;
    }
    NaiveDate::parse_from_str(value, DATE_FORMAT).ok()
}
