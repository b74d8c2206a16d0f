//! Input validation utilities

use regex::Regex;
use once_cell::sync::Lazy;

use crate::models::TOKEN_LENGTH;

/// Shape of a presented magic-link token
static ACCESS_TOKEN_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9]+$").unwrap()
});

/// Regex for validating tenant slugs
static SLUG_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9][a-z0-9-]*$").unwrap()
});

/// Cheap syntactic check run before a token is looked up.
///
/// Malformed values still count as validation attempts; this only avoids a
/// store round-trip for them.
pub fn is_well_formed_token(token: &str) -> bool {
    (TOKEN_LENGTH..=256).contains(&token.len()) && ACCESS_TOKEN_REGEX.is_match(token)
}

/// Validate a tenant slug
pub fn validate_slug(slug: &str) -> bool {
    !slug.is_empty() && slug.len() <= 100 && SLUG_REGEX.is_match(slug)
}
