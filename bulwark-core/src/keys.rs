//! Counter scope keys.
//!
//! The identity key depends on the username alone so that rotating the source
//! address cannot reset it. The composite key adds the origin so one noisy
//! address does not exhaust another address's allowance.

/// Origin used when the caller could not determine a remote address.
pub const UNKNOWN_ORIGIN: &str = "unknown";

/// Normalize a username into the origin-independent identity key.
pub fn identity_key(username: Option<&str>) -> String {
    username.unwrap_or_default().trim().to_lowercase()
}

/// Build the `identity|origin` key used by the Throttle Gate.
pub fn composite_key(username: Option<&str>, origin: Option<&str>) -> String {
    let origin = origin.map(str::trim).filter(|o| !o.is_empty());
    format!(
        "{}|{}",
        identity_key(username),
        origin.unwrap_or(UNKNOWN_ORIGIN)
    )
}
