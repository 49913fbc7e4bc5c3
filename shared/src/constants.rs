//! Centralized constants for the racelink protocol.
//!
//! Both roles must agree on these values; a Display and a Controller built
//! from different constants will not find each other.

/// Service identifier used when the game does not supply one.
///
/// Displays only answer probes carrying exactly this string, so bumping the
/// suffix is how incompatible protocol revisions stay invisible to each other.
pub const DEFAULT_SERVICE_ID: &str = "race-v1";

/// Maximum length of a service identifier in bytes.
pub const MAX_SERVICE_ID_LEN: usize = 15;

/// UDP port a Display listens on for probes, invitations and session traffic.
pub const DEFAULT_DISCOVERY_PORT: u16 = 47_820;

/// Maximum length of a peer display name in bytes (UTF-8).
pub const MAX_DISPLAY_NAME_LEN: usize = 63;

/// Returns true if `id` is a usable service identifier.
///
/// Rules:
/// - 1 to [`MAX_SERVICE_ID_LEN`] bytes
/// - only ASCII lowercase letters, digits and hyphens
/// - at least one letter
/// - no leading, trailing or doubled hyphen
pub fn is_valid_service_id(id: &str) -> bool {
    if id.is_empty() || id.len() > MAX_SERVICE_ID_LEN {
        return false;
    }
    if id.starts_with('-') || id.ends_with('-') || id.contains("--") {
        return false;
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return false;
    }
    id.chars().any(|c| c.is_ascii_lowercase())
}
