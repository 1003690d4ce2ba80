//! Persisted key names
//!
//! These names are the wire contract with whatever already sits in the
//! user's storage. Renaming one orphans existing sessions.

/// Serialized [`crate::Session`] blob.
pub const SESSION_KEY: &str = "auth.session";

/// Serialized [`crate::Credentials`] blob.
pub const CREDENTIALS_KEY: &str = "auth.credentials";

/// `"true"` while demo mode is on; absent otherwise.
pub const DEMO_MODE_KEY: &str = "auth.demo_mode";

/// Location older releases stored credentials under. Read once by
/// `CredentialStore::migrate_legacy()` and then removed.
pub const LEGACY_CREDENTIALS_KEY: &str = "oauth_credentials";

/// Substrings marking a key as belonging to auth, matched case-insensitively.
const AUTH_MARKERS: &[&str] = &["token", "credential", "session", "oauth", "user"];

/// Whether a key is owned by auth and must go when the session is torn down.
///
/// Matches the current `auth.` namespace plus anything older schema versions
/// may have left behind. The demo flag is excluded: it has its own lifecycle.
pub fn is_auth_owned(key: &str) -> bool {
    if key == DEMO_MODE_KEY {
        return false;
    }
    if key.starts_with("auth.") {
        return true;
    }
    let lower = key.to_ascii_lowercase();
    AUTH_MARKERS.iter().any(|marker| lower.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_keys_are_auth_owned() {
        assert!(is_auth_owned(SESSION_KEY));
        assert!(is_auth_owned(CREDENTIALS_KEY));
        assert!(is_auth_owned(LEGACY_CREDENTIALS_KEY));
    }

    #[test]
    fn leftover_keys_from_old_schemas_match() {
        assert!(is_auth_owned("spotify_access_token"));
        assert!(is_auth_owned("Spotify_User_Profile"));
        assert!(is_auth_owned("sessionExpiry"));
        assert!(is_auth_owned("auth.anything_new"));
    }

    #[test]
    fn demo_flag_and_unrelated_keys_survive() {
        assert!(!is_auth_owned(DEMO_MODE_KEY));
        assert!(!is_auth_owned("theme"));
        assert!(!is_auth_owned("chart.time_range"));
    }
}
