//! Session and store configuration in the OS credential store.
//!
//! On Windows this uses DPAPI (via the `keyring` crate), on macOS
//! Keychain, and on Linux the Secret Service API. Holds the document
//! store base URL and API key plus the signed-in user's id and session
//! token. The auth flow itself lives outside this crate; it hands the
//! resulting session to `save_session` after sign-in.

use keyring::Entry;
use serde_json::Value;
use tracing::warn;
use zeroize::Zeroizing;

use crate::errors::ClientError;

const SERVICE_NAME: &str = "bakehouse-storefront";

// Credential keys
const KEY_STORE_URL: &str = "store_url";
const KEY_STORE_API_KEY: &str = "store_api_key";
const KEY_USER_ID: &str = "user_id";
const KEY_SESSION_TOKEN: &str = "session_token";

/// All credential keys managed by this module.
const ALL_KEYS: &[&str] = &[KEY_STORE_URL, KEY_STORE_API_KEY, KEY_USER_ID, KEY_SESSION_TOKEN];

// ---------------------------------------------------------------------------
// Low-level helpers
// ---------------------------------------------------------------------------

/// Retrieve a single credential from the OS keyring. Returns `None` when
/// the entry does not exist (or the platform returns a "not found" error).
pub fn get_credential(key: &str) -> Option<String> {
    let entry = match Entry::new(SERVICE_NAME, key) {
        Ok(e) => e,
        Err(e) => {
            warn!(key, error = %e, "keyring: failed to create entry");
            return None;
        }
    };
    match entry.get_password() {
        Ok(pw) => Some(pw),
        Err(keyring::Error::NoEntry) => None,
        Err(e) => {
            warn!(key, error = %e, "keyring: failed to read credential");
            None
        }
    }
}

/// Store a credential in the OS keyring.
pub fn set_credential(key: &str, value: &str) -> Result<(), ClientError> {
    let entry = Entry::new(SERVICE_NAME, key)
        .map_err(|e| ClientError::TransientWrite(format!("keyring: {e}")))?;
    entry
        .set_password(value)
        .map_err(|e| ClientError::TransientWrite(format!("keyring: {e}")))?;
    Ok(())
}

/// Delete a credential from the OS keyring. Silently succeeds if the
/// entry does not exist.
pub fn delete_credential(key: &str) -> Result<(), ClientError> {
    let entry = Entry::new(SERVICE_NAME, key)
        .map_err(|e| ClientError::TransientWrite(format!("keyring: {e}")))?;
    match entry.delete_credential() {
        Ok(()) => Ok(()),
        Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(ClientError::TransientWrite(format!("keyring: {e}"))),
    }
}

pub fn has_credential(key: &str) -> bool {
    get_credential(key).is_some()
}

// ---------------------------------------------------------------------------
// High-level API
// ---------------------------------------------------------------------------

/// The client is configured when the store URL and API key are present.
pub fn is_configured() -> bool {
    has_credential(KEY_STORE_URL) && has_credential(KEY_STORE_API_KEY)
}

/// Store the document-store endpoint configuration.
pub fn save_store_config(store_url: &str, api_key: &str) -> Result<(), ClientError> {
    let url = store_url.trim();
    let key = api_key.trim();
    if url.is_empty() || key.is_empty() {
        return Err(ClientError::Validation(
            "Store URL and API key are both required".into(),
        ));
    }
    set_credential(KEY_STORE_URL, url)?;
    set_credential(KEY_STORE_API_KEY, key)?;
    Ok(())
}

/// Persist the signed-in user's session after the auth service resolves
/// a sign-in.
pub fn save_session(user_id: &str, session_token: &str) -> Result<(), ClientError> {
    if user_id.trim().is_empty() {
        return Err(ClientError::Validation("Missing user id".into()));
    }
    set_credential(KEY_USER_ID, user_id.trim())?;
    set_credential(KEY_SESSION_TOKEN, session_token)?;
    Ok(())
}

/// The signed-in user's id, or `NotLoggedIn` for user-scoped operations
/// invoked with no session.
pub fn require_user_id() -> Result<String, ClientError> {
    get_credential(KEY_USER_ID)
        .filter(|id| !id.trim().is_empty())
        .ok_or(ClientError::NotLoggedIn)
}

pub fn current_user_id() -> Option<String> {
    get_credential(KEY_USER_ID).filter(|id| !id.trim().is_empty())
}

pub fn session_token() -> Option<String> {
    get_credential(KEY_SESSION_TOKEN)
}

pub fn store_url() -> Option<String> {
    get_credential(KEY_STORE_URL)
}

pub fn store_api_key() -> Option<String> {
    get_credential(KEY_STORE_API_KEY)
}

/// Clear the session. The token is wiped from memory before the keyring
/// entry is removed; the store endpoint config is kept.
pub fn sign_out() -> Result<(), ClientError> {
    if let Some(token) = get_credential(KEY_SESSION_TOKEN) {
        let _wiped = Zeroizing::new(token);
    }
    delete_credential(KEY_SESSION_TOKEN)?;
    delete_credential(KEY_USER_ID)?;
    Ok(())
}

/// Remove every credential this module manages.
pub fn factory_reset() -> Result<(), ClientError> {
    for key in ALL_KEYS {
        delete_credential(key)?;
    }
    Ok(())
}

/// All stored config as a JSON value matching the shape the frontend
/// expects. The session token is never included.
pub fn get_full_config() -> Value {
    serde_json::json!({
        "store_url": get_credential(KEY_STORE_URL),
        "user_id":   get_credential(KEY_USER_ID),
        "configured": is_configured(),
    })
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    // These tests hit the real OS keyring, so they run serially and
    // clean up after themselves.

    #[test]
    #[serial]
    fn test_session_round_trip() {
        let _ = factory_reset();
        assert!(matches!(require_user_id(), Err(ClientError::NotLoggedIn)));

        if save_session("user-777", "tok-abc").is_err() {
            // No keyring backend on this machine (headless CI); nothing
            // further to assert.
            return;
        }
        assert_eq!(require_user_id().unwrap(), "user-777");
        assert_eq!(session_token().as_deref(), Some("tok-abc"));

        sign_out().unwrap();
        assert!(matches!(require_user_id(), Err(ClientError::NotLoggedIn)));
        assert_eq!(session_token(), None);
    }

    #[test]
    #[serial]
    fn test_store_config_validation() {
        assert!(save_store_config("", "key").is_err());
        assert!(save_store_config("https://store.example", "  ").is_err());
    }

    #[test]
    #[serial]
    fn test_factory_reset_clears_everything() {
        if save_store_config("https://store.example", "k1").is_err() {
            return;
        }
        factory_reset().unwrap();
        assert!(!is_configured());
        assert_eq!(current_user_id(), None);
    }
}
