//! User records and directories.
//!
//! A user is created by a successful registration and is identified at
//! authentication time solely by the public key of the presented client
//! certificate. The public key DER is unique across users.
//!
//! # Modules
//!
//! - [`directory`]: the [`UserDirectory`] trait and its in-memory provider
//! - [`file`]: a provider persisting users as one JSON document

pub mod directory;
pub mod file;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

pub use directory::{InMemoryUserDirectory, UserDirectory};
pub use file::FileUserDirectory;

/// Longest accepted display name, in characters.
pub const MAX_DISPLAY_NAME_LEN: usize = 42;

/// A registered user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Stable identifier.
    pub id: Uuid,
    /// DER `SubjectPublicKeyInfo` of the user's certified key.
    #[serde(with = "der_base64")]
    pub public_key_der: Vec<u8>,
    /// Key family (`RSA` or `ECDSA`).
    pub public_key_algorithm: String,
    /// `SHA256:<base64>` fingerprint of `public_key_der`.
    pub key_fingerprint: String,
    /// Free-form name chosen by the user; empty until set.
    #[serde(default)]
    pub display_name: String,
    /// Registration time.
    pub signup: DateTime<Utc>,
    /// First successful authentication.
    #[serde(default)]
    pub login_first: Option<DateTime<Utc>>,
    /// Latest successful authentication.
    #[serde(default)]
    pub login_last: Option<DateTime<Utc>>,
}

impl User {
    /// Record a login at `at`.
    pub(crate) fn record_login(&mut self, at: DateTime<Utc>) {
        self.login_first.get_or_insert(at);
        self.login_last = Some(at);
    }
}

/// Fields supplied by registration.
#[derive(Debug, Clone)]
pub struct NewUser {
    /// DER `SubjectPublicKeyInfo`.
    pub public_key_der: Vec<u8>,
    /// Key family (`RSA` or `ECDSA`).
    pub public_key_algorithm: String,
    /// `SHA256:<base64>` fingerprint.
    pub key_fingerprint: String,
}

impl NewUser {
    pub(crate) fn into_user(self, now: DateTime<Utc>) -> User {
        User {
            id: Uuid::new_v4(),
            public_key_der: self.public_key_der,
            public_key_algorithm: self.public_key_algorithm,
            key_fingerprint: self.key_fingerprint,
            display_name: String::new(),
            signup: now,
            login_first: None,
            login_last: None,
        }
    }
}

/// Client-facing view of a [`User`]; the raw key never leaves the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Identifier.
    pub id: Uuid,
    /// Key fingerprint.
    pub key_fingerprint: String,
    /// Key family.
    pub public_key_algorithm: String,
    /// Display name.
    pub display_name: String,
    /// Registration time.
    pub signup: DateTime<Utc>,
    /// First login, if any.
    pub login_first: Option<DateTime<Utc>>,
    /// Latest login, if any.
    pub login_last: Option<DateTime<Utc>>,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            key_fingerprint: user.key_fingerprint.clone(),
            public_key_algorithm: user.public_key_algorithm.clone(),
            display_name: user.display_name.clone(),
            signup: user.signup,
            login_first: user.login_first,
            login_last: user.login_last,
        }
    }
}

/// Trim and length-check a display name.
///
/// # Errors
///
/// Returns [`Error::InvalidParameter`] if the trimmed name is longer than
/// [`MAX_DISPLAY_NAME_LEN`] characters or contains control characters.
pub fn normalize_display_name(raw: &str) -> Result<String> {
    let name = raw.trim();
    if name.chars().count() > MAX_DISPLAY_NAME_LEN {
        return Err(Error::InvalidParameter {
            name: "display_name",
            reason: format!("longer than {MAX_DISPLAY_NAME_LEN} characters"),
        });
    }
    if name.chars().any(char::is_control) {
        return Err(Error::InvalidParameter {
            name: "display_name",
            reason: "contains control characters".to_string(),
        });
    }
    Ok(name.to_string())
}

mod der_base64 {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(der: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(der))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn new_user() -> NewUser {
        NewUser {
            public_key_der: vec![0x30, 0x59, 0x01],
            public_key_algorithm: "ECDSA".to_string(),
            key_fingerprint: "SHA256:abc".to_string(),
        }
    }

    #[test]
    fn record_login_sets_first_once() {
        // GIVEN: a fresh user
        let mut user = new_user().into_user(Utc::now());
        let first = Utc::now();
        let later = first + chrono::Duration::minutes(5);
        // WHEN: logging in twice
        user.record_login(first);
        user.record_login(later);
        // THEN: first stays, last moves
        assert_eq!(user.login_first, Some(first));
        assert_eq!(user.login_last, Some(later));
    }

    #[test]
    fn profile_omits_public_key() {
        let user = new_user().into_user(Utc::now());
        let json = serde_json::to_value(UserProfile::from(&user)).unwrap();
        assert!(json.get("public_key_der").is_none());
        assert_eq!(json["key_fingerprint"], "SHA256:abc");
        assert!(json["login_first"].is_null());
    }

    #[test]
    fn user_json_round_trips_key_as_base64() {
        let user = new_user().into_user(Utc::now());
        let json = serde_json::to_value(&user).unwrap();
        assert_eq!(json["public_key_der"], "MFkB");
        let back: User = serde_json::from_value(json).unwrap();
        assert_eq!(back, user);
    }

    #[test]
    fn display_name_is_trimmed() {
        assert_eq!(normalize_display_name("  Bob  ").unwrap(), "Bob");
        assert_eq!(normalize_display_name("").unwrap(), "");
    }

    #[test]
    fn display_name_length_counts_characters() {
        let max = "é".repeat(MAX_DISPLAY_NAME_LEN);
        assert_eq!(normalize_display_name(&max).unwrap(), max);

        let err = normalize_display_name(&"x".repeat(MAX_DISPLAY_NAME_LEN + 1)).unwrap_err();
        assert_eq!(err.code(), "parameter_bad");
    }

    #[test]
    fn display_name_rejects_control_characters() {
        assert!(normalize_display_name("bob\u{0}").is_err());
    }
}
