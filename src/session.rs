//! Session object compatible with express-session

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Cookie metadata carried inside a session, in express-session's `toJSON` form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCookie {
    /// Original max age in milliseconds (as set initially)
    pub original_max_age: Option<i64>,

    /// Expiration time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,

    /// Secure flag
    #[serde(default)]
    pub secure: bool,

    /// HttpOnly flag
    #[serde(default = "default_http_only")]
    pub http_only: bool,

    /// Cookie path
    #[serde(default = "default_path")]
    pub path: String,

    /// Cookie domain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    /// SameSite attribute
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
}

fn default_http_only() -> bool {
    true
}

fn default_path() -> String {
    "/".to_string()
}

impl Default for SessionCookie {
    fn default() -> Self {
        Self {
            original_max_age: None,
            expires: None,
            secure: false,
            http_only: true,
            path: "/".to_string(),
            domain: None,
            same_site: None,
        }
    }
}

impl SessionCookie {
    /// Create a cookie expiring `max_age_secs` from now
    pub fn new(max_age_secs: u64) -> Self {
        let secs = i64::try_from(max_age_secs).unwrap_or(i64::MAX);
        let max_age_ms = secs.saturating_mul(1000);
        let expires = chrono::Duration::try_seconds(secs)
            .and_then(|age| Utc::now().checked_add_signed(age))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        Self {
            original_max_age: Some(max_age_ms),
            expires: Some(expires),
            ..Default::default()
        }
    }

    /// Check if the cookie has expired
    pub fn is_expired(&self) -> bool {
        match self.expires {
            Some(exp) => exp <= Utc::now(),
            None => false, // No expiry = browser session
        }
    }
}

/// The caller's session object.
///
/// Serialized in the express-session layout: user fields sit next to
/// `cookie` at the top level. `lastModified` is only present when the store
/// runs with lazy touch enabled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    /// Cookie information, absent for cookieless sessions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookie: Option<SessionCookie>,

    /// Last write instant as tracked by a lazy-touch store
    #[serde(
        rename = "lastModified",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub last_modified: Option<DateTime<Utc>>,

    /// Additional session data (flattened at same level as cookie)
    #[serde(flatten)]
    pub data: HashMap<String, Value>,
}

impl SessionData {
    /// Create session data whose cookie expires `max_age_secs` from now
    pub fn new(max_age_secs: u64) -> Self {
        Self {
            cookie: Some(SessionCookie::new(max_age_secs)),
            ..Default::default()
        }
    }

    /// Create session data without cookie metadata
    pub fn without_cookie() -> Self {
        Self::default()
    }

    /// Replace the cookie metadata
    pub fn with_cookie(mut self, cookie: SessionCookie) -> Self {
        self.cookie = Some(cookie);
        self
    }

    /// Expiration instant carried by the cookie, if any
    pub fn cookie_expires(&self) -> Option<DateTime<Utc>> {
        self.cookie.as_ref().and_then(|c| c.expires)
    }

    /// Get a value from session data
    pub fn get<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Option<T> {
        self.data
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Set a value in session data
    pub fn set<T: Serialize>(&mut self, key: &str, value: T) {
        if let Ok(v) = serde_json::to_value(value) {
            self.data.insert(key.to_string(), v);
        }
    }

    /// Remove a value from session data
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }

    /// Check if a key exists
    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Check if session data is empty (no user data)
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_layout_is_flat() {
        let mut data = SessionData::new(10);
        data.set("foo", "bar");

        let value = serde_json::to_value(&data).unwrap();
        assert_eq!(value["foo"], json!("bar"));
        assert_eq!(value["cookie"]["path"], json!("/"));
        assert!(value["cookie"]["expires"].is_string());
        assert!(value.get("lastModified").is_none());
    }

    #[test]
    fn test_cookieless_roundtrip() {
        let value = json!({ "foo": "bar", "baz": { "cow": "moo" }, "num": 2 });
        let data: SessionData = serde_json::from_value(value.clone()).unwrap();
        assert!(data.cookie.is_none());
        assert_eq!(data.get::<i64>("num"), Some(2));
        assert_eq!(serde_json::to_value(&data).unwrap(), value);
    }

    #[test]
    fn test_cookie_huge_max_age_saturates() {
        let cookie = SessionCookie::new(u64::MAX);
        assert_eq!(cookie.original_max_age, Some(i64::MAX));
        assert_eq!(cookie.expires, Some(DateTime::<Utc>::MAX_UTC));
        assert!(!cookie.is_expired());

        let cookie = SessionCookie::new(10_000_000_000_000);
        assert_eq!(cookie.original_max_age, Some(10_000_000_000_000_000));
        assert!(!cookie.is_expired());
    }

    #[test]
    fn test_cookie_expiry() {
        let data = SessionData::new(60);
        assert!(data.cookie_expires().is_some());
        assert!(!data.cookie.as_ref().unwrap().is_expired());

        let stale = SessionCookie {
            expires: Some(Utc::now() - chrono::Duration::seconds(1)),
            ..Default::default()
        };
        assert!(stale.is_expired());
        assert!(!SessionCookie::default().is_expired());
    }
}
