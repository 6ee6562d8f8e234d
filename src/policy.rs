//! Expiration and lazy-touch policy

use chrono::{DateTime, Duration, Utc};

use crate::session::SessionData;

/// Decides expiry instants and whether a touch refreshes `lastModified`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlPolicy {
    ttl: Duration,
    touch_after: Duration,
}

impl TtlPolicy {
    /// Out-of-range values saturate at the largest representable duration
    pub fn new(ttl_secs: u64, touch_after_secs: u64) -> Self {
        Self {
            ttl: saturating_seconds(ttl_secs),
            touch_after: saturating_seconds(touch_after_secs),
        }
    }

    /// Cookie expiry when present, `now + ttl` otherwise
    pub fn expires_for(&self, session: &SessionData, now: DateTime<Utc>) -> DateTime<Utc> {
        session.cookie_expires().unwrap_or_else(|| {
            now.checked_add_signed(self.ttl)
                .unwrap_or(DateTime::<Utc>::MAX_UTC)
        })
    }

    pub fn lazy_touch_enabled(&self) -> bool {
        self.touch_after > Duration::zero()
    }

    /// Whether a touch at `now` should rewrite `lastModified`.
    ///
    /// An unknown previous write is treated as stale.
    pub fn should_refresh_last_modified(
        &self,
        last_modified: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> bool {
        if !self.lazy_touch_enabled() {
            return false;
        }
        match last_modified {
            Some(last) => now - last >= self.touch_after,
            None => true,
        }
    }

    /// A record expiring at or before `now` is dead
    pub fn is_expired(expires: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        matches!(expires, Some(at) if at <= now)
    }
}

fn saturating_seconds(secs: u64) -> Duration {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionCookie;

    #[test]
    fn test_expires_from_ttl() {
        let policy = TtlPolicy::new(10, 0);
        let now = Utc::now();
        let session = SessionData::without_cookie();
        assert_eq!(policy.expires_for(&session, now), now + Duration::seconds(10));
    }

    #[test]
    fn test_expires_from_cookie() {
        let policy = TtlPolicy::new(10, 0);
        let now = Utc::now();
        let at = now + Duration::hours(3);
        let session = SessionData::without_cookie().with_cookie(SessionCookie {
            expires: Some(at),
            ..Default::default()
        });
        assert_eq!(policy.expires_for(&session, now), at);

        // A cookie without expiry is a browser-session cookie
        let session = SessionData::without_cookie().with_cookie(SessionCookie::default());
        assert_eq!(policy.expires_for(&session, now), now + Duration::seconds(10));
    }

    #[test]
    fn test_lazy_touch_threshold() {
        let policy = TtlPolicy::new(10, 2);
        let now = Utc::now();

        assert!(policy.lazy_touch_enabled());
        assert!(policy.should_refresh_last_modified(None, now));
        assert!(!policy.should_refresh_last_modified(Some(now - Duration::seconds(1)), now));
        assert!(policy.should_refresh_last_modified(Some(now - Duration::seconds(2)), now));
        assert!(policy.should_refresh_last_modified(Some(now - Duration::seconds(5)), now));
    }

    #[test]
    fn test_lazy_touch_disabled() {
        let policy = TtlPolicy::new(10, 0);
        assert!(!policy.lazy_touch_enabled());
        assert!(!policy.should_refresh_last_modified(None, Utc::now()));
    }

    #[test]
    fn test_huge_ttl_saturates() {
        let now = Utc::now();
        let session = SessionData::without_cookie();

        for ttl in [u64::MAX, 10_000_000_000_000_000, 10_000_000_000_000] {
            let expires = TtlPolicy::new(ttl, 0).expires_for(&session, now);
            assert!(expires > now);
            assert!(!TtlPolicy::is_expired(Some(expires), now));
        }

        let policy = TtlPolicy::new(10, u64::MAX);
        assert!(policy.lazy_touch_enabled());
        assert!(!policy.should_refresh_last_modified(Some(now - Duration::days(365)), now));
    }

    #[test]
    fn test_is_expired() {
        let now = Utc::now();
        assert!(TtlPolicy::is_expired(Some(now), now));
        assert!(TtlPolicy::is_expired(Some(now - Duration::seconds(1)), now));
        assert!(!TtlPolicy::is_expired(Some(now + Duration::seconds(1)), now));
        assert!(!TtlPolicy::is_expired(None, now));
    }
}
