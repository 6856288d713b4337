use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Resolved results archive for one remote file id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CachedResult {
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CachedResult {
    pub fn new(url: String, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            url,
            created_at: now,
            expires_at: now
                .checked_add_signed(ttl)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflowing_ttl_saturates() {
        let entry = CachedResult::new("https://zip".into(), Duration::MAX);
        assert_eq!(entry.expires_at, DateTime::<Utc>::MAX_UTC);
        assert!(!entry.is_expired_at(Utc::now()));
    }

    #[test]
    fn expires_after_ttl() {
        let entry = CachedResult::new("https://zip".into(), Duration::seconds(60));
        assert!(!entry.is_expired_at(entry.created_at));
        assert!(entry.is_expired_at(entry.created_at + Duration::seconds(60)));
    }
}
