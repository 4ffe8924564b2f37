//! Freshness metadata for short-lived entries.
//!
//! Entries in the api-short-cache store are stamped with `fetched_at` and
//! `expires_at` when written. Eviction is lazy: freshness is only evaluated
//! when a store read follows a network failure.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::request::ResponseSnapshot;

/// Default lifetime of an api-short-cache entry
pub const DEFAULT_API_TTL_SECS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Freshness {
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub response: ResponseSnapshot,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub freshness: Option<Freshness>,
    pub stored_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, response: ResponseSnapshot, now: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            response,
            freshness: None,
            stored_at: now,
        }
    }
}

/// Stamp `fetched_at = now` and `expires_at = now + ttl` on an entry.
/// A ttl that overflows the calendar leaves the entry unstamped, so never fresh.
pub fn attach_freshness(mut entry: CacheEntry, ttl_secs: i64, now: DateTime<Utc>) -> CacheEntry {
    let expires_at = Duration::try_seconds(ttl_secs).and_then(|ttl| now.checked_add_signed(ttl));
    match expires_at {
        Some(expires_at) => {
            entry.freshness = Some(Freshness {
                fetched_at: now,
                expires_at,
            })
        }
        None => warn!(key = %entry.key, ttl_secs, "Freshness ttl out of range, entry left unstamped"),
    }
    entry
}

/// An entry without freshness metadata is never fresh.
pub fn is_fresh(entry: &CacheEntry, now: DateTime<Utc>) -> bool {
    entry
        .freshness
        .map(|f| now < f.expires_at)
        .unwrap_or(false)
}

/// Human readable age, e.g. "just now", "5m ago", "2h ago", "3d ago".
pub fn age_display(minutes: i64) -> String {
    if minutes < 1 {
        // Negative ages come from clock skew
        "just now".to_string()
    } else if minutes < 60 {
        format!("{}m ago", minutes)
    } else if minutes < 1440 {
        let hours = minutes / 60;
        if minutes % 60 >= 30 {
            format!("{}h ago", hours + 1)
        } else {
            format!("{}h ago", hours)
        }
    } else {
        let days = minutes / 1440;
        if (minutes % 1440) / 60 >= 12 {
            format!("{}d ago", days + 1)
        } else {
            format!("{}d ago", days)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(now: DateTime<Utc>) -> CacheEntry {
        CacheEntry::new("GET https://api.example.com/rest/v1/items", ResponseSnapshot::new(200, "[]"), now)
    }

    #[test]
    fn test_attach_freshness_stamps_both_timestamps() {
        let now = Utc::now();
        let stamped = attach_freshness(entry(now), 60, now);
        let f = stamped.freshness.unwrap();
        assert_eq!(f.fetched_at, now);
        assert_eq!(f.expires_at, now + Duration::seconds(60));
    }

    #[test]
    fn test_fresh_until_expiry_boundary() {
        let now = Utc::now();
        let stamped = attach_freshness(entry(now), 60, now);
        assert!(is_fresh(&stamped, now + Duration::seconds(59)));
        // now < expires_at is strict
        assert!(!is_fresh(&stamped, now + Duration::seconds(60)));
        assert!(!is_fresh(&stamped, now + Duration::seconds(61)));
    }

    #[test]
    fn test_out_of_range_ttl_leaves_entry_unstamped() {
        let now = Utc::now();
        let stamped = attach_freshness(entry(now), i64::MAX, now);
        assert_eq!(stamped.freshness, None);
        assert!(!is_fresh(&stamped, now));
    }

    #[test]
    fn test_entry_without_metadata_is_not_fresh() {
        let now = Utc::now();
        assert!(!is_fresh(&entry(now), now));
    }

    #[test]
    fn test_age_display() {
        assert_eq!(age_display(-5), "just now");
        assert_eq!(age_display(0), "just now");
        assert_eq!(age_display(5), "5m ago");
        assert_eq!(age_display(90), "2h ago");
        assert_eq!(age_display(70), "1h ago");
        assert_eq!(age_display(1440 + 13 * 60), "2d ago");
        assert_eq!(age_display(3 * 1440), "3d ago");
    }

    #[test]
    fn test_freshness_survives_serialization() {
        let now = Utc::now();
        let stamped = attach_freshness(entry(now), 60, now);
        let json = serde_json::to_string(&stamped).unwrap();
        let back: CacheEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, stamped);
    }
}
