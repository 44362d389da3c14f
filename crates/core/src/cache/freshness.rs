//! Staleness decisions.
//!
//! The upstream store issues a new URL whenever the underlying object
//! changes, so a URL mismatch is the primary staleness signal. A caller that
//! knows the object's modification time can supply it as a second signal.

use chrono::{DateTime, Utc};

use super::types::MetadataRecord;

/// Decide whether a cached entry must be refetched.
///
/// Stale when there is no record, when the record was fetched from a
/// different URL, or when `last_modified` is later than the fetch time.
pub fn is_stale(record: Option<&MetadataRecord>, current_url: &str, last_modified: Option<DateTime<Utc>>) -> bool {
    let Some(record) = record else {
        return true;
    };

    if record.remote_url != current_url {
        tracing::debug!(cached = %record.remote_url, current = %current_url, "upstream pointer changed");
        return true;
    }

    matches!(last_modified, Some(modified) if modified > record.fetched_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::types::BlobFormat;
    use chrono::Duration;

    fn record(url: &str, fetched_at: DateTime<Utc>) -> MetadataRecord {
        MetadataRecord { remote_url: url.to_string(), fetched_at, format: BlobFormat::Lossy, size: 1 }
    }

    #[test]
    fn test_missing_record_is_stale() {
        assert!(is_stale(None, "https://cdn.example.com/a.jpg", None));
    }

    #[test]
    fn test_same_url_is_fresh() {
        let rec = record("https://cdn.example.com/a.jpg?token=v1", Utc::now());
        assert!(!is_stale(Some(&rec), "https://cdn.example.com/a.jpg?token=v1", None));
    }

    #[test]
    fn test_changed_url_is_stale() {
        let rec = record("https://cdn.example.com/a.jpg?token=v1", Utc::now());
        assert!(is_stale(Some(&rec), "https://cdn.example.com/a.jpg?token=v2", None));
    }

    #[test]
    fn test_last_modified_after_fetch_is_stale() {
        let fetched = Utc::now() - Duration::hours(2);
        let rec = record("u", fetched);

        assert!(is_stale(Some(&rec), "u", Some(fetched + Duration::minutes(1))));
        assert!(!is_stale(Some(&rec), "u", Some(fetched - Duration::minutes(1))));
        assert!(!is_stale(Some(&rec), "u", Some(fetched)));
    }
}
