//! Persisted key layout for one record-type namespace.
//!
//! ```text
//! <type>/last_version          counter incremented for every write
//! <type>/record/<id>           encoded Record envelope
//! <type>/version/<version>     index entry; value is the record id
//! <type>/changes               pub/sub channel carrying new versions
//! ```
//!
//! Version tokens are fixed width, so a range scan over the
//! `<type>/version/` prefix visits writes in version order.

use databroker_core::Version;

/// Sorts immediately after every ASCII digit.
const AFTER_DIGITS: char = ':';

/// Key builder for a single record type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLayout {
    record_type: String,
    version_prefix: String,
}

impl KeyLayout {
    /// Creates the layout for `record_type`.
    #[must_use]
    pub fn new(record_type: &str) -> Self {
        Self {
            record_type: record_type.to_string(),
            version_prefix: format!("{record_type}/version/"),
        }
    }

    /// The namespace this layout partitions.
    #[must_use]
    pub fn record_type(&self) -> &str {
        &self.record_type
    }

    /// Key of the namespace's version counter.
    #[must_use]
    pub fn counter_key(&self) -> String {
        format!("{}/last_version", self.record_type)
    }

    /// Key holding the record stored under `id`.
    #[must_use]
    pub fn record_key(&self, id: &str) -> String {
        format!("{}/record/{id}", self.record_type)
    }

    /// Index key for a record written at `version`.
    #[must_use]
    pub fn version_key(&self, version: Version) -> String {
        format!("{}{version}", self.version_prefix)
    }

    /// Pub/sub channel announcing writes to this namespace.
    #[must_use]
    pub fn changes_channel(&self) -> String {
        format!("{}/changes", self.record_type)
    }

    /// Half-open scan bounds covering index entries with version `> since`.
    #[must_use]
    pub fn versions_after(&self, since: Version) -> (String, String) {
        let mut from = self.version_key(since);
        // The NUL suffix sorts after `since` itself but before its successor.
        from.push('\0');
        let mut to = self.version_prefix.clone();
        to.push(AFTER_DIGITS);
        (from, to)
    }

    /// Extracts the version from an index key, if it is one of ours.
    #[must_use]
    pub fn parse_version_key(&self, key: &str) -> Option<Version> {
        key.strip_prefix(&self.version_prefix)?.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(n: i64) -> Version {
        Version::from_counter(n).unwrap()
    }

    #[test]
    fn keys_are_namespaced() {
        let layout = KeyLayout::new("session");
        assert_eq!(layout.counter_key(), "session/last_version");
        assert_eq!(layout.record_key("abc"), "session/record/abc");
        assert_eq!(layout.version_key(v(5)), "session/version/000000000005");
        assert_eq!(layout.changes_channel(), "session/changes");
    }

    #[test]
    fn versions_after_excludes_since_and_includes_successor() {
        let layout = KeyLayout::new("t");
        let (from, to) = layout.versions_after(v(5));

        let at = layout.version_key(v(5));
        let next = layout.version_key(v(6));
        let last = layout.version_key(Version::MAX);

        assert!(at.as_str() < from.as_str());
        assert!(from.as_str() <= next.as_str());
        assert!(last.as_str() < to.as_str());
    }

    #[test]
    fn versions_after_zero_covers_first_version() {
        let layout = KeyLayout::new("t");
        let (from, _) = layout.versions_after(Version::ZERO);
        assert!(from.as_str() <= layout.version_key(v(1)).as_str());
    }

    #[test]
    fn range_does_not_leak_into_other_namespaces() {
        let a = KeyLayout::new("user");
        let b = KeyLayout::new("user_group");
        let (_, to) = a.versions_after(Version::ZERO);
        let other = b.version_key(v(1));
        // Either the other namespace sorts past the end bound, or before the start.
        let (from, _) = a.versions_after(Version::ZERO);
        assert!(other.as_str() >= to.as_str() || other.as_str() < from.as_str());
        assert!(a.parse_version_key(&other).is_none());
    }

    #[test]
    fn parse_version_key_round_trips_layout() {
        let layout = KeyLayout::new("t");
        let key = layout.version_key(v(123));
        assert_eq!(layout.parse_version_key(&key), Some(v(123)));
        assert_eq!(layout.parse_version_key("t/record/x"), None);
        assert_eq!(layout.parse_version_key("t/version/12"), None);
    }
}
