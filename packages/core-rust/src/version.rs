//! Fixed-width version tokens.
//!
//! Every write to a record-type namespace is stamped with a [`Version`]
//! drawn from a shared counter. Versions render as zero-padded decimal
//! strings of [`VERSION_WIDTH`] digits so that the lexicographic order of
//! the rendered token equals the numeric order of the counter. Key-value
//! backends that only offer byte-ordered range scans rely on this.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Number of decimal digits in a rendered version token.
pub const VERSION_WIDTH: usize = 12;

/// Errors produced when building or parsing a [`Version`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionError {
    /// The counter value does not fit in [`VERSION_WIDTH`] digits.
    #[error("version counter {0} exceeds the 12-digit token width")]
    Overflow(i64),
    /// The counter value is zero or negative.
    #[error("version counter {0} is not positive")]
    NotPositive(i64),
    /// The token is not a decimal number of the expected width.
    #[error("malformed version token {0:?}")]
    Malformed(String),
}

/// A monotonic, lexicographically sortable version token.
///
/// `Version::ZERO` is the cursor meaning "before every write"; real writes
/// always carry a version of at least 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Version(u64);

impl Version {
    /// The minimum token. Never assigned to a write.
    pub const ZERO: Self = Self(0);

    /// The largest counter value that renders within [`VERSION_WIDTH`] digits.
    pub const MAX: Self = Self(999_999_999_999);

    /// Builds a version from a raw counter returned by an atomic increment.
    ///
    /// # Errors
    ///
    /// Returns [`VersionError::NotPositive`] for counters `<= 0` and
    /// [`VersionError::Overflow`] for counters wider than the token.
    pub fn from_counter(counter: i64) -> Result<Self, VersionError> {
        let value = u64::try_from(counter).map_err(|_| VersionError::NotPositive(counter))?;
        if value == 0 {
            return Err(VersionError::NotPositive(counter));
        }
        if value > Self::MAX.0 {
            return Err(VersionError::Overflow(counter));
        }
        Ok(Self(value))
    }

    /// Parses a listing cursor. The empty string means [`Version::ZERO`].
    ///
    /// # Errors
    ///
    /// Returns [`VersionError::Malformed`] if `cursor` is non-empty and not a
    /// valid token.
    pub fn parse_cursor(cursor: &str) -> Result<Self, VersionError> {
        if cursor.is_empty() {
            Ok(Self::ZERO)
        } else {
            cursor.parse()
        }
    }

    /// The numeric counter value.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:0width$}", self.0, width = VERSION_WIDTH)
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != VERSION_WIDTH || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(VersionError::Malformed(s.to_string()));
        }
        s.parse::<u64>()
            .map(Self)
            .map_err(|_| VersionError::Malformed(s.to_string()))
    }
}

// Serialized as the rendered token so stored envelopes carry the same
// string callers see.
impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let token = String::deserialize(deserializer)?;
        token.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn first_version_renders_zero_padded() {
        let v = Version::from_counter(1).unwrap();
        assert_eq!(v.to_string(), "000000000001");
    }

    #[test]
    fn max_version_fills_width() {
        assert_eq!(Version::MAX.to_string(), "999999999999");
        assert_eq!(Version::MAX.to_string().len(), VERSION_WIDTH);
    }

    #[test]
    fn counter_past_width_overflows() {
        assert_eq!(
            Version::from_counter(1_000_000_000_000),
            Err(VersionError::Overflow(1_000_000_000_000))
        );
    }

    #[test]
    fn non_positive_counters_rejected() {
        assert_eq!(Version::from_counter(0), Err(VersionError::NotPositive(0)));
        assert_eq!(Version::from_counter(-3), Err(VersionError::NotPositive(-3)));
    }

    #[test]
    fn empty_cursor_is_zero() {
        assert_eq!(Version::parse_cursor("").unwrap(), Version::ZERO);
        assert_eq!(
            Version::parse_cursor("000000000000").unwrap(),
            Version::ZERO
        );
    }

    #[test]
    fn malformed_tokens_rejected() {
        for bad in ["5", "00000000000a", "+00000000001", "0000000000001", " 00000000001"] {
            assert!(
                matches!(bad.parse::<Version>(), Err(VersionError::Malformed(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn serde_uses_rendered_token() {
        let v = Version::from_counter(42).unwrap();
        let bytes = rmp_serde::to_vec(&v).unwrap();
        let token: String = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(token, "000000000042");
    }

    proptest! {
        #[test]
        fn string_order_matches_numeric_order(a in 1_i64..=999_999_999_999, b in 1_i64..=999_999_999_999) {
            let va = Version::from_counter(a).unwrap();
            let vb = Version::from_counter(b).unwrap();
            prop_assert_eq!(va.to_string().cmp(&vb.to_string()), a.cmp(&b));
            prop_assert_eq!(va.cmp(&vb), a.cmp(&b));
        }
    }
}
