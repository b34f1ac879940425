use serde::{Serialize, Serializer};
use std::fmt;


/// Canonical join key derived from a hostname.
///
/// `Host` holds the uppercased short hostname. `Unmatched` is the sentinel
/// produced for blank hostnames: it never compares equal to a `Host` key and
/// the engine never groups two `Unmatched` records together.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NormalizedKey {
    Host(String),
    Unmatched,
}

impl NormalizedKey {
    /// Key as a string. The sentinel renders as an empty string.
    pub fn as_str(&self) -> &str {
        match self {
            NormalizedKey::Host(h) => h,
            NormalizedKey::Unmatched => "",
        }
    }

    pub fn is_unmatched(&self) -> bool {
        matches!(self, NormalizedKey::Unmatched)
    }
}

impl fmt::Display for NormalizedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NormalizedKey::Host(h) => write!(f, "{}", h),
            NormalizedKey::Unmatched => write!(f, "<unmatched>"),
        }
    }
}

impl Serialize for NormalizedKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Normalizes a hostname into its join key.
///
/// Rules:
/// - surrounding whitespace is trimmed
/// - everything from the first `.` onwards is dropped (`web01.corp.local` → `web01`)
/// - the remaining short name is uppercased
/// - an empty result yields [`NormalizedKey::Unmatched`]
///
/// Never fails, and re-normalizing `key.as_str()` returns the same key.
pub fn normalize(hostname: &str) -> NormalizedKey {
    let trimmed = hostname.trim();
    let short = match trimmed.split_once('.') {
        Some((head, _)) => head.trim(),
        None => trimmed,
    };

    if short.is_empty() {
        NormalizedKey::Unmatched
    } else {
        NormalizedKey::Host(short.to_uppercase())
    }
}
