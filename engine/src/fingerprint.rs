//! Collection fingerprints for cheap change detection.
//!
//! A fingerprint is the ordered list of `(id, status)` pairs of a snapshot,
//! rendered as `len#id:status|len#id:status|...` where `len` is the byte
//! length of the id, so ids containing `#`, `:` or `|` cannot collide.
//! Status keys are plain tokens without `|`. Two snapshots with equal
//! fingerprints are treated as unchanged by the polling path, even if fields
//! outside `(id, status)` differ.

use crate::record::Entity;
use std::fmt;

/// Signature of a snapshot. Only used for comparison, never displayed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the fingerprint of a snapshot, in snapshot order.
pub fn fingerprint<T: Entity>(records: &[T]) -> Fingerprint {
    let mut out = String::with_capacity(records.len() * 16);
    for (i, record) in records.iter().enumerate() {
        if i > 0 {
            out.push('|');
        }
        out.push_str(&record.id().len().to_string());
        out.push('#');
        out.push_str(record.id());
        out.push(':');
        out.push_str(record.status_key());
    }
    Fingerprint(out)
}

/// Remembers the last fingerprint that produced a notification.
#[derive(Debug, Clone, Default)]
pub struct FingerprintGate {
    last: Option<Fingerprint>,
}

impl FingerprintGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` (and remembers `candidate`) when it differs from the
    /// last notified fingerprint.
    pub fn admit(&mut self, candidate: Fingerprint) -> bool {
        if self.last.as_ref() == Some(&candidate) {
            return false;
        }
        self.last = Some(candidate);
        true
    }

    /// Record a fingerprint notified through another path.
    pub fn record(&mut self, fingerprint: Fingerprint) {
        self.last = Some(fingerprint);
    }

    pub fn last(&self) -> Option<&Fingerprint> {
        self.last.as_ref()
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}
