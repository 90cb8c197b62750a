//! Backend Classifier
//!
//! Maps a provisioner string from a replication class to the backend that
//! serves it. Matching is a case-insensitive substring search over a fixed,
//! ordered rule table; the first matching rule wins.

use crate::domain::ports::BackendKind;
use crate::error::{Error, Result};
use tracing::debug;

/// A classification rule: any of the substrings selects the backend
#[derive(Debug, Clone, Copy)]
pub struct ClassificationRule {
    pub backend: BackendKind,
    /// Lowercase substrings; the first entry is the canonical CSI driver name
    pub patterns: &'static [&'static str],
}

/// Ordered rule table.
///
/// No pattern may be a substring of a pattern belonging to another backend;
/// `test_rule_patterns_are_disjoint` checks this.
pub const RULES: &[ClassificationRule] = &[
    ClassificationRule {
        backend: BackendKind::Ceph,
        patterns: &["rbd.csi.ceph.com", "cephfs.csi.ceph.com", "ceph", "rook"],
    },
    ClassificationRule {
        backend: BackendKind::Trident,
        patterns: &["csi.trident.netapp.io", "trident", "netapp", "ontap"],
    },
    ClassificationRule {
        backend: BackendKind::PowerStore,
        patterns: &["csi-powerstore.dellemc.com", "powerstore", "dellemc"],
    },
];

/// Classify a provisioner string.
///
/// An unmatched provisioner is an error carrying the offending string; there
/// is no default backend.
pub fn classify(provisioner: &str) -> Result<BackendKind> {
    let needle = provisioner.trim().to_lowercase();

    if !needle.is_empty() {
        for rule in RULES {
            if rule.patterns.iter().any(|p| needle.contains(p)) {
                debug!("Classified provisioner {} as {}", provisioner, rule.backend);
                return Ok(rule.backend);
            }
        }
    }

    Err(Error::UnknownBackend {
        provisioner: provisioner.to_string(),
    })
}
