//! Translation Tables
//!
//! Per-backend mapping between the uniform role/mode vocabulary and each
//! backend's native tokens. The forward direction is total: every
//! backend × role and backend × mode cell is a `match` arm, so a missing cell
//! does not compile. The inverse is partial; native states with no uniform
//! equivalent (in-progress sub-states) come back as `None`.
//!
//! | backend    | primary       | secondary      | resync         |
//! |------------|---------------|----------------|----------------|
//! | ceph       | `primary`     | `secondary`    | `resync`       |
//! | trident    | `established` | `reestablished`| `reestablished`|
//! | powerstore | `source`      | `target`       | `reprotect`    |
//!
//! Trident has no distinct resync request; a resync is a re-establish, so
//! `resync` reads back as `secondary`.

use crate::crd::{ReplicationMode, ReplicationRole};
use crate::domain::ports::BackendKind;

/// Native token for a uniform role
pub fn to_backend_state(backend: BackendKind, role: ReplicationRole) -> &'static str {
    use BackendKind::*;
    use ReplicationRole::*;

    match (backend, role) {
        (Ceph, Primary) => "primary",
        (Ceph, Secondary) => "secondary",
        (Ceph, Resync) => "resync",

        (Trident, Primary) => "established",
        (Trident, Secondary) => "reestablished",
        (Trident, Resync) => "reestablished",

        (PowerStore, Primary) => "source",
        (PowerStore, Secondary) => "target",
        (PowerStore, Resync) => "reprotect",
    }
}

/// Uniform role for a native state, case-insensitive.
///
/// Returns `None` for states with no uniform equivalent.
pub fn from_backend_state(backend: BackendKind, native: &str) -> Option<ReplicationRole> {
    let native = native.trim().to_lowercase();

    // Status-only aliases checked before the forward table
    let alias = match (backend, native.as_str()) {
        (BackendKind::Trident, "promoted") => Some(ReplicationRole::Primary),
        (BackendKind::Ceph, "resyncing") => Some(ReplicationRole::Resync),
        _ => None,
    };
    if alias.is_some() {
        return alias;
    }

    ReplicationRole::ALL
        .into_iter()
        .find(|role| to_backend_state(backend, *role) == native)
}

/// Whether a role survives `to_backend_state` then `from_backend_state`
pub fn is_round_trippable(backend: BackendKind, role: ReplicationRole) -> bool {
    !matches!((backend, role), (BackendKind::Trident, ReplicationRole::Resync))
}

/// Native token for a uniform consistency mode
pub fn to_backend_mode(backend: BackendKind, mode: ReplicationMode) -> &'static str {
    use BackendKind::*;
    use ReplicationMode::*;

    match (backend, mode) {
        (Ceph, Synchronous) => "journal",
        (Ceph, Asynchronous) => "snapshot",
        (Ceph, Eventual) => "snapshot",

        (Trident, Synchronous) => "Sync",
        (Trident, Asynchronous) => "MirrorAllSnapshots",
        (Trident, Eventual) => "MirrorLatest",

        (PowerStore, Synchronous) => "SYNC",
        (PowerStore, Asynchronous) => "ASYNC",
        (PowerStore, Eventual) => "ASYNC",
    }
}

/// Uniform mode for a native mode token, case-insensitive
pub fn from_backend_mode(backend: BackendKind, native: &str) -> Option<ReplicationMode> {
    ReplicationMode::ALL
        .into_iter()
        .find(|mode| to_backend_mode(backend, *mode).eq_ignore_ascii_case(native.trim()))
}
