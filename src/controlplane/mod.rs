//! Replication Control Plane
//!
//! Backend classification, vocabulary translation, and the per-backend
//! adapters that materialize replication intent as backend-native objects.

pub mod backends;
pub mod classifier;
pub mod registry;
pub mod translation;

pub use backends::*;
pub use classifier::classify;
pub use registry::AdapterRegistry;
