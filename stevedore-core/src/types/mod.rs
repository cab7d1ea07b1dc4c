//! Core type definitions for Stevedore.

mod ids;

pub use ids::{ManifestId, ManifestKind, UnitId, VirtualAddress};
