//! Scan finding entities persisted by the object tree.
//!
//! # Responsibility
//! - Define the typed tree: application -> resources -> packages ->
//!   vulnerabilities, plus CIS Docker benchmark checks on resources.
//! - Provide stable identity helpers for callers that build trees from
//!   scanner output.
//!
//! # Invariants
//! - Every entity carries a caller-assigned primary key; the store never
//!   generates identity.
//! - A child collection is the complete desired membership of its relation
//!   when the tree is submitted.

pub mod application;
pub mod cis_check;
pub mod package;
pub mod quick_scan_config;
pub mod resource;
pub mod vulnerability;

use uuid::Uuid;

/// Derives a stable id from identity text (UUID v5 in the nil namespace).
pub(crate) fn derive_stable_id(identity: &str) -> String {
    Uuid::new_v5(&Uuid::nil(), identity.as_bytes()).to_string()
}

#[cfg(test)]
mod tests {
    use super::derive_stable_id;

    #[test]
    fn stable_id_is_deterministic_and_distinct() {
        assert_eq!(derive_stable_id("curl.7.88"), derive_stable_id("curl.7.88"));
        assert_ne!(derive_stable_id("curl.7.88"), derive_stable_id("curl.7.89"));
    }
}
