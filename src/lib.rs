//! Size and identity normalization for implant fixture inventory.
//!
//! Raw size strings arrive in many notations; [`size`] reduces them to one
//! match key and one canonical display form. [`matching`] builds identity
//! keys under two name policies, [`baseline`] flags unregistered surgery
//! entries whose notation disagrees with their group, and [`registration`]
//! inserts cleared candidates with a bounded worker pool.

pub mod baseline;
pub mod config;
pub mod error;
pub mod matching;
pub mod models;
pub mod orders;
pub mod registration;
pub mod size;
pub mod store;

#[cfg(feature = "python")]
mod python;

pub use baseline::{analyze_candidates, classify_candidate, find_unregistered_candidates};
pub use config::{NotationRules, RegistrationConfig};
pub use error::{ConfigError, RegistrationError, StoreError};
pub use matching::{
    build_identity_key, is_same_manufacturer_alias, normalize_for_deduplication,
    normalize_for_matching, Dedup, IdentityKey, Matching,
};
pub use orders::{aggregate_pending_orders, pending_quantity_for};
pub use registration::{run_bounded_registration, Registrar, RegistrationReport};
pub use size::{build_match_key, get_size_match_key, parse_size, to_canonical_size, SizeParser};
pub use store::InventoryStore;
