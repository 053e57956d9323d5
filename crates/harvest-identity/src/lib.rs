//! Harvest Identity - stable internal identities for upstream entities
//!
//! Raw records carry ids that may be missing or malformed and names with
//! inconsistent spelling. [`EntityResolver`] maps them to a stable identity
//! through a fixed priority chain and tracks how often each strategy won.

pub mod dto;
pub mod normalize;
pub mod resolver;

// Re-exports for convenience
pub use dto::RawEntity;
pub use normalize::{is_valid_id, jaccard, normalize_id, normalize_name};
pub use resolver::{
    AuxFields, EntityIdentity, EntityResolver, ResolverConfig, ResolverStats, Strategy,
};
