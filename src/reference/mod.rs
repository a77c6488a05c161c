//! Reference geography: bundled datasets and name matching

pub mod bundled;
pub mod matching;

pub use bundled::{BundledDataset, BundledReferenceData, DatasetSource};
pub use matching::{MatchTier, best_match, canonical_ac_name, normalize_name};
