//! Repositories over the key-value store, one per cache concern

pub mod ancillary;
pub mod interviews;
pub mod reference_cache;
pub mod sync_queue;

pub use ancillary::AncillaryCache;
pub use interviews::{CleanupReport, InterviewLimits, InterviewListing, InterviewStore, SaveReceipt};
pub use reference_cache::{CompletenessFloors, ReferenceCache, WriteVerification};
pub use sync_queue::{QueueListing, SyncQueue};
