//! Offline data cache and sync store for field survey interviewing
//!
//! Interviews captured without connectivity are persisted record by record,
//! queued for upload, and listed back with corrupt or oversized entries
//! repaired on the way. Reference geography (assembly constituencies,
//! polling groups and stations) is served from a bundled dataset and a
//! key-value cache that [`provisioning::Provisioner`] warms while online.

pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod models;
pub mod offline;
pub mod provisioning;
pub mod reference;
pub mod repository;
pub mod storage;

pub use config::Settings;
pub use error::{FailureKind, StoreError, StoreWarning};
pub use offline::OfflineCache;
