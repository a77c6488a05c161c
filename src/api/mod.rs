//! Collaborators on the network side of the cache

pub mod remote;
pub mod resilience;

pub use remote::{RemoteDataSource, RemoteError, RemoteResponse, UnavailableRemote};
pub use resilience::{RetryConfig, RetryPolicy};
