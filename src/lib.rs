// Raw records reported by the two inventory sources
pub mod inventory;

// Hostname to join-key normalization
pub mod normalize;

// Concurrent paginated retrieval with retry and rate-limit handling
pub mod fetch;

// Join-and-classify engine
pub mod reconcile;

// TOML configuration with environment substitution
pub mod config;

pub use fetch::{FetchOutcome, PaginatedFetcher};
pub use inventory::{AgentStatus, RawCmdbServer, RawWorkload};
pub use normalize::{normalize, NormalizedKey};
pub use reconcile::{reconcile, ReconStatus, Reconciliation, ReconciledRecord};
