//! chainfees — corrected daily chain fees from the DefiLlama aggregator.
//!
//! Fetches per-chain daily fee series, subtracts stablecoin issuer fees from
//! the Ethereum totals, and serves the assembled snapshot from a local SQLite
//! cache with a 24 hour TTL. Read-only against the aggregator.

pub mod cache;
pub mod correction;
pub mod llama;
pub mod snapshot;
pub mod store;

pub use cache::{CacheError, SnapshotCache, SNAPSHOT_KEY, SNAPSHOT_TTL};
pub use correction::{ETHEREUM, ISSUER_PROTOCOLS};
pub use llama::{ChainFees, FeesOverview, FetchConfig, Fetcher, ProtocolFees, UpstreamError};
pub use snapshot::{ChainSeries, FeePoint, Snapshot, SnapshotError};
pub use store::SnapshotStore;
