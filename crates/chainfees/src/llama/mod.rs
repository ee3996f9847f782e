//! DefiLlama fees access: HTTP fetch and timestamp normalization.

mod fetch;
mod normalize;

pub use fetch::{
    ChainFees, ChartPoint, FeesOverview, FetchConfig, Fetcher, ProtocolFees, UpstreamError,
};
pub use normalize::{utc_day, NormalizeError};
