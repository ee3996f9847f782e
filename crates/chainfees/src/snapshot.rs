//! Assembled fee snapshot: the JSON document served to clients and stored in
//! the cache.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// One normalized point of a chain's series.
#[derive(Clone, Debug, PartialEq)]
pub struct FeePoint {
    pub date: String,
    pub value: f64,
}

/// Daily values keyed by `YYYY-MM-DD` date. Ordered map so serialized output
/// and date unions are deterministic.
pub type ChainSeries = BTreeMap<String, f64>;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("chain not found: {0}")]
    ChainNotFound(String),
}

/// The full dataset for one fetch cycle. `dates` is the sorted union of every
/// chain's dates; individual series only carry the dates they have data for.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub dates: Vec<String>,
    pub chain_data: BTreeMap<String, ChainSeries>,
    pub last_updated: String,
}

impl Snapshot {
    /// Build a snapshot from per-chain series, stamping it with the current
    /// wall clock.
    pub fn assemble(chain_data: BTreeMap<String, ChainSeries>) -> Self {
        let mut dates: BTreeSet<String> = BTreeSet::new();
        for series in chain_data.values() {
            dates.extend(series.keys().cloned());
        }
        Self {
            dates: dates.into_iter().collect(),
            chain_data,
            last_updated: now_rfc3339(),
        }
    }

    /// Restrict the snapshot to a single chain. The date axis and timestamp
    /// are kept as-is; the lookup is exact, matching the aggregator's chain
    /// labels.
    pub fn filter_chain(&self, chain: &str) -> Result<Self, SnapshotError> {
        let series = self
            .chain_data
            .get(chain)
            .ok_or_else(|| SnapshotError::ChainNotFound(chain.to_string()))?;
        let mut chain_data = BTreeMap::new();
        chain_data.insert(chain.to_string(), series.clone());
        Ok(Self {
            dates: self.dates.clone(),
            chain_data,
            last_updated: self.last_updated.clone(),
        })
    }
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}
