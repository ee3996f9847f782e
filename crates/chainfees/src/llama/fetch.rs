//! DefiLlama fees API client: chain enumeration, per-chain daily series with
//! the Ethereum issuer correction, and full snapshot assembly.

use crate::correction::{apply_corrections, issuer_corrections, ETHEREUM};
use crate::llama::normalize::{utc_day, NormalizeError};
use crate::snapshot::{ChainSeries, FeePoint, Snapshot};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

const DEFAULT_BASE_URL: &str = "https://api.llama.fi/overview/fees";
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Clone, Debug)]
pub struct FetchConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: REQUEST_TIMEOUT_SECS,
        }
    }
}

#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("request: {0}")]
    Request(#[from] reqwest::Error),
    #[error("api error: status {0} body {1}")]
    Api(u16, String),
    #[error("payload: {0}")]
    Payload(String),
    #[error("normalize: {0}")]
    Normalize(#[from] NormalizeError),
}

/// Overview payload; only the chain enumeration is consumed.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeesOverview {
    pub all_chains: Vec<String>,
}

/// One chart entry: `[unix seconds, daily fees in USD]`.
pub type ChartPoint = (i64, f64);

/// Per-chain fees payload. `totalDataChart` is required; a protocol list is
/// only present when the breakdown is requested and defaults to empty.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainFees {
    pub total_data_chart: Vec<ChartPoint>,
    #[serde(default)]
    pub protocols: Vec<ProtocolFees>,
}

/// A protocol tracked alongside the chain totals. `chains` and `breakdown`
/// may be absent upstream and default to empty.
#[derive(Clone, Debug, Deserialize)]
pub struct ProtocolFees {
    pub name: String,
    #[serde(default)]
    pub chains: Vec<String>,
    #[serde(default)]
    pub breakdown: Option<Vec<ChartPoint>>,
}

/// DefiLlama fees client. One instance per process; all requests share the
/// configured timeout.
pub struct Fetcher {
    config: FetchConfig,
    client: reqwest::Client,
    request_count: AtomicU64,
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            config,
            client,
            request_count: AtomicU64::new(0),
        })
    }

    async fn get_json(&self, path_query: &str) -> Result<String, UpstreamError> {
        let url = format!(
            "{}{}",
            self.config.base_url.trim_end_matches('/'),
            path_query
        );
        let res = self.client.get(&url).send().await?;
        let status = res.status();
        let body = res.text().await?;
        if !status.is_success() {
            return Err(UpstreamError::Api(status.as_u16(), body));
        }
        self.request_count.fetch_add(1, Ordering::Relaxed);
        Ok(body)
    }

    /// Enumerate the chains the aggregator tracks daily fees for.
    pub async fn list_chains(&self) -> Result<Vec<String>, UpstreamError> {
        let body = self
            .get_json(
                "?excludeTotalDataChart=true&excludeTotalDataChartBreakdown=true&dataType=dailyFees",
            )
            .await?;
        let overview: FeesOverview = serde_json::from_str(&body)
            .map_err(|e| UpstreamError::Payload(format!("overview: {e}")))?;
        info!(chains = overview.all_chains.len(), "overview");
        Ok(overview.all_chains)
    }

    async fn chain_fees(
        &self,
        chain: &str,
        exclude_breakdown: bool,
    ) -> Result<ChainFees, UpstreamError> {
        let path = format!(
            "/{}?excludeTotalDataChart=false&excludeTotalDataChartBreakdown={exclude_breakdown}&dataType=dailyFees",
            urlencoding::encode(chain)
        );
        let body = self.get_json(&path).await?;
        serde_json::from_str(&body).map_err(|e| UpstreamError::Payload(format!("chain {chain}: {e}")))
    }

    /// Daily fee series for one chain as (UTC date, value) points in chart
    /// order. For Ethereum, a second request fetches the protocol breakdowns
    /// and the stablecoin issuer fees recorded at the same chart timestamps
    /// are subtracted; the result may go negative when issuer fees exceed the
    /// chain total.
    pub async fn fetch_chain_series(&self, chain: &str) -> Result<Vec<FeePoint>, UpstreamError> {
        let fees = self.chain_fees(chain, true).await?;
        let with_breakdown = if chain.eq_ignore_ascii_case(ETHEREUM) {
            Some(self.chain_fees(chain, false).await?)
        } else {
            None
        };
        let corrections = with_breakdown
            .as_ref()
            .map(|resp| issuer_corrections(&resp.protocols))
            .unwrap_or_default();
        if !corrections.is_empty() {
            debug!(%chain, issuers = corrections.len(), "subtracting issuer fees");
        }

        let mut points = Vec::with_capacity(fees.total_data_chart.len());
        for (ts, value) in fees.total_data_chart {
            points.push(FeePoint {
                date: utc_day(ts)?,
                value: apply_corrections(ts, value, &corrections),
            });
        }
        Ok(points)
    }

    /// One full fetch cycle: every chain's corrected series plus the sorted
    /// union of their dates. Chains that fail or come back empty are skipped;
    /// only a failure to list chains aborts the build.
    pub async fn build_snapshot(&self) -> Result<Snapshot, UpstreamError> {
        let chains = self.list_chains().await?;
        let mut chain_data: BTreeMap<String, ChainSeries> = BTreeMap::new();
        let mut skipped = 0usize;
        for chain in &chains {
            match self.fetch_chain_series(chain).await {
                Ok(points) if points.is_empty() => {
                    debug!(%chain, "no data points, excluded");
                }
                Ok(points) => {
                    let series: ChainSeries = points
                        .into_iter()
                        .map(|point| (point.date, point.value))
                        .collect();
                    chain_data.insert(chain.clone(), series);
                }
                Err(err) => {
                    warn!(%chain, error = %err, "fetch failed, chain skipped");
                    skipped += 1;
                }
            }
        }
        let snapshot = Snapshot::assemble(chain_data);
        info!(
            chains = snapshot.chain_data.len(),
            skipped,
            dates = snapshot.dates.len(),
            "snapshot built"
        );
        Ok(snapshot)
    }

    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }
}
