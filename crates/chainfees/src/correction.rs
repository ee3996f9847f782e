//! Stablecoin issuer correction for the Ethereum series.
//!
//! The aggregator's Ethereum totals include fees collected by stablecoin
//! issuers, which track issuance revenue rather than network usage. Protocols
//! whose name matches the issuer allow-list and that are active on Ethereum
//! have their per-timestamp breakdown values subtracted from the chain total.

use crate::llama::ProtocolFees;

/// Protocol names treated as stablecoin issuers, compared case-insensitively.
pub const ISSUER_PROTOCOLS: [&str; 4] = ["tether", "circle", "usdt", "usdc"];

/// Chain label the aggregator uses for Ethereum in protocol `chains` lists.
pub const ETHEREUM: &str = "Ethereum";

/// Select the protocols whose fees should be subtracted from the Ethereum
/// totals: name on the issuer allow-list and `chains` containing Ethereum.
pub fn issuer_corrections(protocols: &[ProtocolFees]) -> Vec<&ProtocolFees> {
    protocols
        .iter()
        .filter(|protocol| {
            ISSUER_PROTOCOLS
                .iter()
                .any(|issuer| protocol.name.eq_ignore_ascii_case(issuer))
        })
        .filter(|protocol| protocol.chains.iter().any(|chain| chain == ETHEREUM))
        .collect()
}

/// Subtract each correction's breakdown value recorded at exactly `ts` from
/// `value`. Matching is integer timestamp equality, not calendar-date
/// equality; an issuer with no entry at `ts` contributes nothing. The result
/// is not clamped and may be negative.
pub fn apply_corrections(ts: i64, value: f64, corrections: &[&ProtocolFees]) -> f64 {
    let mut corrected = value;
    for protocol in corrections {
        if let Some(breakdown) = &protocol.breakdown {
            if let Some((_, fee)) = breakdown.iter().find(|(point_ts, _)| *point_ts == ts) {
                corrected -= fee;
            }
        }
    }
    corrected
}
