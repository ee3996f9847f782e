//! Normalization of chart timestamps to UTC calendar days.

use thiserror::Error;
use time::macros::format_description;
use time::OffsetDateTime;

#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("timestamp out of range: {0}")]
    OutOfRange(i64),
    #[error("format: {0}")]
    Format(#[from] time::error::Format),
}

/// UTC calendar day (`YYYY-MM-DD`) containing the unix timestamp `ts`.
/// Truncates the time-of-day component; the chart's date grid is daily.
pub fn utc_day(ts: i64) -> Result<String, NormalizeError> {
    let dt = OffsetDateTime::from_unix_timestamp(ts).map_err(|_| NormalizeError::OutOfRange(ts))?;
    Ok(dt.date().format(format_description!("[year]-[month]-[day]"))?)
}
