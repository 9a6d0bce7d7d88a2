//! Health Planet (Tanita) measurement client.
//!
//! Fetches tagged innerscan series over the REST API. Ranged fetches are
//! chunked into windows of at most three months, a limit imposed by the API.

use chrono::{Duration, FixedOffset, Months, NaiveDateTime, Utc};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::sync::MeasurementSource;

const INNERSCAN_URL: &str = "https://www.healthplanet.jp/status/innerscan.json";

/// Range parameter layout expected by the API (`YYYYMMDDHHMMSS`).
pub const RANGE_FORMAT: &str = "%Y%m%d%H%M%S";

/// Health Planet timestamps are in the vendor's home time zone (JST, UTC+9,
/// no DST). Passed explicitly to the aggregator rather than held as a global.
pub fn source_time_zone() -> FixedOffset {
    FixedOffset::east_opt(9 * 3600).unwrap()
}

/// Measurement type, identified on the wire by a vendor-specific numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasurementTag {
    Weight,
    BodyFatPercent,
}

impl MeasurementTag {
    pub fn code(self) -> u32 {
        match self {
            MeasurementTag::Weight => 6021,
            MeasurementTag::BodyFatPercent => 6022,
        }
    }
}

/// One innerscan record as returned by the API. `date` is minute-resolution
/// local time (`YYYYMMDDHHMM`); `keydata` is the decimal value as a string.
#[derive(Debug, Clone, Deserialize)]
pub struct RawMeasurement {
    pub date: String,
    pub keydata: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub tag: String,
}

#[derive(Debug, Deserialize)]
pub struct InnerScanResponse {
    #[serde(default)]
    pub birth_date: String,
    #[serde(default)]
    pub height: String,
    #[serde(default)]
    pub sex: String,
    #[serde(default)]
    pub data: Vec<RawMeasurement>,
}

/// An explicit fetch range. Parsed and validated before any request is made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub from: NaiveDateTime,
    pub to: NaiveDateTime,
}

impl DateRange {
    /// Parse `from`/`to` in the API's `YYYYMMDDHHMMSS` layout. A missing `to`
    /// defaults to the current time.
    pub fn parse(from: &str, to: Option<&str>) -> Result<Self> {
        let from = NaiveDateTime::parse_from_str(from, RANGE_FORMAT)
            .map_err(|e| Error::InvalidRange(format!("bad from value {from:?}: {e}")))?;
        let to = match to {
            Some(t) => NaiveDateTime::parse_from_str(t, RANGE_FORMAT)
                .map_err(|e| Error::InvalidRange(format!("bad to value {t:?}: {e}")))?,
            // Range strings are interpreted by the vendor in its home time
            // zone, so "now" must be the source-zone wall clock.
            None => Utc::now().with_timezone(&source_time_zone()).naive_local(),
        };
        Ok(Self { from, to })
    }
}

/// Split a range into sub-windows no wider than three months. Each window
/// starts one second after the previous one ends so boundary records are not
/// returned twice.
pub fn chunk_windows(from: NaiveDateTime, to: NaiveDateTime) -> Vec<(NaiveDateTime, NaiveDateTime)> {
    let mut windows = Vec::new();
    let mut current = from;
    while current < to {
        let end = (current + Months::new(3)).min(to);
        windows.push((current, end));
        current = end + Duration::seconds(1);
    }
    windows
}

/// Client for the Health Planet innerscan endpoint.
pub struct HealthPlanetClient {
    http: reqwest::Client,
    access_token: String,
}

impl HealthPlanetClient {
    pub fn new(access_token: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            access_token,
        }
    }

    /// Fetch a single tag's series. With no range the API's own default
    /// window applies (trailing three months); with a range, windows are
    /// fetched sequentially and concatenated in request order.
    pub async fn fetch_series(
        &self,
        tag: MeasurementTag,
        range: Option<&DateRange>,
    ) -> Result<Vec<RawMeasurement>> {
        let Some(range) = range else {
            return Ok(self.fetch_window(tag, None).await?.data);
        };

        let mut all = Vec::new();
        for (start, end) in chunk_windows(range.from, range.to) {
            let window = (
                start.format(RANGE_FORMAT).to_string(),
                end.format(RANGE_FORMAT).to_string(),
            );
            let response = self.fetch_window(tag, Some(window)).await?;
            all.extend(response.data);
        }
        Ok(all)
    }

    async fn fetch_window(
        &self,
        tag: MeasurementTag,
        window: Option<(String, String)>,
    ) -> Result<InnerScanResponse> {
        let mut query: Vec<(&str, String)> = vec![
            ("access_token", self.access_token.clone()),
            ("date", "1".to_string()),
            ("tag", tag.code().to_string()),
        ];
        if let Some((from, to)) = &window {
            query.push(("from", from.clone()));
            query.push(("to", to.clone()));
        }

        log::debug!(
            "requesting innerscan: token={} tag={} window={:?}",
            mask_token(&self.access_token),
            tag.code(),
            window
        );

        let response = self.http.get(INNERSCAN_URL).query(&query).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(Error::SourceApi {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| Error::SourceApi {
            status: status.as_u16(),
            body: format!("unparseable response: {e}"),
        })
    }
}

#[async_trait::async_trait]
impl MeasurementSource for HealthPlanetClient {
    async fn fetch_series(
        &self,
        tag: MeasurementTag,
        range: Option<&DateRange>,
    ) -> Result<Vec<RawMeasurement>> {
        HealthPlanetClient::fetch_series(self, tag, range).await
    }
}

fn mask_token(token: &str) -> String {
    if token.chars().count() > 5 {
        let prefix: String = token.chars().take(5).collect();
        format!("{prefix}...")
    } else {
        "...".to_string()
    }
}
