pub mod runner;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::fitbit::WeightLogEntry;
use crate::healthplanet::{DateRange, MeasurementTag, RawMeasurement};

/// Options controlling a sync run. `from`/`to` are CLI-supplied calendar
/// dates (`YYYY-MM-DD`); with both absent the source API's own default
/// window applies.
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub from: Option<String>,
    pub to: Option<String>,
}

/// Where measurements come from. Implemented by `HealthPlanetClient`;
/// implemented by in-memory fakes in tests.
#[async_trait]
pub trait MeasurementSource: Send + Sync {
    async fn fetch_series(
        &self,
        tag: MeasurementTag,
        range: Option<&DateRange>,
    ) -> Result<Vec<RawMeasurement>>;
}

/// Where body logs go. Implemented by `FitbitClient`.
#[async_trait]
pub trait BodyLogDestination: Send + Sync {
    async fn existing_weight_logs(&self, date: NaiveDate) -> Result<Vec<WeightLogEntry>>;
    async fn create_weight_log(&self, weight: f64, instant: DateTime<Utc>) -> Result<()>;
    async fn create_fat_log(&self, fat: f64, instant: DateTime<Utc>) -> Result<()>;
}

/// Report returned after a sync run.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub status: SyncStatus,
    pub records_examined: u64,
    pub days_written: u64,
    pub days_skipped_cache: u64,
    pub days_skipped_existing: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SyncStatus {
    Success,
    PartialFailure,
    Failed,
}

impl SyncReport {
    /// Derive the status from counts and the replay error, if any.
    pub fn from_counts(
        records_examined: u64,
        days_written: u64,
        days_skipped_cache: u64,
        days_skipped_existing: u64,
        error: Option<String>,
    ) -> Self {
        let status = match &error {
            None => SyncStatus::Success,
            Some(_) if days_written > 0 => SyncStatus::PartialFailure,
            Some(_) => SyncStatus::Failed,
        };
        Self {
            status,
            records_examined,
            days_written,
            days_skipped_cache,
            days_skipped_existing,
            error,
        }
    }
}
