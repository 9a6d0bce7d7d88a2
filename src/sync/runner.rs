//! The sync run itself: resolve the range, fetch both series, aggregate,
//! then replay the joined records against the destination in timestamp order.
//!
//! Replay is fail-fast: the first destination error stops the loop so a
//! rate-limit or auth failure cannot burn through the remaining quota. The
//! caller still persists the cache and any rotated credentials afterwards.

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};

use crate::aggregate::{aggregate, AggregatedRecord};
use crate::cache::ProcessedDateCache;
use crate::error::{Error, Result};
use crate::healthplanet::{DateRange, MeasurementTag};
use crate::sync::{BodyLogDestination, MeasurementSource, SyncOptions, SyncReport};

/// Resolve CLI date bounds into an API range. `from` absent means the vendor
/// default window; a present `from` becomes `<date>000000` and `to` becomes
/// `<date>235959` (or now, when absent). Malformed dates fail before any I/O.
pub fn resolve_range(options: &SyncOptions) -> Result<Option<DateRange>> {
    let Some(from) = &options.from else {
        if options.to.is_some() {
            log::warn!("--to without --from is ignored; using the vendor default window");
        }
        return Ok(None);
    };

    let from = parse_cli_date(from)?;
    let from = format!("{}000000", from.format("%Y%m%d"));
    let to = match &options.to {
        Some(to) => Some(format!("{}235959", parse_cli_date(to)?.format("%Y%m%d"))),
        None => None,
    };
    DateRange::parse(&from, to.as_deref()).map(Some)
}

fn parse_cli_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| Error::InvalidRange(format!("bad date {value:?} (want YYYY-MM-DD): {e}")))
}

/// Run one sync pass. Mutates `cache` as days are confirmed; the caller is
/// responsible for persisting it (unconditionally) once the run finishes.
pub async fn run_sync(
    source: &dyn MeasurementSource,
    destination: &dyn BodyLogDestination,
    cache: &mut ProcessedDateCache,
    tz: FixedOffset,
    options: &SyncOptions,
) -> Result<SyncReport> {
    let range = resolve_range(options)?;
    match &range {
        Some(r) => log::info!("syncing range {} .. {}", r.from, r.to),
        None => log::info!("syncing the vendor default window (trailing 3 months)"),
    }

    let weights = source
        .fetch_series(MeasurementTag::Weight, range.as_ref())
        .await?;
    let fats = source
        .fetch_series(MeasurementTag::BodyFatPercent, range.as_ref())
        .await?;
    log::info!(
        "fetched {} weight and {} fat readings",
        weights.len(),
        fats.len()
    );

    let records = aggregate(&weights, &fats, tz);
    let mut instants: Vec<DateTime<Utc>> = records.keys().copied().collect();
    instants.sort_unstable();

    let mut days_written = 0u64;
    let mut days_skipped_cache = 0u64;
    let mut days_skipped_existing = 0u64;
    let mut failure: Option<Error> = None;

    for instant in instants {
        let record = &records[&instant];
        // Cache keys use the source-zone calendar date.
        let day_key = instant.with_timezone(&tz).format("%Y-%m-%d").to_string();
        if cache.contains(&day_key) {
            log::debug!("{day_key}: already processed, skipping");
            days_skipped_cache += 1;
            continue;
        }

        match replay_one(destination, instant, record).await {
            Ok(ReplayOutcome::Written) => {
                days_written += 1;
                cache.insert(&day_key);
            }
            Ok(ReplayOutcome::AlreadyLogged) => {
                days_skipped_existing += 1;
                cache.insert(&day_key);
            }
            Err(e) => {
                log::error!("aborting replay at {day_key}: {e}");
                failure = Some(e);
                break;
            }
        }
    }

    Ok(SyncReport::from_counts(
        records.len() as u64,
        days_written,
        days_skipped_cache,
        days_skipped_existing,
        failure.map(|e| e.to_string()),
    ))
}

enum ReplayOutcome {
    Written,
    AlreadyLogged,
}

async fn replay_one(
    destination: &dyn BodyLogDestination,
    instant: DateTime<Utc>,
    record: &AggregatedRecord,
) -> Result<ReplayOutcome> {
    // Lookups and writes both use the instant's UTC calendar date, matching
    // the date/time the destination receives.
    let existing = destination.existing_weight_logs(instant.date_naive()).await?;
    if !existing.is_empty() {
        log::info!(
            "{}: destination already has {} record(s)",
            instant.date_naive(),
            existing.len()
        );
        return Ok(ReplayOutcome::AlreadyLogged);
    }

    if let Some(weight) = record.weight {
        destination.create_weight_log(weight, instant).await?;
    }
    if let Some(fat) = record.fat {
        destination.create_fat_log(fat, instant).await?;
    }
    log::info!(
        "{instant}: saved, weight: {}, fat: {}",
        record.weight.map_or("none".to_string(), |w| format!("{w:.2}")),
        record.fat.map_or("none".to_string(), |f| format!("{f:.2}")),
    );
    Ok(ReplayOutcome::Written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fitbit::WeightLogEntry;
    use crate::healthplanet::{source_time_zone, RawMeasurement};
    use crate::sync::SyncStatus;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;

    fn reading(date: &str, keydata: &str, tag: &str) -> RawMeasurement {
        RawMeasurement {
            date: date.to_string(),
            keydata: keydata.to_string(),
            model: "test".to_string(),
            tag: tag.to_string(),
        }
    }

    struct StaticSource {
        weights: Vec<RawMeasurement>,
        fats: Vec<RawMeasurement>,
    }

    #[async_trait]
    impl MeasurementSource for StaticSource {
        async fn fetch_series(
            &self,
            tag: MeasurementTag,
            _range: Option<&DateRange>,
        ) -> Result<Vec<RawMeasurement>> {
            Ok(match tag {
                MeasurementTag::Weight => self.weights.clone(),
                MeasurementTag::BodyFatPercent => self.fats.clone(),
            })
        }
    }

    /// Destination fake that records every call in order and can be told to
    /// rate-limit all writes or to report pre-existing logs for given days.
    #[derive(Default)]
    struct RecordingDestination {
        days_with_logs: HashSet<NaiveDate>,
        rate_limit_writes: bool,
        ops: Mutex<Vec<String>>,
    }

    impl RecordingDestination {
        fn ops(&self) -> Vec<String> {
            self.ops.lock().unwrap().clone()
        }

        fn writes(&self) -> usize {
            self.ops()
                .iter()
                .filter(|op| op.starts_with("weight") || op.starts_with("fat"))
                .count()
        }
    }

    #[async_trait]
    impl BodyLogDestination for RecordingDestination {
        async fn existing_weight_logs(&self, date: NaiveDate) -> Result<Vec<WeightLogEntry>> {
            self.ops.lock().unwrap().push(format!("lookup {date}"));
            if self.days_with_logs.contains(&date) {
                Ok(vec![WeightLogEntry {
                    bmi: 23.5,
                    date: date.to_string(),
                    fat: 0.0,
                    log_id: 1,
                    source: "API".to_string(),
                    time: "12:00:00".to_string(),
                    weight: 70.0,
                }])
            } else {
                Ok(vec![])
            }
        }

        async fn create_weight_log(&self, weight: f64, instant: DateTime<Utc>) -> Result<()> {
            if self.rate_limit_writes {
                return Err(Error::RateLimited);
            }
            self.ops
                .lock()
                .unwrap()
                .push(format!("weight {weight:.2} {instant}"));
            Ok(())
        }

        async fn create_fat_log(&self, fat: f64, instant: DateTime<Utc>) -> Result<()> {
            if self.rate_limit_writes {
                return Err(Error::RateLimited);
            }
            self.ops
                .lock()
                .unwrap()
                .push(format!("fat {fat:.2} {instant}"));
            Ok(())
        }
    }

    fn one_day_source() -> StaticSource {
        StaticSource {
            weights: vec![reading("202301011200", "70.5", "6021")],
            fats: vec![reading("202301011200", "20.5", "6022")],
        }
    }

    #[tokio::test]
    async fn writes_weight_then_fat_and_marks_cache() {
        let source = one_day_source();
        let destination = RecordingDestination::default();
        let mut cache = ProcessedDateCache::default();

        let report = run_sync(
            &source,
            &destination,
            &mut cache,
            source_time_zone(),
            &SyncOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(report.status, SyncStatus::Success);
        assert_eq!(report.days_written, 1);
        assert_eq!(
            destination.ops(),
            vec![
                "lookup 2023-01-01".to_string(),
                "weight 70.50 2023-01-01 03:00:00 UTC".to_string(),
                "fat 20.50 2023-01-01 03:00:00 UTC".to_string(),
            ]
        );
        assert!(cache.contains("2023-01-01"));
    }

    #[tokio::test]
    async fn cached_day_short_circuits_without_any_destination_call() {
        let source = one_day_source();
        let destination = RecordingDestination::default();
        let mut cache = ProcessedDateCache::default();
        cache.insert("2023-01-01");

        let report = run_sync(
            &source,
            &destination,
            &mut cache,
            source_time_zone(),
            &SyncOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(report.status, SyncStatus::Success);
        assert_eq!(report.days_skipped_cache, 1);
        assert!(destination.ops().is_empty());
    }

    #[tokio::test]
    async fn existing_destination_log_skips_writes_and_marks_cache() {
        let source = one_day_source();
        let destination = RecordingDestination {
            days_with_logs: [NaiveDate::from_ymd_opt(2023, 1, 1).unwrap()].into(),
            ..Default::default()
        };
        let mut cache = ProcessedDateCache::default();

        let report = run_sync(
            &source,
            &destination,
            &mut cache,
            source_time_zone(),
            &SyncOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(report.status, SyncStatus::Success);
        assert_eq!(report.days_skipped_existing, 1);
        assert_eq!(destination.writes(), 0);
        assert!(cache.contains("2023-01-01"));
    }

    #[tokio::test]
    async fn rerun_with_cache_is_idempotent() {
        let source = one_day_source();
        let destination = RecordingDestination::default();
        let mut cache = ProcessedDateCache::default();
        let options = SyncOptions::default();

        run_sync(&source, &destination, &mut cache, source_time_zone(), &options)
            .await
            .unwrap();
        assert_eq!(destination.writes(), 2);

        let report = run_sync(&source, &destination, &mut cache, source_time_zone(), &options)
            .await
            .unwrap();
        assert_eq!(report.days_skipped_cache, 1);
        assert_eq!(report.days_written, 0);
        assert_eq!(destination.writes(), 2, "second run must not write");
    }

    #[tokio::test]
    async fn rate_limit_halts_replay_and_leaves_later_days_uncached() {
        let source = StaticSource {
            weights: vec![
                reading("202301011200", "70.5", "6021"),
                reading("202301021200", "70.7", "6021"),
                reading("202301031200", "70.9", "6021"),
            ],
            fats: vec![],
        };
        let destination = RecordingDestination {
            rate_limit_writes: true,
            ..Default::default()
        };
        let mut cache = ProcessedDateCache::default();

        let report = run_sync(
            &source,
            &destination,
            &mut cache,
            source_time_zone(),
            &SyncOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(report.status, SyncStatus::Failed);
        assert_eq!(report.days_written, 0);
        assert!(report.error.unwrap().contains("rate limit"));
        // Only the first day was ever looked up; nothing got cached.
        assert_eq!(destination.ops(), vec!["lookup 2023-01-01".to_string()]);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn records_replay_in_ascending_timestamp_order() {
        let source = StaticSource {
            weights: vec![
                reading("202301031200", "70.9", "6021"),
                reading("202301011200", "70.5", "6021"),
                reading("202301021200", "70.7", "6021"),
            ],
            fats: vec![],
        };
        let destination = RecordingDestination::default();
        let mut cache = ProcessedDateCache::default();

        run_sync(
            &source,
            &destination,
            &mut cache,
            source_time_zone(),
            &SyncOptions::default(),
        )
        .await
        .unwrap();

        let lookups: Vec<String> = destination
            .ops()
            .into_iter()
            .filter(|op| op.starts_with("lookup"))
            .collect();
        assert_eq!(
            lookups,
            vec![
                "lookup 2023-01-01".to_string(),
                "lookup 2023-01-02".to_string(),
                "lookup 2023-01-03".to_string(),
            ]
        );
    }

    #[test]
    fn resolve_range_appends_day_bounds() {
        let options = SyncOptions {
            from: Some("2023-01-01".into()),
            to: Some("2023-03-31".into()),
        };
        let range = resolve_range(&options).unwrap().unwrap();
        assert_eq!(range.from.format("%Y%m%d%H%M%S").to_string(), "20230101000000");
        assert_eq!(range.to.format("%Y%m%d%H%M%S").to_string(), "20230331235959");
    }

    #[test]
    fn resolve_range_absent_means_default_window() {
        assert!(resolve_range(&SyncOptions::default()).unwrap().is_none());
    }

    #[test]
    fn resolve_range_rejects_malformed_dates() {
        let options = SyncOptions {
            from: Some("01/01/2023".into()),
            to: None,
        };
        assert!(matches!(
            resolve_range(&options).unwrap_err(),
            Error::InvalidRange(_)
        ));
    }
}
