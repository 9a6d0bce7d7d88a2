//! Joins the weight and body-fat series into one record per timestamp.
//!
//! The weight series anchors the result: fat readings only attach to an
//! instant that already has a weight reading. Malformed records are logged
//! and skipped, never fatal.

use std::collections::HashMap;

use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};

use crate::healthplanet::RawMeasurement;

/// Measurement timestamp layout (`YYYYMMDDHHMM`, source-local time).
const MEASUREMENT_FORMAT: &str = "%Y%m%d%H%M";

/// Weight and body-fat readings sharing one instant. Never constructed with
/// both fields empty: entries only exist for instants with a weight reading.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AggregatedRecord {
    pub weight: Option<f64>,
    pub fat: Option<f64>,
}

/// Parse a source-local timestamp into a UTC instant.
pub fn parse_instant(
    date: &str,
    tz: FixedOffset,
) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    let naive = NaiveDateTime::parse_from_str(date, MEASUREMENT_FORMAT)?;
    // A fixed offset maps every local time to exactly one instant.
    let local = naive.and_local_timezone(tz).unwrap();
    Ok(local.with_timezone(&Utc))
}

/// Merge the two series into a map keyed by UTC instant. Iteration order is
/// unspecified; callers needing determinism must sort the keys.
pub fn aggregate(
    weights: &[RawMeasurement],
    fats: &[RawMeasurement],
    tz: FixedOffset,
) -> HashMap<DateTime<Utc>, AggregatedRecord> {
    let mut map = HashMap::with_capacity(weights.len());

    for reading in weights {
        let instant = match parse_instant(&reading.date, tz) {
            Ok(t) => t,
            Err(e) => {
                log::warn!("skipping weight record with invalid time {:?}: {e}", reading.date);
                continue;
            }
        };
        let value: f64 = match reading.keydata.parse() {
            Ok(v) => v,
            Err(e) => {
                log::warn!("skipping weight record with invalid value {:?}: {e}", reading.keydata);
                continue;
            }
        };
        map.insert(
            instant,
            AggregatedRecord {
                weight: Some(value),
                fat: None,
            },
        );
    }

    for reading in fats {
        let instant = match parse_instant(&reading.date, tz) {
            Ok(t) => t,
            Err(e) => {
                log::warn!("skipping fat record with invalid time {:?}: {e}", reading.date);
                continue;
            }
        };
        let value: f64 = match reading.keydata.parse() {
            Ok(v) => v,
            Err(e) => {
                log::warn!("skipping fat record with invalid value {:?}: {e}", reading.keydata);
                continue;
            }
        };
        match map.get_mut(&instant) {
            Some(record) => record.fat = Some(value),
            // No weight reading at this instant. Dropped rather than emitted
            // on its own; the weight series is the anchor.
            None => log::warn!("no weight reading at {instant}, dropping fat record"),
        }
    }

    map
}
