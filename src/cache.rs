use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::state;

const CACHE_FILE: &str = "cache.json";

/// Set of calendar dates (`YYYY-MM-DD`, source time zone) already confirmed
/// synced to Fitbit. Lets reruns skip the per-day existing-log lookup.
///
/// Persisted as `{"processed_dates": {"<date>": true, ...}}`. The map grows
/// monotonically within a run and is rewritten atomically at the end.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessedDateCache {
    #[serde(default)]
    processed_dates: BTreeMap<String, bool>,
}

impl ProcessedDateCache {
    pub fn load(state_dir: &Path) -> Result<Self> {
        state::load_json_or_default(&state_dir.join(CACHE_FILE))
    }

    pub fn save(&self, state_dir: &Path) -> Result<()> {
        state::write_json_atomic(&state_dir.join(CACHE_FILE), self)
    }

    pub fn contains(&self, date: &str) -> bool {
        self.processed_dates.get(date).copied().unwrap_or(false)
    }

    pub fn insert(&mut self, date: &str) {
        self.processed_dates.insert(date.to_string(), true);
    }

    pub fn len(&self) -> usize {
        self.processed_dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processed_dates.is_empty()
    }
}
