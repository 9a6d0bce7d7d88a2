pub mod aggregate;
pub mod cache;
pub mod credentials;
pub mod error;
pub mod fitbit;
pub mod healthplanet;
pub mod state;
pub mod sync;

pub use aggregate::{aggregate, AggregatedRecord};
pub use cache::ProcessedDateCache;
pub use credentials::Credentials;
pub use error::{Error, Result};
pub use fitbit::{FitbitClient, RotatedTokenCell, TokenPair};
pub use healthplanet::{HealthPlanetClient, MeasurementTag};
pub use state::default_state_dir;
pub use sync::{SyncOptions, SyncReport, SyncStatus};

use std::path::PathBuf;
use std::sync::Arc;

/// Main entry point: owns the persisted state (credentials and processed-date
/// cache) and drives sync runs against the live vendor APIs.
pub struct Bodysync {
    state_dir: PathBuf,
    credentials: Credentials,
    cache: ProcessedDateCache,
}

impl Bodysync {
    /// Load state from the given directory, or the default
    /// (`~/.config/bodysync`) when `None`.
    pub fn open(state_dir: Option<PathBuf>) -> Result<Self> {
        let state_dir = match state_dir {
            Some(dir) => dir,
            None => default_state_dir()?,
        };
        let credentials = Credentials::load(&state_dir)?;
        let cache = ProcessedDateCache::load(&state_dir)?;
        Ok(Self {
            state_dir,
            credentials,
            cache,
        })
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Mutable access for the binary's env-var fallback.
    pub fn credentials_mut(&mut self) -> &mut Credentials {
        &mut self.credentials
    }

    /// Run one sync pass and finalize: the cache is persisted whether or not
    /// the replay loop completed, and the credential file is rewritten only
    /// when the Fitbit token pair rotated during the run.
    pub async fn sync(&mut self, options: &SyncOptions) -> Result<SyncReport> {
        let source = HealthPlanetClient::new(self.credentials.health_source.access_token.clone());

        let rotated = Arc::new(RotatedTokenCell::default());
        let destination = FitbitClient::new(
            self.credentials.destination.client_id.clone(),
            self.credentials.destination.client_secret.clone(),
            TokenPair {
                access_token: self.credentials.destination.access_token.clone(),
                refresh_token: self.credentials.destination.refresh_token.clone(),
            },
        )
        .with_token_observer(Arc::clone(&rotated) as Arc<dyn fitbit::TokenObserver>);

        let result = sync::runner::run_sync(
            &source,
            &destination,
            &mut self.cache,
            healthplanet::source_time_zone(),
            options,
        )
        .await;

        if let Err(e) = self.cache.save(&self.state_dir) {
            log::error!("failed to persist processed-date cache: {e}");
        }

        if let Some(pair) = rotated.take() {
            self.credentials.destination.access_token = pair.access_token;
            self.credentials.destination.refresh_token = pair.refresh_token;
            match self.credentials.save(&self.state_dir) {
                Ok(()) => log::info!("rotated Fitbit tokens saved"),
                Err(e) => log::error!("failed to persist rotated Fitbit tokens: {e}"),
            }
        }

        result
    }
}
