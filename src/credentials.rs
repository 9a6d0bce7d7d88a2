use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::state;

const CREDENTIALS_FILE: &str = "credentials.json";

/// OAuth credentials for the Health Planet side. Health Planet access tokens
/// are long-lived, so no refresh token is stored for it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCredentials {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub access_token: String,
}

/// OAuth credentials for the Fitbit side. The token pair rotates whenever the
/// client refreshes an expired access token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationCredentials {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
}

/// Credentials for both vendors, persisted as `credentials.json` in the state
/// directory. A missing file loads as empty defaults so the binary can fill
/// fields from environment variables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub health_source: SourceCredentials,
    #[serde(default)]
    pub destination: DestinationCredentials,
}

impl Credentials {
    pub fn load(state_dir: &Path) -> Result<Self> {
        state::load_json_or_default(&state_dir.join(CREDENTIALS_FILE))
    }

    pub fn save(&self, state_dir: &Path) -> Result<()> {
        state::write_json_atomic(&state_dir.join(CREDENTIALS_FILE), self)
    }
}
