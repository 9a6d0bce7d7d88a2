use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid date range: {0}")]
    InvalidRange(String),

    #[error("Health Planet API error (status {status}): {body}")]
    SourceApi { status: u16, body: String },

    #[error("Fitbit API error (status {status}): {body}")]
    DestinationApi { status: u16, body: String },

    #[error(
        "Fitbit API rate limit exceeded (150 requests/hour, approx. 50 records). \
         The quota resets at the top of the hour; re-run the sync then."
    )]
    RateLimited,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("state error: {0}")]
    State(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::State(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::State(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
