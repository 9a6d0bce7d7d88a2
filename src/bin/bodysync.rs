use std::path::PathBuf;

use clap::Parser;

use bodysync::{Bodysync, Credentials, SyncOptions, SyncStatus};

#[derive(Parser)]
#[command(
    name = "bodysync",
    about = "Sync Health Planet body composition measurements to Fitbit"
)]
struct Cli {
    /// First day to sync (YYYY-MM-DD). Omitted: the vendor default window
    /// (trailing 3 months) applies.
    #[arg(long)]
    from: Option<String>,

    /// Last day to sync (YYYY-MM-DD). Defaults to today when --from is set.
    #[arg(long)]
    to: Option<String>,

    /// State directory (default: ~/.config/bodysync)
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Fill credential fields left empty by the state file from the environment,
/// for initial setup or scheduler deployments without a credential file.
fn apply_env_fallback(credentials: &mut Credentials) {
    fn fill(slot: &mut String, var: &str) {
        if slot.is_empty() {
            if let Ok(value) = std::env::var(var) {
                *slot = value;
            }
        }
    }

    fill(
        &mut credentials.health_source.access_token,
        "HEALTHPLANET_ACCESS_TOKEN",
    );
    fill(&mut credentials.destination.client_id, "FITBIT_CLIENT_ID");
    fill(
        &mut credentials.destination.client_secret,
        "FITBIT_CLIENT_SECRET",
    );
    fill(
        &mut credentials.destination.access_token,
        "FITBIT_ACCESS_TOKEN",
    );
    fill(
        &mut credentials.destination.refresh_token,
        "FITBIT_REFRESH_TOKEN",
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let mut app = Bodysync::open(cli.state_dir)?;
    apply_env_fallback(app.credentials_mut());

    let credentials = app.credentials();
    if credentials.health_source.access_token.is_empty() {
        anyhow::bail!(
            "no Health Planet access token configured (credentials.json or HEALTHPLANET_ACCESS_TOKEN)"
        );
    }
    if credentials.destination.access_token.is_empty() {
        anyhow::bail!(
            "no Fitbit access token configured (credentials.json or FITBIT_ACCESS_TOKEN)"
        );
    }

    let options = SyncOptions {
        from: cli.from,
        to: cli.to,
    };
    let report = app.sync(&options).await?;

    println!(
        "{} record(s) examined: {} day(s) written, {} skipped via cache, {} already logged",
        report.records_examined,
        report.days_written,
        report.days_skipped_cache,
        report.days_skipped_existing
    );

    if report.status != SyncStatus::Success {
        if let Some(error) = &report.error {
            anyhow::bail!("sync aborted: {error}");
        }
        anyhow::bail!("sync did not complete");
    }
    Ok(())
}
