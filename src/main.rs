use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use mailsheet::config::{DEFAULT_MAX_RESULTS, DEFAULT_SHEET_NAME};

#[derive(Debug, Parser)]
#[command(
    name = "mailsheet",
    version,
    about = "Append unread Gmail messages to a Google Sheet"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    settings: Settings,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Copy unread inbox messages into the sheet (default)
    Run,
    /// Authorize Gmail and Sheets access in a browser and store the token
    Authorize,
}

#[derive(Debug, Args)]
struct Settings {
    /// Target spreadsheet ID
    #[arg(long, env = "SPREADSHEET_ID", global = true)]
    spreadsheet_id: Option<String>,

    /// Tab receiving the rows
    #[arg(long, env = "SHEET_NAME", global = true, default_value = DEFAULT_SHEET_NAME)]
    sheet_name: String,

    /// Unread messages fetched per run
    #[arg(long, env = "MAX_RESULTS", global = true, default_value_t = DEFAULT_MAX_RESULTS)]
    max_results: usize,

    /// Processed message state file
    #[arg(long, env = "MAILSHEET_STATE_FILE", global = true)]
    state_file: Option<PathBuf>,

    /// Google authorized-user token file
    #[arg(long, env = "MAILSHEET_TOKEN_FILE", global = true)]
    token_file: Option<PathBuf>,

    /// OAuth client secrets downloaded from the Google Cloud console
    #[arg(long, env = "MAILSHEET_CREDENTIALS_FILE", global = true)]
    credentials_file: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    commands::dispatch(cli).await
}

mod commands {
    use anyhow::{Context, Result};
    use tracing::{error, info};

    use mailsheet::auth::CredentialProvider;
    use mailsheet::config::{AuthConfig, SyncConfig};
    use mailsheet::connectors::{GmailApiConnector, SheetsApiConnector};
    use mailsheet::state::StateStore;
    use mailsheet::sync::SyncDriver;

    use super::{Cli, Commands, Settings};

    pub async fn dispatch(cli: Cli) -> Result<()> {
        match cli.command.unwrap_or(Commands::Run) {
            Commands::Run => handle_run(cli.settings).await,
            Commands::Authorize => handle_authorize(cli.settings).await,
        }
    }

    async fn handle_run(settings: Settings) -> Result<()> {
        info!("job start");

        let auth_config = AuthConfig::new(settings.credentials_file, settings.token_file)?;
        let config = SyncConfig::new(
            settings.spreadsheet_id,
            Some(settings.sheet_name),
            settings.max_results,
            settings.state_file,
        )?;

        let credentials = CredentialProvider::new(auth_config);
        let access_token = match credentials.obtain().await {
            Ok(token) => token,
            Err(err) => {
                error!(error = %format!("{err:#}"), "authentication failed");
                return Err(err.context("acquire google credentials"));
            }
        };

        let mail = GmailApiConnector::new(access_token.as_str());
        let sheet = SheetsApiConnector::new(
            access_token.as_str(),
            config.spreadsheet_id.as_str(),
            config.sheet_name.as_str(),
        );
        let store = StateStore::new(&config.state_path);

        let mut driver = SyncDriver::new(mail, sheet, store, config.max_results);
        let report = driver.run().await;
        if !report.errors.is_empty() {
            info!(failures = report.errors.len(), "some messages will be retried next run");
        }
        Ok(())
    }

    async fn handle_authorize(settings: Settings) -> Result<()> {
        let auth_config = AuthConfig::new(settings.credentials_file, settings.token_file)?;
        let token_path = auth_config.token_path.clone();
        CredentialProvider::new(auth_config)
            .authorize()
            .await
            .context("authorize google access")?;
        println!("Authorization stored in {}", token_path.display());
        Ok(())
    }
}
