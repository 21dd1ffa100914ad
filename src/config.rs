use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Result};

pub const DEFAULT_SHEET_NAME: &str = "Sheet1";
pub const DEFAULT_MAX_RESULTS: usize = 50;
const DATA_DIR_NAME: &str = ".mailsheet";

/// Settings for one sync run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub spreadsheet_id: String,
    pub sheet_name: String,
    /// Size of the single unread listing page fetched per run.
    pub max_results: usize,
    pub state_path: PathBuf,
}

impl SyncConfig {
    pub fn new(
        spreadsheet_id: Option<String>,
        sheet_name: Option<String>,
        max_results: usize,
        state_path: Option<PathBuf>,
    ) -> Result<Self> {
        let spreadsheet_id = spreadsheet_id
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| anyhow!("SPREADSHEET_ID is not set"))?;
        if max_results == 0 {
            bail!("MAX_RESULTS must be at least 1");
        }

        let sheet_name = sheet_name
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_SHEET_NAME.to_string());
        let state_path = match state_path {
            Some(path) => path,
            None => default_data_dir()?.join("state.json"),
        };

        Ok(Self {
            spreadsheet_id,
            sheet_name,
            max_results,
            state_path,
        })
    }
}

/// Locations of the OAuth client secrets and the persisted user token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthConfig {
    pub credentials_path: PathBuf,
    pub token_path: PathBuf,
}

impl AuthConfig {
    pub fn new(credentials_path: Option<PathBuf>, token_path: Option<PathBuf>) -> Result<Self> {
        let credentials_path = match credentials_path {
            Some(path) => path,
            None => default_data_dir()?.join("credentials.json"),
        };
        let token_path = match token_path {
            Some(path) => path,
            None => default_data_dir()?.join("token.json"),
        };
        Ok(Self {
            credentials_path,
            token_path,
        })
    }

    pub fn token_path(&self) -> &Path {
        &self.token_path
    }
}

pub fn default_data_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| anyhow!("failed to determine home directory"))?;
    Ok(home.join(DATA_DIR_NAME))
}
