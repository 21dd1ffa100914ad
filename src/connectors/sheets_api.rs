use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::json;
use tracing::info;

use crate::connectors::{redact_response_body, SheetSink};
use crate::message::SheetRow;

pub const SHEETS_API_BASE: &str = "https://sheets.googleapis.com/v4";
const VALUE_INPUT_OPTION: &str = "RAW";
const LOGGED_SUBJECT_CHARS: usize = 30;

/// Appends rows to columns A:D of one tab of a Google spreadsheet.
#[derive(Debug, Clone)]
pub struct SheetsApiConnector {
    client: Client,
    base_url: String,
    access_token: String,
    spreadsheet_id: String,
    sheet_name: String,
}

impl SheetsApiConnector {
    pub fn new(
        access_token: impl Into<String>,
        spreadsheet_id: impl Into<String>,
        sheet_name: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            base_url: SHEETS_API_BASE.to_string(),
            access_token: access_token.into(),
            spreadsheet_id: spreadsheet_id.into(),
            sheet_name: sheet_name.into(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn append_range(&self) -> String {
        format!("{}!A:D", self.sheet_name)
    }

    fn append_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .with_context(|| format!("parse sheets api base url {}", self.base_url))?;
        let range_segment = format!("{}:append", self.append_range());
        url.path_segments_mut()
            .map_err(|_| anyhow!("sheets api base url cannot carry a path: {}", self.base_url))?
            .pop_if_empty()
            .extend([
                "spreadsheets",
                self.spreadsheet_id.as_str(),
                "values",
                range_segment.as_str(),
            ]);
        url.query_pairs_mut()
            .append_pair("valueInputOption", VALUE_INPUT_OPTION);
        Ok(url)
    }
}

#[async_trait(?Send)]
impl SheetSink for SheetsApiConnector {
    fn name(&self) -> &str {
        "sheets_api"
    }

    async fn append_row(&self, row: &SheetRow) -> Result<()> {
        let url = self.append_url()?;
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.access_token)
            .json(&json!({ "values": [row] }))
            .send()
            .await
            .context("sheets api append request")?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .context("read sheets api error body")?;
            return Err(anyhow!(
                "sheets api append failed: status={} body={}",
                status,
                redact_response_body(&body)
            ));
        }

        let subject_preview = row[1].chars().take(LOGGED_SUBJECT_CHARS).collect::<String>();
        info!(subject = %subject_preview, "appended row");
        Ok(())
    }
}
