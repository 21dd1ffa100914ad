use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

use crate::message::{MessagePayload, SheetRow};

pub mod gmail_api;
pub mod sheets_api;
#[cfg(test)]
pub(crate) mod stub_server;

pub use gmail_api::GmailApiConnector;
pub use sheets_api::SheetsApiConnector;

const REDACTED_BODY_MAX_LEN: usize = 200;

/// Entry of the unread listing; only drives iteration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MessageSummary {
    pub id: String,
}

/// Mailbox the sync job reads from.
#[async_trait(?Send)]
pub trait MailSource {
    fn name(&self) -> &str;

    /// Unread inbox messages, at most `limit`, in provider order.
    async fn list_unread(&self, limit: usize) -> Result<Vec<MessageSummary>>;

    async fn get_message(&self, id: &str) -> Result<MessagePayload>;

    async fn mark_read(&self, id: &str) -> Result<()>;
}

/// Spreadsheet the sync job appends rows to.
#[async_trait(?Send)]
pub trait SheetSink {
    fn name(&self) -> &str;

    async fn append_row(&self, row: &SheetRow) -> Result<()>;
}

pub(crate) fn redact_response_body(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(REDACTED_BODY_MAX_LEN) {
        Some((cut, _)) => format!(
            "{}…[truncated {} bytes]",
            &trimmed[..cut],
            trimmed.len()
        ),
        None => trimmed.to_string(),
    }
}
