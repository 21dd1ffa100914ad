use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::connectors::{redact_response_body, MailSource, MessageSummary};
use crate::message::MessagePayload;

pub const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1";
const UNREAD_LABEL: &str = "UNREAD";
const INBOX_QUERY: &str = "in:inbox";

/// Gmail REST client for the authenticated user's mailbox.
#[derive(Debug, Clone)]
pub struct GmailApiConnector {
    client: Client,
    base_url: String,
    access_token: String,
}

impl GmailApiConnector {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: GMAIL_API_BASE.to_string(),
            access_token: access_token.into(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn messages_url(&self) -> String {
        format!("{}/users/me/messages", self.base_url)
    }

    fn message_url(&self, id: &str) -> String {
        format!("{}/{id}", self.messages_url())
    }

    async fn send(&self, request: RequestBuilder, action: &str) -> Result<String> {
        let response = request
            .bearer_auth(&self.access_token)
            .header("accept", "application/json")
            .send()
            .await
            .with_context(|| format!("gmail api request: {action}"))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("read gmail api response body")?;
        if !status.is_success() {
            return Err(anyhow!(
                "gmail api {action} failed: status={} body={}",
                status,
                redact_response_body(&body)
            ));
        }

        Ok(body)
    }
}

#[async_trait(?Send)]
impl MailSource for GmailApiConnector {
    fn name(&self) -> &str {
        "gmail_api"
    }

    async fn list_unread(&self, limit: usize) -> Result<Vec<MessageSummary>> {
        let request = self
            .client
            .get(self.messages_url())
            .query(&[("labelIds", UNREAD_LABEL), ("q", INBOX_QUERY)])
            .query(&[("maxResults", limit)]);
        let body = self.send(request, "list unread messages").await?;
        let list: GmailMessageList =
            serde_json::from_str(&body).context("decode gmail message list")?;
        debug!(
            estimate = list.result_size_estimate.unwrap_or_default(),
            "listed unread gmail messages"
        );
        Ok(list.messages.unwrap_or_default())
    }

    async fn get_message(&self, id: &str) -> Result<MessagePayload> {
        let request = self
            .client
            .get(self.message_url(id))
            .query(&[("format", "full")]);
        let body = self.send(request, "get message").await?;
        serde_json::from_str(&body).with_context(|| format!("decode gmail message {id}"))
    }

    async fn mark_read(&self, id: &str) -> Result<()> {
        let request = self
            .client
            .post(format!("{}/modify", self.message_url(id)))
            .json(&json!({ "removeLabelIds": [UNREAD_LABEL] }));
        self.send(request, "mark message read").await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
struct GmailMessageList {
    messages: Option<Vec<MessageSummary>>,
    #[serde(rename = "resultSizeEstimate")]
    result_size_estimate: Option<u64>,
}
