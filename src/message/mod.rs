use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod body;

pub use body::extract_body;

/// Placeholder written for headers the message does not carry.
pub const UNKNOWN_HEADER: &str = "Unknown";
pub const CONTENT_MAX_CHARS: usize = 500;
pub const TRUNCATION_MARKER: &str = "...";

/// One spreadsheet row in column order `[from, subject, date, content]`.
pub type SheetRow = [String; 4];

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("message {0} has no payload")]
    MissingPayload(String),
}

/// Full message as returned by the mail provider (`format=full`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub id: String,
    #[serde(default)]
    pub payload: Option<MessagePart>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessagePart {
    #[serde(rename = "mimeType", default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub headers: Option<Vec<MessageHeader>>,
    #[serde(default)]
    pub body: Option<PartBody>,
    #[serde(default)]
    pub parts: Option<Vec<MessagePart>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartBody {
    /// base64url-encoded content.
    #[serde(default)]
    pub data: Option<String>,
}

impl MessagePart {
    /// Case-insensitive header lookup; first match wins.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .as_deref()
            .unwrap_or_default()
            .iter()
            .find(|header| header.name.eq_ignore_ascii_case(name))
            .map(|header| header.value.as_str())
    }

    pub fn is_mime(&self, mime_type: &str) -> bool {
        self.mime_type
            .as_deref()
            .is_some_and(|value| value.trim().eq_ignore_ascii_case(mime_type))
    }

    pub fn body_data(&self) -> Option<&str> {
        self.body
            .as_ref()
            .and_then(|body| body.data.as_deref())
            .filter(|data| !data.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedRecord {
    pub id: String,
    pub from: String,
    pub subject: String,
    pub date: String,
    pub content: String,
}

impl ParsedRecord {
    pub fn from_message(message: &MessagePayload) -> Result<Self, ParseError> {
        let payload = message
            .payload
            .as_ref()
            .ok_or_else(|| ParseError::MissingPayload(message.id.clone()))?;

        Ok(Self {
            id: message.id.clone(),
            from: header_or_unknown(payload, "From"),
            subject: header_or_unknown(payload, "Subject"),
            date: header_or_unknown(payload, "Date"),
            content: truncate_content(extract_body(payload)),
        })
    }

    pub fn row(&self) -> SheetRow {
        [
            self.from.clone(),
            self.subject.clone(),
            self.date.clone(),
            self.content.clone(),
        ]
    }
}

fn header_or_unknown(payload: &MessagePart, name: &str) -> String {
    payload
        .header(name)
        .map(str::to_string)
        .unwrap_or_else(|| UNKNOWN_HEADER.to_string())
}

fn truncate_content(content: String) -> String {
    match content.char_indices().nth(CONTENT_MAX_CHARS) {
        Some((cut, _)) => format!("{}{TRUNCATION_MARKER}", &content[..cut]),
        None => content,
    }
}
