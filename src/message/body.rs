use anyhow::{Context, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use html2text::render::text_renderer::TrivialDecorator;
use tracing::warn;

use crate::message::MessagePart;

const TEXT_PLAIN: &str = "text/plain";
const TEXT_HTML: &str = "text/html";
/// Nesting limit for multipart trees; deeper subtrees are ignored.
pub const MAX_PART_DEPTH: usize = 32;
/// Wide enough that html2text never wraps a paragraph.
const HTML_RENDER_WIDTH: usize = 10_000;

/// Extract readable text from a message part tree.
///
/// Plain-text children are concatenated in order, recursing into nested
/// multiparts. When that yields nothing but whitespace, the first HTML child
/// is stripped to text instead. A leaf part decodes its own body regardless
/// of media type.
pub fn extract_body(part: &MessagePart) -> String {
    extract_at_depth(part, 0)
}

fn extract_at_depth(part: &MessagePart, depth: usize) -> String {
    let mut body = String::new();

    if let Some(children) = &part.parts {
        for child in children {
            if child.is_mime(TEXT_PLAIN) {
                if let Some(text) = decode_part(child) {
                    body.push_str(&text);
                }
            } else if child.parts.is_some() {
                if depth + 1 >= MAX_PART_DEPTH {
                    warn!(depth, "ignoring message parts nested beyond depth limit");
                    continue;
                }
                body.push_str(&extract_at_depth(child, depth + 1));
            }
        }
    } else if let Some(text) = decode_part(part) {
        body = text;
    }

    if body.trim().is_empty() {
        if let Some(html_part) = part
            .parts
            .as_deref()
            .and_then(|children| children.iter().find(|child| child.is_mime(TEXT_HTML)))
        {
            body = decode_part(html_part)
                .map(|html| strip_markup(&html))
                .unwrap_or_default();
        }
    }

    body.trim().to_string()
}

fn decode_part(part: &MessagePart) -> Option<String> {
    let data = part.body_data()?;
    match decode_body_data(data) {
        Ok(text) => Some(text),
        Err(error) => {
            warn!(
                mime_type = part.mime_type.as_deref().unwrap_or(""),
                error = %format!("{error:#}"),
                "skipping undecodable message part"
            );
            None
        }
    }
}

/// Decode base64url body data, with or without padding, as UTF-8.
pub fn decode_body_data(data: &str) -> Result<String> {
    let bytes = URL_SAFE_NO_PAD
        .decode(data.trim().trim_end_matches('='))
        .context("base64url decode message body data")?;
    String::from_utf8(bytes).context("utf8 decode message body data")
}

/// Reduce HTML to its visible text runs joined by single spaces.
///
/// Rendering failures are logged and yield an empty string.
pub fn strip_markup(html: &str) -> String {
    let rendered = html2text::config::with_decorator(TrivialDecorator::new())
        .string_from_read(html.as_bytes(), HTML_RENDER_WIDTH);
    match rendered {
        Ok(text) => text.split_whitespace().collect::<Vec<_>>().join(" "),
        Err(error) => {
            warn!(error = %error, "unable to render html message part");
            String::new()
        }
    }
}
