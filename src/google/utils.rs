//! Gmail message utilities
//!
//! Message parsing, MIME construction and base64url helpers.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};

use crate::error::{GsuiteMcpError, Result, ValidationError};
use crate::google::types::{
    AttachmentInfo, Email, EmailContent, EmailSummary, Message, MessagePart, OutgoingEmail,
};

/// Validate an email address
pub fn validate_email(email: &str) -> bool {
    // Accept "Name <addr>" as well as bare addresses
    let email = match (email.find('<'), email.rfind('>')) {
        (Some(start), Some(end)) if start < end => &email[start + 1..end],
        _ => email,
    };

    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 {
        return false;
    }
    let (local, domain) = (parts[0], parts[1]);

    !local.is_empty()
        && !domain.is_empty()
        && !local.contains(' ')
        && !domain.contains(' ')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}

/// Encode text for MIME header (RFC 2047)
pub fn encode_mime_header(text: &str) -> String {
    if text.chars().all(|c| c.is_ascii() && c != '\r' && c != '\n') {
        return text.to_string();
    }

    format!(
        "=?UTF-8?B?{}?=",
        base64::engine::general_purpose::STANDARD.encode(text.as_bytes())
    )
}

/// Encode a raw email message for Gmail API (base64url, no padding)
pub fn encode_raw_message(message: &str) -> String {
    URL_SAFE_NO_PAD.encode(message.as_bytes())
}

/// Decode base64url data from Gmail API
/// Handles both padded and non-padded base64url encoding
pub fn decode_base64url(data: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(data)
        .or_else(|_| base64::engine::general_purpose::URL_SAFE.decode(data))
        .or_else(|_| base64::engine::general_purpose::STANDARD.decode(data))
        .map_err(|e| {
            GsuiteMcpError::Validation(ValidationError::InvalidParameter {
                name: "base64 data".to_string(),
                message: e.to_string(),
            })
        })
}

/// Decode base64url data to string
pub fn decode_base64url_string(data: &str) -> Result<String> {
    let bytes = decode_base64url(data)?;
    String::from_utf8(bytes).map_err(|e| {
        GsuiteMcpError::Validation(ValidationError::InvalidParameter {
            name: "UTF-8 content".to_string(),
            message: e.to_string(),
        })
    })
}

/// Recursively extract email body content from MIME message parts
pub fn extract_email_content(message_part: &MessagePart) -> EmailContent {
    let mut content = EmailContent::default();

    let mime_type = message_part.mime_type.as_deref().unwrap_or("");

    if let Some(data) = message_part.body.as_ref().and_then(|b| b.data.as_ref()) {
        // Binary parts are attachments, never body text
        if mime_type.starts_with("text/") {
            match decode_base64url_string(data) {
                Ok(decoded) => {
                    if mime_type == "text/plain" {
                        content.text = decoded;
                    } else if mime_type == "text/html" {
                        content.html = decoded;
                    }
                }
                Err(e) => {
                    tracing::debug!("Failed to decode {} part: {}", mime_type, e);
                }
            }
        }
    }

    for part in &message_part.parts {
        let nested = extract_email_content(part);
        content.text.push_str(&nested.text);
        content.html.push_str(&nested.html);
    }

    content
}

/// Extract attachment metadata from message parts, keyed by part ID
pub fn extract_attachments(message_part: &MessagePart) -> BTreeMap<String, AttachmentInfo> {
    let mut attachments = BTreeMap::new();
    extract_attachments_recursive(message_part, &mut attachments);
    attachments
}

fn extract_attachments_recursive(
    part: &MessagePart,
    attachments: &mut BTreeMap<String, AttachmentInfo>,
) {
    if let Some(attachment_id) = part.body.as_ref().and_then(|b| b.attachment_id.as_ref()) {
        let part_id = part.part_id.clone().unwrap_or_default();
        let filename = part
            .filename
            .clone()
            .filter(|f| !f.is_empty())
            .unwrap_or_else(|| format!("attachment-{}", part_id));

        attachments.insert(
            part_id.clone(),
            AttachmentInfo {
                part_id,
                attachment_id: attachment_id.clone(),
                filename,
                mime_type: part
                    .mime_type
                    .clone()
                    .unwrap_or_else(|| "application/octet-stream".to_string()),
                size: part.body.as_ref().map(|b| b.size).unwrap_or_default(),
            },
        );
    }

    for subpart in &part.parts {
        extract_attachments_recursive(subpart, attachments);
    }
}

/// Find header value by name (case-insensitive)
pub fn find_header<'a>(part: &'a MessagePart, name: &str) -> Option<&'a str> {
    part.headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

fn header(message: &Message, name: &str) -> String {
    message
        .payload
        .as_ref()
        .and_then(|p| find_header(p, name))
        .unwrap_or("")
        .to_string()
}

/// Summarize a metadata-format message for search results
pub fn summarize_message(message: &Message) -> EmailSummary {
    EmailSummary {
        id: message.id.clone(),
        thread_id: message.thread_id.clone().unwrap_or_default(),
        subject: header(message, "subject"),
        from: header(message, "from"),
        to: header(message, "to"),
        date: header(message, "date"),
        snippet: message.snippet.clone().unwrap_or_default(),
        label_ids: message.label_ids.clone(),
        error: None,
    }
}

/// Placeholder row for a matched message whose details could not be fetched
pub fn unavailable_summary(id: &str, error: &str) -> EmailSummary {
    EmailSummary {
        id: id.to_string(),
        thread_id: String::new(),
        subject: String::new(),
        from: String::new(),
        to: String::new(),
        date: String::new(),
        snippet: String::new(),
        label_ids: Vec::new(),
        error: Some(error.to_string()),
    }
}

/// Parse a full-format message into an [`Email`]
///
/// The body prefers text/plain, then text/html, then the snippet.
pub fn parse_message(message: &Message) -> Email {
    let snippet = message.snippet.clone().unwrap_or_default();
    let content = message
        .payload
        .as_ref()
        .map(extract_email_content)
        .unwrap_or_default();

    let body = if !content.text.is_empty() {
        content.text
    } else if !content.html.is_empty() {
        content.html
    } else {
        tracing::debug!(
            "Email {} body extraction returned empty, using snippet fallback",
            message.id
        );
        snippet.clone()
    };

    Email {
        id: message.id.clone(),
        thread_id: message.thread_id.clone().unwrap_or_default(),
        subject: header(message, "subject"),
        from: header(message, "from"),
        to: header(message, "to"),
        cc: header(message, "cc"),
        date: header(message, "date"),
        message_id: header(message, "message-id"),
        body,
        snippet,
        label_ids: message.label_ids.clone(),
    }
}

/// Subject line for a reply
pub fn reply_subject(subject: &str) -> String {
    if subject
        .get(..3)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("re:"))
    {
        subject.to_string()
    } else {
        format!("Re: {}", subject)
    }
}

/// Quote the original message below a reply body
pub fn quote_original(reply_body: &str, original: &Email) -> String {
    let quoted = original
        .body
        .lines()
        .map(|line| format!("> {}", line))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "{}\n\nOn {}, {} wrote:\n{}",
        reply_body, original.date, original.from, quoted
    )
}

/// Create a plain-text RFC 822 message
pub fn create_email_message(email: &OutgoingEmail) -> Result<String> {
    for address in email.to.iter().chain(email.cc.iter()) {
        if !validate_email(address) {
            return Err(GsuiteMcpError::Validation(ValidationError::InvalidEmail {
                email: address.clone(),
            }));
        }
    }

    let mut lines = Vec::new();

    lines.push("From: me".to_string());
    lines.push(format!("To: {}", email.to.join(", ")));

    if !email.cc.is_empty() {
        lines.push(format!("Cc: {}", email.cc.join(", ")));
    }

    lines.push(format!("Subject: {}", encode_mime_header(&email.subject)));

    if let Some(ref in_reply_to) = email.in_reply_to {
        lines.push(format!("In-Reply-To: {}", in_reply_to));
        lines.push(format!("References: {}", in_reply_to));
    }

    lines.push("MIME-Version: 1.0".to_string());
    lines.push("Content-Type: text/plain; charset=UTF-8".to_string());
    lines.push("Content-Transfer-Encoding: 8bit".to_string());
    lines.push(String::new());
    lines.push(email.body.clone());

    Ok(lines.join("\r\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::google::types::{Header, MessagePartBody};

    fn text_part(mime: &str, text: &str) -> MessagePart {
        MessagePart {
            mime_type: Some(mime.to_string()),
            body: Some(MessagePartBody {
                data: Some(URL_SAFE_NO_PAD.encode(text)),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_email() {
        assert!(validate_email("test@example.com"));
        assert!(validate_email("Jane Doe <jane@example.com>"));
        assert!(!validate_email("not-an-email"));
        assert!(!validate_email("user@domain."));
    }

    #[test]
    fn test_encode_mime_header_unicode() {
        assert_eq!(encode_mime_header("Hello"), "Hello");
        let encoded = encode_mime_header("Héllo");
        assert!(encoded.starts_with("=?UTF-8?B?"));
    }

    #[test]
    fn test_decode_base64url() {
        let decoded = decode_base64url_string("SGVsbG8gV29ybGQ").unwrap();
        assert_eq!(decoded, "Hello World");
    }

    #[test]
    fn test_parse_message_prefers_plain_text() {
        let message = Message {
            id: "m1".to_string(),
            thread_id: Some("t1".to_string()),
            label_ids: vec!["INBOX".to_string()],
            snippet: Some("snip".to_string()),
            payload: Some(MessagePart {
                mime_type: Some("multipart/alternative".to_string()),
                headers: vec![
                    Header {
                        name: "Subject".to_string(),
                        value: "Hi".to_string(),
                    },
                    Header {
                        name: "Message-ID".to_string(),
                        value: "<abc@mail>".to_string(),
                    },
                ],
                parts: vec![
                    text_part("text/plain", "plain body"),
                    text_part("text/html", "<p>html</p>"),
                ],
                ..Default::default()
            }),
            internal_date: None,
        };

        let email = parse_message(&message);
        assert_eq!(email.subject, "Hi");
        assert_eq!(email.body, "plain body");
        assert_eq!(email.message_id, "<abc@mail>");
        assert_eq!(email.thread_id, "t1");
    }

    #[test]
    fn test_parse_message_falls_back_to_snippet() {
        let message = Message {
            id: "m2".to_string(),
            thread_id: None,
            label_ids: vec![],
            snippet: Some("only a snippet".to_string()),
            payload: None,
            internal_date: None,
        };
        assert_eq!(parse_message(&message).body, "only a snippet");
    }

    #[test]
    fn test_extract_attachments_keyed_by_part() {
        let payload = MessagePart {
            parts: vec![
                text_part("text/plain", "body"),
                MessagePart {
                    part_id: Some("1".to_string()),
                    mime_type: Some("application/pdf".to_string()),
                    filename: Some("report.pdf".to_string()),
                    body: Some(MessagePartBody {
                        attachment_id: Some("ATT1".to_string()),
                        size: 2048,
                        data: None,
                    }),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };

        let attachments = extract_attachments(&payload);
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments["1"].attachment_id, "ATT1");
        assert_eq!(attachments["1"].filename, "report.pdf");
    }

    #[test]
    fn test_reply_subject() {
        assert_eq!(reply_subject("Lunch"), "Re: Lunch");
        assert_eq!(reply_subject("RE: Lunch"), "RE: Lunch");
    }

    #[test]
    fn test_create_email_message_with_reply_headers() {
        let email = OutgoingEmail {
            to: vec!["a@x.com".to_string()],
            cc: vec!["b@y.com".to_string()],
            subject: "Re: Lunch".to_string(),
            body: "Sounds good".to_string(),
            thread_id: Some("t1".to_string()),
            in_reply_to: Some("<abc@mail>".to_string()),
        };
        let raw = create_email_message(&email).unwrap();
        assert!(raw.contains("To: a@x.com"));
        assert!(raw.contains("Cc: b@y.com"));
        assert!(raw.contains("In-Reply-To: <abc@mail>"));
        assert!(raw.ends_with("Sounds good"));
    }

    #[test]
    fn test_create_email_message_rejects_bad_recipient() {
        let email = OutgoingEmail {
            to: vec!["nope".to_string()],
            ..Default::default()
        };
        assert!(create_email_message(&email).is_err());
    }
}
