//! Google API type definitions
//!
//! Wire types mirror the Gmail and Calendar API responses. The parsed types
//! ([`EmailSummary`], [`Email`], [`AttachmentInfo`]) are what tools return.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A Gmail message part (MIME part)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MessagePart {
    /// Part ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub part_id: Option<String>,

    /// MIME type of this part
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,

    /// Filename for attachments
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,

    /// Headers for this part
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<Header>,

    /// Body of this part
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<MessagePartBody>,

    /// Nested parts (for multipart messages)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parts: Vec<MessagePart>,
}

/// Header in a message part
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// Body of a message part
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MessagePartBody {
    /// Attachment ID (if this is an attachment)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment_id: Option<String>,

    /// Size in bytes
    #[serde(default)]
    pub size: i64,

    /// Base64url-encoded data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

/// A Gmail message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub label_ids: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,

    /// Message payload (MIME structure)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<MessagePart>,

    /// Internal date (epoch millis)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub internal_date: Option<String>,
}

/// List of messages response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageList {
    #[serde(default)]
    pub messages: Vec<MessageRef>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

/// Reference to a message (id and thread_id only)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRef {
    pub id: String,
    pub thread_id: String,
}

/// List of labels response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelList {
    #[serde(default)]
    pub labels: Vec<Value>,
}

/// Gmail draft
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Draft {
    pub id: String,
    pub message: Value,
}

/// Request to send or create a message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    /// Raw RFC822 message (base64url encoded)
    pub raw: String,

    /// Thread ID (for replies)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
}

/// Request to create a draft
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDraftRequest {
    pub message: SendMessageRequest,
}

/// Attachment data response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentData {
    #[serde(default)]
    pub size: i64,

    /// Base64url-encoded data
    pub data: String,
}

/// Extracted email content
#[derive(Debug, Clone, Default)]
pub struct EmailContent {
    pub text: String,
    pub html: String,
}

/// Search result row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailSummary {
    pub id: String,
    pub thread_id: String,
    pub subject: String,
    pub from: String,
    pub to: String,
    pub date: String,
    pub snippet: String,
    #[serde(default)]
    pub label_ids: Vec<String>,

    /// Why the message details could not be fetched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A fully parsed email
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Email {
    pub id: String,
    pub thread_id: String,
    pub subject: String,
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub cc: String,
    pub date: String,
    /// RFC 822 Message-ID header, used for reply threading
    #[serde(default)]
    pub message_id: String,
    pub body: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub label_ids: Vec<String>,
}

/// Attachment metadata for one message part
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentInfo {
    pub part_id: String,
    pub attachment_id: String,
    pub filename: String,
    pub mime_type: String,
    pub size: i64,
}

/// A new outgoing message (draft, send or reply)
#[derive(Debug, Clone, Default)]
pub struct OutgoingEmail {
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub subject: String,
    pub body: String,
    pub thread_id: Option<String>,
    pub in_reply_to: Option<String>,
}

/// Calendar list response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarList {
    #[serde(default)]
    pub items: Vec<CalendarEntry>,
}

/// One entry of the user's calendar list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEntry {
    pub id: String,

    #[serde(default)]
    pub summary: String,

    #[serde(default)]
    pub primary: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_role: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Events list response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventList {
    #[serde(default)]
    pub items: Vec<Event>,
}

/// Start or end of an event. Exactly one of `date_time` / `date` is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDateTime {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_time: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

impl EventDateTime {
    /// Build from an RFC 3339 timestamp, or a bare date for all-day events
    pub fn parse(value: &str, time_zone: Option<&str>) -> Self {
        if value.contains('T') {
            Self {
                date_time: Some(value.to_string()),
                date: None,
                time_zone: Some(time_zone.unwrap_or("UTC").to_string()),
            }
        } else {
            Self {
                date_time: None,
                date: Some(value.to_string()),
                time_zone: None,
            }
        }
    }
}

/// Event attendee
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attendee {
    pub email: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_status: Option<String>,
}

/// A calendar event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    /// Cancelled instances may omit start and end
    #[serde(default)]
    pub start: EventDateTime,

    #[serde(default)]
    pub end: EventDateTime,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attendees: Vec<Attendee>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub organizer: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub hangout_link: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub recurring_event_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub html_link: Option<String>,
}

/// Event listing parameters
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub calendar_id: String,
    pub time_min: Option<String>,
    pub time_max: Option<String>,
    pub max_results: u32,
    pub show_deleted: bool,
    pub query: Option<String>,
}
