//! Gmail tools

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{GoogleApiError, Result};
use crate::google::client::{Capability, ClientHandle, GmailApi};
use crate::google::types::OutgoingEmail;
use crate::google::utils::{quote_original, reply_subject};
use crate::mcp::normalize::{BatchOutcome, ToolOutput};
use crate::mcp::registry::{ToolDefinition, ToolHandler};
use crate::mcp::validate::ToolArguments;

use super::{object_schema, save_to_disk};

const DEFAULT_MAX_EMAILS: u32 = 100;
const MAX_EMAILS: u32 = 500;

/// Email with its attachments merged in, or `None` if it does not exist
async fn email_with_attachments(gmail: &dyn GmailApi, email_id: &str) -> Result<Option<Value>> {
    let Some(email) = gmail.get_message(email_id).await? else {
        return Ok(None);
    };
    let attachments = gmail.list_attachments(email_id).await?;

    let mut value = serde_json::to_value(email)?;
    value["attachments"] = serde_json::to_value(attachments)?;
    Ok(Some(value))
}

fn attachment_uri(message_id: &str, attachment_id: &str, filename: &str) -> String {
    format!(
        "attachment://gmail/{}/{}/{}",
        message_id,
        attachment_id,
        urlencoding::encode(filename)
    )
}

pub struct GetUserInfo;

#[async_trait]
impl ToolHandler for GetUserInfo {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "get_gmail_user_info",
            "Return the Gmail user info of the selected account",
            object_schema(json!({}), &[]),
        )
    }

    fn capability(&self) -> Capability {
        Capability::Gmail
    }

    async fn invoke(&self, _args: ToolArguments, client: ClientHandle) -> Result<ToolOutput> {
        let info = client.gmail()?.user_info().await?;
        Ok(ToolOutput::Json(info))
    }
}

pub struct QueryEmails;

#[async_trait]
impl ToolHandler for QueryEmails {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "query_gmail_emails",
            "Query Gmail emails based on an optional search query. Returns emails in reverse chronological order (newest first).",
            object_schema(
                json!({
                    "query": {
                        "type": "string",
                        "description": "Gmail search query (optional). Examples:\n- a $string: Search email body, subject, and sender information for $string\n- 'is:unread' for unread emails\n- 'from:example@gmail.com' for emails from a specific sender\n- 'newer_than:2d' for emails from last 2 days\n- 'has:attachment' for emails with attachments"
                    },
                    "max_results": {
                        "type": "integer",
                        "description": "Maximum number of emails to retrieve (1-500)",
                        "minimum": 1,
                        "maximum": MAX_EMAILS,
                        "default": DEFAULT_MAX_EMAILS
                    }
                }),
                &[],
            ),
        )
    }

    fn capability(&self) -> Capability {
        Capability::Gmail
    }

    async fn invoke(&self, args: ToolArguments, client: ClientHandle) -> Result<ToolOutput> {
        #[derive(Deserialize)]
        struct Args {
            query: Option<String>,
            #[serde(default = "default_max_emails")]
            max_results: u32,
        }

        fn default_max_emails() -> u32 {
            DEFAULT_MAX_EMAILS
        }

        let args: Args = args.parse()?;
        let emails = client
            .gmail()?
            .query_messages(args.query.as_deref(), args.max_results)
            .await?;

        if emails.is_empty() {
            return Ok(ToolOutput::Empty(
                "No emails found matching the query.".to_string(),
            ));
        }
        Ok(ToolOutput::Json(serde_json::to_value(emails)?))
    }
}

pub struct GetEmail;

#[async_trait]
impl ToolHandler for GetEmail {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "get_gmail_email",
            "Retrieves a complete Gmail email message by its ID, including the full message body and attachment IDs.",
            object_schema(
                json!({
                    "email_id": {
                        "type": "string",
                        "description": "The ID of the Gmail message to retrieve"
                    }
                }),
                &["email_id"],
            ),
        )
    }

    fn capability(&self) -> Capability {
        Capability::Gmail
    }

    async fn invoke(&self, args: ToolArguments, client: ClientHandle) -> Result<ToolOutput> {
        #[derive(Deserialize)]
        struct Args {
            email_id: String,
        }

        let args: Args = args.parse()?;
        match email_with_attachments(client.gmail()?, &args.email_id).await? {
            Some(email) => Ok(ToolOutput::Json(email)),
            None => Ok(ToolOutput::Empty(format!(
                "Email with ID {} not found.",
                args.email_id
            ))),
        }
    }
}

pub struct BulkGetEmails;

#[async_trait]
impl ToolHandler for BulkGetEmails {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "bulk_get_gmail_emails",
            "Retrieves multiple Gmail email messages by their IDs in a single request, including the full message bodies and attachment IDs.",
            object_schema(
                json!({
                    "email_ids": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "List of Gmail message IDs to retrieve"
                    }
                }),
                &["email_ids"],
            ),
        )
    }

    fn capability(&self) -> Capability {
        Capability::Gmail
    }

    async fn invoke(&self, args: ToolArguments, client: ClientHandle) -> Result<ToolOutput> {
        #[derive(Deserialize)]
        struct Args {
            email_ids: Vec<String>,
        }

        let args: Args = args.parse()?;
        let gmail = client.gmail()?;

        let mut outcomes = Vec::with_capacity(args.email_ids.len());
        for email_id in args.email_ids {
            let outcome = match email_with_attachments(gmail, &email_id).await {
                Ok(Some(email)) => BatchOutcome::success(&email_id, email),
                Ok(None) => BatchOutcome::failure(&email_id, "email not found"),
                Err(e) => {
                    tracing::warn!("Failed to fetch email {}: {}", email_id, e);
                    BatchOutcome::failure(&email_id, e.to_string())
                }
            };
            outcomes.push(outcome);
        }

        Ok(ToolOutput::Batch(outcomes))
    }
}

pub struct CreateDraft;

#[async_trait]
impl ToolHandler for CreateDraft {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "create_gmail_draft",
            "Creates a draft email message from scratch in Gmail with specified recipient, subject, body, and optional CC recipients.\n\nDo NOT use this tool when you want to draft or send a REPLY to an existing message. This tool does NOT include any previous message content. Use the reply_gmail_email tool with send=false instead.",
            object_schema(
                json!({
                    "to": {
                        "type": "string",
                        "description": "Email address of the recipient"
                    },
                    "subject": {
                        "type": "string",
                        "description": "Subject line of the email"
                    },
                    "body": {
                        "type": "string",
                        "description": "Body content of the email"
                    },
                    "cc": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Optional list of email addresses to CC"
                    }
                }),
                &["to", "subject", "body"],
            ),
        )
    }

    fn capability(&self) -> Capability {
        Capability::Gmail
    }

    async fn invoke(&self, args: ToolArguments, client: ClientHandle) -> Result<ToolOutput> {
        #[derive(Deserialize)]
        struct Args {
            to: String,
            subject: String,
            body: String,
            #[serde(default)]
            cc: Vec<String>,
        }

        let args: Args = args.parse()?;
        let draft = client
            .gmail()?
            .create_draft(OutgoingEmail {
                to: vec![args.to],
                cc: args.cc,
                subject: args.subject,
                body: args.body,
                ..Default::default()
            })
            .await?;

        Ok(ToolOutput::Json(serde_json::to_value(draft)?))
    }
}

pub struct DeleteDraft;

#[async_trait]
impl ToolHandler for DeleteDraft {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "delete_gmail_draft",
            "Deletes a Gmail draft message by its ID. This action cannot be undone.",
            object_schema(
                json!({
                    "draft_id": {
                        "type": "string",
                        "description": "The ID of the draft to delete"
                    }
                }),
                &["draft_id"],
            ),
        )
    }

    fn capability(&self) -> Capability {
        Capability::Gmail
    }

    async fn invoke(&self, args: ToolArguments, client: ClientHandle) -> Result<ToolOutput> {
        #[derive(Deserialize)]
        struct Args {
            draft_id: String,
        }

        let args: Args = args.parse()?;
        client.gmail()?.delete_draft(&args.draft_id).await?;
        Ok(ToolOutput::Text(format!(
            "Successfully deleted draft {}",
            args.draft_id
        )))
    }
}

pub struct ReplyEmail;

#[async_trait]
impl ToolHandler for ReplyEmail {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "reply_gmail_email",
            "Creates a reply to an existing Gmail email message and either sends it or saves as draft.\n\nUse this tool if you want to draft a reply. Use the 'cc' argument if you want to perform a \"reply all\".",
            object_schema(
                json!({
                    "original_message_id": {
                        "type": "string",
                        "description": "The ID of the Gmail message to reply to"
                    },
                    "reply_body": {
                        "type": "string",
                        "description": "The body content of your reply message"
                    },
                    "send": {
                        "type": "boolean",
                        "description": "If true, sends the reply immediately. If false, saves as draft.",
                        "default": false
                    },
                    "cc": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Optional list of email addresses to CC on the reply"
                    }
                }),
                &["original_message_id", "reply_body"],
            ),
        )
    }

    fn capability(&self) -> Capability {
        Capability::Gmail
    }

    async fn invoke(&self, args: ToolArguments, client: ClientHandle) -> Result<ToolOutput> {
        #[derive(Deserialize)]
        struct Args {
            original_message_id: String,
            reply_body: String,
            #[serde(default)]
            send: bool,
            #[serde(default)]
            cc: Vec<String>,
        }

        let args: Args = args.parse()?;
        let gmail = client.gmail()?;

        let original = gmail
            .get_message(&args.original_message_id)
            .await?
            .ok_or_else(|| GoogleApiError::MessageNotFound {
                message_id: args.original_message_id.clone(),
            })?;

        let reply = OutgoingEmail {
            to: vec![original.from.clone()],
            cc: args.cc,
            subject: reply_subject(&original.subject),
            body: quote_original(&args.reply_body, &original),
            thread_id: Some(original.thread_id.clone()),
            in_reply_to: Some(original.message_id.clone()).filter(|id| !id.is_empty()),
        };

        let result = if args.send {
            gmail.send_message(reply).await?
        } else {
            serde_json::to_value(gmail.create_draft(reply).await?)?
        };
        Ok(ToolOutput::Json(result))
    }
}

pub struct GetAttachment;

#[async_trait]
impl ToolHandler for GetAttachment {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "get_gmail_attachment",
            "Retrieves a Gmail attachment by its ID. Returns the content inline unless save_to_disk is given.",
            object_schema(
                json!({
                    "message_id": {
                        "type": "string",
                        "description": "The ID of the Gmail message containing the attachment"
                    },
                    "attachment_id": {
                        "type": "string",
                        "description": "The ID of the attachment to retrieve"
                    },
                    "mime_type": {
                        "type": "string",
                        "description": "The MIME type of the attachment"
                    },
                    "filename": {
                        "type": "string",
                        "description": "The filename of the attachment"
                    },
                    "save_to_disk": {
                        "type": "string",
                        "description": "The fullpath to save the attachment to disk. If not provided, the attachment is returned as a resource."
                    }
                }),
                &["message_id", "attachment_id", "mime_type", "filename"],
            ),
        )
    }

    fn capability(&self) -> Capability {
        Capability::Gmail
    }

    async fn invoke(&self, args: ToolArguments, client: ClientHandle) -> Result<ToolOutput> {
        #[derive(Deserialize)]
        struct Args {
            message_id: String,
            attachment_id: String,
            mime_type: String,
            filename: String,
            save_to_disk: Option<String>,
        }

        let args: Args = args.parse()?;
        let data = client
            .gmail()?
            .get_attachment(&args.message_id, &args.attachment_id)
            .await?
            .ok_or_else(|| GoogleApiError::AttachmentNotFound {
                attachment_id: args.attachment_id.clone(),
            })?;

        if let Some(path) = args.save_to_disk {
            save_to_disk(&path, &data).await?;
            return Ok(ToolOutput::Text(format!("Attachment saved to: {}", path)));
        }

        Ok(ToolOutput::Blob {
            data,
            uri: attachment_uri(&args.message_id, &args.attachment_id, &args.filename),
            mime_type: args.mime_type,
        })
    }
}

pub struct BulkSaveAttachments;

#[async_trait]
impl ToolHandler for BulkSaveAttachments {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "bulk_save_gmail_attachments",
            "Saves multiple Gmail attachments to disk by their message IDs and part IDs in a single request.",
            object_schema(
                json!({
                    "attachments": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "message_id": {
                                    "type": "string",
                                    "description": "ID of the Gmail message containing the attachment"
                                },
                                "part_id": {
                                    "type": "string",
                                    "description": "ID of the part containing the attachment"
                                },
                                "save_path": {
                                    "type": "string",
                                    "description": "Path where the attachment should be saved"
                                }
                            },
                            "required": ["message_id", "part_id", "save_path"]
                        }
                    }
                }),
                &["attachments"],
            ),
        )
    }

    fn capability(&self) -> Capability {
        Capability::Gmail
    }

    async fn invoke(&self, args: ToolArguments, client: ClientHandle) -> Result<ToolOutput> {
        #[derive(Deserialize)]
        struct AttachmentRequest {
            message_id: String,
            part_id: String,
            save_path: String,
        }

        #[derive(Deserialize)]
        struct Args {
            attachments: Vec<AttachmentRequest>,
        }

        let args: Args = args.parse()?;
        let gmail = client.gmail()?;

        let mut outcomes = Vec::with_capacity(args.attachments.len());
        for request in args.attachments {
            let item = format!("{}/{}", request.message_id, request.part_id);
            let outcome = match save_attachment(gmail, &request.message_id, &request.part_id, &request.save_path).await {
                Ok(value) => BatchOutcome::success(item, value),
                Err(e) => {
                    tracing::warn!("Failed to save attachment {}: {}", item, e);
                    BatchOutcome::failure(item, e.to_string())
                }
            };
            outcomes.push(outcome);
        }

        Ok(ToolOutput::Batch(outcomes))
    }
}

/// Resolve a message part to its attachment and write it to disk
async fn save_attachment(
    gmail: &dyn GmailApi,
    message_id: &str,
    part_id: &str,
    save_path: &str,
) -> Result<Value> {
    let attachments = gmail.list_attachments(message_id).await?;
    let info = attachments
        .get(part_id)
        .ok_or_else(|| GoogleApiError::AttachmentNotFound {
            attachment_id: format!("part {} of message {}", part_id, message_id),
        })?;

    let data = gmail
        .get_attachment(message_id, &info.attachment_id)
        .await?
        .ok_or_else(|| GoogleApiError::AttachmentNotFound {
            attachment_id: info.attachment_id.clone(),
        })?;

    save_to_disk(save_path, &data).await?;

    Ok(json!({
        "message_id": message_id,
        "part_id": part_id,
        "filename": info.filename,
        "saved_to": save_path,
    }))
}

pub struct GetLabels;

#[async_trait]
impl ToolHandler for GetLabels {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "get_gmail_labels",
            "Retrieves all labels in the Gmail account",
            object_schema(json!({}), &[]),
        )
    }

    fn capability(&self) -> Capability {
        Capability::Gmail
    }

    async fn invoke(&self, _args: ToolArguments, client: ClientHandle) -> Result<ToolOutput> {
        let labels = client.gmail()?.list_labels().await?;
        if labels.is_empty() {
            return Ok(ToolOutput::Empty("No labels found.".to_string()));
        }
        Ok(ToolOutput::Json(Value::Array(labels)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attachment_uri_escapes_filename() {
        assert_eq!(
            attachment_uri("m1", "a1", "Q3 report.pdf"),
            "attachment://gmail/m1/a1/Q3%20report.pdf"
        );
    }

    #[test]
    fn test_query_schema_bounds_max_results() {
        let schema = QueryEmails.definition().input_schema;
        let max_results = &schema["properties"]["max_results"];
        assert_eq!(max_results["minimum"], 1);
        assert_eq!(max_results["maximum"], 500);
        assert_eq!(max_results["default"], 100);
    }

    #[test]
    fn test_reply_requires_message_and_body() {
        let schema = ReplyEmail.definition().input_schema;
        assert_eq!(schema["required"], json!(["original_message_id", "reply_body"]));
        assert_eq!(schema["properties"]["send"]["default"], false);
    }
}
