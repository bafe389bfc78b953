//! Google API clients
//!
//! A [`ClientFactory`] turns a credential into a [`ClientHandle`] for one
//! capability. Tool handlers only see the [`GmailApi`] and [`CalendarApi`]
//! traits; the reqwest-backed clients below are the production
//! implementations.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::google::{
    scopes, CALENDAR_API_BASE_URL, GMAIL_API_BASE_URL, USERINFO_URL, USER_ID,
};
use crate::error::{GoogleApiError, GsuiteMcpError, Result};
use crate::google::auth::Credential;
use crate::google::types::*;
use crate::google::utils::{
    create_email_message, decode_base64url, encode_raw_message, extract_attachments,
    parse_message, summarize_message, unavailable_summary,
};

/// A remote API surface a tool needs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Gmail,
    Calendar,
}

impl Capability {
    pub fn name(&self) -> &'static str {
        match self {
            Capability::Gmail => "gmail",
            Capability::Calendar => "calendar",
        }
    }

    pub fn version(&self) -> &'static str {
        match self {
            Capability::Gmail => "v1",
            Capability::Calendar => "v3",
        }
    }

    /// Scopes a credential must carry to build this client
    pub fn required_scopes(&self) -> &'static [&'static str] {
        match self {
            Capability::Gmail => &[scopes::GMAIL, scopes::USERINFO_EMAIL, scopes::OPENID],
            Capability::Calendar => &[scopes::CALENDAR, scopes::USERINFO_EMAIL, scopes::OPENID],
        }
    }
}

/// Gmail operations used by the tools
#[async_trait]
pub trait GmailApi: Send + Sync {
    /// Profile of the authenticated user
    async fn user_info(&self) -> Result<Value>;

    /// Messages matching a search query, newest first
    async fn query_messages(&self, query: Option<&str>, max_results: u32)
        -> Result<Vec<EmailSummary>>;

    /// A full message, or `None` if it does not exist
    async fn get_message(&self, message_id: &str) -> Result<Option<Email>>;

    /// Attachment metadata of a message, keyed by part ID
    async fn list_attachments(&self, message_id: &str)
        -> Result<BTreeMap<String, AttachmentInfo>>;

    /// Raw attachment bytes, or `None` if it does not exist
    async fn get_attachment(&self, message_id: &str, attachment_id: &str)
        -> Result<Option<Vec<u8>>>;

    async fn create_draft(&self, email: OutgoingEmail) -> Result<Draft>;

    async fn delete_draft(&self, draft_id: &str) -> Result<()>;

    async fn send_message(&self, email: OutgoingEmail) -> Result<Value>;

    async fn list_labels(&self) -> Result<Vec<Value>>;
}

/// Calendar operations used by the tools
#[async_trait]
pub trait CalendarApi: Send + Sync {
    async fn list_calendars(&self) -> Result<Vec<CalendarEntry>>;

    async fn list_events(&self, query: &EventQuery) -> Result<Vec<Event>>;

    async fn create_event(
        &self,
        calendar_id: &str,
        event: &Event,
        send_notifications: bool,
    ) -> Result<Event>;

    async fn delete_event(
        &self,
        calendar_id: &str,
        event_id: &str,
        send_notifications: bool,
    ) -> Result<()>;
}

/// An authenticated client for one capability
#[derive(Clone)]
pub enum ClientHandle {
    Gmail(Arc<dyn GmailApi>),
    Calendar(Arc<dyn CalendarApi>),
}

impl ClientHandle {
    pub fn capability(&self) -> Capability {
        match self {
            ClientHandle::Gmail(_) => Capability::Gmail,
            ClientHandle::Calendar(_) => Capability::Calendar,
        }
    }

    pub fn gmail(&self) -> Result<&dyn GmailApi> {
        match self {
            ClientHandle::Gmail(client) => Ok(client.as_ref()),
            _ => Err(self.wrong_capability(Capability::Gmail)),
        }
    }

    pub fn calendar(&self) -> Result<&dyn CalendarApi> {
        match self {
            ClientHandle::Calendar(client) => Ok(client.as_ref()),
            _ => Err(self.wrong_capability(Capability::Calendar)),
        }
    }

    fn wrong_capability(&self, expected: Capability) -> GsuiteMcpError {
        GsuiteMcpError::Google(GoogleApiError::WrongCapability {
            expected: expected.name(),
            actual: self.capability().name(),
        })
    }
}

/// Builds authenticated clients from credentials
pub trait ClientFactory: Send + Sync {
    fn build(&self, capability: Capability, credential: &Credential) -> Result<ClientHandle>;
}

/// Factory for the reqwest-backed Google clients
#[derive(Clone, Default)]
pub struct GoogleClientFactory {
    http_client: reqwest::Client,
}

impl GoogleClientFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ClientFactory for GoogleClientFactory {
    fn build(&self, capability: Capability, credential: &Credential) -> Result<ClientHandle> {
        let api = ApiTransport {
            http_client: self.http_client.clone(),
            access_token: credential.access_token.clone(),
        };

        tracing::debug!(
            "Building {} {} client for {}",
            capability.name(),
            capability.version(),
            credential.account_email
        );

        Ok(match capability {
            Capability::Gmail => ClientHandle::Gmail(Arc::new(GmailClient { api })),
            Capability::Calendar => ClientHandle::Calendar(Arc::new(CalendarClient { api })),
        })
    }
}

/// Bearer-authenticated HTTP access shared by the concrete clients
struct ApiTransport {
    http_client: reqwest::Client,
    access_token: String,
}

impl ApiTransport {
    /// Turn a non-success response into a request error
    async fn check(response: reqwest::Response, action: &str) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        Err(GsuiteMcpError::Google(GoogleApiError::RequestFailed {
            message: format!("Failed to {} ({}): {}", action, status, text),
        }))
    }

    async fn get<T: DeserializeOwned>(&self, url: &str, action: &str) -> Result<T> {
        let response = self
            .http_client
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await?;

        Ok(Self::check(response, action).await?.json().await?)
    }

    /// GET that maps 404 to `None`
    async fn get_optional<T: DeserializeOwned>(&self, url: &str, action: &str) -> Result<Option<T>> {
        let response = self
            .http_client
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        Ok(Some(Self::check(response, action).await?.json().await?))
    }

    async fn post<B: serde::Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
        action: &str,
    ) -> Result<T> {
        let response = self
            .http_client
            .post(url)
            .bearer_auth(&self.access_token)
            .json(body)
            .send()
            .await?;

        Ok(Self::check(response, action).await?.json().await?)
    }

    async fn delete(&self, url: &str, action: &str) -> Result<()> {
        let response = self
            .http_client
            .delete(url)
            .bearer_auth(&self.access_token)
            .send()
            .await?;

        Self::check(response, action).await?;
        Ok(())
    }
}

/// One row per matched message; failed fetches keep their slot with the error
fn summarize_fetched(fetched: Vec<(String, Result<Message>)>) -> Vec<EmailSummary> {
    let total = fetched.len();
    let summaries: Vec<EmailSummary> = fetched
        .into_iter()
        .map(|(id, result)| match result {
            Ok(message) => summarize_message(&message),
            Err(e) => unavailable_summary(&id, &e.to_string()),
        })
        .collect();

    let failed = summaries.iter().filter(|s| s.error.is_some()).count();
    if failed > 0 {
        tracing::warn!(
            "Metadata unavailable for {} of {} matched messages",
            failed,
            total
        );
    }

    summaries
}

/// Gmail API client
struct GmailClient {
    api: ApiTransport,
}

impl GmailClient {
    fn messages_url() -> String {
        format!("{}/users/{}/messages", GMAIL_API_BASE_URL, USER_ID)
    }

    fn drafts_url() -> String {
        format!("{}/users/{}/drafts", GMAIL_API_BASE_URL, USER_ID)
    }

    async fn fetch_full(&self, message_id: &str) -> Result<Option<Message>> {
        let url = format!(
            "{}/{}?format=full",
            Self::messages_url(),
            urlencoding::encode(message_id)
        );
        self.api.get_optional(&url, "get message").await
    }

    fn raw_request(email: &OutgoingEmail) -> Result<SendMessageRequest> {
        let raw_message = create_email_message(email)?;
        Ok(SendMessageRequest {
            raw: encode_raw_message(&raw_message),
            thread_id: email.thread_id.clone(),
        })
    }
}

#[async_trait]
impl GmailApi for GmailClient {
    async fn user_info(&self) -> Result<Value> {
        self.api.get(USERINFO_URL, "get user info").await
    }

    async fn query_messages(
        &self,
        query: Option<&str>,
        max_results: u32,
    ) -> Result<Vec<EmailSummary>> {
        let url = format!(
            "{}?q={}&maxResults={}",
            Self::messages_url(),
            urlencoding::encode(query.unwrap_or("")),
            max_results
        );

        let message_list: MessageList = self.api.get(&url, "search messages").await?;

        let mut fetched = Vec::with_capacity(message_list.messages.len());
        for msg_ref in message_list.messages {
            let url = format!(
                "{}/{}?format=metadata&metadataHeaders=Subject&metadataHeaders=From&metadataHeaders=To&metadataHeaders=Date",
                Self::messages_url(),
                msg_ref.id
            );

            let result = self.api.get::<Message>(&url, "get message metadata").await;
            fetched.push((msg_ref.id, result));
        }

        Ok(summarize_fetched(fetched))
    }

    async fn get_message(&self, message_id: &str) -> Result<Option<Email>> {
        Ok(self.fetch_full(message_id).await?.as_ref().map(parse_message))
    }

    async fn list_attachments(
        &self,
        message_id: &str,
    ) -> Result<BTreeMap<String, AttachmentInfo>> {
        Ok(self
            .fetch_full(message_id)
            .await?
            .and_then(|m| m.payload)
            .map(|payload| extract_attachments(&payload))
            .unwrap_or_default())
    }

    async fn get_attachment(
        &self,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<Option<Vec<u8>>> {
        let url = format!(
            "{}/{}/attachments/{}",
            Self::messages_url(),
            urlencoding::encode(message_id),
            urlencoding::encode(attachment_id)
        );

        match self
            .api
            .get_optional::<AttachmentData>(&url, "get attachment")
            .await?
        {
            Some(attachment) => Ok(Some(decode_base64url(&attachment.data)?)),
            None => Ok(None),
        }
    }

    async fn create_draft(&self, email: OutgoingEmail) -> Result<Draft> {
        let request = CreateDraftRequest {
            message: Self::raw_request(&email)?,
        };
        self.api
            .post(&Self::drafts_url(), &request, "create draft")
            .await
    }

    async fn delete_draft(&self, draft_id: &str) -> Result<()> {
        let url = format!("{}/{}", Self::drafts_url(), urlencoding::encode(draft_id));
        self.api.delete(&url, "delete draft").await
    }

    async fn send_message(&self, email: OutgoingEmail) -> Result<Value> {
        let request = Self::raw_request(&email)?;
        let url = format!("{}/send", Self::messages_url());
        self.api.post(&url, &request, "send email").await
    }

    async fn list_labels(&self) -> Result<Vec<Value>> {
        let url = format!("{}/users/{}/labels", GMAIL_API_BASE_URL, USER_ID);
        let list: LabelList = self.api.get(&url, "list labels").await?;
        Ok(list.labels)
    }
}

/// Calendar API client
struct CalendarClient {
    api: ApiTransport,
}

impl CalendarClient {
    fn events_url(calendar_id: &str) -> String {
        format!(
            "{}/calendars/{}/events",
            CALENDAR_API_BASE_URL,
            urlencoding::encode(calendar_id)
        )
    }

    fn send_updates(send_notifications: bool) -> &'static str {
        if send_notifications {
            "all"
        } else {
            "none"
        }
    }
}

#[async_trait]
impl CalendarApi for CalendarClient {
    async fn list_calendars(&self) -> Result<Vec<CalendarEntry>> {
        let url = format!("{}/users/{}/calendarList", CALENDAR_API_BASE_URL, USER_ID);
        let list: CalendarList = self.api.get(&url, "list calendars").await?;
        Ok(list.items)
    }

    async fn list_events(&self, query: &EventQuery) -> Result<Vec<Event>> {
        let mut url = format!(
            "{}?maxResults={}&singleEvents=true&orderBy=startTime&showDeleted={}",
            Self::events_url(&query.calendar_id),
            query.max_results,
            query.show_deleted
        );

        if let Some(ref time_min) = query.time_min {
            url.push_str(&format!("&timeMin={}", urlencoding::encode(time_min)));
        }
        if let Some(ref time_max) = query.time_max {
            url.push_str(&format!("&timeMax={}", urlencoding::encode(time_max)));
        }
        if let Some(ref q) = query.query {
            url.push_str(&format!("&q={}", urlencoding::encode(q)));
        }

        let list: EventList = self.api.get(&url, "list events").await?;
        Ok(list.items)
    }

    async fn create_event(
        &self,
        calendar_id: &str,
        event: &Event,
        send_notifications: bool,
    ) -> Result<Event> {
        let url = format!(
            "{}?sendUpdates={}",
            Self::events_url(calendar_id),
            Self::send_updates(send_notifications)
        );
        self.api.post(&url, event, "create event").await
    }

    async fn delete_event(
        &self,
        calendar_id: &str,
        event_id: &str,
        send_notifications: bool,
    ) -> Result<()> {
        let url = format!(
            "{}/{}?sendUpdates={}",
            Self::events_url(calendar_id),
            urlencoding::encode(event_id),
            Self::send_updates(send_notifications)
        );
        self.api.delete(&url, "delete event").await
    }
}
