//! OAuth credentials for Google APIs
//!
//! Handles per-account OAuth 2.0 state:
//! - Loading client secrets
//! - Persisting and refreshing per-account tokens
//! - The browser consent flow with a local callback listener

use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, Notify};

use crate::accounts::{Account, AccountRegistry};
use crate::config::{
    google::{scopes, USERINFO_URL},
    Config,
};
use crate::error::{AuthError, GsuiteMcpError, Result};

/// Tokens expiring within this window are treated as expired
const EXPIRY_MARGIN_SECS: i64 = 300;

/// Attempts to bind the callback port while a previous listener releases it
const BIND_ATTEMPTS: u32 = 10;

/// OAuth client credentials
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthKeys {
    pub client_id: String,
    pub client_secret: String,
    pub auth_uri: String,
    pub token_uri: String,
}

/// OAuth keys file format (can be "installed" or "web")
#[derive(Debug, Deserialize)]
struct OAuthKeysFile {
    #[serde(alias = "web")]
    installed: Option<OAuthKeys>,
}

impl OAuthKeys {
    /// Load client secrets from file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(GsuiteMcpError::Auth(AuthError::KeysFileNotFound {
                path: path.display().to_string(),
            }));
        }

        let content = std::fs::read_to_string(path)?;
        let keys_file: OAuthKeysFile = serde_json::from_str(&content)?;

        keys_file
            .installed
            .ok_or(GsuiteMcpError::Auth(AuthError::InvalidKeysFormat))
    }
}

/// Stored OAuth credential for one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Account this credential belongs to
    pub account_email: String,

    pub access_token: String,

    pub refresh_token: Option<String>,

    /// Token type (usually "Bearer")
    #[serde(default = "default_token_type")]
    pub token_type: String,

    /// Expiry timestamp (Unix seconds)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry: Option<i64>,

    /// Granted scopes
    #[serde(default)]
    pub scopes: BTreeSet<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl Credential {
    /// Whether the access token is expired or about to expire
    pub fn is_expired(&self, now: i64) -> bool {
        self.expiry
            .is_some_and(|expiry| expiry - now < EXPIRY_MARGIN_SECS)
    }

    /// Required scopes this credential was not granted
    pub fn missing_scopes<'a>(&self, required: &[&'a str]) -> Vec<&'a str> {
        required
            .iter()
            .copied()
            .filter(|scope| !self.scopes.contains(*scope))
            .collect()
    }
}

/// Current time as Unix seconds
pub fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Parse a space-separated OAuth scope string
fn parse_scopes(scope: &str) -> BTreeSet<String> {
    scope.split_whitespace().map(str::to_string).collect()
}

/// Persistent per-account credential storage
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Stored credential for an account, if any
    async fn get(&self, account: &str) -> Result<Option<Credential>>;

    /// Exchange the refresh token for a new access token
    async fn refresh(&self, credential: &Credential) -> Result<Credential>;

    /// Persist a credential, replacing any previous one for the account
    async fn put(&self, credential: &Credential) -> Result<()>;
}

/// Token response from OAuth token endpoint
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    token_type: String,
    expires_in: Option<i64>,
    #[serde(default)]
    scope: String,
}

/// Identity of the user who granted consent
#[derive(Debug, Deserialize)]
struct UserInfo {
    #[serde(default)]
    email: Option<String>,
}

/// Credential store backed by one JSON file per account
pub struct FileCredentialStore {
    credentials_dir: PathBuf,
    redirect_uri: String,
    userinfo_url: String,
    keys: OAuthKeys,
    http_client: reqwest::Client,
}

impl FileCredentialStore {
    /// Create a store using the configured client secrets and directory
    pub fn new(config: &Config) -> Result<Self> {
        let keys = OAuthKeys::load(&config.gauth_file)?;
        Ok(Self::with_keys(
            config.credentials_dir.clone(),
            config.oauth_callback_url(),
            keys,
        ))
    }

    /// Create a store from already-loaded client secrets
    pub fn with_keys(credentials_dir: PathBuf, redirect_uri: String, keys: OAuthKeys) -> Self {
        Self {
            credentials_dir,
            redirect_uri,
            userinfo_url: USERINFO_URL.to_string(),
            keys,
            http_client: reqwest::Client::new(),
        }
    }

    /// Resolve granted identities against a different userinfo endpoint
    pub fn with_userinfo_url(mut self, url: impl Into<String>) -> Self {
        self.userinfo_url = url.into();
        self
    }

    fn credentials_path(&self, account: &str) -> PathBuf {
        self.credentials_dir.join(format!(".oauth2.{}.json", account))
    }

    /// Generate the consent URL for an account; `state` identifies the request on callback
    pub fn authorization_url(&self, account: &str, state: &str) -> String {
        let scopes = scopes::ALL.join(" ");
        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&prompt=consent&login_hint={}&state={}",
            self.keys.auth_uri,
            urlencoding::encode(&self.keys.client_id),
            urlencoding::encode(&self.redirect_uri),
            urlencoding::encode(&scopes),
            urlencoding::encode(account),
            urlencoding::encode(state)
        )
    }

    async fn request_token(&self, params: &[(&str, &str)]) -> Result<TokenResponse> {
        let response = self
            .http_client
            .post(&self.keys.token_uri)
            .form(params)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(GsuiteMcpError::Auth(AuthError::TokenExchangeFailed {
                message: format!("{}: {}", status, text),
            }));
        }

        Ok(response.json().await?)
    }

    /// Exchange an authorization code for tokens
    ///
    /// The credential belongs to whichever Google account granted consent,
    /// as reported by the userinfo endpoint. It is not persisted here.
    pub async fn exchange_code(&self, code: &str) -> Result<Credential> {
        let params = [
            ("client_id", self.keys.client_id.as_str()),
            ("client_secret", self.keys.client_secret.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", self.redirect_uri.as_str()),
        ];

        let token = self.request_token(&params).await?;
        let account_email = self.granted_identity(&token.access_token).await?;

        Ok(Credential {
            account_email,
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            token_type: token.token_type,
            expiry: token.expires_in.map(|e| now_secs() + e),
            scopes: parse_scopes(&token.scope),
        })
    }

    async fn granted_identity(&self, access_token: &str) -> Result<String> {
        let response = self
            .http_client
            .get(&self.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(GsuiteMcpError::Auth(AuthError::TokenExchangeFailed {
                message: format!("userinfo lookup failed: {}: {}", status, text),
            }));
        }

        let info: UserInfo = response.json().await?;
        info.email
            .filter(|email| !email.is_empty())
            .ok_or_else(|| {
                GsuiteMcpError::Auth(AuthError::TokenExchangeFailed {
                    message: "userinfo response carried no email".to_string(),
                })
            })
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn get(&self, account: &str) -> Result<Option<Credential>> {
        let path = self.credentials_path(account);
        if !path.exists() {
            tracing::warn!("No stored OAuth2 credentials yet at {}", path.display());
            return Ok(None);
        }

        let content = tokio::fs::read_to_string(&path).await?;
        match serde_json::from_str::<Credential>(&content) {
            Ok(credential) => Ok(Some(credential)),
            Err(e) => {
                tracing::error!("Unreadable credentials at {}: {}", path.display(), e);
                Ok(None)
            }
        }
    }

    async fn refresh(&self, credential: &Credential) -> Result<Credential> {
        let account = credential.account_email.clone();
        let refresh_token = credential.refresh_token.clone().ok_or_else(|| {
            GsuiteMcpError::Auth(AuthError::TokenRefreshFailed {
                account: account.clone(),
                message: "No refresh token available".to_string(),
            })
        })?;

        let params = [
            ("client_id", self.keys.client_id.as_str()),
            ("client_secret", self.keys.client_secret.as_str()),
            ("refresh_token", refresh_token.as_str()),
            ("grant_type", "refresh_token"),
        ];

        let token = self.request_token(&params).await.map_err(|e| {
            GsuiteMcpError::Auth(AuthError::TokenRefreshFailed {
                account: account.clone(),
                message: e.to_string(),
            })
        })?;

        let scopes = if token.scope.is_empty() {
            credential.scopes.clone()
        } else {
            parse_scopes(&token.scope)
        };

        tracing::debug!("Refreshed access token for {}", account);

        Ok(Credential {
            account_email: account,
            access_token: token.access_token,
            refresh_token: token.refresh_token.or(Some(refresh_token)),
            token_type: token.token_type,
            expiry: token.expires_in.map(|e| now_secs() + e),
            scopes,
        })
    }

    async fn put(&self, credential: &Credential) -> Result<()> {
        tokio::fs::create_dir_all(&self.credentials_dir).await?;

        let path = self.credentials_path(&credential.account_email);
        // Readers never observe a partially written file
        let tmp = path.with_extension(format!(
            "json.{}.{}",
            std::process::id(),
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));

        let content = serde_json::to_string_pretty(credential)?;
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &path).await?;

        Ok(())
    }
}

/// A consent flow that was started but not yet completed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAuthorization {
    pub account: String,
    pub url: String,
}

/// Starts the out-of-band OAuth consent flow for an account
#[async_trait]
pub trait AuthorizationFlow: Send + Sync {
    /// Start authorization without waiting for the user to finish it
    async fn initiate(&self, account: &Account) -> Result<PendingAuthorization>;
}

/// A consent request waiting for its redirect
struct PendingConsent {
    account: String,
    completion: Option<oneshot::Sender<Result<Credential>>>,
}

#[derive(Default)]
struct ConsentState {
    /// Keyed by the `state` nonce sent with the consent URL
    pending: HashMap<String, PendingConsent>,

    /// Stops the running listener, if there is one
    shutdown: Option<Arc<Notify>>,
}

/// Shared by the flow and its callback listener
struct CallbackContext {
    store: Arc<FileCredentialStore>,
    accounts: Arc<AccountRegistry>,
    state: Mutex<ConsentState>,
}

impl CallbackContext {
    fn lock(&self) -> MutexGuard<'_, ConsentState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim a pending request; each nonce is accepted once
    fn take_pending(&self, nonce: &str) -> Option<PendingConsent> {
        self.lock().pending.remove(nonce)
    }

    /// Exchange the code and store the credential under the granting account
    async fn complete(&self, requested: &str, code: &str) -> Result<Credential> {
        tracing::info!("Received authorization code for {}, exchanging for tokens", requested);
        let credential = self.store.exchange_code(code).await?;

        if !self.accounts.contains(&credential.account_email) {
            return Err(GsuiteMcpError::Auth(AuthError::UnconfiguredAccount {
                email: credential.account_email,
            }));
        }
        if credential.account_email != requested {
            tracing::warn!(
                "Consent requested for {} was granted by {}",
                requested,
                credential.account_email
            );
        }

        self.store.put(&credential).await?;
        tracing::info!("Stored new credentials for {}", credential.account_email);
        Ok(credential)
    }

    fn stop_if_idle(&self) {
        let mut state = self.lock();
        if state.pending.is_empty() {
            if let Some(shutdown) = state.shutdown.take() {
                shutdown.notify_one();
            }
        }
    }

    /// Fail every pending request served by a listener that could not run
    fn abandon(&self, listener: &Arc<Notify>, message: &str) {
        let drained: Vec<PendingConsent> = {
            let mut state = self.lock();
            if !state
                .shutdown
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, listener))
            {
                return;
            }
            state.shutdown = None;
            state.pending.drain().map(|(_, consent)| consent).collect()
        };

        for consent in drained {
            tracing::warn!("Abandoning authorization for {}", consent.account);
            if let Some(done) = consent.completion {
                let _ = done.send(Err(GsuiteMcpError::Auth(AuthError::CallbackError {
                    message: message.to_string(),
                })));
            }
        }
    }
}

/// Opens the consent page in a browser and listens for the redirect
///
/// One listener serves every pending request and stays up until none are
/// left. Callbacks must carry a `state` nonce this flow issued.
pub struct BrowserAuthorizationFlow {
    context: Arc<CallbackContext>,
    callback_port: u16,
    open_browser: bool,
}

impl BrowserAuthorizationFlow {
    pub fn new(
        store: Arc<FileCredentialStore>,
        accounts: Arc<AccountRegistry>,
        callback_port: u16,
    ) -> Self {
        Self {
            context: Arc::new(CallbackContext {
                store,
                accounts,
                state: Mutex::new(ConsentState::default()),
            }),
            callback_port,
            open_browser: true,
        }
    }

    /// Whether to launch a browser for each consent URL
    pub fn with_browser(mut self, open_browser: bool) -> Self {
        self.open_browser = open_browser;
        self
    }

    /// Run the consent flow for one account and wait for it to finish
    pub async fn authorize_interactive(&self, account: &Account) -> Result<Credential> {
        let (tx, rx) = oneshot::channel();
        let url = self.begin(account, Some(tx));

        eprintln!("\nPlease visit this URL to authorize {}:", account.email);
        eprintln!("{}\n", url);
        if self.open_browser {
            if let Err(e) = open::that(&url) {
                eprintln!("Could not open browser automatically: {}", e);
                eprintln!("Please open the URL manually.");
            }
        }

        eprintln!(
            "Waiting for authorization callback on port {}...",
            self.callback_port
        );
        rx.await
            .map_err(|_| GsuiteMcpError::Auth(AuthError::NoAuthCode))?
    }

    /// Record a pending request and make sure the listener is running
    fn begin(
        &self,
        account: &Account,
        completion: Option<oneshot::Sender<Result<Credential>>>,
    ) -> String {
        let nonce = new_state_nonce();
        let url = self.context.store.authorization_url(&account.email, &nonce);

        let mut state = self.context.lock();
        state.pending.insert(
            nonce,
            PendingConsent {
                account: account.email.clone(),
                completion,
            },
        );
        if state.shutdown.is_none() {
            let shutdown = Arc::new(Notify::new());
            state.shutdown = Some(shutdown.clone());
            tokio::spawn(run_listener(
                self.context.clone(),
                self.callback_port,
                shutdown,
            ));
        }

        url
    }
}

#[async_trait]
impl AuthorizationFlow for BrowserAuthorizationFlow {
    async fn initiate(&self, account: &Account) -> Result<PendingAuthorization> {
        let url = self.begin(account, None);

        if self.open_browser {
            if let Err(e) = open::that(&url) {
                tracing::warn!("Could not open browser for {}: {}", account.email, e);
            }
        }

        Ok(PendingAuthorization {
            account: account.email.clone(),
            url,
        })
    }
}

fn new_state_nonce() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Serve OAuth redirects until no request is pending
async fn run_listener(context: Arc<CallbackContext>, port: u16, shutdown: Arc<Notify>) {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = match bind_callback(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Cannot listen for OAuth callbacks on {}: {}", addr, e);
            context.abandon(&shutdown, &e.to_string());
            return;
        }
    };
    tracing::info!("Listening for OAuth callbacks on {}", addr);

    let app = Router::new()
        .route("/code", get(handle_callback))
        .with_state(context.clone());

    let signal = shutdown.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move { signal.notified().await })
        .await;

    match served {
        Ok(()) => tracing::debug!("OAuth callback listener stopped"),
        Err(e) => {
            tracing::error!("OAuth callback listener failed: {}", e);
            context.abandon(&shutdown, &e.to_string());
        }
    }
}

async fn bind_callback(addr: SocketAddr) -> std::io::Result<tokio::net::TcpListener> {
    let mut attempt = 1;
    loop {
        match tokio::net::TcpListener::bind(addr).await {
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse && attempt < BIND_ATTEMPTS => {
                attempt += 1;
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            result => return result,
        }
    }
}

async fn handle_callback(
    State(context): State<Arc<CallbackContext>>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, Html<String>) {
    let (Some(code), Some(nonce)) = (params.get("code"), params.get("state")) else {
        return callback_page(StatusCode::BAD_REQUEST, "No authorization code received.");
    };

    let Some(consent) = context.take_pending(nonce) else {
        tracing::warn!("Rejected OAuth callback with an unknown state");
        return callback_page(
            StatusCode::BAD_REQUEST,
            "This authorization request was not issued by this server or was already used.",
        );
    };

    let outcome = context.complete(&consent.account, code).await;
    let page = match &outcome {
        Ok(credential) => callback_page(
            StatusCode::OK,
            &format!("Authorized {}. You can close this window.", credential.account_email),
        ),
        Err(e) => {
            tracing::error!("Authorization for {} failed: {}", consent.account, e);
            let status = match e {
                GsuiteMcpError::Auth(AuthError::UnconfiguredAccount { .. }) => StatusCode::FORBIDDEN,
                _ => StatusCode::BAD_GATEWAY,
            };
            callback_page(status, &e.to_string())
        }
    };

    if let Some(done) = consent.completion {
        let _ = done.send(outcome);
    }
    context.stop_if_idle();

    page
}

fn callback_page(status: StatusCode, detail: &str) -> (StatusCode, Html<String>) {
    let title = if status.is_success() {
        "Authorization successful!"
    } else {
        "Authorization failed"
    };
    (
        status,
        Html(format!(
            "<html><body><h1>{}</h1><p>{}</p></body></html>",
            title, detail
        )),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderMap;
    use axum::routing::post;
    use axum::{Form, Json};
    use serde_json::{json, Value};

    fn test_keys() -> OAuthKeys {
        OAuthKeys {
            client_id: "test-client-id".to_string(),
            client_secret: "test-secret".to_string(),
            auth_uri: "https://accounts.google.com/o/oauth2/auth".to_string(),
            token_uri: "https://oauth2.googleapis.com/token".to_string(),
        }
    }

    fn credential(expiry: Option<i64>) -> Credential {
        Credential {
            account_email: "a@x.com".to_string(),
            access_token: "token".to_string(),
            refresh_token: Some("refresh".to_string()),
            token_type: "Bearer".to_string(),
            expiry,
            scopes: parse_scopes("openid https://mail.google.com/"),
        }
    }

    #[test]
    fn test_oauth_keys_deserialize() {
        let json = r#"{
            "web": {
                "client_id": "test-client-id",
                "client_secret": "test-secret",
                "auth_uri": "https://accounts.google.com/o/oauth2/auth",
                "token_uri": "https://oauth2.googleapis.com/token",
                "redirect_uris": ["http://localhost:4100/code"]
            }
        }"#;

        let keys_file: OAuthKeysFile = serde_json::from_str(json).unwrap();
        assert_eq!(keys_file.installed.unwrap().client_id, "test-client-id");
    }

    #[test]
    fn test_expiry_margin() {
        let now = 1_000_000;
        assert!(credential(Some(now + 60)).is_expired(now));
        assert!(credential(Some(now - 1)).is_expired(now));
        assert!(!credential(Some(now + 3600)).is_expired(now));
        assert!(!credential(None).is_expired(now));
    }

    #[test]
    fn test_missing_scopes() {
        let cred = credential(None);
        assert!(cred
            .missing_scopes(&["openid", "https://mail.google.com/"])
            .is_empty());
        assert_eq!(
            cred.missing_scopes(&["openid", scopes::CALENDAR]),
            vec![scopes::CALENDAR]
        );
    }

    #[test]
    fn test_authorization_url_carries_account() {
        let store = FileCredentialStore::with_keys(
            PathBuf::from("."),
            "http://localhost:4100/code".to_string(),
            test_keys(),
        );
        let url = store.authorization_url("a@x.com", "n0nce");
        assert!(url.starts_with("https://accounts.google.com/o/oauth2/auth?"));
        assert!(url.contains("login_hint=a%40x.com"));
        assert!(url.ends_with("&state=n0nce"));
        assert!(url.contains("access_type=offline"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A4100%2Fcode"));
    }

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::with_keys(
            dir.path().to_path_buf(),
            "http://localhost:4100/code".to_string(),
            test_keys(),
        );

        assert_eq!(store.get("a@x.com").await.unwrap(), None);

        let cred = credential(Some(1234567890));
        store.put(&cred).await.unwrap();
        assert!(dir.path().join(".oauth2.a@x.com.json").exists());
        assert_eq!(store.get("a@x.com").await.unwrap(), Some(cred.clone()));

        let newer = Credential {
            access_token: "newer".to_string(),
            ..cred
        };
        store.put(&newer).await.unwrap();
        assert_eq!(
            store.get("a@x.com").await.unwrap().unwrap().access_token,
            "newer"
        );
    }

    #[tokio::test]
    async fn test_file_store_ignores_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".oauth2.a@x.com.json"), "not json").unwrap();

        let store = FileCredentialStore::with_keys(
            dir.path().to_path_buf(),
            "http://localhost:4100/code".to_string(),
            test_keys(),
        );
        assert_eq!(store.get("a@x.com").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_refresh_without_refresh_token_fails() {
        let store = FileCredentialStore::with_keys(
            PathBuf::from("."),
            "http://localhost:4100/code".to_string(),
            test_keys(),
        );
        let cred = Credential {
            refresh_token: None,
            ..credential(Some(0))
        };

        let err = store.refresh(&cred).await.unwrap_err();
        assert!(matches!(
            err,
            GsuiteMcpError::Auth(AuthError::TokenRefreshFailed { .. })
        ));
    }

    #[test]
    fn test_state_nonces_are_unique() {
        let a = new_state_nonce();
        let b = new_state_nonce();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(!a.contains('@'));
    }

    // ==================== Consent callback ====================

    const ALICE: &str = "alice@example.com";
    const BOB: &str = "bob@example.com";

    /// Token endpoint mints `<who>-token` for code `<who>-code`; userinfo maps tokens to emails
    async fn fake_google() -> String {
        async fn token(Form(params): Form<HashMap<String, String>>) -> Json<Value> {
            let code = params.get("code").cloned().unwrap_or_default();
            Json(json!({
                "access_token": code.replace("-code", "-token"),
                "refresh_token": "refresh",
                "token_type": "Bearer",
                "expires_in": 3600,
                "scope": scopes::ALL.join(" "),
            }))
        }

        async fn userinfo(headers: HeaderMap) -> Json<Value> {
            let bearer = headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            let email = match bearer {
                "Bearer alice-token" => ALICE,
                "Bearer bob-token" => BOB,
                _ => "stranger@nowhere.test",
            };
            Json(json!({ "email": email, "verified_email": true }))
        }

        let app = Router::new()
            .route("/token", post(token))
            .route("/userinfo", get(userinfo));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        base
    }

    fn free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    async fn consent_flow(dir: &Path) -> (BrowserAuthorizationFlow, u16) {
        let google = fake_google().await;
        let port = free_port();
        let keys = OAuthKeys {
            token_uri: format!("{}/token", google),
            ..test_keys()
        };
        let store = FileCredentialStore::with_keys(
            dir.to_path_buf(),
            format!("http://localhost:{}/code", port),
            keys,
        )
        .with_userinfo_url(format!("{}/userinfo", google));
        let accounts = AccountRegistry::new(vec![
            Account::new(ALICE, "personal"),
            Account::new(BOB, "work"),
        ]);

        let flow = BrowserAuthorizationFlow::new(Arc::new(store), Arc::new(accounts), port)
            .with_browser(false);
        (flow, port)
    }

    fn state_of(url: &str) -> String {
        url.rsplit("&state=").next().unwrap().to_string()
    }

    /// Hit the callback, waiting for the listener to come up
    async fn callback(port: u16, code: &str, state: &str) -> reqwest::StatusCode {
        let url = format!(
            "http://127.0.0.1:{}/code?code={}&state={}",
            port,
            code,
            urlencoding::encode(state)
        );
        for _ in 0..100 {
            if let Ok(response) = reqwest::get(&url).await {
                return response.status();
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("callback listener never came up on port {}", port);
    }

    fn stored(dir: &Path, email: &str) -> Option<Credential> {
        let content = std::fs::read_to_string(dir.join(format!(".oauth2.{}.json", email))).ok()?;
        serde_json::from_str(&content).ok()
    }

    #[tokio::test]
    async fn test_callback_completes_every_pending_account() {
        let dir = tempfile::tempdir().unwrap();
        let (flow, port) = consent_flow(dir.path()).await;

        let alice = flow.initiate(&Account::new(ALICE, "personal")).await.unwrap();
        let bob = flow.initiate(&Account::new(BOB, "work")).await.unwrap();
        assert_ne!(state_of(&alice.url), state_of(&bob.url));

        assert_eq!(callback(port, "alice-code", &state_of(&alice.url)).await, 200);
        assert_eq!(callback(port, "bob-code", &state_of(&bob.url)).await, 200);

        assert_eq!(stored(dir.path(), ALICE).unwrap().access_token, "alice-token");
        assert_eq!(stored(dir.path(), BOB).unwrap().access_token, "bob-token");
    }

    #[tokio::test]
    async fn test_callback_rejects_unknown_state() {
        let dir = tempfile::tempdir().unwrap();
        let (flow, port) = consent_flow(dir.path()).await;
        let alice = flow.initiate(&Account::new(ALICE, "personal")).await.unwrap();

        assert_eq!(callback(port, "alice-code", "stranger@nowhere.test").await, 400);
        assert!(stored(dir.path(), "stranger@nowhere.test").is_none());
        assert!(stored(dir.path(), ALICE).is_none());

        // The genuine request is still honored, once
        let state = state_of(&alice.url);
        assert_eq!(callback(port, "alice-code", &state).await, 200);
        assert!(stored(dir.path(), ALICE).is_some());
    }

    #[tokio::test]
    async fn test_credential_is_keyed_by_granting_account() {
        let dir = tempfile::tempdir().unwrap();
        let (flow, port) = consent_flow(dir.path()).await;

        // Consent asked for alice but bob signed in
        let pending = flow.initiate(&Account::new(ALICE, "personal")).await.unwrap();
        assert_eq!(callback(port, "bob-code", &state_of(&pending.url)).await, 200);
        assert!(stored(dir.path(), ALICE).is_none());
        assert_eq!(stored(dir.path(), BOB).unwrap().account_email, BOB);
    }

    #[tokio::test]
    async fn test_unconfigured_identity_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (flow, port) = consent_flow(dir.path()).await;

        let pending = flow.initiate(&Account::new(ALICE, "personal")).await.unwrap();
        assert_eq!(callback(port, "eve-code", &state_of(&pending.url)).await, 403);
        assert!(stored(dir.path(), ALICE).is_none());
        assert!(stored(dir.path(), "stranger@nowhere.test").is_none());
    }

    #[tokio::test]
    async fn test_interactive_authorization_returns_credential() {
        let dir = tempfile::tempdir().unwrap();
        let (flow, port) = consent_flow(dir.path()).await;
        let flow = Arc::new(flow);

        let waiting = {
            let flow = flow.clone();
            tokio::spawn(async move {
                flow.authorize_interactive(&Account::new(BOB, "work")).await
            })
        };

        // The nonce is only visible to the browser, so read it from the pending map
        let state = loop {
            let nonce = flow.context.lock().pending.keys().next().cloned();
            match nonce {
                Some(nonce) => break nonce,
                None => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        };
        assert_eq!(callback(port, "bob-code", &state).await, 200);

        let credential = waiting.await.unwrap().unwrap();
        assert_eq!(credential.account_email, BOB);
        assert_eq!(credential.refresh_token.as_deref(), Some("refresh"));
    }
}
