//! G Suite MCP Server - Rust Implementation
//!
//! A Model Context Protocol (MCP) server for Gmail and Google Calendar across
//! several Google accounts.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use gsuite_mcp_server::accounts::AccountRegistry;
use gsuite_mcp_server::config::Config;
use gsuite_mcp_server::google::auth::{BrowserAuthorizationFlow, CredentialStore, FileCredentialStore};
use gsuite_mcp_server::google::client::GoogleClientFactory;
use gsuite_mcp_server::mcp::dispatch::Dispatcher;
use gsuite_mcp_server::mcp::server::McpServer;
use gsuite_mcp_server::mcp::tools::default_registry;

/// G Suite MCP Server
#[derive(Parser)]
#[command(name = "gsuite-mcp-server")]
#[command(author, version, about = "G Suite MCP Server - Gmail and Google Calendar tools for several accounts")]
struct Cli {
    /// OAuth client secrets file
    #[arg(long, global = true)]
    gauth_file: Option<PathBuf>,

    /// Accounts file listing the Google accounts to serve
    #[arg(long, global = true)]
    accounts_file: Option<PathBuf>,

    /// Directory holding the per-account credential files
    #[arg(long, global = true)]
    credentials_dir: Option<PathBuf>,

    /// Port of the local OAuth callback listener
    #[arg(long, global = true)]
    oauth_port: Option<u16>,

    /// Print consent URLs instead of opening a browser
    #[arg(long, global = true)]
    no_browser: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Authorize accounts interactively (all accounts without credentials by default)
    Auth {
        /// Only authorize this account
        #[arg(long)]
        account: Option<String>,
    },

    /// List the configured accounts
    Accounts,
}

impl Cli {
    fn config(&self) -> Config {
        let mut config = Config::new();
        if let Some(path) = &self.gauth_file {
            config.gauth_file = path.clone();
        }
        if let Some(path) = &self.accounts_file {
            config.accounts_file = path.clone();
        }
        if let Some(dir) = &self.credentials_dir {
            config.credentials_dir = dir.clone();
        }
        if let Some(port) = self.oauth_port {
            config.oauth_callback_port = port;
        }
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries the protocol, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.config();

    let accounts = Arc::new(
        AccountRegistry::load(&config.accounts_file)
            .with_context(|| format!("loading {}", config.accounts_file.display()))?,
    );
    let open_browser = !cli.no_browser;

    match cli.command {
        Some(Commands::Accounts) => {
            for account in accounts.list() {
                println!("{}", account.description());
            }
        }
        Some(Commands::Auth { account }) => {
            authorize(config, accounts, account, open_browser).await?
        }
        None => run_server(config, accounts, open_browser).await?,
    }

    Ok(())
}

async fn authorize(
    config: Config,
    accounts: Arc<AccountRegistry>,
    only: Option<String>,
    open_browser: bool,
) -> anyhow::Result<()> {
    let store = Arc::new(FileCredentialStore::new(&config)?);
    let flow = BrowserAuthorizationFlow::new(
        store.clone(),
        accounts.clone(),
        config.oauth_callback_port,
    )
    .with_browser(open_browser);

    let targets = match &only {
        Some(email) => match accounts.get(email) {
            Some(account) => vec![account],
            None => bail!("Account {} is not listed in {}", email, config.accounts_file.display()),
        },
        None => accounts.list().iter().collect(),
    };

    for account in targets {
        if only.is_none() && store.get(&account.email).await?.is_some() {
            eprintln!("{} already has credentials, skipping", account.email);
            continue;
        }
        let credential = flow.authorize_interactive(account).await?;
        eprintln!("Authorized {}", credential.account_email);
    }

    Ok(())
}

async fn run_server(
    config: Config,
    accounts: Arc<AccountRegistry>,
    open_browser: bool,
) -> anyhow::Result<()> {
    let store = Arc::new(FileCredentialStore::new(&config).with_context(|| {
        format!(
            "OAuth client secrets are required at {}",
            config.gauth_file.display()
        )
    })?);
    let flow = Arc::new(
        BrowserAuthorizationFlow::new(store.clone(), accounts.clone(), config.oauth_callback_port)
            .with_browser(open_browser),
    );

    let registry = Arc::new(default_registry(&accounts)?);
    let dispatcher = Dispatcher::new(
        registry,
        accounts,
        store,
        flow,
        Arc::new(GoogleClientFactory::new()),
        config.call_timeout,
    );

    tracing::info!("Serving MCP on stdio");
    let mut server = McpServer::new(dispatcher);
    server.run_stdio().await?;

    Ok(())
}
