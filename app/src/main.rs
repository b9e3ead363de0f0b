use anyhow::{bail, Context, Result};
use burrow_core::api::{ApiClient, NoopNavigator, ReqwestTransport};
use burrow_core::chat::{ChatStore, WsTransport};
use burrow_core::config::{profile_dir, ClientConfig};
use burrow_core::session::{SessionStore, SignupRequest};
use burrow_core::store::ProfileStore;
use burrow_core::telemetry;
use burrow_core::theme::{DocumentState, Theme, ThemeStore};
use clap::{Parser, Subcommand};
use std::sync::Arc;

mod repl;

#[derive(Parser, Debug)]
#[command(name = "burrow", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in and persist the session.
    Login { username: String, password: String },
    /// Register a new account.
    Signup {
        username: String,
        email: String,
        password: String,
        #[arg(long)]
        date_of_birth: String,
    },
    /// Sign out and drop the persisted credentials.
    Logout,
    /// List posts, newest first.
    Posts {
        #[arg(long, default_value_t = 0)]
        page: u32,
        #[arg(long, default_value_t = 10)]
        size: u32,
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// Search posts.
    Search {
        query: String,
        #[arg(long, default_value_t = 0)]
        page: u32,
        #[arg(long, default_value_t = 10)]
        size: u32,
    },
    /// Open a live chat with another user.
    Chat { counterpart: String },
    /// Show or set the UI theme.
    Theme { value: Option<String> },
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing()?;
    let cli = Cli::parse();

    let config = ClientConfig::load().map_err(|err| anyhow::anyhow!(err.user_message()))?;
    let profile = ProfileStore::new(profile_dir());
    let transport = Arc::new(ReqwestTransport::new(&config));
    let session = SessionStore::new(transport.clone(), profile.clone(), config.secure_transport());
    let api = ApiClient::new(transport, session.clone(), Arc::new(NoopNavigator));

    match cli.command {
        Command::Login { username, password } => {
            let outcome = session.login(&username, &password).await;
            if !outcome.success {
                bail!(outcome.message);
            }
            println!("{}", outcome.message);
        }
        Command::Signup {
            username,
            email,
            password,
            date_of_birth,
        } => {
            let outcome = session
                .signup(SignupRequest {
                    username,
                    email,
                    password,
                    date_of_birth,
                })
                .await;
            if !outcome.success {
                bail!(outcome.message);
            }
            println!("{}", outcome.message);
        }
        Command::Logout => {
            session.logout();
            println!("Signed out.");
        }
        Command::Posts { page, size, tags } => {
            let posts = api.list_posts(page, size, &tags).await?;
            println!("{}", serde_json::to_string_pretty(&posts)?);
        }
        Command::Search { query, page, size } => {
            let results = api.search_posts(&query, page, size).await?;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        Command::Chat { counterpart } => {
            let chat = ChatStore::new(session.clone(), Arc::new(WsTransport), config.ws_url());
            repl::run(chat, &api, &session, counterpart).await?;
        }
        Command::Theme { value } => {
            let themes = ThemeStore::new(profile, DocumentState::new(), None);
            match value {
                Some(value) => {
                    let theme =
                        Theme::parse(&value).context("theme must be `light` or `dark`")?;
                    themes.set(theme);
                    println!("Theme set to {}.", theme.as_str());
                }
                None => println!("{}", themes.get().as_str()),
            }
        }
    }

    Ok(())
}
