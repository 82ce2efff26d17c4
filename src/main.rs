use anyhow::Result;
use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "mailgate", version, about = "Delegated-authorization mailbox browser")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output structured JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the authorization URL to start a sign-in
    Login,
    /// Exchange an authorization code for a session
    Auth { code: String },
    /// Show current session validity
    Status,
    /// Destroy the current session
    Logout,
    /// Folder operations
    Folders {
        #[command(subcommand)]
        command: FolderCommands,
    },
    /// Message operations
    Messages {
        #[command(subcommand)]
        command: MessageCommands,
    },
    /// Attachment operations
    Attachments {
        #[command(subcommand)]
        command: AttachmentCommands,
    },
}

#[derive(Debug, Subcommand)]
enum FolderCommands {
    /// Resolve a folder name to its remote identifier
    Resolve { name: String },
}

#[derive(Debug, Subcommand)]
enum MessageCommands {
    /// List messages in a folder (resolved by name)
    List(MessageListArgs),
}

#[derive(Debug, Args)]
struct MessageListArgs {
    folder: String,
    /// Stop after this many messages
    #[arg(long)]
    limit: Option<usize>,
}

#[derive(Debug, Subcommand)]
enum AttachmentCommands {
    /// List attachment metadata for a message
    List { message_id: String },
    /// Download one attachment's content
    Download(AttachmentDownloadArgs),
}

#[derive(Debug, Args)]
struct AttachmentDownloadArgs {
    message_id: String,
    attachment_id: String,
    /// Write content to this path instead of stdout
    #[arg(long)]
    out: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    commands::dispatch(cli).await
}

mod commands {
    use std::sync::Arc;

    use anyhow::{Context, Result};
    use tokio::io::AsyncWriteExt;

    use mailgate::attachments::AttachmentService;
    use mailgate::auth::{generate_state, Authenticator};
    use mailgate::config::GraphConfig;
    use mailgate::folders::FolderResolver;
    use mailgate::gateway::{self, Gateway};
    use mailgate::messages::{MessageService, Recipient};
    use mailgate::store::SessionStore;

    use super::{
        AttachmentCommands, AttachmentDownloadArgs, Cli, Commands, FolderCommands,
        MessageCommands, MessageListArgs,
    };

    struct Core {
        auth: Arc<Authenticator>,
        gateway: Gateway,
    }

    fn open_core() -> Result<Core> {
        let config = Arc::new(GraphConfig::from_env().context("load MAILGATE_* configuration")?);
        let http = gateway::http_client(&config).context("build HTTP client")?;

        let store_path =
            SessionStore::default_store_path().context("resolve session store path")?;
        let store = SessionStore::open(&store_path)
            .with_context(|| format!("open session store at {}", store_path.display()))?;

        let auth = Arc::new(
            Authenticator::new(config.clone(), http.clone())
                .with_store(store)
                .context("restore persisted session")?,
        );
        let gateway = Gateway::new(&config, http, auth.clone());
        Ok(Core { auth, gateway })
    }

    pub async fn dispatch(cli: Cli) -> Result<()> {
        match cli.command {
            Commands::Login => handle_login(),
            Commands::Auth { code } => handle_auth(&code).await,
            Commands::Status => handle_status(cli.json).await,
            Commands::Logout => handle_logout().await,
            Commands::Folders { command } => match command {
                FolderCommands::Resolve { name } => handle_resolve(&name, cli.json).await,
            },
            Commands::Messages { command } => match command {
                MessageCommands::List(args) => handle_message_list(args, cli.json).await,
            },
            Commands::Attachments { command } => match command {
                AttachmentCommands::List { message_id } => {
                    handle_attachment_list(&message_id, cli.json).await
                }
                AttachmentCommands::Download(args) => handle_attachment_download(args).await,
            },
        }
    }

    fn handle_login() -> Result<()> {
        let core = open_core()?;
        let state = generate_state().context("generate authorization state")?;
        let url = core
            .auth
            .build_authorization_url(Some(&state))
            .context("build authorization URL")?;
        println!("Visit this URL to sign in, then run 'mailgate auth <code>':");
        println!("{url}");
        Ok(())
    }

    async fn handle_auth(code: &str) -> Result<()> {
        let core = open_core()?;
        let session = core
            .auth
            .exchange_code(code)
            .await
            .context("exchange authorization code")?;
        println!("Authenticated. Session valid until {}.", session.expires_at);
        if session.refresh_token.is_none() {
            eprintln!("warning: no refresh token granted; sign in again after expiry");
        }
        Ok(())
    }

    async fn handle_status(json: bool) -> Result<()> {
        let core = open_core()?;
        match core.auth.current_session().await {
            Some(session) => {
                if json {
                    println!(
                        "{}",
                        serde_json::json!({
                            "authenticated": true,
                            "expired": session.is_expired(),
                            "expires_at": session.expires_at.to_rfc3339(),
                        })
                    );
                } else if session.is_expired() {
                    println!("Session expired at {} (refresh pending)", session.expires_at);
                } else {
                    println!("Session valid until {}", session.expires_at);
                }
            }
            None => {
                if json {
                    println!("{}", serde_json::json!({ "authenticated": false }));
                } else {
                    println!("Not authenticated. Run 'mailgate login' to start.");
                }
            }
        }
        Ok(())
    }

    async fn handle_logout() -> Result<()> {
        let core = open_core()?;
        core.auth.logout().await.context("destroy session")?;
        println!("Logged out.");
        Ok(())
    }

    async fn handle_resolve(name: &str, json: bool) -> Result<()> {
        let core = open_core()?;
        let folder = FolderResolver::new(core.gateway.clone())
            .resolve(name)
            .await
            .with_context(|| format!("resolve folder '{name}'"))?;
        if json {
            println!("{}", serde_json::to_string_pretty(&folder)?);
        } else {
            println!("{}  {}", folder.id, folder.display_name);
        }
        Ok(())
    }

    async fn handle_message_list(args: MessageListArgs, json: bool) -> Result<()> {
        let core = open_core()?;
        let folder = FolderResolver::new(core.gateway.clone())
            .resolve(&args.folder)
            .await
            .with_context(|| format!("resolve folder '{}'", args.folder))?;

        let messages = MessageService::new(core.gateway.clone())
            .list_messages(&folder, args.limit)
            .await
            .with_context(|| format!("list messages in '{}'", folder.display_name))?;

        if json {
            println!("{}", serde_json::to_string_pretty(&messages)?);
        } else if messages.is_empty() {
            println!("No messages in '{}'.", folder.display_name);
        } else {
            for message in &messages {
                println!(
                    "{}  {}  {}  {}",
                    message.id,
                    message.received_date_time.as_deref().unwrap_or("-"),
                    message
                        .from
                        .as_ref()
                        .and_then(Recipient::address)
                        .unwrap_or("-"),
                    message.subject.as_deref().unwrap_or("(no subject)")
                );
            }
        }
        Ok(())
    }

    async fn handle_attachment_list(message_id: &str, json: bool) -> Result<()> {
        let core = open_core()?;
        let attachments = AttachmentService::new(core.gateway.clone())
            .list_attachments(message_id)
            .await
            .with_context(|| format!("list attachments of message '{message_id}'"))?;

        if json {
            println!("{}", serde_json::to_string_pretty(&attachments)?);
        } else if attachments.is_empty() {
            println!("No attachments.");
        } else {
            for attachment in &attachments {
                println!(
                    "{}  {}  {}  {} bytes",
                    attachment.id,
                    attachment.name.as_deref().unwrap_or("-"),
                    attachment.content_type.as_deref().unwrap_or("-"),
                    attachment.size.unwrap_or(0)
                );
            }
        }
        Ok(())
    }

    async fn handle_attachment_download(args: AttachmentDownloadArgs) -> Result<()> {
        let core = open_core()?;
        let mut download = AttachmentService::new(core.gateway.clone())
            .download_attachment(&args.message_id, &args.attachment_id)
            .await
            .with_context(|| format!("download attachment '{}'", args.attachment_id))?;

        match args.out {
            Some(path) => {
                let mut file = tokio::fs::File::create(&path)
                    .await
                    .with_context(|| format!("create output file {path}"))?;
                let mut written = 0u64;
                while let Some(chunk) = download.chunk().await? {
                    file.write_all(&chunk).await?;
                    written += chunk.len() as u64;
                }
                file.flush().await?;
                eprintln!(
                    "Wrote {written} bytes to {path} ({})",
                    download.content_type().unwrap_or("unknown content type")
                );
            }
            None => {
                let mut stdout = tokio::io::stdout();
                while let Some(chunk) = download.chunk().await? {
                    stdout.write_all(&chunk).await?;
                }
                stdout.flush().await?;
            }
        }
        Ok(())
    }
}
