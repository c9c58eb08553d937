use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use desk::action::resolver::{ActionStore, Preview, apply_now, drive_action};
use desk::action::{ActionDescriptor, ActionError, ActionKey};
use desk::config::{DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_CONVERSATION_TITLE, DEFAULT_LOOKBACK_DAYS, DEFAULT_REQUEST_TIMEOUT_SECS, RpcTimeouts};
use desk::conversation::{FeedOrigin, RenderedMessage, SummaryError, ViewSettings};
use desk::rpc::{DeskRpc, Role};
use desk::{ConversationView, DeskConfig, FrappeClient, RpcError, SendOutcome};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("{}: {}", .0.error_code(), .0.user_message())]
    Rpc(#[from] RpcError),
    #[error("action failed: {0}")]
    Action(#[from] ActionError),
    #[error("{0}")]
    Summary(#[from] SummaryError),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("action must be a JSON object with a supported `action` tag")]
    UnsupportedAction,
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error("nothing to send")]
    EmptyMessage,
    #[error("conversation changed while the request was in flight")]
    Stale,
    #[error("another conversation was opened; message not sent")]
    Unsent,
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Parser, Debug)]
#[command(name = "erpnext-ai", about = "ERPNext AI desk CLI")]
struct Cli {
    #[arg(long, env = "FRAPPE_BASE_URL")]
    base_url: String,

    #[arg(long, env = "FRAPPE_API_KEY")]
    api_key: String,

    #[arg(long, env = "FRAPPE_API_SECRET", hide_env_values = true)]
    api_secret: String,

    #[arg(long, env = "ERP_REQUEST_TIMEOUT_SECS", default_value_t = DEFAULT_REQUEST_TIMEOUT_SECS)]
    request_timeout: u64,

    #[arg(long, env = "ERP_CONNECT_TIMEOUT_SECS", default_value_t = DEFAULT_CONNECT_TIMEOUT_SECS)]
    connect_timeout: u64,

    #[arg(long, env = "DESK_LOOKBACK_DAYS", default_value_t = DEFAULT_LOOKBACK_DAYS)]
    lookback_days: u32,

    #[arg(
        long,
        env = "DESK_INCLUDE_CONTEXT",
        default_value_t = true,
        action = clap::ArgAction::Set,
        value_parser = clap::builder::BoolishValueParser::new()
    )]
    include_context: bool,

    #[arg(long, env = "DESK_CONVERSATION_TITLE", default_value = DEFAULT_CONVERSATION_TITLE)]
    title: String,

    /// Print the rendered feed as JSON instead of text.
    #[arg(long, default_value_t = false)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    fn config(&self) -> DeskConfig {
        let mut config = DeskConfig::new(&self.base_url, &self.api_key, &self.api_secret);
        config.timeouts = RpcTimeouts { request_secs: self.request_timeout, connect_secs: self.connect_timeout };
        config.lookback_days = self.lookback_days;
        config.include_context = self.include_context;
        config.conversation_title.clone_from(&self.title);
        config
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show which user the API credentials belong to.
    Whoami,
    /// Print the admin context snapshot.
    Context {
        #[arg(long)]
        days: Option<u32>,
    },
    /// Generate an admin summary into a conversation.
    Summary {
        #[arg(long)]
        days: Option<u32>,
        #[arg(long)]
        conversation: Option<String>,
    },
    Chat(ChatCommand),
    Items(ItemsCommand),
}

#[derive(Args, Debug)]
struct ChatCommand {
    #[command(subcommand)]
    command: ChatSubcommand,
}

#[derive(Subcommand, Debug)]
enum ChatSubcommand {
    New {
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    Show {
        conversation: String,
    },
    Send {
        #[arg(long)]
        conversation: Option<String>,
        text: String,
    },
    /// Apply an action card that waits for confirmation.
    Apply {
        conversation: String,
        #[arg(long)]
        message: String,
        #[arg(long, default_value_t = 0)]
        index: usize,
    },
    Context {
        conversation: String,
        #[arg(value_enum)]
        state: Toggle,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Toggle {
    On,
    Off,
}

#[derive(Args, Debug)]
struct ItemsCommand {
    #[command(subcommand)]
    command: ItemsSubcommand,
}

#[derive(Subcommand, Debug)]
enum ItemsSubcommand {
    /// Preview one action descriptor, applying it when asked to.
    Run {
        #[arg(long)]
        action: String,
        #[arg(long, default_value_t = false)]
        apply: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let config = cli.config();
    info!(base_url = %config.base_url, command = ?cli.command, "cli: start");
    let rpc: Arc<dyn DeskRpc> = Arc::new(FrappeClient::new(&config)?);
    let view = ConversationView::new(rpc.clone(), ViewSettings::from(&config));

    match cli.command {
        Command::Whoami => {
            let user = rpc.logged_user().await?;
            println!("{user}");
            Ok(())
        }
        Command::Context { days } => {
            let context = rpc.get_admin_context(days.unwrap_or(config.lookback_days)).await?;
            print_json(&context)
        }
        Command::Summary { days, conversation } => {
            if let Some(id) = conversation {
                view.load_conversation(&id).await?;
            }
            let outcome = view.request_summary(days.unwrap_or(config.lookback_days)).await;
            print_feed(&view.render(), cli.json)?;
            outcome.map_err(CliError::from)
        }
        Command::Chat(chat) => run_chat(&view, chat, cli.json).await,
        Command::Items(items) => run_items(rpc.as_ref(), items).await,
    }
}

async fn run_chat(view: &ConversationView, chat: ChatCommand, json: bool) -> Result<(), CliError> {
    match chat.command {
        ChatSubcommand::New { force } => {
            view.start_new_conversation(force).await?;
            if let Some(id) = view.conversation_id() {
                println!("{id}");
            }
            Ok(())
        }
        ChatSubcommand::Show { conversation } => {
            view.load_conversation(&conversation).await?;
            print_feed(&view.render(), json)
        }
        ChatSubcommand::Send { conversation, text } => {
            if let Some(id) = conversation {
                view.load_conversation(&id).await?;
            }
            let outcome = view.send_message(&text).await;
            print_feed(&view.render(), json)?;
            match outcome {
                SendOutcome::Sent | SendOutcome::Busy => Ok(()),
                SendOutcome::Empty => Err(CliError::EmptyMessage),
                SendOutcome::Failed(message) => Err(CliError::SendFailed(message)),
                SendOutcome::Stale => Err(CliError::Stale),
                SendOutcome::Unsent => Err(CliError::Unsent),
            }
        }
        ChatSubcommand::Apply { conversation, message, index } => {
            view.load_conversation(&conversation).await?;
            let result = view.apply_action(&ActionKey::new(message, index)).await;
            print_feed(&view.render(), json)?;
            result.map(|_| ()).map_err(CliError::from)
        }
        ChatSubcommand::Context { conversation, state } => {
            view.load_conversation(&conversation).await?;
            let include = matches!(state, Toggle::On);
            if let Some(handle) = view.set_include_context(include) {
                await_save(&conversation, handle).await?;
            }
            if let Some(notice) = view.take_notice() {
                eprintln!("{notice}");
            }
            println!("include_context: {}", view.include_context());
            Ok(())
        }
    }
}

async fn await_save(conversation: &str, handle: JoinHandle<()>) -> Result<(), CliError> {
    handle.await.map_err(|err| {
        warn!(%conversation, error = %err, "cli: include_context save task failed");
        CliError::Task(err)
    })
}

async fn run_items(rpc: &dyn DeskRpc, items: ItemsCommand) -> Result<(), CliError> {
    let ItemsSubcommand::Run { action, apply } = items.command;
    let Value::Object(fields) = serde_json::from_str::<Value>(&action)? else {
        return Err(CliError::UnsupportedAction);
    };
    let descriptor = ActionDescriptor::from_map(fields).ok_or(CliError::UnsupportedAction)?;

    let key = ActionKey::new("cli", 0);
    let mut store = ActionStore::new();
    store.register(key.clone(), descriptor);
    let mut outcome = drive_action(rpc, &mut store, &key).await;
    if outcome.is_none() && apply {
        outcome = Some(apply_now(rpc, &mut store, &key).await?);
    }

    let Some(state) = store.get(&key) else {
        return Ok(());
    };
    if let Some(error) = &state.error {
        eprintln!("error: {error}");
    }
    if let Some(preview) = &state.preview {
        let value = match preview {
            Preview::Creation(p) => serde_json::to_value(p)?,
            Preview::Deletion(p) => serde_json::to_value(p)?,
            Preview::Update(p) => serde_json::to_value(p)?,
        };
        print_json(&value)?;
    }
    match outcome {
        Some(outcome) => println!("{}", outcome.summary_text()),
        None if state.actionable_count() > 0 => {
            println!("Preview only. Re-run with --apply to {}.", state.descriptor.kind.family().apply_label(state.actionable_count()).to_lowercase());
        }
        None => println!("Nothing to apply."),
    }
    Ok(())
}

fn print_feed(feed: &[RenderedMessage], json: bool) -> Result<(), CliError> {
    if json {
        return print_json(&serde_json::to_value(feed)?);
    }
    for entry in feed {
        let who = match (entry.origin, entry.role) {
            (FeedOrigin::LocalError, _) => "error",
            (FeedOrigin::Pending, _) => "sending",
            (_, Role::User) => "you",
            _ => "assistant",
        };
        if !entry.text.is_empty() {
            println!("[{who}] {}", entry.text);
        }
        for card in &entry.cards {
            println!("  [{}] {} rows={} actionable={}", card.phase.as_str(), card.kind, card.rows, card.actionable);
            if let Some(error) = &card.error {
                println!("    error: {error}");
            }
            if let Some(note) = &card.note {
                println!("    {note}");
            }
            if let Some(label) = &card.apply_label {
                println!("    {label}: erpnext-ai chat apply <conversation> --message {} --index {}", message_part(&card.key), index_part(&card.key));
            }
            if let Some(outcome) = &card.outcome {
                for line in outcome.lines() {
                    println!("    {line}");
                }
            }
        }
    }
    Ok(())
}

fn message_part(key: &str) -> &str {
    key.rsplit_once(':').map_or(key, |(message, _)| message)
}

fn index_part(key: &str) -> &str {
    key.rsplit_once(':').map_or("0", |(_, index)| index)
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
