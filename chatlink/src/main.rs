//! `chatlink` — line-oriented chat client.
//!
//! Reads commands from stdin and prints session events to stdout. Logs go
//! to a file so they never interleave with the conversation.
//!
//! ```bash
//! cargo run --bin chatlink -- --user-id u-1 --token "$TOKEN" \
//!     --live-url ws://127.0.0.1:5000/api/chat/ws --api-url http://127.0.0.1:5000
//! ```
//!
//! Commands: `/open <conversation>`, `/typing on|off`, `/read <message>`,
//! `/retry <message>`, `/reconnect`, `/enable`, `/disable`,
//! `/conversations [page]`, `/history [page]`, `/quit`. Any other line is
//! sent to the open conversation.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_appender::non_blocking::WorkerGuard;

use chatlink::api::http::HttpMessagingApi;
use chatlink::chat::ChatEvent;
use chatlink::config::{CliArgs, ClientConfig};
use chatlink::flag_store::{FileFlagStore, FlagStore, MemoryFlagStore};
use chatlink::policy::ReconnectPolicy;
use chatlink::session::{ChatSession, SessionCommand, SessionHandle};
use chatlink::transport::LiveEndpoint;
use chatlink::transport::websocket::WebSocketConnector;
use chatlink_proto::message::{ConversationId, MessageId};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config file: {e}");
            ClientConfig::default()
        }
    };

    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());
    tracing::info!(?config, "chatlink starting");

    match run(config).await {
        Ok(()) => {
            tracing::info!("chatlink exiting");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(err = %e, "chatlink failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize file-based logging.
///
/// Returns a [`WorkerGuard`] that must be held until shutdown so buffered
/// entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("chatlink.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

fn flag_store(config: &ClientConfig) -> Arc<dyn FlagStore> {
    let path = config
        .state_file
        .clone()
        .or_else(FileFlagStore::default_path);
    match path {
        Some(path) => Arc::new(FileFlagStore::new(path)),
        None => {
            tracing::warn!("no data directory, live channel flag will not persist");
            Arc::new(MemoryFlagStore::default())
        }
    }
}

async fn run(config: ClientConfig) -> Result<(), Box<dyn std::error::Error>> {
    let endpoint = LiveEndpoint::parse(&config.live_url, config.token.clone(), config.role.clone())?;
    if !endpoint.has_credential() {
        println!("* no token configured; messages will only use the fallback path");
    }
    let api = HttpMessagingApi::new(&config.api_url, config.token.clone(), config.request_timeout)?;
    let policy = ReconnectPolicy::load(config.policy, flag_store(&config));
    let connector = WebSocketConnector::new(config.connect_timeout, config.channel_capacity);

    let (session, mut events) = ChatSession::new(
        connector,
        endpoint,
        policy,
        Arc::new(api),
        config.session_config(),
    );
    let handle = SessionHandle::spawn(session, config.channel_capacity);

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            println!("{}", describe(&event));
        }
    });

    handle.send(SessionCommand::Connect).await?;
    handle
        .send(SessionCommand::LoadConversations { page: 1 })
        .await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut open: Option<ConversationId> = None;
    while let Some(line) = lines.next_line().await? {
        match parse_line(&line, open.as_ref()) {
            Input::Command(command) => {
                if let SessionCommand::OpenConversation(id) = &command {
                    open = Some(id.clone());
                }
                handle.send(command).await?;
            }
            Input::Quit => break,
            Input::Empty => {}
            Input::Usage(text) => println!("* {text}"),
        }
    }

    handle.shutdown().await?;
    printer.await?;
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum Input {
    Command(SessionCommand),
    Quit,
    Empty,
    Usage(&'static str),
}

fn parse_line(line: &str, open: Option<&ConversationId>) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return open.map_or(Input::Usage("open a conversation first: /open <id>"), |c| {
            Input::Command(SessionCommand::Send {
                conversation: c.clone(),
                content: line.to_string(),
                recipients: Vec::new(),
            })
        });
    };

    let (name, arg) = rest
        .split_once(char::is_whitespace)
        .map_or((rest, ""), |(n, a)| (n, a.trim()));
    let page = || arg.parse::<u32>().unwrap_or(1);
    match (name, open) {
        ("quit" | "exit", _) => Input::Quit,
        ("open", _) if !arg.is_empty() => {
            Input::Command(SessionCommand::OpenConversation(ConversationId::new(arg)))
        }
        ("open", _) => Input::Usage("usage: /open <conversation>"),
        ("reconnect", _) => Input::Command(SessionCommand::Reconnect),
        ("enable", _) => Input::Command(SessionCommand::EnableLive),
        ("disable", _) => Input::Command(SessionCommand::DisableLive),
        ("conversations", _) => Input::Command(SessionCommand::LoadConversations { page: page() }),
        ("retry", _) if !arg.is_empty() => {
            Input::Command(SessionCommand::Retry(MessageId::new(arg)))
        }
        ("retry", _) => Input::Usage("usage: /retry <message>"),
        ("history" | "typing" | "read", None) => {
            Input::Usage("open a conversation first: /open <id>")
        }
        ("history", Some(_)) => Input::Command(SessionCommand::LoadMessages { page: page() }),
        ("typing", Some(c)) => Input::Command(SessionCommand::Typing {
            conversation: c.clone(),
            is_typing: arg != "off",
        }),
        ("read", Some(c)) if !arg.is_empty() => Input::Command(SessionCommand::ReadReceipt {
            conversation: c.clone(),
            message_id: MessageId::new(arg),
        }),
        ("read", Some(_)) => Input::Usage("usage: /read <message>"),
        _ => Input::Usage("unknown command"),
    }
}

fn describe(event: &ChatEvent) -> String {
    match event {
        ChatEvent::ConnectionChanged(state) => format!("* live channel {state}"),
        ChatEvent::Warning(text) => format!("! {text}"),
        ChatEvent::Error(text) => format!("!! {text}"),
        ChatEvent::Notice(text) => format!("* {text}"),
        ChatEvent::MessageAdded(m) => format!(
            "[{}] {} <{}> {} ({})",
            m.timestamp.format("%H:%M"),
            m.id,
            m.sender.name,
            m.content,
            m.status.label()
        ),
        ChatEvent::MessageUpdated {
            message,
            previous_id: Some(previous),
        } => format!("~ {previous} is now {} ({})", message.id, message.status.label()),
        ChatEvent::MessageUpdated { message, .. } => {
            format!("~ {} ({})", message.id, message.status.label())
        }
        ChatEvent::MessageFailed {
            message_id, reason, ..
        } => format!("!! {message_id}: {reason}; /retry {message_id}"),
        ChatEvent::TypingChanged {
            user_id, is_typing, ..
        } => {
            if *is_typing {
                format!("* {user_id} is typing")
            } else {
                format!("* {user_id} stopped typing")
            }
        }
        ChatEvent::DraftRestored {
            conversation_id,
            text,
        } => {
            if text.is_empty() {
                format!("* opened {conversation_id}")
            } else {
                format!("* opened {conversation_id}, draft: {text}")
            }
        }
        ChatEvent::ConversationsLoaded { count } => format!("* {count} conversations"),
        ChatEvent::ConversationUpdated {
            conversation_id,
            unread_count,
        } => format!("* {conversation_id}: {unread_count} unread"),
        ChatEvent::HistoryLoaded {
            conversation_id,
            count,
        } => format!("* {conversation_id}: {count} messages loaded"),
    }
}
