use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use std::{fs, io::Read};

use anyhow::Context;
use clap::{Parser, Subcommand};
use dory_core::{ConfigStore, DoryError, Memory, Messages, SqliteAdapter, SqliteStore};
use dory_embeddings::{build_local_embeddings, Embeddings, EmbeddingsConfig, EmbeddingsError};
use dory_observability::{
    canonical_logs_dir_from_root, emit_event, init_process_logging, redact_text,
    ObservabilityEvent, ProcessKind,
};
use dory_summaries::{NewAction, SqliteSummaryAdapter, UserSummaries};
use dory_types::{ChatRole, MessageType};
use serde_json::{json, Map, Value};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "dory")]
#[command(about = "Conversation memory for chat applications")]
struct Cli {
    /// Directory holding the database, embeddings, config and logs.
    #[arg(long, global = true, env = "DORY_STATE_DIR")]
    state_dir: Option<String>,
    /// Config file; defaults to `<state-dir>/config.json`.
    #[arg(long, global = true)]
    config: Option<String>,
    #[arg(long, global = true)]
    reuse_window_days: Option<i64>,
    #[arg(long, global = true)]
    history_limit: Option<usize>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reuse the user's active conversation or start a new one.
    Conversation {
        #[arg(long)]
        user: String,
    },
    Show {
        #[arg(long)]
        conversation: String,
    },
    /// Append a message. CONTENT may be `-` for stdin or `@path` for a file.
    Say {
        #[arg(long)]
        conversation: String,
        #[arg(long)]
        user: String,
        #[arg(long, default_value = "user")]
        role: ChatRole,
        #[arg(long, default_value = "user_message")]
        message_type: MessageType,
        /// Parse CONTENT as a JSON value instead of plain text.
        #[arg(long, default_value_t = false)]
        json: bool,
        content: String,
    },
    History {
        #[arg(long)]
        conversation: String,
        #[arg(long)]
        limit: Option<usize>,
    },
    Remember {
        #[arg(long)]
        user: String,
        #[arg(long)]
        conversation: Option<String>,
        content: String,
    },
    Recall {
        #[arg(long)]
        user: String,
        #[arg(long)]
        conversation: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
        query: String,
    },
    Forget {
        #[arg(long)]
        user: String,
        #[arg(long)]
        conversation: Option<String>,
        #[arg(long = "id")]
        ids: Vec<String>,
    },
    Summary {
        #[arg(long)]
        user: String,
    },
    Action {
        #[arg(long)]
        user: String,
        #[arg(long)]
        action_type: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        conversation: Option<String>,
        /// JSON object stored with the action.
        #[arg(long)]
        metadata: Option<String>,
    },
    Actions {
        #[arg(long)]
        user: String,
        #[arg(long)]
        action_type: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Conversation { .. } => "conversation",
            Command::Show { .. } => "show",
            Command::Say { .. } => "say",
            Command::History { .. } => "history",
            Command::Remember { .. } => "remember",
            Command::Recall { .. } => "recall",
            Command::Forget { .. } => "forget",
            Command::Summary { .. } => "summary",
            Command::Action { .. } => "action",
            Command::Actions { .. } => "actions",
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let state_dir = resolve_state_dir(cli.state_dir);
    let config_path = resolve_config_path(&state_dir, cli.config);
    let overrides = build_cli_overrides(cli.reuse_window_days, cli.history_limit);
    let config = ConfigStore::load(Some(&config_path), overrides)
        .await
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    let app_config = config.get()?;

    let logs_dir = canonical_logs_dir_from_root(&state_dir);
    let (_log_guard, log_info) =
        init_process_logging(ProcessKind::Cli, &logs_dir, app_config.log_retention_days)?;
    emit_event(
        tracing::Level::INFO,
        ProcessKind::Cli,
        ObservabilityEvent {
            event: "logging.initialized",
            component: "engine.main",
            status: Some("ok"),
            detail: Some("cli jsonl logging initialized"),
            ..Default::default()
        },
    );
    info!("cli logging initialized: {:?}", log_info);

    let command_name = cli.command.name();
    let ctx = AppContext::open(&state_dir, &config).await?;
    let result = execute(&ctx, cli.command).await;
    let closed = ctx.close().await;

    match result {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            closed
        }
        Err(err) => {
            let detail = format!("command={command_name} error={err}");
            emit_event(
                tracing::Level::ERROR,
                ProcessKind::Cli,
                ObservabilityEvent {
                    event: "command.failed",
                    component: "engine.main",
                    status: Some("failed"),
                    error_code: Some(error_code(&err)),
                    detail: Some(&detail),
                    ..Default::default()
                },
            );
            Err(err)
        }
    }
}

/// Services opened for a single command.
struct AppContext {
    state_dir: PathBuf,
    store: SqliteStore,
    memory: Memory,
    summaries: UserSummaries,
    embeddings_config: EmbeddingsConfig,
}

impl AppContext {
    async fn open(state_dir: &Path, config: &ConfigStore) -> anyhow::Result<Self> {
        let app_config = config.get()?;
        let embeddings_config = EmbeddingsConfig::from_section(config.section("embeddings"))?;

        let db_path = resolve_database_path(state_dir, app_config.database_path.as_deref());
        let timeout = Duration::from_secs(app_config.conversation.connection_timeout_seconds);
        let store = SqliteStore::open(&db_path, timeout)
            .await
            .with_context(|| format!("failed to open database {}", db_path.display()))?;

        let adapter = SqliteAdapter::new(store.clone(), &app_config.conversation).await?;
        let memory = Memory::new(Messages::new(
            Arc::new(adapter),
            app_config.conversation.clone(),
        )?);
        let summaries =
            UserSummaries::new(Arc::new(SqliteSummaryAdapter::new(store.clone()).await?));

        Ok(Self {
            state_dir: state_dir.to_path_buf(),
            store,
            memory,
            summaries,
            embeddings_config,
        })
    }

    async fn embeddings(&self) -> anyhow::Result<Embeddings> {
        let dir = self.state_dir.join("embeddings");
        Ok(build_local_embeddings(&dir, self.embeddings_config.clone()).await?)
    }

    async fn embed_message(
        &self,
        text: &str,
        user: &str,
        conversation: &str,
        message_id: &str,
    ) -> anyhow::Result<String> {
        let id = self
            .embeddings()
            .await?
            .store_embedding(text, user, Some(conversation), Some(message_id), None)
            .await?;
        Ok(id)
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.store.close().await?;
        Ok(())
    }
}

async fn execute(ctx: &AppContext, command: Command) -> anyhow::Result<Value> {
    match command {
        Command::Conversation { user } => {
            let conversation = ctx.memory.get_or_create_conversation(&user).await?;
            Ok(serde_json::to_value(conversation)?)
        }
        Command::Show { conversation } => {
            let conversation = ctx.memory.get_conversation(&conversation).await?;
            Ok(serde_json::to_value(conversation)?)
        }
        Command::Say {
            conversation,
            user,
            role,
            message_type,
            json,
            content,
        } => {
            let raw = read_content(&content)?;
            tracing::debug!(
                target: "dory.messages",
                conversation_id = %conversation,
                content = %redact_text(&raw),
                "cli say"
            );
            let content = parse_content(&raw, json)?;
            let message = ctx
                .memory
                .add_message(&conversation, &user, role, content, message_type)
                .await?;

            let mut out = Map::new();
            out.insert("message".to_string(), serde_json::to_value(&message)?);
            if let Value::String(text) = &message.content {
                if ctx.embeddings_config.enable_auto_memories && !text.trim().is_empty() {
                    // The message is committed at this point; embedding is best effort.
                    match ctx.embed_message(text, &user, &conversation, &message.id).await {
                        Ok(id) => {
                            out.insert("embedding_id".to_string(), Value::String(id));
                        }
                        Err(err) => {
                            let detail = err.to_string();
                            emit_event(
                                tracing::Level::WARN,
                                ProcessKind::Cli,
                                ObservabilityEvent {
                                    event: "message.embedding_failed",
                                    component: "engine.say",
                                    user_id: Some(&user),
                                    conversation_id: Some(&conversation),
                                    message_id: Some(&message.id),
                                    status: Some("degraded"),
                                    error_code: Some(error_code(&err)),
                                    detail: Some(&detail),
                                },
                            );
                            out.insert("embedding_error".to_string(), Value::String(detail));
                        }
                    }
                }
            }
            Ok(Value::Object(out))
        }
        Command::History {
            conversation,
            limit,
        } => {
            let history = ctx.memory.get_chat_history(&conversation, limit).await?;
            Ok(serde_json::to_value(history)?)
        }
        Command::Remember {
            user,
            conversation,
            content,
        } => {
            let content = read_content(&content)?;
            let id = ctx
                .embeddings()
                .await?
                .remember(&content, &user, conversation.as_deref(), None)
                .await?;
            Ok(json!({ "id": id }))
        }
        Command::Recall {
            user,
            conversation,
            limit,
            query,
        } => {
            let hits = ctx
                .embeddings()
                .await?
                .recall(&query, &user, conversation.as_deref(), limit)
                .await?;
            Ok(serde_json::to_value(hits)?)
        }
        Command::Forget {
            user,
            conversation,
            ids,
        } => {
            let ids = (!ids.is_empty()).then_some(ids);
            let deleted = ctx
                .embeddings()
                .await?
                .forget(&user, conversation.as_deref(), ids.as_deref())
                .await?;
            Ok(json!({ "deleted": deleted }))
        }
        Command::Summary { user } => {
            let summary = ctx.summaries.get_or_create_summary(&user).await?;
            Ok(serde_json::to_value(summary)?)
        }
        Command::Action {
            user,
            action_type,
            name,
            conversation,
            metadata,
        } => {
            let action = ctx
                .summaries
                .record_action(NewAction {
                    user_id: user,
                    action_type,
                    action_name: name,
                    metadata: parse_metadata(metadata.as_deref())?,
                    conversation_id: conversation,
                })
                .await?;
            Ok(serde_json::to_value(action)?)
        }
        Command::Actions {
            user,
            action_type,
            limit,
        } => {
            let actions = ctx
                .summaries
                .get_user_actions(&user, action_type.as_deref(), limit)
                .await?;
            Ok(serde_json::to_value(actions)?)
        }
    }
}

fn build_cli_overrides(
    reuse_window_days: Option<i64>,
    history_limit: Option<usize>,
) -> Option<Value> {
    if reuse_window_days.is_none() && history_limit.is_none() {
        return None;
    }
    let mut conversation = Map::new();
    if let Some(days) = reuse_window_days {
        conversation.insert("reuse_window_days".to_string(), json!(days));
    }
    if let Some(limit) = history_limit {
        conversation.insert("history_limit".to_string(), json!(limit));
    }
    Some(json!({ "conversation": conversation }))
}

fn resolve_state_dir(flag: Option<String>) -> PathBuf {
    if let Some(dir) = flag {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    dirs::data_dir()
        .map(|dir| dir.join("dory"))
        .unwrap_or_else(|| PathBuf::from(".dory"))
}

fn resolve_config_path(state_dir: &Path, flag: Option<String>) -> PathBuf {
    flag.map(PathBuf::from)
        .unwrap_or_else(|| state_dir.join("config.json"))
}

fn resolve_database_path(state_dir: &Path, configured: Option<&str>) -> PathBuf {
    match configured.map(str::trim).filter(|p| !p.is_empty()) {
        Some(path) => {
            let path = PathBuf::from(path);
            if path.is_absolute() {
                path
            } else {
                state_dir.join(path)
            }
        }
        None => state_dir.join("dory.db"),
    }
}

fn read_content(input: &str) -> anyhow::Result<String> {
    if input.trim() == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        return Ok(buf);
    }
    if let Some(path) = input.strip_prefix('@') {
        return fs::read_to_string(path).with_context(|| format!("failed to read {path}"));
    }
    Ok(input.to_string())
}

fn parse_content(raw: &str, as_json: bool) -> anyhow::Result<Value> {
    if as_json {
        return serde_json::from_str(raw).context("content is not valid JSON");
    }
    Ok(Value::String(raw.to_string()))
}

fn parse_metadata(raw: Option<&str>) -> anyhow::Result<Map<String, Value>> {
    let Some(raw) = raw else {
        return Ok(Map::new());
    };
    match serde_json::from_str::<Value>(raw).context("metadata is not valid JSON")? {
        Value::Object(map) => Ok(map),
        _ => anyhow::bail!("metadata must be a JSON object"),
    }
}

fn error_code(err: &anyhow::Error) -> &'static str {
    if let Some(err) = err.downcast_ref::<DoryError>() {
        return if err.is_not_found() {
            "NOT_FOUND"
        } else {
            "STORAGE_ERROR"
        };
    }
    if err.downcast_ref::<EmbeddingsError>().is_some() {
        return "EMBEDDINGS_ERROR";
    }
    "COMMAND_FAILED"
}
