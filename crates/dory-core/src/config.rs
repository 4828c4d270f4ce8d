use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::fs;

use dory_types::ConversationConfig;

use crate::error::{DoryError, DoryResult};

pub const DEFAULT_LOG_RETENTION_DAYS: u64 = 14;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub conversation: ConversationConfig,
    /// SQLite file for conversations and summaries. Relative paths are
    /// resolved by the caller against its state directory.
    #[serde(default)]
    pub database_path: Option<String>,
    #[serde(default = "default_log_retention_days")]
    pub log_retention_days: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            conversation: ConversationConfig::default(),
            database_path: None,
            log_retention_days: DEFAULT_LOG_RETENTION_DAYS,
        }
    }
}

fn default_log_retention_days() -> u64 {
    DEFAULT_LOG_RETENTION_DAYS
}

#[derive(Debug, Clone, Default)]
struct ConfigLayers {
    defaults: Value,
    file: Value,
    env: Value,
    cli: Value,
}

/// Layered JSON configuration.
///
/// Precedence, lowest first: built-in defaults, config file, environment,
/// CLI overrides. Objects merge key by key; `null` never overrides.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: Option<PathBuf>,
    layers: ConfigLayers,
}

impl ConfigStore {
    /// Load from an optional file plus the process environment.
    pub async fn load(path: Option<&Path>, cli_overrides: Option<Value>) -> DoryResult<Self> {
        let file = match path {
            Some(path) => read_json_file(path).await?,
            None => empty_object(),
        };
        Ok(Self::from_layers(
            path.map(Path::to_path_buf),
            file,
            env_layer(|key| std::env::var(key).ok()),
            cli_overrides.unwrap_or_else(empty_object),
        ))
    }

    fn from_layers(path: Option<PathBuf>, file: Value, env: Value, cli: Value) -> Self {
        let defaults = serde_json::to_value(AppConfig::default()).unwrap_or_else(|_| empty_object());
        Self {
            path,
            layers: ConfigLayers {
                defaults,
                file,
                env,
                cli,
            },
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn effective_value(&self) -> Value {
        let mut merged = empty_object();
        deep_merge(&mut merged, &self.layers.defaults);
        deep_merge(&mut merged, &self.layers.file);
        deep_merge(&mut merged, &self.layers.env);
        deep_merge(&mut merged, &self.layers.cli);
        merged
    }

    /// Typed, validated view of the merged configuration.
    pub fn get(&self) -> DoryResult<AppConfig> {
        let config: AppConfig = serde_json::from_value(self.effective_value())
            .map_err(|e| DoryError::InvalidConfig(e.to_string()))?;
        config
            .conversation
            .validate()
            .map_err(DoryError::InvalidConfig)?;
        Ok(config)
    }

    /// Raw merged subtree for a top-level key, `Value::Null` when absent.
    pub fn section(&self, name: &str) -> Value {
        self.effective_value()
            .get(name)
            .cloned()
            .unwrap_or(Value::Null)
    }
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

async fn read_json_file(path: &Path) -> DoryResult<Value> {
    if !path.exists() {
        return Ok(empty_object());
    }
    let raw = fs::read_to_string(path).await?;
    if raw.trim().is_empty() {
        return Ok(empty_object());
    }
    let value = serde_json::from_str::<Value>(&raw).map_err(|e| {
        DoryError::InvalidConfig(format!("{}: {}", path.display(), e))
    })?;
    if !value.is_object() {
        return Err(DoryError::InvalidConfig(format!(
            "{}: top-level value must be an object",
            path.display()
        )));
    }
    Ok(value)
}

fn env_layer(lookup: impl Fn(&str) -> Option<String>) -> Value {
    let mut root = empty_object();

    if let Some(raw) = lookup("DORY_REUSE_WINDOW_DAYS") {
        match raw.trim().parse::<i64>() {
            Ok(days) => deep_merge(
                &mut root,
                &json!({ "conversation": { "reuse_window_days": days } }),
            ),
            Err(_) => tracing::warn!("ignoring invalid DORY_REUSE_WINDOW_DAYS={}", raw),
        }
    }
    if let Some(raw) = lookup("DORY_HISTORY_LIMIT") {
        match raw.trim().parse::<usize>() {
            Ok(limit) => deep_merge(
                &mut root,
                &json!({ "conversation": { "history_limit": limit } }),
            ),
            Err(_) => tracing::warn!("ignoring invalid DORY_HISTORY_LIMIT={}", raw),
        }
    }
    if let Some(path) = lookup("DORY_DATABASE_PATH") {
        if !path.trim().is_empty() {
            deep_merge(&mut root, &json!({ "database_path": path }));
        }
    }
    if let Some(raw) = lookup("DORY_LOG_RETENTION_DAYS") {
        match raw.trim().parse::<u64>() {
            Ok(days) => deep_merge(&mut root, &json!({ "log_retention_days": days })),
            Err(_) => tracing::warn!("ignoring invalid DORY_LOG_RETENTION_DAYS={}", raw),
        }
    }
    if let Some(embedder) = lookup("DORY_EMBEDDER") {
        if !embedder.trim().is_empty() {
            deep_merge(
                &mut root,
                &json!({ "embeddings": { "embedder": embedder.trim().to_ascii_lowercase() } }),
            );
        }
    }
    if let Some(enabled) = lookup("DORY_AUTO_MEMORIES").and_then(|v| parse_bool_like(&v)) {
        deep_merge(
            &mut root,
            &json!({ "embeddings": { "enable_auto_memories": enabled } }),
        );
    }

    root
}

fn parse_bool_like(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn deep_merge(base: &mut Value, overlay: &Value) {
    if overlay.is_null() {
        return;
    }
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                if value.is_null() {
                    continue;
                }
                match base_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base_value, overlay_value) => {
            *base_value = overlay_value.clone();
        }
    }
}
