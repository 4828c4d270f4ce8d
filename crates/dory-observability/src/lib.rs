use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_PREFIX: &str = "dory";

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProcessKind {
    /// The `dory` command-line tool.
    Cli,
    /// A host application linking the Dory crates directly.
    Embedded,
}

impl ProcessKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessKind::Cli => "cli",
            ProcessKind::Embedded => "embedded",
        }
    }

    fn file_prefix(self) -> String {
        format!("{LOG_FILE_PREFIX}.{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoggingInitInfo {
    pub process: String,
    pub logs_dir: String,
    pub prefix: String,
    pub retention_days: u64,
    pub removed_files: usize,
    pub initialized_at: DateTime<Utc>,
}

/// Structured event written under the `dory.obs` target.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ObservabilityEvent<'a> {
    pub event: &'a str,
    pub component: &'a str,
    pub user_id: Option<&'a str>,
    pub conversation_id: Option<&'a str>,
    pub message_id: Option<&'a str>,
    pub status: Option<&'a str>,
    pub error_code: Option<&'a str>,
    pub detail: Option<&'a str>,
}

/// Replace text with its length and a digest prefix, for logging content
/// without revealing it.
pub fn redact_text(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    format!(
        "[redacted len={} sha256={}]",
        trimmed.len(),
        short_hash(trimmed)
    )
}

/// First 16 hex chars of the SHA-256 digest.
pub fn short_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}

macro_rules! obs_event {
    ($macro:ident, $process:expr, $event:expr) => {
        tracing::$macro!(
            target: "dory.obs",
            process = $process.as_str(),
            component = $event.component,
            event = $event.event,
            user_id = $event.user_id.unwrap_or(""),
            conversation_id = $event.conversation_id.unwrap_or(""),
            message_id = $event.message_id.unwrap_or(""),
            status = $event.status.unwrap_or(""),
            error_code = $event.error_code.unwrap_or(""),
            detail = $event.detail.unwrap_or(""),
            "observability_event"
        )
    };
}

pub fn emit_event(level: Level, process: ProcessKind, event: ObservabilityEvent<'_>) {
    match level {
        Level::ERROR => obs_event!(error, process, event),
        Level::WARN => obs_event!(warn, process, event),
        Level::DEBUG | Level::TRACE => obs_event!(debug, process, event),
        _ => obs_event!(info, process, event),
    }
}

/// Console plus daily `dory.<process>.YYYY-MM-DD.jsonl` files in `logs_dir`.
///
/// Files older than `retention_days` are removed first. Keep the returned
/// guard alive for the life of the process or buffered lines are lost.
pub fn init_process_logging(
    process: ProcessKind,
    logs_dir: &Path,
    retention_days: u64,
) -> anyhow::Result<(WorkerGuard, LoggingInitInfo)> {
    fs::create_dir_all(logs_dir)?;
    let removed_files = cleanup_old_jsonl(logs_dir, process, retention_days, Utc::now())?;

    let file_appender = tracing_appender::rolling::Builder::new()
        .rotation(tracing_appender::rolling::Rotation::DAILY)
        .filename_prefix(process.file_prefix())
        .filename_suffix("jsonl")
        .build(logs_dir)?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_current_span(false)
        .with_span_list(false);

    // stdout carries command output, so the console layer goes to stderr.
    let console_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_target(true)
        .with_ansi(true)
        .with_writer(std::io::stderr);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .ok();

    let info = LoggingInitInfo {
        process: process.as_str().to_string(),
        logs_dir: logs_dir.display().to_string(),
        prefix: process.file_prefix(),
        retention_days,
        removed_files,
        initialized_at: Utc::now(),
    };

    Ok((guard, info))
}

fn cleanup_old_jsonl(
    logs_dir: &Path,
    process: ProcessKind,
    retention_days: u64,
    now: DateTime<Utc>,
) -> anyhow::Result<usize> {
    let Some(cutoff) = i64::try_from(retention_days)
        .ok()
        .and_then(chrono::Duration::try_days)
        .and_then(|window| now.checked_sub_signed(window))
    else {
        return Ok(0);
    };
    let prefix = format!("{}.", process.file_prefix());
    let mut removed = 0;

    for entry in fs::read_dir(logs_dir)? {
        let Ok(entry) = entry else { continue };
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        // expected: dory.<proc>.YYYY-MM-DD.jsonl
        let Some(date_part) = name
            .strip_prefix(&prefix)
            .and_then(|rest| rest.strip_suffix(".jsonl"))
        else {
            continue;
        };

        let Ok(date) = NaiveDate::parse_from_str(date_part, "%Y-%m-%d") else {
            continue;
        };

        let Some(dt) = date.and_hms_opt(0, 0, 0) else {
            continue;
        };

        if DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc) < cutoff
            && fs::remove_file(&path).is_ok()
        {
            removed += 1;
        }
    }

    Ok(removed)
}

pub fn canonical_logs_dir_from_root(root: &Path) -> PathBuf {
    root.join("logs")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn redact_text_masks_content() {
        let raw = "my card is 4111 1111 1111 1111";
        let redacted = redact_text(raw);
        assert!(redacted.starts_with("[redacted len=30 sha256="));
        assert!(!redacted.contains("4111"));
        assert_eq!(redact_text("   "), "");
    }

    #[test]
    fn short_hash_is_stable_sha256_prefix() {
        // sha256("abc") = ba7816bf8f01cfea...
        assert_eq!(short_hash("abc"), "ba7816bf8f01cfea");
    }

    #[test]
    fn canonical_logs_dir_joins_logs_folder() {
        let root = PathBuf::from("/tmp/dory");
        let logs = canonical_logs_dir_from_root(&root);
        assert_eq!(logs, PathBuf::from("/tmp/dory").join("logs"));
    }

    #[test]
    fn cleanup_removes_only_expired_files_of_this_process() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path();
        let now = DateTime::parse_from_rfc3339("2026-03-20T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        for name in [
            "dory.cli.2026-01-01.jsonl",
            "dory.cli.2026-03-19.jsonl",
            "dory.embedded.2026-01-01.jsonl",
            "dory.cli.not-a-date.jsonl",
            "notes.txt",
        ] {
            fs::write(dir.join(name), "{}\n").unwrap();
        }

        let removed = cleanup_old_jsonl(dir, ProcessKind::Cli, 14, now).unwrap();
        assert_eq!(removed, 1);
        assert!(!dir.join("dory.cli.2026-01-01.jsonl").exists());
        assert!(dir.join("dory.cli.2026-03-19.jsonl").exists());
        assert!(dir.join("dory.embedded.2026-01-01.jsonl").exists());
        assert!(dir.join("dory.cli.not-a-date.jsonl").exists());
    }

    #[test]
    fn process_kind_names() {
        assert_eq!(ProcessKind::Cli.as_str(), "cli");
        assert_eq!(ProcessKind::Embedded.file_prefix(), "dory.embedded");
    }
}
