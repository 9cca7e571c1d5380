//! Operational log destination: structured events about failures that need an
//! operator's attention (as opposed to user-input problems).

use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use chrono::Utc;
use serde::Serialize;

use crate::{
    domain::{ChatId, UserId},
    errors::Error,
    formatting::escape_html,
    messaging::port::MessagingClient,
    ports::OpsLog,
    Result,
};

const OPS_MAX_TEXT: usize = 500;

/// RFC3339 timestamp in UTC (for logs/telemetry).
pub fn iso_timestamp_utc() -> String {
    Utc::now().to_rfc3339()
}

#[derive(Clone, Debug, Serialize)]
pub struct OpsEvent {
    pub timestamp: String,
    pub event: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    pub error: String,
}

impl OpsEvent {
    fn base(event: &str, error: &str) -> Self {
        Self {
            timestamp: iso_timestamp_utc(),
            event: event.to_string(),
            user_id: None,
            link: None,
            stage: None,
            backend: None,
            path: None,
            error: error.to_string(),
        }
    }

    pub fn transfer_failed(user_id: UserId, link: &str, stage: &str, error: &str) -> Self {
        Self {
            user_id: Some(user_id.0),
            link: Some(link.to_string()),
            stage: Some(stage.to_string()),
            ..Self::base("transfer_failed", error)
        }
    }

    pub fn upload_failed(user_id: UserId, backend: &str, error: &str) -> Self {
        Self {
            user_id: Some(user_id.0),
            backend: Some(backend.to_string()),
            ..Self::base("upload_failed", error)
        }
    }

    pub fn cleanup_failed(path: &Path, error: &str) -> Self {
        Self {
            path: Some(path.display().to_string()),
            ..Self::base("cleanup_failed", error)
        }
    }

    /// One-line HTML summary for chat destinations.
    pub fn to_html(&self) -> String {
        let mut out = format!("<b>{}</b>", escape_html(&self.event));
        if let Some(b) = &self.backend {
            out.push_str(&format!(" ({})", escape_html(b)));
        }
        if let Some(u) = self.user_id {
            out.push_str(&format!("\nuser: <code>{u}</code>"));
        }
        if let Some(l) = &self.link {
            out.push_str(&format!("\nlink: {}", escape_html(l)));
        }
        if let Some(s) = &self.stage {
            out.push_str(&format!("\nstage: {}", escape_html(s)));
        }
        if let Some(p) = &self.path {
            out.push_str(&format!("\npath: <code>{}</code>", escape_html(p)));
        }
        out.push_str(&format!(
            "\n<b>Error:</b> {}",
            escape_html(&truncate_text(&self.error, OPS_MAX_TEXT))
        ));
        out
    }
}

/// Posts events to an operator chat through the primary client.
pub struct ChatOpsLog {
    client: Arc<dyn MessagingClient>,
    chat_id: ChatId,
}

impl ChatOpsLog {
    pub fn new(client: Arc<dyn MessagingClient>, chat_id: ChatId) -> Self {
        Self { client, chat_id }
    }
}

impl OpsLog for ChatOpsLog {
    fn record(&self, event: OpsEvent) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(event = %event.event, "no runtime; dropping ops chat message");
            return;
        };
        let client = self.client.clone();
        let chat_id = self.chat_id;
        handle.spawn(async move {
            if let Err(e) = client.send_html(chat_id, &event.to_html()).await {
                tracing::warn!(error = %e, "failed to post ops event");
            }
        });
    }
}

/// Appends events to a local file (JSON lines or readable blocks).
///
/// Inside a runtime, [`OpsLog::record`] hands the write to the blocking pool.
/// Each event is appended with a single write under a shared lock.
#[derive(Clone, Debug)]
pub struct AuditLogger {
    path: PathBuf,
    json: bool,
    append: Arc<Mutex<()>>,
}

impl AuditLogger {
    pub fn new(path: impl Into<PathBuf>, json: bool) -> Self {
        Self {
            path: path.into(),
            json,
            append: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Blocking append of one event.
    pub fn write(&self, mut event: OpsEvent) -> Result<()> {
        event.error = truncate_text(&event.error, OPS_MAX_TEXT);
        let out = if self.json {
            let mut line = serde_json::to_string(&event)?;
            line.push('\n');
            line
        } else {
            Self::render_plain(&event)?
        };

        let _guard = self
            .append
            .lock()
            .map_err(|_| Error::External("audit log lock poisoned".to_string()))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(out.as_bytes())?;
        Ok(())
    }

    // Plain text format for readability.
    fn render_plain(event: &OpsEvent) -> Result<String> {
        let mut out = String::new();
        out.push('\n');
        out.push_str(&"=".repeat(60));

        let value = serde_json::to_value(event)?;
        let Some(obj) = value.as_object() else {
            return Err(Error::External("ops event is not a JSON object".to_string()));
        };
        for (k, v) in obj {
            out.push('\n');
            out.push_str(k);
            out.push_str(": ");
            match v {
                serde_json::Value::String(s) => out.push_str(s),
                other => out.push_str(&other.to_string()),
            }
        }
        out.push('\n');
        Ok(out)
    }

    fn write_logged(&self, event: OpsEvent) {
        if let Err(e) = self.write(event) {
            tracing::warn!(error = %e, path = %self.path.display(), "failed to write ops event");
        }
    }
}

impl OpsLog for AuditLogger {
    fn record(&self, event: OpsEvent) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let logger = self.clone();
                handle.spawn_blocking(move || logger.write_logged(event));
            }
            Err(_) => self.write_logged(event),
        }
    }
}

/// Sends each event to every sink and mirrors it into the tracing output.
#[derive(Default)]
pub struct FanoutOpsLog {
    sinks: Vec<Arc<dyn OpsLog>>,
}

impl FanoutOpsLog {
    pub fn new(sinks: Vec<Arc<dyn OpsLog>>) -> Self {
        Self { sinks }
    }
}

impl OpsLog for FanoutOpsLog {
    fn record(&self, event: OpsEvent) {
        tracing::error!(
            event = %event.event,
            user_id = ?event.user_id,
            stage = ?event.stage,
            backend = ?event.backend,
            error = %event.error,
            "operational event"
        );
        for sink in &self.sinks {
            sink.record(event.clone());
        }
    }
}

pub fn truncate_text(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let mut out = s.chars().take(max_len).collect::<String>();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_text_adds_ellipsis() {
        let s = "a".repeat(OPS_MAX_TEXT + 10);
        let t = truncate_text(&s, OPS_MAX_TEXT);
        assert!(t.ends_with("..."));
        assert_eq!(t.chars().count(), OPS_MAX_TEXT + 3);
        assert_eq!(truncate_text("short", OPS_MAX_TEXT), "short");
    }

    #[test]
    fn audit_logger_writes_truncated_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLogger::new(dir.path().join("ops.log"), true);
        let long = "x".repeat(OPS_MAX_TEXT + 1);
        log.record(OpsEvent::upload_failed(UserId(5), "primary", &long));
        log.record(OpsEvent::cleanup_failed(Path::new("/tmp/a"), "busy"));

        let written = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event"], "upload_failed");
        assert_eq!(first["backend"], "primary");
        assert!(first["error"].as_str().unwrap().ends_with("..."));
        assert!(first.get("link").is_none());
    }

    #[tokio::test]
    async fn record_inside_a_runtime_writes_off_the_async_thread() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLogger::new(dir.path().join("ops.log"), true);
        for i in 0..5 {
            log.record(OpsEvent::upload_failed(UserId(i), "primary", "boom"));
        }

        let mut lines = Vec::new();
        for _ in 0..200 {
            let written = std::fs::read_to_string(log.path()).unwrap_or_default();
            lines = written.lines().map(str::to_string).collect::<Vec<_>>();
            if lines.len() == 5 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(lines.len(), 5);
        let mut users: Vec<i64> = lines
            .iter()
            .map(|l| {
                let v: serde_json::Value = serde_json::from_str(l).unwrap();
                v["user_id"].as_i64().unwrap()
            })
            .collect();
        users.sort_unstable();
        assert_eq!(users, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn plain_text_format_is_readable() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLogger::new(dir.path().join("ops.txt"), false);
        log.write(OpsEvent::transfer_failed(
            UserId(1),
            "https://t.me/x/1",
            "delivering",
            "boom",
        ))
        .unwrap();
        let written = std::fs::read_to_string(log.path()).unwrap();
        assert!(written.contains("stage: delivering"));
        assert!(written.contains("error: boom"));
    }

    #[test]
    fn html_summary_escapes_error() {
        let ev = OpsEvent::upload_failed(UserId(1), "primary", "<bad>");
        let html = ev.to_html();
        assert!(html.contains("&lt;bad&gt;"));
        assert!(html.contains("(primary)"));
    }
}
