use anyhow::{Context, Result};
use log::{info, warn};
use reqwest::blocking::Client;
use serde_json::{Value, json};

use crate::session::{RunStatus, RunSummary};

const EMBED_LOG_LIMIT: usize = 1980;
const MAX_LISTED_FAILURES: usize = 10;
const SUCCESS_COLOR: u32 = 3_066_993;
const FAILURE_COLOR: u32 = 15_105_570;

/// Receives the outcome of a sync pass.
pub trait RunReporter {
    fn emit_run_summary(&self, summary: &RunSummary) -> Result<()>;

    /// Called when the pass could not start or aborted before producing a summary.
    fn emit_run_failure(&self, _message: &str) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct LogReporter;

impl RunReporter for LogReporter {
    fn emit_run_summary(&self, summary: &RunSummary) -> Result<()> {
        info!("{}", summary_line(summary));
        if !summary.failed.is_empty() {
            warn!("Failed: {}", summary.failed.join(", "));
        }
        if !summary.ignored.is_empty() {
            warn!("Ignored by service: {}", summary.ignored.join(", "));
        }
        Ok(())
    }

    fn emit_run_failure(&self, message: &str) -> Result<()> {
        warn!("Sync failed: {message}");
        Ok(())
    }
}

/// Posts Discord-style embeds to a chat webhook.
pub struct WebhookReporter {
    url: String,
    http: Client,
}

impl WebhookReporter {
    pub fn new(url: &str) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("scrobble-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed building HTTP client")?;
        Ok(Self {
            url: url.to_string(),
            http,
        })
    }

    fn post(&self, payload: &Value) -> Result<()> {
        self.http
            .post(&self.url)
            .json(payload)
            .send()
            .context("Failed sending webhook notification")?
            .error_for_status()
            .context("Webhook rejected notification")?;
        Ok(())
    }
}

impl RunReporter for WebhookReporter {
    fn emit_run_summary(&self, summary: &RunSummary) -> Result<()> {
        match summary_payload(summary) {
            Some(payload) => self.post(&payload),
            None => {
                info!("Nothing was due for submission, skipping webhook notification");
                Ok(())
            }
        }
    }

    fn emit_run_failure(&self, message: &str) -> Result<()> {
        self.post(&failure_payload(message))
    }
}

fn summary_line(summary: &RunSummary) -> String {
    format!(
        "Summary: processed {}, success {}, failed {} ({})",
        summary.processed_count,
        summary.submitted.len(),
        summary.failed.len(),
        status_text(&summary.status),
    )
}

fn status_text(status: &RunStatus) -> String {
    match status {
        RunStatus::NothingToDo => "nothing to do".to_string(),
        RunStatus::Completed => "completed successfully".to_string(),
        RunStatus::PartialFailure => "completed with failures".to_string(),
        RunStatus::Halted(kind) => format!("halted on {kind} failure"),
        RunStatus::FetchFailed(kind) => format!("history fetch failed with {kind}"),
    }
}

/// `None` when the pass had nothing to submit.
pub fn summary_payload(summary: &RunSummary) -> Option<Value> {
    if summary.to_submit_count == 0 {
        return None;
    }
    let separator = "=".repeat(60);
    let mut log = [
        "scrobble-sync".to_string(),
        format!(
            "History: {} | Today: {} | Existing: {} | To submit: {}",
            summary.history_count,
            summary.today_count,
            summary.existing_count,
            summary.to_submit_count
        ),
        String::new(),
        separator.clone(),
        summary_line(summary),
        separator,
    ]
    .join("\n");
    if summary.dry_run {
        log.push_str("\nDry run, nothing was submitted");
    }
    let log = truncate_log(&log);

    let success = matches!(
        summary.status,
        RunStatus::Completed | RunStatus::NothingToDo
    );
    let color = if success { SUCCESS_COLOR } else { FAILURE_COLOR };
    let mut embed = json!({
        "title": "Scrobble Log",
        "description": format!("```\n{log}\n```"),
        "color": color,
    });
    if !summary.failed.is_empty() {
        embed["fields"] = json!([{
            "name": "Failed Songs",
            "value": failed_list(&summary.failed),
            "inline": false,
        }]);
    }
    let content = if success {
        "Scrobble sync succeeded!"
    } else {
        "Scrobble sync finished with failures"
    };
    Some(json!({ "content": content, "embeds": [embed] }))
}

pub fn failure_payload(message: &str) -> Value {
    json!({
        "content": format!("Scrobble sync failed!\n\nError: {message}"),
        "embeds": [{
            "title": "Scrobble Failed",
            "description": "Check the sync logs for more details.",
            "color": FAILURE_COLOR,
        }],
    })
}

fn failed_list(failed: &[String]) -> String {
    let mut lines: Vec<String> = failed
        .iter()
        .take(MAX_LISTED_FAILURES)
        .map(|song| format!("• {song}"))
        .collect();
    if failed.len() > MAX_LISTED_FAILURES {
        lines.push(format!(
            "... and {} more",
            failed.len() - MAX_LISTED_FAILURES
        ));
    }
    lines.join("\n")
}

fn truncate_log(log: &str) -> String {
    if log.chars().count() <= EMBED_LOG_LIMIT {
        return log.to_string();
    }
    let mut truncated: String = log.chars().take(EMBED_LOG_LIMIT).collect();
    truncated.push_str("\n... (log truncated)");
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failure::FailureKind;

    fn summary(status: RunStatus, failed: Vec<String>) -> RunSummary {
        RunSummary {
            history_count: 20,
            today_count: 12,
            existing_count: 8,
            to_submit_count: 4,
            processed_count: 4,
            submitted: vec!["Song by Artist".to_string()],
            failed,
            ignored: Vec::new(),
            status,
            consecutive_failures: 0,
            deactivate: false,
            dry_run: false,
        }
    }

    #[test]
    fn skips_payload_when_nothing_to_submit() {
        let mut quiet = summary(RunStatus::NothingToDo, Vec::new());
        quiet.to_submit_count = 0;
        assert!(summary_payload(&quiet).is_none());
    }

    #[test]
    fn success_payload_is_green_without_fields() {
        let payload = summary_payload(&summary(RunStatus::Completed, Vec::new())).unwrap();
        let embed = &payload["embeds"][0];
        assert_eq!(embed["color"], SUCCESS_COLOR);
        assert!(embed.get("fields").is_none());
        let description = embed["description"].as_str().unwrap();
        assert!(description.contains("History: 20 | Today: 12 | Existing: 8 | To submit: 4"));
    }

    #[test]
    fn lists_at_most_ten_failures() {
        let failed: Vec<String> = (1..=13).map(|n| format!("Song {n} by Artist")).collect();
        let payload = summary_payload(&summary(RunStatus::PartialFailure, failed)).unwrap();
        let embed = &payload["embeds"][0];
        assert_eq!(embed["color"], FAILURE_COLOR);
        let value = embed["fields"][0]["value"].as_str().unwrap();
        assert_eq!(value.lines().count(), 11);
        assert!(value.starts_with("• Song 1 by Artist"));
        assert!(value.ends_with("... and 3 more"));
    }

    #[test]
    fn halted_summary_names_the_kind() {
        let payload =
            summary_payload(&summary(RunStatus::Halted(FailureKind::Auth), Vec::new())).unwrap();
        let description = payload["embeds"][0]["description"].as_str().unwrap();
        assert!(description.contains("halted on AUTH failure"));
    }

    #[test]
    fn truncates_long_logs() {
        let long = "é".repeat(EMBED_LOG_LIMIT + 50);
        let truncated = truncate_log(&long);
        assert!(truncated.ends_with("... (log truncated)"));
        assert_eq!(
            truncated.chars().filter(|c| *c == 'é').count(),
            EMBED_LOG_LIMIT
        );
        assert_eq!(truncate_log("short"), "short");
    }

    #[test]
    fn failure_payload_carries_message() {
        let payload = failure_payload("401 Unauthorized");
        assert!(
            payload["content"]
                .as_str()
                .unwrap()
                .ends_with("Error: 401 Unauthorized")
        );
        assert_eq!(payload["embeds"][0]["color"], FAILURE_COLOR);
    }
}
