//! Review phase: policy checks plus a model pass over every draft.
//!
//! Deterministic checks run first and can only make the model's verdict
//! stricter, never looser. A review reply that fails to parse is itself a
//! reason for caution, so it forces `FLAGGED` rather than being retried or
//! ignored.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{info, warn};

use crate::config::{PolicyConfig, Settings};
use crate::context::ChangeContext;
use crate::llm::{extract_json, LmClient, TokenUsage};
use crate::store::{self, Workspace};
use crate::writer::DraftManifest;

const PROMPT_TEMPLATE: &str = include_str!("../prompts/editor.md");

const SYSTEM_PROMPT: &str =
    "You are a strict editorial reviewer. Respond with exactly one JSON object.";

/// Severity order matters: `Reject` > `Flagged` > `Approve`. `Error` marks a
/// draft the reviewer never produced a verdict for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReviewStatus {
    Approve,
    Flagged,
    Reject,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub slug: String,
    pub status: ReviewStatus,
    pub reason: String,
    #[serde(default)]
    pub issues: Vec<String>,
    pub diff_summary: String,
    /// Share of draft lines not present in the published page, 0..=100.
    pub change_percentage: f64,
    #[serde(default)]
    pub usage: TokenUsage,
}

pub fn run(settings: &Settings, workspace: &Workspace) -> Result<Vec<ReviewRecord>> {
    let context: ChangeContext =
        store::read_json(&workspace.context_path()).context("load change context")?;
    let manifest: DraftManifest =
        store::read_json(&workspace.draft_manifest_path()).context("load draft manifest")?;

    let drafted: Vec<_> = manifest
        .drafts
        .iter()
        .filter(|draft| draft.error.is_none())
        .collect();
    if drafted.is_empty() {
        info!("no drafts to review");
        return Ok(Vec::new());
    }

    let client = LmClient::from_config(&settings.llm)?;
    let mut records = Vec::new();
    for draft in drafted {
        let record = match review_draft(&client, settings, workspace, &context, &draft.slug) {
            Ok(record) => record,
            Err(err) => {
                warn!(slug = %draft.slug, error = %err, "review failed");
                ReviewRecord {
                    slug: draft.slug.clone(),
                    status: ReviewStatus::Error,
                    reason: format!("{err:#}"),
                    issues: Vec::new(),
                    diff_summary: String::new(),
                    change_percentage: 0.0,
                    usage: TokenUsage::default(),
                }
            }
        };
        info!(
            slug = %record.slug,
            status = ?record.status,
            change_pct = record.change_percentage,
            "review verdict"
        );
        store::write_json(&workspace.review_path(&record.slug), &record)?;
        records.push(record);
    }
    Ok(records)
}

fn review_draft(
    client: &LmClient,
    settings: &Settings,
    workspace: &Workspace,
    context: &ChangeContext,
    slug: &str,
) -> Result<ReviewRecord> {
    let draft = store::read_text(&workspace.draft_path(slug))?;
    let project = context
        .find(slug)
        .with_context(|| format!("draft {slug} has no snapshot"))?;

    let current = project.current_html.as_deref();
    let change_percentage = change_percentage(current, &draft);
    let diff_summary = match current {
        Some(old) => format!(
            "{} -> {} lines, {:.0}% changed",
            old.lines().count(),
            draft.lines().count(),
            change_percentage
        ),
        None => format!("new page, {} lines", draft.lines().count()),
    };

    // Hard policy gate: a structurally broken page is rejected before any
    // model call.
    if !looks_like_complete_html(&draft) {
        return Ok(ReviewRecord {
            slug: slug.to_string(),
            status: ReviewStatus::Reject,
            reason: "draft is not a complete html document".to_string(),
            issues: Vec::new(),
            diff_summary,
            change_percentage,
            usage: TokenUsage::default(),
        });
    }

    let mut issues = policy_issues(&draft, &settings.policy);
    let floor = if issues.is_empty() {
        ReviewStatus::Approve
    } else {
        ReviewStatus::Flagged
    };

    let prompt = PROMPT_TEMPLATE
        .replace("{slug}", slug)
        .replace("{repo}", &project.repo)
        .replace("{description}", &project.description)
        .replace("{draft}", &draft);
    let completion = client
        .complete(SYSTEM_PROMPT, &prompt, settings.llm.max_tokens_review)
        .with_context(|| format!("review completion for {slug}"))?;

    let (mut status, mut reason, model_issues) = match parse_verdict(&completion.text) {
        Some(parsed) => parsed,
        None => {
            warn!(slug = %slug, "unparseable review reply, forcing FLAGGED");
            (
                ReviewStatus::Flagged,
                "review reply was not valid json".to_string(),
                Vec::new(),
            )
        }
    };
    issues.extend(model_issues);
    if severity(floor) > severity(status) {
        status = floor;
        reason = issues.first().cloned().unwrap_or_else(|| reason.clone());
    }

    Ok(ReviewRecord {
        slug: slug.to_string(),
        status,
        reason,
        issues,
        diff_summary,
        change_percentage,
        usage: completion.usage,
    })
}

fn severity(status: ReviewStatus) -> u8 {
    match status {
        ReviewStatus::Approve => 0,
        ReviewStatus::Flagged => 1,
        ReviewStatus::Reject => 2,
        ReviewStatus::Error => 3,
    }
}

fn parse_verdict(reply: &str) -> Option<(ReviewStatus, String, Vec<String>)> {
    let object = extract_json(reply)?;
    let value: Value = serde_json::from_str(object).ok()?;
    let status = match value.get("status").and_then(Value::as_str)? {
        "APPROVE" => ReviewStatus::Approve,
        "FLAGGED" => ReviewStatus::Flagged,
        "REJECT" => ReviewStatus::Reject,
        _ => return None,
    };
    let reason = value
        .get("reason")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let issues = value
        .get("issues")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect();
    Some((status, reason, issues))
}

/// Deterministic policy checks: forbidden words and required section ids.
fn policy_issues(draft: &str, policy: &PolicyConfig) -> Vec<String> {
    let mut issues = Vec::new();
    let lowered = draft.to_lowercase();
    for word in &policy.forbidden_words {
        if lowered.contains(&word.to_lowercase()) {
            issues.push(format!("forbidden word: {word}"));
        }
    }
    for section in &policy.required_sections {
        let id_attr = format!("id=\"{section}\"");
        if !draft.contains(&id_attr) {
            issues.push(format!("missing required section: {section}"));
        }
    }
    issues
}

/// Cheap structural sanity: the page must carry html and body tags, close
/// them, and have roughly balanced open/close tag counts. Void elements and
/// comments keep the counts from balancing exactly, hence the slack.
fn looks_like_complete_html(draft: &str) -> bool {
    let lowered = draft.to_lowercase();
    if !lowered.contains("<html")
        || !lowered.contains("<body")
        || !lowered.contains("</body>")
        || !lowered.contains("</html>")
    {
        return false;
    }
    let closing = lowered.matches("</").count();
    let opening = lowered.matches('<').count() - closing;
    opening.abs_diff(closing) < 10
}

/// Share of draft lines with no identical counterpart in the published page.
/// A new page is 100% changed by definition.
pub fn change_percentage(current: Option<&str>, draft: &str) -> f64 {
    let Some(current) = current else {
        return 100.0;
    };
    let mut old_lines: HashMap<&str, usize> = HashMap::new();
    for line in current.lines() {
        *old_lines.entry(line.trim()).or_default() += 1;
    }
    let total = draft.lines().count();
    if total == 0 {
        return 100.0;
    }
    let mut changed = 0usize;
    for line in draft.lines() {
        match old_lines.get_mut(line.trim()) {
            Some(count) if *count > 0 => *count -= 1,
            _ => changed += 1,
        }
    }
    changed as f64 * 100.0 / total as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_verdict_accepts_wrapped_json() {
        let reply = "Here you go:\n{\"status\": \"FLAGGED\", \"reason\": \"overclaims\", \"issues\": [\"superlative in intro\"]}";
        let (status, reason, issues) = parse_verdict(reply).unwrap();
        assert_eq!(status, ReviewStatus::Flagged);
        assert_eq!(reason, "overclaims");
        assert_eq!(issues, vec!["superlative in intro".to_string()]);
    }

    #[test]
    fn parse_verdict_rejects_unknown_status() {
        assert!(parse_verdict("{\"status\": \"MAYBE\"}").is_none());
        assert!(parse_verdict("not json at all").is_none());
    }

    #[test]
    fn policy_issues_catch_words_and_sections() {
        let policy = PolicyConfig {
            forbidden_words: vec!["revolutionary".to_string()],
            required_sections: vec!["overview".to_string(), "activity".to_string()],
        };
        let draft = "<html><body><h1>A Revolutionary Tool</h1><div id=\"overview\"></div></body></html>";
        let issues = policy_issues(draft, &policy);
        assert_eq!(issues.len(), 2);
        assert!(issues[0].contains("revolutionary"));
        assert!(issues[1].contains("activity"));
    }

    #[test]
    fn incomplete_html_is_detected() {
        assert!(!looks_like_complete_html("<div>fragment</div>"));
        assert!(!looks_like_complete_html("<html><body>truncated"));
        assert!(looks_like_complete_html(
            "<html><head><title>t</title></head><body><p>ok</p></body></html>"
        ));
    }

    #[test]
    fn change_percentage_for_new_page_is_total() {
        assert_eq!(change_percentage(None, "<html></html>"), 100.0);
    }

    #[test]
    fn change_percentage_counts_novel_lines() {
        let old = "a\nb\nc\nd";
        let new = "a\nb\nX\nY";
        assert_eq!(change_percentage(Some(old), new), 50.0);
        assert_eq!(change_percentage(Some(old), old), 0.0);
    }

    #[test]
    fn severity_orders_verdicts() {
        assert!(severity(ReviewStatus::Reject) > severity(ReviewStatus::Flagged));
        assert!(severity(ReviewStatus::Flagged) > severity(ReviewStatus::Approve));
    }
}
