//! Run accounting: per-run log, cost estimate, markdown report, and the
//! rolling dashboard.
//!
//! The report phase only reads artifacts earlier phases persisted, so it can
//! be re-run at any time and produce the same run id. Dashboard updates merge
//! by run id and atomically replace the file, which keeps re-reporting from
//! duplicating entries.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::context::{ChangeContext, CollectSummary};
use crate::deploy::DeployOutcome;
use crate::editor::{ReviewRecord, ReviewStatus};
use crate::llm::TokenUsage;
use crate::store::{self, Workspace};
use crate::writer::DraftManifest;

const PRICE_INPUT_PER_1K: f64 = 0.003;
const PRICE_OUTPUT_PER_1K: f64 = 0.015;
const DASHBOARD_RUNS_KEPT: usize = 20;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewCounts {
    pub approved: usize,
    pub flagged: usize,
    pub rejected: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLog {
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub reported_at: DateTime<Utc>,
    pub config_hash: String,
    pub collect: CollectSummary,
    pub drafted: usize,
    pub draft_failures: usize,
    pub reviews: ReviewCounts,
    pub pushed: usize,
    pub prs: usize,
    pub deploy_skipped: usize,
    pub deploy_errors: usize,
    pub usage: TokenUsage,
    pub estimated_cost_usd: f64,
    pub dry_run: bool,
    pub success: bool,
}

pub fn run(workspace: &Workspace) -> Result<RunLog> {
    let context: ChangeContext =
        store::read_json(&workspace.context_path()).context("load change context")?;
    let manifest: DraftManifest =
        store::read_json_opt(&workspace.draft_manifest_path())?.unwrap_or_default();
    let outcome: DeployOutcome =
        store::read_json_opt(&workspace.deploy_outcome_path())?.unwrap_or_default();

    let mut usage = manifest.usage;
    let mut reviews = ReviewCounts::default();
    for draft in manifest.drafts.iter().filter(|d| d.error.is_none()) {
        let Some(review) =
            store::read_json_opt::<ReviewRecord>(&workspace.review_path(&draft.slug))?
        else {
            continue;
        };
        usage.add(review.usage);
        match review.status {
            ReviewStatus::Approve => reviews.approved += 1,
            ReviewStatus::Flagged => reviews.flagged += 1,
            ReviewStatus::Reject => reviews.rejected += 1,
            ReviewStatus::Error => reviews.errors += 1,
        }
    }

    let drafted = manifest.drafts.iter().filter(|d| d.error.is_none()).count();
    let draft_failures = manifest.drafts.len() - drafted;
    let log = RunLog {
        run_id: run_id(&context),
        generated_at: context.generated_at,
        reported_at: Utc::now(),
        config_hash: context.config_hash.clone(),
        collect: context.summary,
        drafted,
        draft_failures,
        reviews,
        pushed: outcome.pushed,
        prs: outcome.prs,
        deploy_skipped: outcome.skipped,
        deploy_errors: outcome.errors,
        usage,
        estimated_cost_usd: estimate_cost(usage),
        dry_run: outcome.dry_run,
        success: is_success(outcome.pushed, outcome.prs, outcome.errors),
    };

    store::write_json(&workspace.run_log_path(&log.run_id), &log)?;
    store::write_text(
        &workspace.report_path(&log.run_id),
        &render_report(&log, &outcome),
    )?;
    update_dashboard(workspace.dashboard_path(), DashboardEntry::from_log(&log))?;

    info!(
        run_id = %log.run_id,
        pushed = log.pushed,
        prs = log.prs,
        cost_usd = log.estimated_cost_usd,
        success = log.success,
        "run report written"
    );
    Ok(log)
}

/// Run id derived from collection time, so re-reporting the same run is
/// idempotent.
fn run_id(context: &ChangeContext) -> String {
    context.generated_at.format("%Y%m%d-%H%M%S").to_string()
}

/// A run succeeded when it shipped something and no deployment errored. A
/// run with no deployable work is not a success, it is a no-op.
pub fn is_success(pushed: usize, prs: usize, deploy_errors: usize) -> bool {
    pushed + prs > 0 && deploy_errors == 0
}

pub fn estimate_cost(usage: TokenUsage) -> f64 {
    usage.input_tokens as f64 / 1000.0 * PRICE_INPUT_PER_1K
        + usage.output_tokens as f64 / 1000.0 * PRICE_OUTPUT_PER_1K
}

fn render_report(log: &RunLog, outcome: &DeployOutcome) -> String {
    let mut report = format!(
        "# Run {id}\n\n\
         - Collected: {total} projects ({updates} updates, {new} new, {skips} skips, {locked} locked, {cerr} errors)\n\
         - Drafted: {drafted} ({dfail} failed)\n\
         - Reviews: {appr} approved, {flag} flagged, {rej} rejected, {rerr} errors\n\
         - Deployed: {pushed} pushed, {prs} pull requests, {dskip} skipped, {derr} errors\n\
         - Tokens: {input} in / {output} out (~${cost:.4})\n\
         - Outcome: {verdict}{dry}\n",
        id = log.run_id,
        total = log.collect.total,
        updates = log.collect.updates,
        new = log.collect.new,
        skips = log.collect.skips,
        locked = log.collect.locked,
        cerr = log.collect.errors,
        drafted = log.drafted,
        dfail = log.draft_failures,
        appr = log.reviews.approved,
        flag = log.reviews.flagged,
        rej = log.reviews.rejected,
        rerr = log.reviews.errors,
        pushed = log.pushed,
        prs = log.prs,
        dskip = log.deploy_skipped,
        derr = log.deploy_errors,
        input = log.usage.input_tokens,
        output = log.usage.output_tokens,
        cost = log.estimated_cost_usd,
        verdict = if log.success { "success" } else { "no-op or errors" },
        dry = if log.dry_run { " (dry run)" } else { "" },
    );
    if !outcome.actions.is_empty() {
        report.push_str("\n## Actions\n\n");
        for action in &outcome.actions {
            report.push_str(&format!(
                "- `{}`: {:?} ({}){}\n",
                action.slug,
                action.kind,
                action.reason,
                action
                    .pr_url
                    .as_deref()
                    .map(|url| format!(" {url}"))
                    .unwrap_or_default()
            ));
        }
    }
    report
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dashboard {
    pub runs: Vec<DashboardEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardEntry {
    pub run_id: String,
    pub reported_at: DateTime<Utc>,
    pub pushed: usize,
    pub prs: usize,
    pub errors: usize,
    pub estimated_cost_usd: f64,
    pub success: bool,
}

impl DashboardEntry {
    fn from_log(log: &RunLog) -> Self {
        Self {
            run_id: log.run_id.clone(),
            reported_at: log.reported_at,
            pushed: log.pushed,
            prs: log.prs,
            errors: log.collect.errors
                + log.draft_failures
                + log.reviews.errors
                + log.deploy_errors,
            estimated_cost_usd: log.estimated_cost_usd,
            success: log.success,
        }
    }
}

impl Dashboard {
    /// Merge one run by id, newest first, keeping a bounded history.
    pub fn upsert(&mut self, entry: DashboardEntry) {
        self.runs.retain(|run| run.run_id != entry.run_id);
        self.runs.insert(0, entry);
        self.runs.sort_by(|a, b| b.run_id.cmp(&a.run_id));
        self.runs.truncate(DASHBOARD_RUNS_KEPT);
    }
}

/// Load-merge-replace. The write goes through a temp file rename, so a
/// crashed report run never leaves a truncated dashboard.
pub fn update_dashboard(path: &Path, entry: DashboardEntry) -> Result<()> {
    let mut dashboard: Dashboard = store::read_json_opt(path)?.unwrap_or_default();
    dashboard.upsert(entry);
    store::write_json(path, &dashboard)
}
