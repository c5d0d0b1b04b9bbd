//! Deploy phase: freshness guard, gatekeeper arbitration, and the actual
//! writes against the page repository.
//!
//! The gatekeeper is a pure function so every branch of the arbitration
//! table can be tested without a remote. Side effects happen only after a
//! decision; dry-run is checked at the write edges, so recorded actions are
//! the same either way. Staleness is decided by fingerprinting page content,
//! not by trusting blob shas across systems.

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{Settings, WorkflowConfig, WorkflowMode};
use crate::context::ChangeContext;
use crate::editor::{ReviewRecord, ReviewStatus};
use crate::github::{GitHubClient, TargetRepo};
use crate::markers::{add_deploy_marker, has_lock_marker};
use crate::remote::{ApiError, PutFile, RemoteStore};
use crate::store::{self, Workspace};
use crate::util::sha256_hex;
use crate::writer::DraftManifest;

const BRANCH_PREFIX: &str = "siteops/update";
const PR_LABELS: &[&str] = &["siteops", "automated"];

/// What the freshness guard learned by re-fetching the page.
#[derive(Debug, Clone)]
pub struct Freshness {
    /// Published content no longer matches the collect-time snapshot.
    pub stale: bool,
    /// The page gained a lock marker since collection.
    pub locked_now: bool,
    /// Blob sha to use as the write precondition, when the page exists.
    pub remote_sha: Option<String>,
    /// Fingerprint of the collect-time snapshot, when one existed.
    pub expected_fingerprint: Option<String>,
    /// Fingerprint of the page as published right now, when it exists.
    pub current_fingerprint: Option<String>,
}

/// Compare the page as it exists right now against the collect-time
/// snapshot. A page with no snapshot has no prior state to diverge from and
/// is never stale; a page that vanished since collection is a conflict.
pub fn check_freshness(
    remote: &dyn RemoteStore,
    path: &str,
    branch: &str,
    snapshot_html: Option<&str>,
) -> Result<Freshness, ApiError> {
    let expected = snapshot_html.map(|snapshot| sha256_hex(snapshot.as_bytes()));
    match remote.fetch_file(path, branch) {
        Ok(file) => {
            let current = sha256_hex(file.content.as_bytes());
            let stale = expected
                .as_deref()
                .is_some_and(|expected| expected != current);
            Ok(Freshness {
                stale,
                locked_now: has_lock_marker(&file.content),
                remote_sha: Some(file.sha),
                expected_fingerprint: expected,
                current_fingerprint: Some(current),
            })
        }
        Err(ApiError::NotFound) => Ok(Freshness {
            stale: expected.is_some(),
            locked_now: false,
            remote_sha: None,
            expected_fingerprint: expected,
            current_fingerprint: None,
        }),
        Err(err) => Err(err),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    DirectWrite,
    PullRequest,
    Skip,
}

/// The arbitration table. Anything uncertain routes to a pull request; a
/// direct write happens only for an approved, fresh, low-risk page in auto
/// mode. Staleness overrides every other signal short of a rejection.
pub fn decide(
    review: ReviewStatus,
    stale: bool,
    change_percentage: f64,
    workflow: &WorkflowConfig,
) -> (Decision, &'static str) {
    match review {
        ReviewStatus::Reject => return (Decision::Skip, "review rejected"),
        ReviewStatus::Error => return (Decision::Skip, "review errored"),
        ReviewStatus::Flagged | ReviewStatus::Approve => {}
    }
    if stale {
        (Decision::PullRequest, "page changed since collection")
    } else if workflow.mode == WorkflowMode::Manual {
        (Decision::PullRequest, "manual workflow mode")
    } else if review == ReviewStatus::Flagged {
        (Decision::PullRequest, "review flagged")
    } else if workflow.force_pr_on_high_risk && change_percentage > workflow.high_risk_threshold {
        (Decision::PullRequest, "high-risk change size")
    } else {
        (Decision::DirectWrite, "approved low-risk page")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Pushed,
    PullRequest,
    Skipped,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployAction {
    pub slug: String,
    pub kind: ActionKind,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeployOutcome {
    pub actions: Vec<DeployAction>,
    pub pushed: usize,
    pub prs: usize,
    pub skipped: usize,
    pub errors: usize,
    pub dry_run: bool,
}

impl DeployOutcome {
    fn record(&mut self, action: DeployAction) {
        match action.kind {
            ActionKind::Pushed => self.pushed += 1,
            ActionKind::PullRequest => self.prs += 1,
            ActionKind::Skipped => self.skipped += 1,
            ActionKind::Error => self.errors += 1,
        }
        self.actions.push(action);
    }
}

pub fn run(settings: &Settings, workspace: &Workspace, dry_run: bool) -> Result<DeployOutcome> {
    let context: ChangeContext =
        store::read_json(&workspace.context_path()).context("load change context")?;
    let manifest: DraftManifest =
        store::read_json(&workspace.draft_manifest_path()).context("load draft manifest")?;

    let target = TargetRepo::new(GitHubClient::from_env(), &settings.target.repo)?;
    let deployer = Deployer {
        remote: &target,
        settings,
        today: Utc::now().date_naive(),
        dry_run,
    };

    let mut outcome = DeployOutcome {
        dry_run,
        ..DeployOutcome::default()
    };
    for draft in &manifest.drafts {
        if let Some(error) = &draft.error {
            outcome.record(DeployAction {
                slug: draft.slug.clone(),
                kind: ActionKind::Error,
                reason: format!("draft failed: {error}"),
                pr_url: None,
            });
            continue;
        }
        let review: ReviewRecord = store::read_json(&workspace.review_path(&draft.slug))
            .with_context(|| format!("load review for {}", draft.slug))?;
        let html = store::read_text(&workspace.draft_path(&draft.slug))?;
        let snapshot_html = context
            .find(&draft.slug)
            .and_then(|project| project.current_html.as_deref());
        let action = deployer.deploy_one(&draft.slug, &html, &review, snapshot_html);
        info!(
            slug = %action.slug,
            kind = ?action.kind,
            reason = %action.reason,
            "deploy decision"
        );
        outcome.record(action);
    }

    info!(
        pushed = outcome.pushed,
        prs = outcome.prs,
        skipped = outcome.skipped,
        errors = outcome.errors,
        dry_run = outcome.dry_run,
        "deploy phase complete"
    );
    store::write_json(&workspace.deploy_outcome_path(), &outcome)?;
    Ok(outcome)
}

pub struct Deployer<'a> {
    pub remote: &'a dyn RemoteStore,
    pub settings: &'a Settings,
    pub today: NaiveDate,
    pub dry_run: bool,
}

impl Deployer<'_> {
    /// Arbitrate and deploy one reviewed draft. Remote failures never
    /// propagate; they become `error` actions so the rest of the batch
    /// still deploys.
    pub fn deploy_one(
        &self,
        slug: &str,
        html: &str,
        review: &ReviewRecord,
        snapshot_html: Option<&str>,
    ) -> DeployAction {
        let path = self.settings.page_path(slug);
        let branch = &self.settings.target.branch;

        let freshness = match check_freshness(self.remote, &path, branch, snapshot_html) {
            Ok(freshness) => freshness,
            Err(err) => {
                return DeployAction {
                    slug: slug.to_string(),
                    kind: ActionKind::Error,
                    reason: format!("freshness check failed: {err}"),
                    pr_url: None,
                }
            }
        };
        if freshness.locked_now {
            return DeployAction {
                slug: slug.to_string(),
                kind: ActionKind::Skipped,
                reason: "page locked since collection".to_string(),
                pr_url: None,
            };
        }

        let (decision, reason) = decide(
            review.status,
            freshness.stale,
            review.change_percentage,
            &self.settings.workflow,
        );

        if decision == Decision::Skip {
            // Carry the reviewer's reason so the report can say why.
            let reason = if review.reason.is_empty() {
                reason.to_string()
            } else {
                format!("{reason}: {}", review.reason)
            };
            return DeployAction {
                slug: slug.to_string(),
                kind: ActionKind::Skipped,
                reason,
                pr_url: None,
            };
        }
        if freshness.stale {
            warn!(
                slug = %slug,
                expected = freshness.expected_fingerprint.as_deref().unwrap_or("absent"),
                current = freshness.current_fingerprint.as_deref().unwrap_or("absent"),
                "page changed since collection"
            );
        }
        if self.dry_run {
            info!(slug = %slug, "dry run, would {}", describe(decision, reason));
        }

        let stamped = add_deploy_marker(html, self.today);
        let result = match decision {
            Decision::DirectWrite => self
                .direct_write(slug, &path, &stamped, freshness.remote_sha.as_deref())
                .map(|()| DeployAction {
                    slug: slug.to_string(),
                    kind: ActionKind::Pushed,
                    reason: reason.to_string(),
                    pr_url: None,
                }),
            Decision::PullRequest => self
                .pull_request(slug, &path, &stamped, &freshness, review, reason)
                .map(|pr_url| DeployAction {
                    slug: slug.to_string(),
                    kind: ActionKind::PullRequest,
                    reason: reason.to_string(),
                    pr_url,
                }),
            Decision::Skip => unreachable!("skip handled above"),
        };
        result.unwrap_or_else(|err| DeployAction {
            slug: slug.to_string(),
            kind: ActionKind::Error,
            reason: format!("deploy failed: {err}"),
            pr_url: None,
        })
    }

    fn direct_write(
        &self,
        slug: &str,
        path: &str,
        html: &str,
        precondition: Option<&str>,
    ) -> Result<(), ApiError> {
        if self.dry_run {
            return Ok(());
        }
        let message = commit_message(slug, precondition.is_some());
        self.remote.put_file(&PutFile {
            path,
            content: html,
            message: &message,
            branch: &self.settings.target.branch,
            precondition,
        })
    }

    fn pull_request(
        &self,
        slug: &str,
        path: &str,
        html: &str,
        freshness: &Freshness,
        review: &ReviewRecord,
        reason: &str,
    ) -> Result<Option<String>, ApiError> {
        if self.dry_run {
            return Ok(None);
        }
        let precondition = freshness.remote_sha.as_deref();
        let base = &self.settings.target.branch;
        let branch = format!("{BRANCH_PREFIX}-{slug}-{}", self.today.format("%Y-%m-%d"));
        let head_sha = self.remote.branch_head(base)?;

        // A branch left over from an earlier run for the same slug and day
        // is replaced, not reused.
        match self.remote.create_branch(&branch, &head_sha) {
            Ok(()) => {}
            Err(ApiError::Conflict(_)) => {
                self.remote.delete_branch(&branch)?;
                self.remote.create_branch(&branch, &head_sha)?;
            }
            Err(err) => return Err(err),
        }

        let message = commit_message(slug, precondition.is_some());
        self.remote.put_file(&PutFile {
            path,
            content: html,
            message: &message,
            branch: &branch,
            precondition,
        })?;

        let title = format!("Update project page: {slug}");
        let body = pr_body(review, reason, freshness);
        let pr = self.remote.open_pull_request(&title, &body, &branch, base)?;

        let labels: Vec<String> = PR_LABELS.iter().map(|label| label.to_string()).collect();
        if let Err(err) = self.remote.add_labels(pr.number, &labels) {
            // Labels are cosmetic; the pull request itself succeeded.
            warn!(slug = %slug, pr = pr.number, error = %err, "could not label pull request");
        }
        Ok(Some(pr.url))
    }
}

fn describe(decision: Decision, reason: &str) -> String {
    match decision {
        Decision::DirectWrite => format!("push directly ({reason})"),
        Decision::PullRequest => format!("open a pull request ({reason})"),
        Decision::Skip => format!("skip ({reason})"),
    }
}

fn commit_message(slug: &str, exists: bool) -> String {
    if exists {
        format!("Update {slug} project page")
    } else {
        format!("Add {slug} project page")
    }
}

fn pr_body(review: &ReviewRecord, reason: &str, freshness: &Freshness) -> String {
    let mut body = format!(
        "Automated page update.\n\nRouted to review because: {reason}.\n\n\
         Review verdict: {:?}\nReview reason: {}\nChange size: {}\n",
        review.status, review.reason, review.diff_summary
    );
    if freshness.stale {
        body.push_str(&format!(
            "\nPage changed since collection.\nExpected fingerprint: {}\nCurrent fingerprint: {}\n",
            freshness.expected_fingerprint.as_deref().unwrap_or("absent"),
            freshness.current_fingerprint.as_deref().unwrap_or("absent"),
        ));
    }
    if !review.issues.is_empty() {
        body.push_str("\nIssues noted:\n");
        for issue in &review.issues {
            body.push_str(&format!("- {issue}\n"));
        }
    }
    body
}
