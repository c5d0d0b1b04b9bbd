//! Collect phase: discover tracked projects, fetch their recent activity,
//! and score each one into a change verdict.
//!
//! One project failing to fetch never aborts the phase; the failure becomes
//! an `error` snapshot and the run carries on. Locked pages short-circuit
//! before any source-repository fetch.

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::config::{DiscoveryConfig, DiscoveryMethod, Settings};
use crate::context::{ChangeContext, ProjectSnapshot};
use crate::github::{GitHubClient, TargetRepo};
use crate::index::{build_index, PageRecord};
use crate::remote::ApiError;
use crate::score::{self, Activity, ChangeStatus, REASON_LOCKED};
use crate::store::{self, Workspace};
use crate::util::truncate_string;

const MAX_COMMITS_KEPT: usize = 10;
const MAX_LANGUAGES_KEPT: usize = 5;
const MAX_RELEASES_KEPT: usize = 3;

pub fn run(settings: &Settings, workspace: &Workspace, force: bool) -> Result<ChangeContext> {
    let client = GitHubClient::from_env();
    let target = TargetRepo::new(GitHubClient::from_env(), &settings.target.repo)?;

    let repos = discover(&client, &settings.discovery);
    info!(projects = repos.len(), "discovered tracked projects");

    let index = build_index(&target, &settings.target.output_dir, &settings.target.branch)
        .context("index published pages")?;

    let mut context = ChangeContext::new(settings.config_hash()?);
    for full_name in &repos {
        let slug = slugify(repo_name(full_name));
        let record = index.get(&slug);
        let snapshot = match collect_project(&client, settings, &slug, full_name, record, force) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(slug = %slug, error = %err, "collection failed for project");
                error_snapshot(&slug, full_name, index.contains_key(&slug), err)
            }
        };
        info!(
            slug = %snapshot.slug,
            status = ?snapshot.status,
            score = snapshot.change_score,
            reason = %snapshot.change_reason,
            "scored project"
        );
        context.record(snapshot);
    }

    info!(
        total = context.summary.total,
        updates = context.summary.updates,
        new = context.summary.new,
        skips = context.summary.skips,
        locked = context.summary.locked,
        errors = context.summary.errors,
        "collection complete"
    );
    store::write_json(&workspace.context_path(), &context)?;
    Ok(context)
}

/// Repositories to track, as `owner/repo` full names. Topic search falls
/// back to the configured list when it finds nothing or fails.
fn discover(client: &GitHubClient, discovery: &DiscoveryConfig) -> Vec<String> {
    match discovery.method {
        DiscoveryMethod::List => discovery.fallback_list.clone(),
        DiscoveryMethod::Topic => {
            match client.search_repos_by_topic(&discovery.owner, &discovery.topic_tag) {
                Ok(found) if !found.is_empty() => found,
                Ok(_) => {
                    warn!(
                        topic = %discovery.topic_tag,
                        "topic search found nothing, using fallback list"
                    );
                    discovery.fallback_list.clone()
                }
                Err(err) => {
                    warn!(error = %err, "topic search failed, using fallback list");
                    discovery.fallback_list.clone()
                }
            }
        }
    }
}

fn collect_project(
    client: &GitHubClient,
    settings: &Settings,
    slug: &str,
    full_name: &str,
    record: Option<&PageRecord>,
    force: bool,
) -> Result<ProjectSnapshot, ApiError> {
    let published = record.is_some();

    // Locked pages are opted out of automation; don't even fetch activity.
    if let Some(page) = record {
        if page.locked {
            return Ok(ProjectSnapshot {
                slug: slug.to_string(),
                repo: full_name.to_string(),
                exists: true,
                locked: true,
                status: ChangeStatus::Skip,
                change_score: 0,
                change_reason: REASON_LOCKED.to_string(),
                last_deploy: page.last_deploy,
                commits: Vec::new(),
                languages: Vec::new(),
                readme_excerpt: String::new(),
                readme_sha: None,
                releases: Vec::new(),
                description: String::new(),
                stars: 0,
                forks: 0,
                current_html: None,
                manual_sections: Vec::new(),
            });
        }
    }

    let (owner, repo) = full_name
        .split_once('/')
        .ok_or_else(|| ApiError::Decode(format!("bad repo full name: {full_name}")))?;

    let facts = client.fetch_repo(owner, repo)?;
    let mut commits = client.fetch_commits(owner, repo, settings.collector.commits_lookback_days)?;
    let mut releases = client.fetch_releases(owner, repo, MAX_RELEASES_KEPT)?;
    releases.retain(|release| !release.draft);
    let mut languages = client.fetch_languages(owner, repo)?;
    let readme = client.fetch_readme(owner, repo)?;

    let activity = Activity {
        commits: &commits,
        releases: &releases,
        readme_changed: score::readme_changed(&readme.content, published),
    };
    let mut verdict = score::score(&activity, published, &settings.scoring);
    if force {
        verdict = score::promote_forced(verdict);
    }

    commits.truncate(MAX_COMMITS_KEPT);
    languages.truncate(MAX_LANGUAGES_KEPT);

    Ok(ProjectSnapshot {
        slug: slug.to_string(),
        repo: full_name.to_string(),
        exists: published,
        locked: false,
        status: verdict.status,
        change_score: verdict.score,
        change_reason: verdict.reason,
        last_deploy: record.and_then(|page| page.last_deploy),
        commits,
        languages,
        readme_excerpt: truncate_string(&readme.content, settings.collector.readme_excerpt_length),
        readme_sha: readme.sha,
        releases,
        description: facts.description,
        stars: facts.stars,
        forks: facts.forks,
        current_html: record.map(|page| page.content.clone()),
        manual_sections: record.map(|page| page.manual_sections.clone()).unwrap_or_default(),
    })
}

fn error_snapshot(slug: &str, full_name: &str, exists: bool, err: ApiError) -> ProjectSnapshot {
    ProjectSnapshot {
        slug: slug.to_string(),
        repo: full_name.to_string(),
        exists,
        locked: false,
        status: ChangeStatus::Error,
        change_score: 0,
        change_reason: err.to_string(),
        last_deploy: None,
        commits: Vec::new(),
        languages: Vec::new(),
        readme_excerpt: String::new(),
        readme_sha: None,
        releases: Vec::new(),
        description: String::new(),
        stars: 0,
        forks: 0,
        current_html: None,
        manual_sections: Vec::new(),
    }
}

fn repo_name(full_name: &str) -> &str {
    full_name
        .split_once('/')
        .map_or(full_name, |(_, name)| name)
}

/// Page slug for a repository name: lowercase, runs of non-alphanumerics
/// collapsed to single hyphens.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_hyphen = false;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_hyphen = true;
        }
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_normalizes_repo_names() {
        assert_eq!(slugify("My_Project"), "my-project");
        assert_eq!(slugify("alpha"), "alpha");
        assert_eq!(slugify("weird--name!!"), "weird-name");
        assert_eq!(slugify("--padded--"), "padded");
    }

    #[test]
    fn repo_name_strips_owner() {
        assert_eq!(repo_name("owner/alpha"), "alpha");
        assert_eq!(repo_name("bare"), "bare");
    }

    #[test]
    fn error_snapshot_preserves_existence() {
        let snapshot = error_snapshot("alpha", "owner/alpha", true, ApiError::NotFound);
        assert_eq!(snapshot.status, ChangeStatus::Error);
        assert!(snapshot.exists);
        assert!(!snapshot.change_reason.is_empty());
    }
}
