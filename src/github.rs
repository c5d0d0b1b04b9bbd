//! GitHub REST client.
//!
//! Thin synchronous wrapper over `ureq`. Read-only queries for tracked
//! source repositories live on [`GitHubClient`]; mutations against the page
//! repository go through [`TargetRepo`], which implements the
//! [`RemoteStore`] seam. No retries here: resilience policy belongs to the
//! caller, and conflicts must surface unchanged.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{Duration, SecondsFormat, Utc};
use regex::Regex;
use serde_json::{json, Value};
use std::env;
use std::sync::OnceLock;
use std::time::Duration as StdDuration;
use ureq::Agent;

use crate::remote::{
    ApiError, CommitInfo, CommitKind, DirEntry, PullRequestRef, PutFile, ReadmeFetch, ReleaseInfo,
    RemoteFile, RemoteStore, RepoFacts,
};

const API_BASE: &str = "https://api.github.com";
const USER_AGENT: &str = concat!("siteops/", env!("CARGO_PKG_VERSION"));

pub struct GitHubClient {
    agent: Agent,
    token: Option<String>,
}

impl GitHubClient {
    pub fn new(token: Option<String>) -> Self {
        let agent: Agent = Agent::config_builder()
            .timeout_global(Some(StdDuration::from_secs(30)))
            .build()
            .into();
        Self { agent, token }
    }

    /// Token from `SITEOPS_TOKEN`, falling back to `GITHUB_TOKEN`.
    pub fn from_env() -> Self {
        let token = env::var("SITEOPS_TOKEN")
            .or_else(|_| env::var("GITHUB_TOKEN"))
            .ok();
        Self::new(token)
    }

    fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value, ApiError> {
        let url = format!("{API_BASE}{path}");
        let mut request = self
            .agent
            .get(&url)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .header("User-Agent", USER_AGENT);
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }
        for (key, value) in query {
            request = request.query(*key, value);
        }
        let mut response = request.call().map_err(map_http_error)?;
        response
            .body_mut()
            .read_json::<Value>()
            .map_err(|err| ApiError::Decode(err.to_string()))
    }

    fn post_json(&self, path: &str, body: &Value) -> Result<Value, ApiError> {
        let url = format!("{API_BASE}{path}");
        let mut request = self
            .agent
            .post(&url)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .header("User-Agent", USER_AGENT);
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }
        let mut response = request.send_json(body).map_err(map_http_error)?;
        response
            .body_mut()
            .read_json::<Value>()
            .map_err(|err| ApiError::Decode(err.to_string()))
    }

    fn put_json(&self, path: &str, body: &Value) -> Result<Value, ApiError> {
        let url = format!("{API_BASE}{path}");
        let mut request = self
            .agent
            .put(&url)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .header("User-Agent", USER_AGENT);
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }
        let mut response = request.send_json(body).map_err(map_http_error)?;
        response
            .body_mut()
            .read_json::<Value>()
            .map_err(|err| ApiError::Decode(err.to_string()))
    }

    fn delete(&self, path: &str) -> Result<(), ApiError> {
        let url = format!("{API_BASE}{path}");
        let mut request = self
            .agent
            .delete(&url)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .header("User-Agent", USER_AGENT);
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }
        request.call().map_err(map_http_error)?;
        Ok(())
    }

    pub fn fetch_repo(&self, owner: &str, repo: &str) -> Result<RepoFacts, ApiError> {
        let value = self.get_json(&format!("/repos/{owner}/{repo}"), &[])?;
        Ok(RepoFacts {
            description: string_field(&value, "description"),
            stars: value
                .get("stargazers_count")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            forks: value.get("forks_count").and_then(Value::as_u64).unwrap_or(0),
        })
    }

    /// Recent commits in the lookback window, tagged by conventional-commit
    /// category.
    pub fn fetch_commits(
        &self,
        owner: &str,
        repo: &str,
        since_days: i64,
    ) -> Result<Vec<CommitInfo>, ApiError> {
        let since =
            (Utc::now() - Duration::days(since_days)).to_rfc3339_opts(SecondsFormat::Secs, true);
        let value = self.get_json(
            &format!("/repos/{owner}/{repo}/commits"),
            &[("since", since), ("per_page", "100".to_string())],
        )?;
        let mut commits = Vec::new();
        for item in value.as_array().into_iter().flatten() {
            let message = item
                .pointer("/commit/message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .lines()
                .next()
                .unwrap_or_default()
                .to_string();
            let sha = string_field(item, "sha");
            let date = item
                .pointer("/commit/author/date")
                .and_then(Value::as_str)
                .unwrap_or_default();
            commits.push(CommitInfo {
                sha: sha.chars().take(7).collect(),
                date: date.chars().take(10).collect(),
                kind: commit_kind(&message),
                author: item
                    .pointer("/commit/author/name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                message,
            });
        }
        Ok(commits)
    }

    pub fn fetch_releases(
        &self,
        owner: &str,
        repo: &str,
        limit: usize,
    ) -> Result<Vec<ReleaseInfo>, ApiError> {
        let value = self.get_json(
            &format!("/repos/{owner}/{repo}/releases"),
            &[("per_page", limit.to_string())],
        )?;
        let mut releases = Vec::new();
        for item in value.as_array().into_iter().flatten() {
            let tag = string_field(item, "tag_name");
            let name = match item.get("name").and_then(Value::as_str) {
                Some(name) if !name.is_empty() => name.to_string(),
                _ => tag.clone(),
            };
            releases.push(ReleaseInfo {
                tag,
                name,
                date: item
                    .get("published_at")
                    .and_then(Value::as_str)
                    .map(|date| date.chars().take(10).collect()),
                notes: crate::util::truncate_string(&string_field(item, "body"), 500),
                prerelease: item
                    .get("prerelease")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
                draft: item.get("draft").and_then(Value::as_bool).unwrap_or(false),
            });
        }
        Ok(releases)
    }

    /// Language names sorted by byte count, descending.
    pub fn fetch_languages(&self, owner: &str, repo: &str) -> Result<Vec<String>, ApiError> {
        let value = self.get_json(&format!("/repos/{owner}/{repo}/languages"), &[])?;
        let mut pairs: Vec<(String, u64)> = value
            .as_object()
            .into_iter()
            .flatten()
            .map(|(name, bytes)| (name.clone(), bytes.as_u64().unwrap_or(0)))
            .collect();
        pairs.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Ok(pairs.into_iter().map(|(name, _)| name).collect())
    }

    /// README content and blob sha. A repository without a README yields an
    /// empty fetch, not an error.
    pub fn fetch_readme(&self, owner: &str, repo: &str) -> Result<ReadmeFetch, ApiError> {
        match self.get_json(&format!("/repos/{owner}/{repo}/readme"), &[]) {
            Ok(value) => Ok(ReadmeFetch {
                content: decode_base64_content(&value)?,
                sha: value.get("sha").and_then(Value::as_str).map(str::to_string),
            }),
            Err(ApiError::NotFound) => Ok(ReadmeFetch {
                content: String::new(),
                sha: None,
            }),
            Err(err) => Err(err),
        }
    }

    /// Full names of the owner's repositories carrying the given topic.
    pub fn search_repos_by_topic(
        &self,
        owner: &str,
        topic: &str,
    ) -> Result<Vec<String>, ApiError> {
        let value = self.get_json(
            "/search/repositories",
            &[
                ("q", format!("topic:{topic} user:{owner}")),
                ("per_page", "100".to_string()),
            ],
        )?;
        Ok(value
            .get("items")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|item| item.get("full_name").and_then(Value::as_str))
            .map(str::to_string)
            .collect())
    }
}

/// Mutating handle on the page repository.
pub struct TargetRepo {
    client: GitHubClient,
    owner: String,
    repo: String,
}

impl TargetRepo {
    pub fn new(client: GitHubClient, full_name: &str) -> anyhow::Result<Self> {
        let (owner, repo) = full_name
            .split_once('/')
            .ok_or_else(|| anyhow::anyhow!("target repo must be owner/repo: {full_name}"))?;
        Ok(Self {
            client,
            owner: owner.to_string(),
            repo: repo.to_string(),
        })
    }

    fn repo_path(&self, rest: &str) -> String {
        format!("/repos/{}/{}/{rest}", self.owner, self.repo)
    }
}

impl RemoteStore for TargetRepo {
    fn list_directory(&self, dir: &str, branch: &str) -> Result<Vec<DirEntry>, ApiError> {
        let dir = dir.trim_end_matches('/');
        let value = self.client.get_json(
            &self.repo_path(&format!("contents/{dir}")),
            &[("ref", branch.to_string())],
        )?;
        let mut entries = Vec::new();
        for item in value.as_array().into_iter().flatten() {
            entries.push(DirEntry {
                name: string_field(item, "name"),
                path: string_field(item, "path"),
                is_file: item.get("type").and_then(Value::as_str) == Some("file"),
            });
        }
        Ok(entries)
    }

    fn fetch_file(&self, path: &str, branch: &str) -> Result<RemoteFile, ApiError> {
        let value = self.client.get_json(
            &self.repo_path(&format!("contents/{path}")),
            &[("ref", branch.to_string())],
        )?;
        Ok(RemoteFile {
            content: decode_base64_content(&value)?,
            sha: string_field(&value, "sha"),
        })
    }

    fn branch_head(&self, branch: &str) -> Result<String, ApiError> {
        let value = self
            .client
            .get_json(&self.repo_path(&format!("git/ref/heads/{branch}")), &[])?;
        value
            .pointer("/object/sha")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ApiError::Decode("branch ref missing object.sha".to_string()))
    }

    fn create_branch(&self, name: &str, from_sha: &str) -> Result<(), ApiError> {
        self.client.post_json(
            &self.repo_path("git/refs"),
            &json!({ "ref": format!("refs/heads/{name}"), "sha": from_sha }),
        )?;
        Ok(())
    }

    fn delete_branch(&self, name: &str) -> Result<(), ApiError> {
        self.client
            .delete(&self.repo_path(&format!("git/refs/heads/{name}")))
    }

    fn put_file(&self, req: &PutFile<'_>) -> Result<(), ApiError> {
        let mut body = json!({
            "message": req.message,
            "content": BASE64.encode(req.content.as_bytes()),
            "branch": req.branch,
        });
        if let Some(sha) = req.precondition {
            body["sha"] = json!(sha);
        }
        self.client
            .put_json(&self.repo_path(&format!("contents/{}", req.path)), &body)?;
        Ok(())
    }

    fn open_pull_request(
        &self,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> Result<PullRequestRef, ApiError> {
        let value = self.client.post_json(
            &self.repo_path("pulls"),
            &json!({ "title": title, "body": body, "head": head, "base": base }),
        )?;
        let number = value
            .get("number")
            .and_then(Value::as_u64)
            .ok_or_else(|| ApiError::Decode("pull request missing number".to_string()))?;
        Ok(PullRequestRef {
            number,
            url: string_field(&value, "html_url"),
        })
    }

    fn add_labels(&self, pr_number: u64, labels: &[String]) -> Result<(), ApiError> {
        self.client.post_json(
            &self.repo_path(&format!("issues/{pr_number}/labels")),
            &json!({ "labels": labels }),
        )?;
        Ok(())
    }
}

fn map_http_error(err: ureq::Error) -> ApiError {
    match err {
        ureq::Error::StatusCode(404) => ApiError::NotFound,
        ureq::Error::StatusCode(code @ (409 | 412 | 422)) => ApiError::Conflict(code),
        ureq::Error::StatusCode(code) => ApiError::Status(code),
        other => ApiError::Transport(other.to_string()),
    }
}

fn string_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// The contents API returns base64 with embedded newlines.
fn decode_base64_content(value: &Value) -> Result<String, ApiError> {
    let encoded = value
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let cleaned: String = encoded.chars().filter(|ch| !ch.is_whitespace()).collect();
    let bytes = BASE64
        .decode(cleaned.as_bytes())
        .map_err(|err| ApiError::Decode(format!("base64 content: {err}")))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Parse the conventional-commit prefix of a message, e.g. `feat(api)!:`.
pub fn commit_kind(message: &str) -> CommitKind {
    static PREFIX: OnceLock<Regex> = OnceLock::new();
    let prefix = PREFIX.get_or_init(|| {
        Regex::new(r"^([a-z]+)(?:\([^)]*\))?!?:").expect("commit prefix regex")
    });
    let lowered = message.to_lowercase();
    let Some(captures) = prefix.captures(&lowered) else {
        return CommitKind::Other;
    };
    match &captures[1] {
        "feat" | "feature" => CommitKind::Feat,
        "fix" | "bugfix" => CommitKind::Fix,
        "docs" | "doc" => CommitKind::Docs,
        "style" => CommitKind::Style,
        "refactor" => CommitKind::Refactor,
        "perf" => CommitKind::Perf,
        "test" | "tests" => CommitKind::Test,
        "chore" | "build" | "ci" => CommitKind::Chore,
        _ => CommitKind::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_kind_parses_conventional_prefixes() {
        assert_eq!(commit_kind("feat: add search"), CommitKind::Feat);
        assert_eq!(commit_kind("feature(ui): add search"), CommitKind::Feat);
        assert_eq!(commit_kind("fix(parser)!: handle empty input"), CommitKind::Fix);
        assert_eq!(commit_kind("bugfix: off by one"), CommitKind::Fix);
        assert_eq!(commit_kind("docs: update readme"), CommitKind::Docs);
        assert_eq!(commit_kind("refactor: split module"), CommitKind::Refactor);
        assert_eq!(commit_kind("perf: cache lookups"), CommitKind::Perf);
        assert_eq!(commit_kind("tests: cover edge case"), CommitKind::Test);
        assert_eq!(commit_kind("ci: pin toolchain"), CommitKind::Chore);
        assert_eq!(commit_kind("build: bump deps"), CommitKind::Chore);
    }

    #[test]
    fn commit_kind_defaults_to_other() {
        assert_eq!(commit_kind("update stuff"), CommitKind::Other);
        assert_eq!(commit_kind("wip"), CommitKind::Other);
        assert_eq!(commit_kind(""), CommitKind::Other);
        assert_eq!(commit_kind("Merge branch 'main'"), CommitKind::Other);
    }

    #[test]
    fn commit_kind_is_case_insensitive() {
        assert_eq!(commit_kind("Feat: add search"), CommitKind::Feat);
        assert_eq!(commit_kind("FIX: crash"), CommitKind::Fix);
    }
}
