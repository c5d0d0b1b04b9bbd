//! The seam between pipeline logic and the code-hosting service.
//!
//! Everything that touches the remote page repository goes through
//! [`RemoteStore`], so the index builder, the freshness guard, and the
//! deployer can be exercised against an in-memory fake. Error variants are
//! kept distinct because the gatekeeper treats a precondition conflict very
//! differently from a missing file.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("resource not found")]
    NotFound,
    /// Precondition mismatch at write time (409/412-style) or a ref that
    /// already exists (422). Never retried automatically.
    #[error("remote precondition failed (http {0})")]
    Conflict(u16),
    #[error("unexpected http status {0}")]
    Status(u16),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("malformed response: {0}")]
    Decode(String),
}

/// Repository metadata for one tracked project.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepoFacts {
    pub description: String,
    pub stars: u64,
    pub forks: u64,
}

/// Conventional-commit category parsed from the message prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitKind {
    Feat,
    Fix,
    Docs,
    Style,
    Refactor,
    Perf,
    Test,
    Chore,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitInfo {
    /// Abbreviated sha.
    pub sha: String,
    /// `YYYY-MM-DD` author date.
    pub date: String,
    /// First line of the message.
    pub message: String,
    pub kind: CommitKind,
    pub author: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseInfo {
    pub tag: String,
    pub name: String,
    pub date: Option<String>,
    pub notes: String,
    pub prerelease: bool,
    pub draft: bool,
}

#[derive(Debug, Clone)]
pub struct ReadmeFetch {
    pub content: String,
    pub sha: Option<String>,
}

/// One entry from a directory listing of the target repository.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub path: String,
    pub is_file: bool,
}

/// File content plus the revision identifier used as a write precondition.
#[derive(Debug, Clone)]
pub struct RemoteFile {
    pub content: String,
    pub sha: String,
}

/// A create-or-update write against the target repository.
#[derive(Debug)]
pub struct PutFile<'a> {
    pub path: &'a str,
    pub content: &'a str,
    pub message: &'a str,
    pub branch: &'a str,
    /// Existing blob sha; `None` creates the file. A mismatch surfaces as
    /// [`ApiError::Conflict`].
    pub precondition: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct PullRequestRef {
    pub number: u64,
    pub url: String,
}

/// Read and mutate operations on the page repository.
pub trait RemoteStore {
    fn list_directory(&self, dir: &str, branch: &str) -> Result<Vec<DirEntry>, ApiError>;
    fn fetch_file(&self, path: &str, branch: &str) -> Result<RemoteFile, ApiError>;
    fn branch_head(&self, branch: &str) -> Result<String, ApiError>;
    fn create_branch(&self, name: &str, from_sha: &str) -> Result<(), ApiError>;
    fn delete_branch(&self, name: &str) -> Result<(), ApiError>;
    fn put_file(&self, req: &PutFile<'_>) -> Result<(), ApiError>;
    fn open_pull_request(
        &self,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> Result<PullRequestRef, ApiError>;
    fn add_labels(&self, pr_number: u64, labels: &[String]) -> Result<(), ApiError>;
}
