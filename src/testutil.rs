//! In-memory [`RemoteStore`] fake shared by unit tests.

use std::cell::RefCell;
use std::collections::BTreeMap;

use crate::remote::{ApiError, DirEntry, PullRequestRef, PutFile, RemoteFile, RemoteStore};
use crate::util::sha256_hex;

#[derive(Debug, Clone)]
pub struct OpenedPr {
    pub title: String,
    pub body: String,
    pub head: String,
    pub base: String,
}

#[derive(Debug, Clone)]
pub struct PutRecord {
    pub path: String,
    pub branch: String,
    pub precondition: Option<String>,
}

/// Branch-agnostic file map plus an operation log. Shas are derived from
/// content so freshness fingerprints behave like the real store.
#[derive(Default)]
pub struct MockRemote {
    files: RefCell<BTreeMap<String, String>>,
    branches: RefCell<BTreeMap<String, String>>,
    pub prs: RefCell<Vec<OpenedPr>>,
    pub labels: RefCell<Vec<(u64, Vec<String>)>>,
    pub puts: RefCell<Vec<PutRecord>>,
    pub fail_labels: bool,
    pub conflict_on_put: bool,
}

impl MockRemote {
    pub fn seed_file(&self, path: &str, content: &str) {
        self.files
            .borrow_mut()
            .insert(path.to_string(), content.to_string());
    }

    pub fn seed_branch(&self, name: &str, sha: &str) {
        self.branches
            .borrow_mut()
            .insert(name.to_string(), sha.to_string());
    }

    pub fn file_content(&self, path: &str) -> Option<String> {
        self.files.borrow().get(path).cloned()
    }

    pub fn has_branch(&self, name: &str) -> bool {
        self.branches.borrow().contains_key(name)
    }
}

impl RemoteStore for MockRemote {
    fn list_directory(&self, dir: &str, _branch: &str) -> Result<Vec<DirEntry>, ApiError> {
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        let files = self.files.borrow();
        let entries: Vec<DirEntry> = files
            .keys()
            .filter(|path| path.starts_with(&prefix))
            .map(|path| DirEntry {
                name: path.rsplit('/').next().unwrap_or(path).to_string(),
                path: path.clone(),
                is_file: true,
            })
            .collect();
        if entries.is_empty() {
            return Err(ApiError::NotFound);
        }
        Ok(entries)
    }

    fn fetch_file(&self, path: &str, _branch: &str) -> Result<RemoteFile, ApiError> {
        let files = self.files.borrow();
        let content = files.get(path).ok_or(ApiError::NotFound)?;
        Ok(RemoteFile {
            sha: sha256_hex(content.as_bytes()),
            content: content.clone(),
        })
    }

    fn branch_head(&self, branch: &str) -> Result<String, ApiError> {
        Ok(self
            .branches
            .borrow()
            .get(branch)
            .cloned()
            .unwrap_or_else(|| "basesha0000".to_string()))
    }

    fn create_branch(&self, name: &str, from_sha: &str) -> Result<(), ApiError> {
        let mut branches = self.branches.borrow_mut();
        if branches.contains_key(name) {
            return Err(ApiError::Conflict(422));
        }
        branches.insert(name.to_string(), from_sha.to_string());
        Ok(())
    }

    fn delete_branch(&self, name: &str) -> Result<(), ApiError> {
        self.branches
            .borrow_mut()
            .remove(name)
            .map(|_| ())
            .ok_or(ApiError::NotFound)
    }

    fn put_file(&self, req: &PutFile<'_>) -> Result<(), ApiError> {
        self.puts.borrow_mut().push(PutRecord {
            path: req.path.to_string(),
            branch: req.branch.to_string(),
            precondition: req.precondition.map(str::to_string),
        });
        if self.conflict_on_put {
            return Err(ApiError::Conflict(409));
        }
        let mut files = self.files.borrow_mut();
        if let (Some(expected), Some(existing)) = (req.precondition, files.get(req.path)) {
            if sha256_hex(existing.as_bytes()) != expected {
                return Err(ApiError::Conflict(409));
            }
        }
        files.insert(req.path.to_string(), req.content.to_string());
        Ok(())
    }

    fn open_pull_request(
        &self,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> Result<PullRequestRef, ApiError> {
        let mut prs = self.prs.borrow_mut();
        prs.push(OpenedPr {
            title: title.to_string(),
            body: body.to_string(),
            head: head.to_string(),
            base: base.to_string(),
        });
        let number = prs.len() as u64;
        Ok(PullRequestRef {
            number,
            url: format!("https://example.test/pull/{number}"),
        })
    }

    fn add_labels(&self, pr_number: u64, labels: &[String]) -> Result<(), ApiError> {
        if self.fail_labels {
            return Err(ApiError::NotFound);
        }
        self.labels.borrow_mut().push((pr_number, labels.to_vec()));
        Ok(())
    }
}
