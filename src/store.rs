//! Local artifact store.
//!
//! Every phase persists its output as a file and the next phase reads it
//! back, so a run can be resumed or inspected phase by phase. Writes go
//! through a temp file in the destination directory followed by a rename,
//! which keeps a crashed run from leaving a half-written artifact behind.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::Settings;

/// Resolved workspace paths for one pipeline run.
#[derive(Debug, Clone)]
pub struct Workspace {
    data_dir: PathBuf,
    drafts_dir: PathBuf,
    reviews_dir: PathBuf,
    reports_dir: PathBuf,
    logs_dir: PathBuf,
    dashboard_file: PathBuf,
}

impl Workspace {
    pub fn new(root: &Path, settings: &Settings) -> Self {
        let data_dir = root.join(&settings.paths.data_dir);
        Self {
            drafts_dir: data_dir.join(&settings.paths.drafts_dir),
            reviews_dir: data_dir.join(&settings.paths.reviews_dir),
            reports_dir: data_dir.join(&settings.paths.reports_dir),
            logs_dir: data_dir.join(&settings.paths.logs_dir),
            dashboard_file: data_dir.join(&settings.paths.dashboard_file),
            data_dir,
        }
    }

    pub fn context_path(&self) -> PathBuf {
        self.data_dir.join("change_context.json")
    }

    pub fn draft_path(&self, slug: &str) -> PathBuf {
        self.drafts_dir.join(format!("{slug}.html"))
    }

    pub fn draft_manifest_path(&self) -> PathBuf {
        self.data_dir.join("draft_manifest.json")
    }

    pub fn review_path(&self, slug: &str) -> PathBuf {
        self.reviews_dir.join(format!("{slug}.json"))
    }

    pub fn deploy_outcome_path(&self) -> PathBuf {
        self.data_dir.join("deploy_outcome.json")
    }

    pub fn report_path(&self, run_id: &str) -> PathBuf {
        self.reports_dir.join(format!("{run_id}.md"))
    }

    pub fn run_log_path(&self, run_id: &str) -> PathBuf {
        self.logs_dir.join(format!("{run_id}.json"))
    }

    pub fn dashboard_path(&self) -> &Path {
        &self.dashboard_file
    }
}

/// Serialize `value` as pretty JSON and atomically replace `path`.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let body = serde_json::to_vec_pretty(value)
        .with_context(|| format!("serialize {}", path.display()))?;
    write_bytes(path, &body)
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("read artifact {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse artifact {}", path.display()))
}

/// Like [`read_json`], but a missing file is `None` instead of an error.
pub fn read_json_opt<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    read_json(path).map(Some)
}

pub fn write_text(path: &Path, text: &str) -> Result<()> {
    write_bytes(path, text.as_bytes())
}

pub fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("read artifact {}", path.display()))
}

fn write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .with_context(|| format!("artifact path has no parent: {}", path.display()))?;
    fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    // Same-directory temp file so the rename stays on one filesystem.
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).with_context(|| format!("write {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[test]
    fn json_round_trips_and_replaces_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("sample.json");

        let first = Sample {
            name: "alpha".to_string(),
            count: 1,
        };
        write_json(&path, &first).unwrap();
        assert_eq!(read_json::<Sample>(&path).unwrap(), first);

        let second = Sample {
            name: "beta".to_string(),
            count: 2,
        };
        write_json(&path, &second).unwrap();
        assert_eq!(read_json::<Sample>(&path).unwrap(), second);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn read_json_opt_tolerates_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        assert!(read_json_opt::<Sample>(&path).unwrap().is_none());
    }

    #[test]
    fn workspace_paths_follow_settings() {
        let settings: Settings = serde_yaml::from_str(
            r#"
target:
  repo: "someone/site"
discovery:
  method: list
"#,
        )
        .unwrap();
        let workspace = Workspace::new(Path::new("/work"), &settings);
        assert_eq!(
            workspace.draft_path("alpha"),
            Path::new("/work/_data/drafts/alpha.html")
        );
        assert_eq!(
            workspace.review_path("alpha"),
            Path::new("/work/_data/reviews/alpha.json")
        );
        assert_eq!(
            workspace.dashboard_path(),
            Path::new("/work/_data/dashboard.json")
        );
    }
}
