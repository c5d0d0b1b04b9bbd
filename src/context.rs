//! The change-context snapshot shared by every phase after collection.
//!
//! A [`ChangeContext`] is written exactly once by the collect phase and only
//! ever read afterwards. Staleness is detected later by re-fetching remote
//! state and comparing fingerprints, never by mutating this snapshot.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::markers::ManualSection;
use crate::remote::{CommitInfo, ReleaseInfo};
use crate::score::ChangeStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeContext {
    pub generated_at: DateTime<Utc>,
    /// Short hash of the settings that produced this snapshot.
    pub config_hash: String,
    pub projects: Vec<ProjectSnapshot>,
    pub summary: CollectSummary,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectSummary {
    pub total: usize,
    pub updates: usize,
    pub new: usize,
    pub skips: usize,
    pub locked: usize,
    pub errors: usize,
}

/// Everything known about one tracked project at collection time: published
/// state, upstream activity, and the change verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSnapshot {
    pub slug: String,
    /// `owner/repo` of the tracked source repository.
    pub repo: String,
    pub exists: bool,
    pub locked: bool,
    pub status: ChangeStatus,
    pub change_score: i64,
    pub change_reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_deploy: Option<NaiveDate>,
    #[serde(default)]
    pub commits: Vec<CommitInfo>,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub readme_excerpt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readme_sha: Option<String>,
    #[serde(default)]
    pub releases: Vec<ReleaseInfo>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub stars: u64,
    #[serde(default)]
    pub forks: u64,
    /// Page content as published at snapshot time; the freshness guard
    /// fingerprints this to detect out-of-band edits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_html: Option<String>,
    #[serde(default)]
    pub manual_sections: Vec<ManualSection>,
}

impl ChangeContext {
    pub fn new(config_hash: String) -> Self {
        Self {
            generated_at: Utc::now(),
            config_hash,
            projects: Vec::new(),
            summary: CollectSummary::default(),
        }
    }

    /// Append a snapshot, keeping the summary counts consistent.
    pub fn record(&mut self, snapshot: ProjectSnapshot) {
        self.summary.total += 1;
        if snapshot.locked {
            self.summary.locked += 1;
        } else {
            match snapshot.status {
                ChangeStatus::Update => self.summary.updates += 1,
                ChangeStatus::New => self.summary.new += 1,
                ChangeStatus::Skip => self.summary.skips += 1,
                ChangeStatus::Error => self.summary.errors += 1,
            }
        }
        self.projects.push(snapshot);
    }

    pub fn find(&self, slug: &str) -> Option<&ProjectSnapshot> {
        self.projects.iter().find(|project| project.slug == slug)
    }

    /// Whether anything downstream has work to do.
    pub fn has_updates(&self) -> bool {
        self.summary.updates + self.summary.new > 0
    }
}
