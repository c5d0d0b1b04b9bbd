//! Settings file loading and hashing.
//!
//! All pipeline behavior is driven by a single YAML settings file. The
//! settings hash is recorded in the change context so a later phase can tell
//! which configuration produced a snapshot.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::util::sha256_hex;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub target: TargetConfig,
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub collector: CollectorConfig,
    #[serde(default)]
    pub scoring: ScoreWeights,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub llm: LmConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

/// The repository that receives generated pages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// `owner/repo` of the page repository.
    pub repo: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Directory inside the target repo holding one `.html` page per slug.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryMethod {
    Topic,
    List,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    pub method: DiscoveryMethod,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub topic_tag: String,
    /// Used when `method` is `list`, or when topic search finds nothing.
    #[serde(default)]
    pub fallback_list: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    pub commits_lookback_days: i64,
    pub readme_excerpt_length: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            commits_lookback_days: 30,
            readme_excerpt_length: 500,
        }
    }
}

/// Weights for the significance score. Commit categories not listed here
/// (docs, style, chore, ...) contribute zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub new_release: i64,
    pub readme_changed: i64,
    pub feat_commit: i64,
    pub refactor_commit: i64,
    pub fix_commit: i64,
    /// Sentinel score assigned when there is no activity at all.
    pub no_commits: i64,
    pub update_threshold: i64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            new_release: 100,
            readme_changed: 40,
            feat_commit: 30,
            refactor_commit: 30,
            fix_commit: 15,
            no_commits: -999,
            update_threshold: 50,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowMode {
    /// Approved low-risk drafts are written directly to the target branch.
    Auto,
    /// Every deployable draft goes through a pull request.
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub mode: WorkflowMode,
    pub force_pr_on_high_risk: bool,
    /// Change percentage above which a draft is treated as high risk.
    pub high_risk_threshold: f64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            mode: WorkflowMode::Manual,
            force_pr_on_high_risk: true,
            high_risk_threshold: 30.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub forbidden_words: Vec<String>,
    /// Section ids that every generated page must carry.
    pub required_sections: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LmConfig {
    pub endpoint: String,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub max_tokens_draft: u32,
    pub max_tokens_review: u32,
}

impl Default for LmConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.anthropic.com/v1/messages".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            max_tokens_draft: 8192,
            max_tokens_review: 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub data_dir: String,
    pub drafts_dir: String,
    pub reviews_dir: String,
    pub reports_dir: String,
    pub logs_dir: String,
    pub dashboard_file: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: "_data".to_string(),
            drafts_dir: "drafts".to_string(),
            reviews_dir: "reviews".to_string(),
            reports_dir: "reports".to_string(),
            logs_dir: "logs".to_string(),
            dashboard_file: "dashboard.json".to_string(),
        }
    }
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_output_dir() -> String {
    "projects/".to_string()
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read settings {}", path.display()))?;
        let settings: Settings = serde_yaml::from_str(&raw)
            .with_context(|| format!("parse settings {}", path.display()))?;
        Ok(settings)
    }

    /// Short content hash of the settings, recorded in the change context.
    pub fn config_hash(&self) -> Result<String> {
        let bytes = serde_json::to_vec(self).context("serialize settings for hashing")?;
        Ok(sha256_hex(&bytes)[..8].to_string())
    }

    /// Path of a slug's page inside the target repository.
    pub fn page_path(&self, slug: &str) -> String {
        format!("{}{}.html", self.target.output_dir, slug)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
target:
  repo: "someone/someone.github.io"
discovery:
  method: list
  fallback_list:
    - "someone/alpha"
"#;

    #[test]
    fn minimal_settings_fill_defaults() {
        let settings: Settings = serde_yaml::from_str(MINIMAL).unwrap();
        assert_eq!(settings.target.branch, "main");
        assert_eq!(settings.target.output_dir, "projects/");
        assert_eq!(settings.scoring.new_release, 100);
        assert_eq!(settings.scoring.update_threshold, 50);
        assert_eq!(settings.workflow.mode, WorkflowMode::Manual);
        assert!(settings.workflow.force_pr_on_high_risk);
        assert_eq!(settings.collector.commits_lookback_days, 30);
    }

    #[test]
    fn config_hash_is_stable_and_input_sensitive() {
        let a: Settings = serde_yaml::from_str(MINIMAL).unwrap();
        let b: Settings = serde_yaml::from_str(MINIMAL).unwrap();
        assert_eq!(a.config_hash().unwrap(), b.config_hash().unwrap());
        assert_eq!(a.config_hash().unwrap().len(), 8);

        let mut c = a.clone();
        c.scoring.update_threshold = 10;
        assert_ne!(a.config_hash().unwrap(), c.config_hash().unwrap());
    }

    #[test]
    fn page_path_joins_output_dir_and_slug() {
        let settings: Settings = serde_yaml::from_str(MINIMAL).unwrap();
        assert_eq!(settings.page_path("alpha"), "projects/alpha.html");
    }
}
