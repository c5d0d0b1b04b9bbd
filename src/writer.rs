//! Draft phase: one model completion per deployable project.
//!
//! Updates hand the model the currently published page as the structural
//! reference; new projects get the stock page template instead. Manual
//! fragments preserved at collect time are spliced back into the raw draft
//! before it is persisted, so the review phase always sees the merged page.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::Settings;
use crate::context::{ChangeContext, ProjectSnapshot};
use crate::llm::{strip_code_fences, LmClient, TokenUsage};
use crate::markers::{inject_sections, ManualSection};
use crate::score::ChangeStatus;
use crate::store::{self, Workspace};

const PROMPT_TEMPLATE: &str = include_str!("../prompts/writer.md");
const BASE_TEMPLATE: &str = include_str!("../templates/project_detail.html");

const SYSTEM_PROMPT: &str =
    "You write concise, factual HTML project pages. Output a single complete HTML document.";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DraftManifest {
    pub drafts: Vec<DraftRecord>,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftRecord {
    pub slug: String,
    pub repo: String,
    pub status: ChangeStatus,
    pub usage: TokenUsage,
    /// Preserved fragments that found no placeholder in the fresh draft.
    #[serde(default)]
    pub dropped_sections: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn run(settings: &Settings, workspace: &Workspace) -> Result<DraftManifest> {
    let context: ChangeContext =
        store::read_json(&workspace.context_path()).context("load change context")?;

    let mut manifest = DraftManifest::default();
    if !context.has_updates() {
        info!("nothing to draft");
        store::write_json(&workspace.draft_manifest_path(), &manifest)?;
        return Ok(manifest);
    }

    let client = LmClient::from_config(&settings.llm)?;
    for project in &context.projects {
        if !matches!(project.status, ChangeStatus::New | ChangeStatus::Update) {
            continue;
        }
        let record = match draft_project(&client, settings, workspace, project) {
            Ok(record) => record,
            Err(err) => {
                warn!(slug = %project.slug, error = %err, "draft generation failed");
                DraftRecord {
                    slug: project.slug.clone(),
                    repo: project.repo.clone(),
                    status: project.status,
                    usage: TokenUsage::default(),
                    dropped_sections: Vec::new(),
                    error: Some(format!("{err:#}")),
                }
            }
        };
        manifest.usage.add(record.usage);
        manifest.drafts.push(record);
    }

    info!(
        drafted = manifest.drafts.iter().filter(|d| d.error.is_none()).count(),
        failed = manifest.drafts.iter().filter(|d| d.error.is_some()).count(),
        input_tokens = manifest.usage.input_tokens,
        output_tokens = manifest.usage.output_tokens,
        "draft phase complete"
    );
    store::write_json(&workspace.draft_manifest_path(), &manifest)?;
    Ok(manifest)
}

fn draft_project(
    client: &LmClient,
    settings: &Settings,
    workspace: &Workspace,
    project: &ProjectSnapshot,
) -> Result<DraftRecord> {
    let prompt = build_prompt(project);
    let completion = client
        .complete(SYSTEM_PROMPT, &prompt, settings.llm.max_tokens_draft)
        .with_context(|| format!("draft completion for {}", project.slug))?;

    let (merged, dropped) = compose_draft(&completion.text, &project.manual_sections);
    for name in &dropped {
        warn!(slug = %project.slug, section = %name, "manual section dropped from draft");
    }

    store::write_text(&workspace.draft_path(&project.slug), &merged)?;
    info!(slug = %project.slug, bytes = merged.len(), "draft written");
    Ok(DraftRecord {
        slug: project.slug.clone(),
        repo: project.repo.clone(),
        status: project.status,
        usage: completion.usage,
        dropped_sections: dropped,
        error: None,
    })
}

/// Normalize the raw model reply and splice preserved fragments back in.
fn compose_draft(raw: &str, sections: &[ManualSection]) -> (String, Vec<String>) {
    let html = strip_code_fences(raw);
    inject_sections(&html, sections)
}

fn build_prompt(project: &ProjectSnapshot) -> String {
    let commits = if project.commits.is_empty() {
        "(none)".to_string()
    } else {
        project
            .commits
            .iter()
            .map(|c| format!("- {} {} {}", c.date, c.sha, c.message))
            .collect::<Vec<_>>()
            .join("\n")
    };
    let releases = if project.releases.is_empty() {
        "(none)".to_string()
    } else {
        project
            .releases
            .iter()
            .map(|r| {
                format!(
                    "- {} ({}): {}",
                    r.name,
                    r.date.as_deref().unwrap_or("unpublished"),
                    r.notes.lines().next().unwrap_or_default()
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };
    let reference = project
        .current_html
        .as_deref()
        .unwrap_or(BASE_TEMPLATE);

    PROMPT_TEMPLATE
        .replace("{slug}", &project.slug)
        .replace("{repo}", &project.repo)
        .replace("{description}", &project.description)
        .replace("{languages}", &project.languages.join(", "))
        .replace("{stars}", &project.stars.to_string())
        .replace("{forks}", &project.forks.to_string())
        .replace("{commits}", &commits)
        .replace("{releases}", &releases)
        .replace("{readme_excerpt}", &project.readme_excerpt)
        .replace("{reference_page}", reference)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markers::extract_sections;

    fn snapshot() -> ProjectSnapshot {
        ProjectSnapshot {
            slug: "alpha".to_string(),
            repo: "owner/alpha".to_string(),
            exists: true,
            locked: false,
            status: ChangeStatus::Update,
            change_score: 130,
            change_reason: "release_tag".to_string(),
            last_deploy: None,
            commits: Vec::new(),
            languages: vec!["Rust".to_string(), "Shell".to_string()],
            readme_excerpt: "A small tool.".to_string(),
            readme_sha: None,
            releases: Vec::new(),
            description: "Does one thing well".to_string(),
            stars: 42,
            forks: 3,
            current_html: Some("<html><body>old page</body></html>".to_string()),
            manual_sections: Vec::new(),
        }
    }

    #[test]
    fn prompt_fills_every_placeholder() {
        let prompt = build_prompt(&snapshot());
        assert!(prompt.contains("owner/alpha"));
        assert!(prompt.contains("Rust, Shell"));
        assert!(prompt.contains("old page"));
        for placeholder in [
            "{slug}",
            "{repo}",
            "{description}",
            "{languages}",
            "{stars}",
            "{forks}",
            "{commits}",
            "{releases}",
            "{readme_excerpt}",
            "{reference_page}",
        ] {
            assert!(!prompt.contains(placeholder), "unfilled {placeholder}");
        }
    }

    #[test]
    fn new_project_prompt_uses_base_template() {
        let mut project = snapshot();
        project.current_html = None;
        project.status = ChangeStatus::New;
        let prompt = build_prompt(&project);
        assert!(prompt.contains("<!-- MANUAL:notes -->"));
        assert!(!prompt.contains("old page"));
    }

    #[test]
    fn compose_strips_fences_and_restores_fragments() {
        let published =
            "<html><!-- MANUAL:notes -->precious<!-- /MANUAL:notes --></html>";
        let sections = extract_sections(published);
        let raw = "```html\n<html><!-- MANUAL:notes --><!-- /MANUAL:notes --></html>\n```";
        let (merged, dropped) = compose_draft(raw, &sections);
        assert!(dropped.is_empty());
        assert_eq!(
            merged,
            "<html><!-- MANUAL:notes -->precious<!-- /MANUAL:notes --></html>"
        );
    }

    #[test]
    fn compose_reports_fragments_the_model_lost() {
        let sections = vec![ManualSection {
            name: "notes".to_string(),
            text: "<!-- MANUAL:notes -->x<!-- /MANUAL:notes -->".to_string(),
        }];
        let (_, dropped) = compose_draft("<html></html>", &sections);
        assert_eq!(dropped, vec!["notes".to_string()]);
    }
}
