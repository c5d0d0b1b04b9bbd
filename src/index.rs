//! Read model of the target repository's published state.
//!
//! Built once per run from a directory listing. The index is never updated
//! in-process; ground truth stays in the remote repository and later phases
//! re-fetch when they need current state.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::markers::{extract_deploy_date, extract_sections, has_lock_marker, ManualSection};
use crate::remote::{ApiError, RemoteStore};

/// One published page known at index-build time. Absence of a record for a
/// slug means "not yet published".
#[derive(Debug, Clone)]
pub struct PageRecord {
    pub locked: bool,
    pub content: String,
    pub manual_sections: Vec<ManualSection>,
    pub last_deploy: Option<NaiveDate>,
}

/// Build the slug index from the output directory of the target repository.
/// A missing directory means nothing has been published yet and yields an
/// empty index, not an error.
pub fn build_index(
    remote: &dyn RemoteStore,
    output_dir: &str,
    branch: &str,
) -> Result<BTreeMap<String, PageRecord>, ApiError> {
    let entries = match remote.list_directory(output_dir, branch) {
        Ok(entries) => entries,
        Err(ApiError::NotFound) => return Ok(BTreeMap::new()),
        Err(err) => return Err(err),
    };

    let mut index = BTreeMap::new();
    for entry in entries {
        if !entry.is_file {
            continue;
        }
        let Some(slug) = entry.name.strip_suffix(".html") else {
            continue;
        };
        let file = remote.fetch_file(&entry.path, branch)?;
        index.insert(
            slug.to_string(),
            PageRecord {
                locked: has_lock_marker(&file.content),
                manual_sections: extract_sections(&file.content),
                last_deploy: extract_deploy_date(&file.content),
                content: file.content,
            },
        );
    }
    Ok(index)
}
