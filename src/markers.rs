//! Marker comments embedded in published pages.
//!
//! Pages carry three kinds of marker comments:
//!
//! - `<!-- MANUAL:name --> ... <!-- /MANUAL:name -->` delimits a hand-edited
//!   fragment that must survive regeneration verbatim.
//! - `<!-- LOCK -->` anywhere in a page opts it out of automation entirely.
//! - `<!-- DEPLOYED: YYYY-MM-DD -->` records the last publish date.
//!
//! Extraction is a small explicit scanner producing typed `{name, span}`
//! records. A begin marker pairs with the first end marker carrying the same
//! name, so adjacent sections and same-named lookalikes are unambiguous and
//! an unterminated begin is simply skipped.

use chrono::NaiveDate;
use std::ops::Range;

pub const LOCK_MARKER: &str = "<!-- LOCK -->";

const MANUAL_BEGIN: &str = "<!-- MANUAL:";
const MANUAL_END: &str = "<!-- /MANUAL:";
const MARKER_CLOSE: &str = " -->";
const DEPLOY_PREFIX: &str = "<!-- DEPLOYED: ";

/// One manual region located in a page: name plus the byte span covering the
/// begin marker through the end marker inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionSpan {
    pub name: String,
    pub span: Range<usize>,
}

/// A manual fragment lifted out of an existing page, delimiters included.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ManualSection {
    pub name: String,
    pub text: String,
}

/// Locate all non-overlapping manual regions in document order.
pub fn scan_sections(html: &str) -> Vec<SectionSpan> {
    let mut spans = Vec::new();
    let mut pos = 0;
    while let Some(offset) = html[pos..].find(MANUAL_BEGIN) {
        let begin_start = pos + offset;
        let name_start = begin_start + MANUAL_BEGIN.len();
        let Some(name) = scan_name(&html[name_start..]) else {
            pos = name_start;
            continue;
        };
        let begin_end = name_start + name.len() + MARKER_CLOSE.len();

        let end_token = format!("{MANUAL_END}{name}{MARKER_CLOSE}");
        match html[begin_end..].find(&end_token) {
            Some(end_offset) => {
                let end = begin_end + end_offset + end_token.len();
                spans.push(SectionSpan {
                    name,
                    span: begin_start..end,
                });
                pos = end;
            }
            None => {
                // Unterminated begin: skip it, keep scanning.
                pos = begin_end;
            }
        }
    }
    spans
}

/// A marker name is a nonempty run of word characters terminated by ` -->`.
fn scan_name(rest: &str) -> Option<String> {
    let name_len = rest
        .char_indices()
        .find(|(_, ch)| !(ch.is_ascii_alphanumeric() || *ch == '_'))
        .map_or(rest.len(), |(idx, _)| idx);
    if name_len == 0 || !rest[name_len..].starts_with(MARKER_CLOSE) {
        return None;
    }
    Some(rest[..name_len].to_string())
}

/// Extract manual fragments verbatim, delimiters included.
pub fn extract_sections(html: &str) -> Vec<ManualSection> {
    scan_sections(html)
        .into_iter()
        .map(|span| ManualSection {
            text: html[span.span].to_string(),
            name: span.name,
        })
        .collect()
}

/// Re-inject preserved fragments into a fresh draft by replacing every
/// placeholder region with the matching name. Returns the merged draft plus
/// the names of fragments that had no placeholder and were therefore
/// dropped; the caller must surface those as warnings.
pub fn inject_sections(draft: &str, sections: &[ManualSection]) -> (String, Vec<String>) {
    let mut merged = draft.to_string();
    let mut dropped = Vec::new();
    for section in sections {
        let targets: Vec<Range<usize>> = scan_sections(&merged)
            .into_iter()
            .filter(|span| span.name == section.name)
            .map(|span| span.span)
            .collect();
        if targets.is_empty() {
            dropped.push(section.name.clone());
            continue;
        }
        // Replace back-to-front so earlier spans stay valid.
        for range in targets.into_iter().rev() {
            merged.replace_range(range, &section.text);
        }
    }
    (merged, dropped)
}

pub fn has_lock_marker(html: &str) -> bool {
    html.contains(LOCK_MARKER)
}

/// Last publish date from the deploy marker, if present and well-formed.
pub fn extract_deploy_date(html: &str) -> Option<NaiveDate> {
    let mut pos = 0;
    while let Some(offset) = html[pos..].find(DEPLOY_PREFIX) {
        let date_start = pos + offset + DEPLOY_PREFIX.len();
        let candidate = html.get(date_start..date_start + 10)?;
        if html[date_start + 10..].starts_with(MARKER_CLOSE) {
            if let Ok(date) = NaiveDate::parse_from_str(candidate, "%Y-%m-%d") {
                return Some(date);
            }
        }
        pos = date_start;
    }
    None
}

/// Stamp the deploy marker after the opening `<html>` tag, or prepend it when
/// the draft has none.
pub fn add_deploy_marker(html: &str, date: NaiveDate) -> String {
    let marker = format!("{DEPLOY_PREFIX}{}{MARKER_CLOSE}", date.format("%Y-%m-%d"));
    if let Some(open) = html.find("<html") {
        if let Some(close) = html[open..].find('>') {
            let insert_at = open + close + 1;
            let mut stamped = String::with_capacity(html.len() + marker.len() + 1);
            stamped.push_str(&html[..insert_at]);
            stamped.push('\n');
            stamped.push_str(&marker);
            stamped.push_str(&html[insert_at..]);
            return stamped;
        }
    }
    format!("{marker}\n{html}")
}
