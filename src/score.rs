//! Significance scoring: does a tracked project warrant a fresh draft?
//!
//! Pure functions over already-fetched activity facts. Scoring never
//! performs I/O and never fails; upstream fetch failures are converted to
//! `error` verdicts by the collect phase before this module is reached.

use serde::{Deserialize, Serialize};

use crate::config::ScoreWeights;
use crate::remote::{CommitInfo, CommitKind, ReleaseInfo};

/// Sentinel score for never-published projects, above any reachable
/// threshold so new pages are never skipped.
pub const NEW_PROJECT_SCORE: i64 = 999;

pub const REASON_NEW_PROJECT: &str = "new_project";
pub const REASON_NO_ACTIVITY: &str = "no_activity";
pub const REASON_RELEASE: &str = "release_tag";
pub const REASON_README: &str = "readme_changed";
pub const REASON_FEAT: &str = "feature_commit";
pub const REASON_REFACTOR: &str = "refactor_commit";
pub const REASON_FIX: &str = "fix_commit";
pub const REASON_LOW: &str = "low_significance";
pub const REASON_FORCED: &str = "force_update";
pub const REASON_LOCKED: &str = "locked";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    New,
    Update,
    Skip,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeVerdict {
    pub score: i64,
    pub status: ChangeStatus,
    pub reason: String,
}

/// Activity facts for one project over the lookback window.
#[derive(Debug, Clone, Copy)]
pub struct Activity<'a> {
    pub commits: &'a [CommitInfo],
    pub releases: &'a [ReleaseInfo],
    pub readme_changed: bool,
}

/// Score a project's recent activity.
///
/// A never-published project is always `new`. A published project with no
/// commits and no releases in-window short-circuits to `skip`. Otherwise the
/// score accumulates release, README, and per-commit bonuses; the reason is
/// the first factor that contributed a nonzero bonus in release, README,
/// feat, refactor, fix order.
pub fn score(
    activity: &Activity<'_>,
    already_published: bool,
    weights: &ScoreWeights,
) -> ChangeVerdict {
    if !already_published {
        return ChangeVerdict {
            score: NEW_PROJECT_SCORE,
            status: ChangeStatus::New,
            reason: REASON_NEW_PROJECT.to_string(),
        };
    }

    if activity.commits.is_empty() && activity.releases.is_empty() {
        return ChangeVerdict {
            score: weights.no_commits,
            status: ChangeStatus::Skip,
            reason: REASON_NO_ACTIVITY.to_string(),
        };
    }

    let mut score = 0;
    if !activity.releases.is_empty() {
        score += weights.new_release;
    }
    if activity.readme_changed {
        score += weights.readme_changed;
    }

    let mut feat = 0i64;
    let mut refactor = 0i64;
    let mut fix = 0i64;
    for commit in activity.commits {
        match commit.kind {
            CommitKind::Feat => feat += 1,
            CommitKind::Refactor => refactor += 1,
            CommitKind::Fix => fix += 1,
            // docs, style, perf, test, chore, other contribute nothing
            _ => {}
        }
    }
    score += feat * weights.feat_commit;
    score += refactor * weights.refactor_commit;
    score += fix * weights.fix_commit;

    let reason = if !activity.releases.is_empty() && weights.new_release != 0 {
        REASON_RELEASE
    } else if activity.readme_changed && weights.readme_changed != 0 {
        REASON_README
    } else if feat > 0 && weights.feat_commit != 0 {
        REASON_FEAT
    } else if refactor > 0 && weights.refactor_commit != 0 {
        REASON_REFACTOR
    } else if fix > 0 && weights.fix_commit != 0 {
        REASON_FIX
    } else {
        REASON_LOW
    };

    let status = if score >= weights.update_threshold {
        ChangeStatus::Update
    } else {
        ChangeStatus::Skip
    };

    ChangeVerdict {
        score,
        status,
        reason: reason.to_string(),
    }
}

/// Force-override: promote a `skip` verdict to `update`. Locked projects
/// never reach the scorer, so they cannot be promoted.
pub fn promote_forced(verdict: ChangeVerdict) -> ChangeVerdict {
    if verdict.status == ChangeStatus::Skip {
        return ChangeVerdict {
            score: verdict.score,
            status: ChangeStatus::Update,
            reason: REASON_FORCED.to_string(),
        };
    }
    verdict
}

/// Loose README-changed approximation: a never-published project always
/// counts as changed; otherwise any non-empty fetched README does. Kept
/// deliberately loose rather than diffing against the last publish.
pub fn readme_changed(readme_content: &str, already_published: bool) -> bool {
    if !already_published {
        return true;
    }
    !readme_content.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commit(kind: CommitKind) -> CommitInfo {
        CommitInfo {
            sha: "abc1234".to_string(),
            date: "2025-03-01".to_string(),
            message: "message".to_string(),
            kind,
            author: "dev".to_string(),
        }
    }

    fn release() -> ReleaseInfo {
        ReleaseInfo {
            tag: "v1.2.0".to_string(),
            name: "v1.2.0".to_string(),
            date: Some("2025-03-01".to_string()),
            notes: String::new(),
            prerelease: false,
            draft: false,
        }
    }

    fn quiet() -> Activity<'static> {
        Activity {
            commits: &[],
            releases: &[],
            readme_changed: false,
        }
    }

    #[test]
    fn unpublished_project_is_new_regardless_of_activity() {
        let weights = ScoreWeights::default();
        let verdict = score(&quiet(), false, &weights);
        assert_eq!(verdict.status, ChangeStatus::New);
        assert_eq!(verdict.score, NEW_PROJECT_SCORE);
        assert_eq!(verdict.reason, REASON_NEW_PROJECT);

        let busy_commits = vec![commit(CommitKind::Feat)];
        let busy_releases = vec![release()];
        let busy = Activity {
            commits: &busy_commits,
            releases: &busy_releases,
            readme_changed: true,
        };
        let verdict = score(&busy, false, &weights);
        assert_eq!(verdict.status, ChangeStatus::New);
        assert_eq!(verdict.score, NEW_PROJECT_SCORE);
    }

    #[test]
    fn published_project_with_no_activity_skips() {
        let weights = ScoreWeights::default();
        let verdict = score(&quiet(), true, &weights);
        assert_eq!(verdict.status, ChangeStatus::Skip);
        assert_eq!(verdict.score, weights.no_commits);
        assert_eq!(verdict.reason, REASON_NO_ACTIVITY);
    }

    #[test]
    fn release_and_feat_commit_reach_threshold() {
        // One feat commit (30) plus one release (100) against threshold 50.
        let weights = ScoreWeights::default();
        let commits = vec![commit(CommitKind::Feat)];
        let releases = vec![release()];
        let activity = Activity {
            commits: &commits,
            releases: &releases,
            readme_changed: false,
        };
        let verdict = score(&activity, true, &weights);
        assert_eq!(verdict.status, ChangeStatus::Update);
        assert_eq!(verdict.score, 130);
        assert_eq!(verdict.reason, REASON_RELEASE);
    }

    #[test]
    fn chore_only_activity_scores_zero_and_skips() {
        let weights = ScoreWeights::default();
        let commits = vec![
            commit(CommitKind::Chore),
            commit(CommitKind::Chore),
            commit(CommitKind::Chore),
        ];
        let activity = Activity {
            commits: &commits,
            releases: &[],
            readme_changed: false,
        };
        let verdict = score(&activity, true, &weights);
        assert_eq!(verdict.status, ChangeStatus::Skip);
        assert_eq!(verdict.score, 0);
        assert_eq!(verdict.reason, REASON_LOW);
    }

    #[test]
    fn score_is_monotonic_in_each_factor() {
        let weights = ScoreWeights::default();
        let base_commits = vec![commit(CommitKind::Fix)];
        let base = Activity {
            commits: &base_commits,
            releases: &[],
            readme_changed: false,
        };
        let base_score = score(&base, true, &weights).score;

        let releases = vec![release()];
        let with_release = Activity {
            releases: &releases,
            ..base
        };
        assert!(score(&with_release, true, &weights).score >= base_score);

        let with_readme = Activity {
            readme_changed: true,
            ..base
        };
        assert!(score(&with_readme, true, &weights).score >= base_score);

        let more_commits = vec![commit(CommitKind::Fix), commit(CommitKind::Feat)];
        let with_feat = Activity {
            commits: &more_commits,
            ..base
        };
        assert!(score(&with_feat, true, &weights).score >= base_score);
    }

    #[test]
    fn reason_priority_prefers_feat_over_fix() {
        let weights = ScoreWeights::default();
        let commits = vec![commit(CommitKind::Fix), commit(CommitKind::Feat)];
        let activity = Activity {
            commits: &commits,
            releases: &[],
            readme_changed: false,
        };
        let verdict = score(&activity, true, &weights);
        assert_eq!(verdict.reason, REASON_FEAT);
    }

    #[test]
    fn forced_promotion_only_lifts_skips() {
        let skip = ChangeVerdict {
            score: 0,
            status: ChangeStatus::Skip,
            reason: REASON_LOW.to_string(),
        };
        let promoted = promote_forced(skip);
        assert_eq!(promoted.status, ChangeStatus::Update);
        assert_eq!(promoted.reason, REASON_FORCED);

        let update = ChangeVerdict {
            score: 130,
            status: ChangeStatus::Update,
            reason: REASON_RELEASE.to_string(),
        };
        assert_eq!(promote_forced(update.clone()), update);
    }

    #[test]
    fn readme_changed_is_loose() {
        assert!(readme_changed("", false));
        assert!(readme_changed("# Title", true));
        assert!(!readme_changed("", true));
    }
}
