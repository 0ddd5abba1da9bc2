use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::debug;

use super::scoring::CandidateScore;
use super::skill_confidence::skill_confidence;
use crate::models::{AssignmentFeedback, CategorizedBug, DeveloperProfile, DeveloperStatus};

/// Confidence floors applied to the top-ranked candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub min_confidence_threshold: f64,
    pub fallback_confidence_floor: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_confidence_threshold: 0.5,
            fallback_confidence_floor: 0.3,
        }
    }
}

/// Borrowed snapshot of everything one decision needs
#[derive(Debug, Clone)]
pub struct DecisionContext<'a> {
    pub bug: &'a CategorizedBug,
    pub required_skills: &'a [String],
    pub candidates: &'a [DeveloperProfile],
    pub statuses: &'a HashMap<String, DeveloperStatus>,
    pub feedback_history: &'a HashMap<String, Vec<AssignmentFeedback>>,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentResult {
    pub developer_id: String,
    /// Final score of the winner, clamped to [0, 1]
    pub confidence_score: f64,
    pub reasoning: String,
    /// Reporting-only prior for (developer, bug category)
    pub skill_confidence: f64,
    /// Every scored candidate in rank order
    pub all_scores: Vec<CandidateScore>,
}

/// Pure, synchronous assignment decision engine
#[derive(Debug, Clone, Default)]
pub struct AssignmentEngine {
    config: EngineConfig,
}

impl AssignmentEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Primary path: top candidate must clear `min_confidence_threshold`
    pub fn find_best_developer(&self, ctx: &DecisionContext<'_>) -> Option<AssignmentResult> {
        self.find_best_developer_with_threshold(ctx, self.config.min_confidence_threshold)
    }

    /// Relaxed path: top candidate must clear `fallback_confidence_floor`
    pub fn find_fallback_developer(&self, ctx: &DecisionContext<'_>) -> Option<AssignmentResult> {
        self.find_best_developer_with_threshold(ctx, self.config.fallback_confidence_floor)
    }

    pub fn find_best_developer_with_threshold(
        &self,
        ctx: &DecisionContext<'_>,
        threshold: f64,
    ) -> Option<AssignmentResult> {
        let scores = rank_candidates(ctx);
        let best = scores.first()?;

        if best.total_score < threshold {
            debug!(
                bug_id = %ctx.bug.id(),
                developer_id = %best.developer_id,
                score = best.total_score,
                threshold,
                "Top candidate below confidence floor"
            );
            return None;
        }

        let developer = ctx.candidates.iter().find(|d| d.id == best.developer_id)?;
        let history = ctx
            .feedback_history
            .get(&developer.id)
            .map(Vec::as_slice)
            .unwrap_or_default();

        Some(AssignmentResult {
            developer_id: best.developer_id.clone(),
            confidence_score: best.total_score.clamp(0.0, 1.0),
            reasoning: best.reasoning(developer),
            skill_confidence: skill_confidence(history, ctx.bug.category),
            all_scores: scores,
        })
    }
}

/// Scores every available candidate and orders them best first.
///
/// Candidates without a status, or whose availability is anything other than
/// `Available`, are never scored.
pub fn rank_candidates(ctx: &DecisionContext<'_>) -> Vec<CandidateScore> {
    let mut scores: Vec<CandidateScore> = ctx
        .candidates
        .iter()
        .filter_map(|developer| {
            let status = ctx.statuses.get(&developer.id)?;
            status.is_available().then(|| {
                CandidateScore::compute(developer, status, ctx.required_skills, ctx.now)
            })
        })
        .collect();

    scores.sort_by(compare_scores);
    scores
}

/// Score descending, then skill descending, then developer id ascending
fn compare_scores(a: &CandidateScore, b: &CandidateScore) -> Ordering {
    b.total_score
        .total_cmp(&a.total_score)
        .then_with(|| b.skill_score.total_cmp(&a.skill_score))
        .then_with(|| a.developer_id.cmp(&b.developer_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Availability, BugCategory, BugReport, Severity};

    fn bug() -> CategorizedBug {
        CategorizedBug {
            bug_report: BugReport::new(
                "bug_1",
                "API returns 500",
                "The python API fails on save",
                "r",
                "github",
                Utc::now(),
            ),
            category: BugCategory::Api,
            severity: Severity::High,
            keywords: vec![],
            confidence_score: 0.9,
            analysis_timestamp: Utc::now(),
        }
    }

    fn dev(id: &str, skills: &[&str], exp: &str, cap: u32) -> DeveloperProfile {
        DeveloperProfile {
            id: id.into(),
            name: id.into(),
            github_username: id.replace('_', "-"),
            email: format!("{id}@example.com"),
            skills: skills.iter().map(|s| s.to_string()).collect(),
            experience_level: exp.into(),
            max_capacity: cap,
            preferred_categories: vec![],
            timezone: "UTC".into(),
            contributions: 50,
        }
    }

    fn status(id: &str, workload: i32, now: DateTime<Utc>) -> DeveloperStatus {
        let mut s = DeveloperStatus::available(id, now);
        s.current_workload = workload;
        s
    }

    #[test]
    fn empty_pool_returns_none() {
        let now = Utc::now();
        let bug = bug();
        let statuses = HashMap::new();
        let feedback = HashMap::new();
        let ctx = DecisionContext {
            bug: &bug,
            required_skills: &[],
            candidates: &[],
            statuses: &statuses,
            feedback_history: &feedback,
            now,
        };
        assert!(AssignmentEngine::default().find_best_developer(&ctx).is_none());
    }

    #[test]
    fn unavailable_candidates_never_win() {
        let now = Utc::now();
        let bug = bug();
        let required = vec!["Python".to_string()];
        let candidates = vec![dev("dev_a", &["python"], "senior", 5)];
        let mut busy = status("dev_a", 0, now);
        busy.availability = Availability::Busy;
        let statuses = HashMap::from([("dev_a".to_string(), busy)]);
        let feedback = HashMap::new();
        let ctx = DecisionContext {
            bug: &bug,
            required_skills: &required,
            candidates: &candidates,
            statuses: &statuses,
            feedback_history: &feedback,
            now,
        };
        assert!(AssignmentEngine::default()
            .find_best_developer_with_threshold(&ctx, f64::NEG_INFINITY)
            .is_none());
    }

    #[test]
    fn ties_break_on_skill_then_id() {
        let now = Utc::now();
        let bug = bug();
        let required = vec!["Python".to_string()];
        let candidates = vec![
            dev("dev_b", &["python"], "senior", 5),
            dev("dev_a", &["python"], "senior", 5),
        ];
        let statuses = HashMap::from([
            ("dev_a".to_string(), status("dev_a", 0, now)),
            ("dev_b".to_string(), status("dev_b", 0, now)),
        ]);
        let feedback = HashMap::new();
        let ctx = DecisionContext {
            bug: &bug,
            required_skills: &required,
            candidates: &candidates,
            statuses: &statuses,
            feedback_history: &feedback,
            now,
        };
        let result = AssignmentEngine::default().find_best_developer(&ctx).unwrap();
        assert_eq!(result.developer_id, "dev_a");
        assert_eq!(result.all_scores.len(), 2);
        assert_eq!(result.skill_confidence, 0.5);
    }

    #[test]
    fn fallback_floor_is_lower_than_primary() {
        let now = Utc::now();
        let bug = bug();
        let required = vec!["Go".to_string(), "Rust".to_string()];
        let mut junior = dev("dev_a", &["rust"], "junior", 5);
        junior.contributions = 0;
        let candidates = vec![junior];
        let statuses = HashMap::from([("dev_a".to_string(), status("dev_a", 0, now))]);
        let feedback = HashMap::new();
        let ctx = DecisionContext {
            bug: &bug,
            required_skills: &required,
            candidates: &candidates,
            statuses: &statuses,
            feedback_history: &feedback,
            now,
        };
        // 0.5·0.5 + 0 + 0.15·0.3 − 0 = 0.295: below both floors
        let engine = AssignmentEngine::default();
        assert!(engine.find_best_developer(&ctx).is_none());
        assert!(engine.find_fallback_developer(&ctx).is_none());
        let relaxed = engine.find_best_developer_with_threshold(&ctx, 0.29).unwrap();
        assert!((relaxed.confidence_score - 0.295).abs() < 1e-9);
    }
}
