//! Per-developer, per-category confidence prior learned from feedback.
//!
//! Reporting-only: it is surfaced on [`AssignmentResult`](super::AssignmentResult)
//! and in feedback summaries but never changes candidate ranking.

use std::collections::BTreeMap;

use crate::models::{AssignmentFeedback, BugCategory};

pub const LEARNING_RATE: f64 = 0.1;
pub const INITIAL_CONFIDENCE: f64 = 0.5;
const RATING_WEIGHT: f64 = 0.7;
const APPROPRIATENESS_WEIGHT: f64 = 0.3;

/// Blend of normalized rating and appropriateness, in [0, 1]
pub fn success_factor(feedback: &AssignmentFeedback) -> f64 {
    let rating = (f64::from(feedback.rating.clamp(1, 5)) - 1.0) / 4.0;
    let appropriate = if feedback.was_appropriate { 1.0 } else { 0.0 };
    RATING_WEIGHT * rating + APPROPRIATENESS_WEIGHT * appropriate
}

fn ema(feedback: &mut [&AssignmentFeedback]) -> f64 {
    feedback.sort_by_key(|f| f.feedback_timestamp);
    feedback
        .iter()
        .fold(INITIAL_CONFIDENCE, |c, f| {
            c + LEARNING_RATE * (success_factor(f) - c)
        })
        .clamp(0.0, 1.0)
}

/// EMA over the feedback relevant to `category`, applied in timestamp order.
///
/// Feedback with no recorded category is treated as relevant to every category.
pub fn skill_confidence(feedback: &[AssignmentFeedback], category: BugCategory) -> f64 {
    let mut relevant: Vec<&AssignmentFeedback> = feedback
        .iter()
        .filter(|f| f.bug_category.map_or(true, |c| c == category))
        .collect();
    ema(&mut relevant)
}

/// Confidence for every category in one pass over a developer's history
pub fn category_confidence(feedback: &[AssignmentFeedback]) -> BTreeMap<BugCategory, f64> {
    BugCategory::ALL
        .iter()
        .map(|category| (*category, skill_confidence(feedback, *category)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn feedback(rating: u8, appropriate: bool, minutes_ago: i64) -> AssignmentFeedback {
        AssignmentFeedback::new(
            Uuid::new_v4(),
            "dev_1",
            rating,
            appropriate,
            Utc::now() - Duration::minutes(minutes_ago),
        )
    }

    #[test]
    fn success_factor_bounds() {
        assert_eq!(success_factor(&feedback(1, false, 0)), 0.0);
        assert!((success_factor(&feedback(5, true, 0)) - 1.0).abs() < 1e-12);
        assert!((success_factor(&feedback(3, true, 0)) - 0.65).abs() < 1e-12);
    }

    #[test]
    fn no_history_is_neutral() {
        assert_eq!(skill_confidence(&[], BugCategory::Backend), INITIAL_CONFIDENCE);
    }

    #[test]
    fn single_update() {
        let history = vec![feedback(5, true, 0)];
        assert!((skill_confidence(&history, BugCategory::Api) - 0.55).abs() < 1e-12);
    }

    #[test]
    fn applied_in_timestamp_order() {
        // Newest first in the input; the EMA must still see the oldest first.
        let history = vec![feedback(1, false, 0), feedback(5, true, 60)];
        // 0.5 -> 0.55 (success 1.0) -> 0.495 (success 0.0)
        assert!((skill_confidence(&history, BugCategory::Api) - 0.495).abs() < 1e-12);
    }

    #[test]
    fn other_categories_are_ignored() {
        let history = vec![feedback(5, true, 0).with_category(BugCategory::Frontend)];
        assert_eq!(
            skill_confidence(&history, BugCategory::Database),
            INITIAL_CONFIDENCE
        );
        let all = category_confidence(&history);
        assert!(all[&BugCategory::Frontend] > INITIAL_CONFIDENCE);
        assert_eq!(all[&BugCategory::Database], INITIAL_CONFIDENCE);
    }
}
