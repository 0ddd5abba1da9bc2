//! # Performance and Accuracy Reporting
//!
//! Read-only summaries over the store's assignment and feedback history.
//! Nothing here feeds back into scoring; the decision engine only reads the
//! skill-confidence prior.
//!
//! Per developer, [`PerformanceMetrics`] covers completion counts, resolution
//! times in hours, the mean rating and completion rates per category and
//! severity. The trend compares the completion rate of the last 30 days with
//! the rest of the lookback window and moves only on a shift of more than 10
//! percentage points.
//!
//! Per assignment, the accuracy score weighs three signals:
//!
//! | Signal | Weight | Score |
//! |--------|--------|-------|
//! | Category confirmed by feedback | 0.3 | 1 on match, else 0 |
//! | Feedback rating | 0.4 | `(rating - 1) / 4` |
//! | Not reassigned | 0.3 | 1 when kept, else 0 |
//!
//! Signals without data are left out and the score is normalized by the
//! weights that remain.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, instrument};

use super::context::TriageContext;
use crate::error::Result;
use crate::models::{Assignment, BugCategory, CategorizedBug, Severity};
use crate::state_machine::AssignmentState;
use crate::store::StoreError;

/// Window of the "recent" half of the trend comparison
pub const RECENT_TREND_DAYS: i64 = 30;

/// Completion-rate shift that counts as a trend
const TREND_THRESHOLD: f64 = 0.1;

/// Window of the report behind [`PerformanceTracker::low_performing_areas`]
pub const ACCURACY_REPORT_DAYS: i64 = 30;

/// Accuracy below which a category or developer is reported
pub const LOW_ACCURACY_THRESHOLD: f64 = 0.7;

const CATEGORY_WEIGHT: f64 = 0.3;
const RATING_WEIGHT: f64 = 0.4;
const RETENTION_WEIGHT: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceTrend {
    Improving,
    Stable,
    Declining,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceMetrics {
    pub developer_id: String,
    pub lookback_days: i64,
    pub total_assignments: usize,
    pub completed_assignments: usize,
    pub average_resolution_hours: f64,
    pub median_resolution_hours: f64,
    /// Percentage of assignments completed
    pub success_rate: f64,
    /// Mean rating, 0 without feedback
    pub feedback_score: f64,
    /// Completion percentage per category
    pub category_success: BTreeMap<BugCategory, f64>,
    /// Completion percentage per severity
    pub severity_success: BTreeMap<Severity, f64>,
    /// Completed assignments per unit of capacity
    pub workload_efficiency: f64,
    pub recent_trend: PerformanceTrend,
    pub calculated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccuracyReport {
    pub window_days: i64,
    /// Mean accuracy score over every assignment in the window
    pub overall_accuracy: f64,
    pub category_accuracy: BTreeMap<BugCategory, f64>,
    pub developer_accuracy: BTreeMap<String, f64>,
    pub total_assignments: usize,
    pub feedback_count: usize,
    /// Mean reported resolution time, 0 without reports
    pub average_resolution_minutes: f64,
    /// Percentage of assignments moved to another developer
    pub reassignment_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LowPerformingAreas {
    pub threshold: f64,
    pub categories: Vec<BugCategory>,
    pub developers: Vec<String>,
}

/// Accuracy of one assignment in `[0, 1]`
pub fn assignment_accuracy(
    predicted: Option<BugCategory>,
    confirmed: Option<BugCategory>,
    rating: Option<u8>,
    reassigned: bool,
) -> f64 {
    let mut score = 0.0;
    let mut weight = 0.0;

    if let (Some(predicted), Some(confirmed)) = (predicted, confirmed) {
        if predicted == confirmed {
            score += CATEGORY_WEIGHT;
        }
        weight += CATEGORY_WEIGHT;
    }
    if let Some(rating) = rating {
        score += RATING_WEIGHT * (f64::from(rating.clamp(1, 5)) - 1.0) / 4.0;
        weight += RATING_WEIGHT;
    }
    if !reassigned {
        score += RETENTION_WEIGHT;
    }
    weight += RETENTION_WEIGHT;

    score / weight
}

/// Completed share of `recent` against `previous`; either side empty is stable
pub fn completion_trend(recent: &[&Assignment], previous: &[&Assignment]) -> PerformanceTrend {
    if recent.is_empty() || previous.is_empty() {
        return PerformanceTrend::Stable;
    }
    let rate = |assignments: &[&Assignment]| {
        completed_count(assignments.iter().copied()) as f64 / assignments.len() as f64
    };
    let shift = rate(recent) - rate(previous);
    if shift > TREND_THRESHOLD {
        PerformanceTrend::Improving
    } else if shift < -TREND_THRESHOLD {
        PerformanceTrend::Declining
    } else {
        PerformanceTrend::Stable
    }
}

fn is_completed(assignment: &Assignment) -> bool {
    assignment.status == AssignmentState::Completed
}

fn completed_count<'a>(assignments: impl Iterator<Item = &'a Assignment>) -> usize {
    assignments.filter(|a| is_completed(a)).count()
}

fn percent(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 * 100.0 / total as f64
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

/// Completion percentage per key; assignments without a key are skipped
fn success_by<K: Ord>(
    assignments: &[Assignment],
    key: impl Fn(&Assignment) -> Option<K>,
) -> BTreeMap<K, f64> {
    let mut counts: BTreeMap<K, (usize, usize)> = BTreeMap::new();
    for assignment in assignments {
        if let Some(k) = key(assignment) {
            let (total, completed) = counts.entry(k).or_default();
            *total += 1;
            if is_completed(assignment) {
                *completed += 1;
            }
        }
    }
    counts
        .into_iter()
        .map(|(k, (total, completed))| (k, percent(completed, total)))
        .collect()
}

fn mean_by<K: Ord>(scores: impl IntoIterator<Item = (K, f64)>) -> BTreeMap<K, f64> {
    let mut grouped: BTreeMap<K, Vec<f64>> = BTreeMap::new();
    for (k, score) in scores {
        grouped.entry(k).or_default().push(score);
    }
    grouped
        .into_iter()
        .map(|(k, values)| (k, mean(&values)))
        .collect()
}

struct AccuracyRecord {
    developer_id: String,
    category: Option<BugCategory>,
    score: f64,
    rated: bool,
    resolution_minutes: Option<i64>,
    reassigned: bool,
}

#[derive(Debug, Clone)]
pub struct PerformanceTracker {
    ctx: TriageContext,
}

impl PerformanceTracker {
    pub fn new(ctx: TriageContext) -> Self {
        Self { ctx }
    }

    /// Metrics over assignments made in the last `lookback_days`
    #[instrument(skip(self))]
    pub async fn developer_metrics(
        &self,
        developer_id: &str,
        lookback_days: i64,
    ) -> Result<PerformanceMetrics> {
        let store = &self.ctx.store;
        let now = self.ctx.now();
        let cutoff = now - ChronoDuration::days(lookback_days);

        let developer = store
            .get_developer(developer_id)
            .await?
            .ok_or_else(|| StoreError::not_found("developer", developer_id))?;
        let assignments: Vec<Assignment> = store
            .assignments_for_developer(developer_id)
            .await?
            .into_iter()
            .filter(|a| a.assigned_at >= cutoff)
            .collect();
        let bugs = self.bugs_for(&assignments).await?;

        let completed = completed_count(assignments.iter());
        let mut resolution_hours: Vec<f64> = assignments
            .iter()
            .filter_map(|a| a.completed_at.map(|done| done - a.assigned_at))
            .map(|elapsed| elapsed.num_seconds() as f64 / 3600.0)
            .collect();
        let ratings: Vec<f64> = store
            .feedback_history(Some(cutoff))
            .await?
            .remove(developer_id)
            .unwrap_or_default()
            .iter()
            .map(|f| f64::from(f.rating))
            .collect();

        let recent_trend = if lookback_days <= RECENT_TREND_DAYS {
            PerformanceTrend::Stable
        } else {
            let split = now - ChronoDuration::days(RECENT_TREND_DAYS);
            let (recent, previous): (Vec<&Assignment>, Vec<&Assignment>) =
                assignments.iter().partition(|a| a.assigned_at >= split);
            completion_trend(&recent, &previous)
        };

        let metrics = PerformanceMetrics {
            developer_id: developer_id.to_string(),
            lookback_days,
            total_assignments: assignments.len(),
            completed_assignments: completed,
            average_resolution_hours: mean(&resolution_hours),
            median_resolution_hours: median(&mut resolution_hours),
            success_rate: percent(completed, assignments.len()),
            feedback_score: mean(&ratings),
            category_success: success_by(&assignments, |a| bugs.get(&a.bug_id).map(|b| b.category)),
            severity_success: success_by(&assignments, |a| bugs.get(&a.bug_id).map(|b| b.severity)),
            workload_efficiency: if developer.max_capacity == 0 {
                0.0
            } else {
                completed as f64 / f64::from(developer.max_capacity)
            },
            recent_trend,
            calculated_at: now,
        };
        debug!(
            total = metrics.total_assignments,
            completed = metrics.completed_assignments,
            trend = ?metrics.recent_trend,
            "Performance metrics calculated"
        );
        Ok(metrics)
    }

    /// Accuracy over every assignment made in the last `days`
    #[instrument(skip(self))]
    pub async fn accuracy_report(&self, days: i64) -> Result<AccuracyReport> {
        let store = &self.ctx.store;
        let cutoff = self.ctx.now() - ChronoDuration::days(days);

        let mut assignments = Vec::new();
        for developer in store.list_developers().await? {
            assignments.extend(
                store
                    .assignments_for_developer(&developer.id)
                    .await?
                    .into_iter()
                    .filter(|a| a.assigned_at >= cutoff),
            );
        }
        let bugs = self.bugs_for(&assignments).await?;

        let mut records = Vec::with_capacity(assignments.len());
        for assignment in &assignments {
            let feedback = store.feedback_for_assignment(assignment.id).await?;
            let category = bugs.get(&assignment.bug_id).map(|b| b.category);
            let reassigned = assignment.status == AssignmentState::Reassigned;
            records.push(AccuracyRecord {
                developer_id: assignment.developer_id.clone(),
                category,
                score: assignment_accuracy(
                    category,
                    feedback.as_ref().and_then(|f| f.bug_category),
                    feedback.as_ref().map(|f| f.rating),
                    reassigned,
                ),
                rated: feedback.is_some(),
                resolution_minutes: feedback.as_ref().and_then(|f| f.resolution_time_minutes),
                reassigned,
            });
        }

        let scores: Vec<f64> = records.iter().map(|r| r.score).collect();
        let resolution: Vec<f64> = records
            .iter()
            .filter_map(|r| r.resolution_minutes)
            .map(|m| m as f64)
            .collect();
        let report = AccuracyReport {
            window_days: days,
            overall_accuracy: mean(&scores),
            category_accuracy: mean_by(
                records
                    .iter()
                    .filter_map(|r| r.category.map(|c| (c, r.score))),
            ),
            developer_accuracy: mean_by(records.iter().map(|r| (r.developer_id.clone(), r.score))),
            total_assignments: records.len(),
            feedback_count: records.iter().filter(|r| r.rated).count(),
            average_resolution_minutes: mean(&resolution),
            reassignment_rate: percent(
                records.iter().filter(|r| r.reassigned).count(),
                records.len(),
            ),
        };
        info!(
            total = report.total_assignments,
            feedback = report.feedback_count,
            overall_accuracy = report.overall_accuracy,
            "Accuracy report generated"
        );
        Ok(report)
    }

    /// Categories and developers whose recent accuracy is below `threshold`
    pub async fn low_performing_areas(&self, threshold: f64) -> Result<LowPerformingAreas> {
        let report = self.accuracy_report(ACCURACY_REPORT_DAYS).await?;
        Ok(LowPerformingAreas {
            threshold,
            categories: report
                .category_accuracy
                .into_iter()
                .filter(|(_, accuracy)| *accuracy < threshold)
                .map(|(category, _)| category)
                .collect(),
            developers: report
                .developer_accuracy
                .into_iter()
                .filter(|(_, accuracy)| *accuracy < threshold)
                .map(|(developer, _)| developer)
                .collect(),
        })
    }

    async fn bugs_for(&self, assignments: &[Assignment]) -> Result<HashMap<String, CategorizedBug>> {
        let mut bugs = HashMap::new();
        for assignment in assignments {
            if bugs.contains_key(&assignment.bug_id) {
                continue;
            }
            if let Some(bug) = self.ctx.store.get_bug(&assignment.bug_id).await? {
                bugs.insert(assignment.bug_id.clone(), bug);
            }
        }
        Ok(bugs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TriageConfig;
    use crate::messaging::{InMemoryBroker, MessagePublisher, PublisherConfig};
    use crate::models::{AssignmentFeedback, BugReport, DeveloperProfile, DeveloperStatus};
    use crate::store::{InMemoryStore, TriageStore};
    use crate::tracker::RecordingTracker;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()
    }

    fn developer(id: &str) -> DeveloperProfile {
        DeveloperProfile {
            id: id.into(),
            name: id.into(),
            github_username: id.replace('_', "-"),
            email: format!("{id}@example.com"),
            skills: vec!["SQL".into()],
            experience_level: "mid".into(),
            max_capacity: 4,
            preferred_categories: vec![],
            timezone: "UTC".into(),
            contributions: 5,
        }
    }

    fn bug(id: &str, category: BugCategory, severity: Severity) -> CategorizedBug {
        CategorizedBug {
            bug_report: BugReport::new(id, "Broken thing", "Something stopped working today", "r", "github", now()),
            category,
            severity,
            keywords: vec![],
            confidence_score: 0.7,
            analysis_timestamp: now(),
        }
    }

    async fn setup() -> (Arc<InMemoryStore>, PerformanceTracker) {
        let store = Arc::new(InMemoryStore::new());
        for id in ["dev_a", "dev_b"] {
            store.save_developer(&developer(id)).await.unwrap();
            store
                .upsert_developer_status(&DeveloperStatus::available(id, now() - ChronoDuration::days(90)))
                .await
                .unwrap();
        }
        let ctx = TriageContext::new(
            store.clone(),
            MessagePublisher::new(Arc::new(InMemoryBroker::new()), PublisherConfig::default()),
            Arc::new(RecordingTracker::new()),
            TriageConfig::default(),
        )
        .with_clock(now);
        (store, PerformanceTracker::new(ctx))
    }

    /// Records an assignment `days_ago` and completes it after `hours` when given
    async fn assign(
        store: &InMemoryStore,
        bug: CategorizedBug,
        developer_id: &str,
        days_ago: i64,
        hours: Option<i64>,
    ) -> Assignment {
        store.save_bug(&bug).await.unwrap();
        let at = now() - ChronoDuration::days(days_ago);
        let assignment = Assignment::new(bug.id(), developer_id, 0.7, "match", at);
        store.record_assignment(&assignment).await.unwrap();
        if let Some(hours) = hours {
            store
                .complete_assignment(assignment.id, at + ChronoDuration::hours(hours))
                .await
                .unwrap();
        }
        assignment
    }

    #[test]
    fn accuracy_weights_and_normalization() {
        let db = Some(BugCategory::Database);
        assert_eq!(assignment_accuracy(db, db, Some(5), false), 1.0);
        assert_eq!(assignment_accuracy(None, None, None, false), 1.0);
        assert_eq!(assignment_accuracy(None, None, None, true), 0.0);
        assert!((assignment_accuracy(db, Some(BugCategory::Frontend), Some(3), false) - 0.5).abs() < 1e-9);
        // rating 1, kept: 0.3 / 0.7
        assert!((assignment_accuracy(None, None, Some(1), false) - 0.3 / 0.7).abs() < 1e-9);
    }

    #[test]
    fn median_handles_even_and_odd_lengths() {
        assert_eq!(median(&mut []), 0.0);
        assert_eq!(median(&mut [3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&mut [4.0, 1.0, 3.0, 2.0]), 2.5);
    }

    #[tokio::test]
    async fn developer_metrics_summarize_the_window() {
        let (store, tracker) = setup().await;
        assign(&store, bug("b1", BugCategory::Database, Severity::High), "dev_a", 5, Some(2)).await;
        assign(&store, bug("b2", BugCategory::Database, Severity::Low), "dev_a", 10, Some(6)).await;
        assign(&store, bug("b3", BugCategory::Frontend, Severity::High), "dev_a", 12, None).await;
        // Outside a 90 day window.
        assign(&store, bug("b4", BugCategory::Frontend, Severity::High), "dev_a", 200, Some(1)).await;

        let metrics = tracker.developer_metrics("dev_a", 90).await.unwrap();
        assert_eq!(metrics.total_assignments, 3);
        assert_eq!(metrics.completed_assignments, 2);
        assert_eq!(metrics.average_resolution_hours, 4.0);
        assert_eq!(metrics.median_resolution_hours, 4.0);
        assert!((metrics.success_rate - 200.0 / 3.0).abs() < 1e-9);
        assert_eq!(metrics.category_success[&BugCategory::Database], 100.0);
        assert_eq!(metrics.category_success[&BugCategory::Frontend], 0.0);
        assert_eq!(metrics.severity_success[&Severity::High], 50.0);
        assert_eq!(metrics.workload_efficiency, 0.5);
        assert_eq!(metrics.feedback_score, 0.0);
    }

    #[tokio::test]
    async fn trend_compares_recent_month_with_the_rest() {
        let (store, tracker) = setup().await;
        for (i, days_ago) in [50, 55, 60].into_iter().enumerate() {
            assign(&store, bug(&format!("old{i}"), BugCategory::Backend, Severity::Medium), "dev_a", days_ago, None).await;
        }
        for (i, days_ago) in [3, 7].into_iter().enumerate() {
            assign(&store, bug(&format!("new{i}"), BugCategory::Backend, Severity::Medium), "dev_a", days_ago, Some(1)).await;
        }

        let metrics = tracker.developer_metrics("dev_a", 90).await.unwrap();
        assert_eq!(metrics.recent_trend, PerformanceTrend::Improving);
        let short = tracker.developer_metrics("dev_a", RECENT_TREND_DAYS).await.unwrap();
        assert_eq!(short.recent_trend, PerformanceTrend::Stable);
    }

    #[tokio::test]
    async fn unknown_developer_is_not_found() {
        let (_store, tracker) = setup().await;
        assert!(matches!(
            tracker.developer_metrics("dev_z", 90).await,
            Err(crate::error::TriageError::Store(StoreError::NotFound { .. }))
        ));
    }

    #[tokio::test]
    async fn accuracy_report_and_low_performers() {
        let (store, tracker) = setup().await;
        let good = assign(&store, bug("b1", BugCategory::Database, Severity::High), "dev_a", 2, None).await;
        store
            .record_feedback(
                &AssignmentFeedback::new(good.id, "dev_a", 5, true, now())
                    .with_category(BugCategory::Database)
                    .with_resolution_time(120),
                Some(good.assigned_at + ChronoDuration::minutes(120)),
            )
            .await
            .unwrap();

        let poor = assign(&store, bug("b2", BugCategory::Frontend, Severity::Low), "dev_b", 3, None).await;
        store
            .save_feedback(
                &AssignmentFeedback::new(poor.id, "dev_b", 1, false, now())
                    .with_category(BugCategory::Backend),
            )
            .await
            .unwrap();
        store
            .reassign_assignment(poor.id, "dev_a", 0.5, "rebalanced", now() - ChronoDuration::days(1))
            .await
            .unwrap();

        let report = tracker.accuracy_report(ACCURACY_REPORT_DAYS).await.unwrap();
        assert_eq!(report.total_assignments, 3);
        assert_eq!(report.feedback_count, 2);
        assert_eq!(report.average_resolution_minutes, 120.0);
        assert!((report.reassignment_rate - 100.0 / 3.0).abs() < 1e-9);
        assert_eq!(report.developer_accuracy["dev_b"], 0.0);
        assert_eq!(report.category_accuracy[&BugCategory::Database], 1.0);

        let low = tracker.low_performing_areas(LOW_ACCURACY_THRESHOLD).await.unwrap();
        assert_eq!(low.developers, vec!["dev_b".to_string()]);
        assert!(low.categories.contains(&BugCategory::Frontend));
        assert!(!low.categories.contains(&BugCategory::Database));
    }
}
