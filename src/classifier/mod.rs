//! # Bug Classification
//!
//! The classifier is a black box behind [`Classifier`]. [`ClassifierChain`]
//! puts the keyword rules behind any primary classifier: when the primary is
//! unsure (or fails) the rules are consulted and the more confident answer
//! wins. An answer that is still below the manual-review floor is not
//! assigned automatically.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::{BugCategory, BugReport, CategorizedBug, Severity};

pub mod rules;

pub use rules::RuleBasedClassifier;

/// Primary confidence below which the rules are consulted
pub const CONSULT_FALLBACK_BELOW: f64 = 0.7;
pub const DEFAULT_MANUAL_REVIEW_FLOOR: f64 = 0.3;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ClassifierError {
    #[error("Classifier unavailable: {0}")]
    Unavailable(String),

    #[error("Classifier returned unusable output: {0}")]
    InvalidOutput(String),
}

pub type ClassifierResult<T> = Result<T, ClassifierError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub category: BugCategory,
    pub severity: Severity,
    pub keywords: Vec<String>,
    pub confidence: f64,
    pub reasoning: String,
}

impl Classification {
    pub fn into_categorized(self, report: BugReport, now: DateTime<Utc>) -> CategorizedBug {
        CategorizedBug {
            bug_report: report,
            category: self.category,
            severity: self.severity,
            keywords: self.keywords,
            confidence_score: self.confidence.clamp(0.0, 1.0),
            analysis_timestamp: now,
        }
    }
}

#[async_trait]
pub trait Classifier: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn categorize(
        &self,
        title: &str,
        body: &str,
        labels: &[String],
    ) -> ClassifierResult<Classification>;
}

impl std::fmt::Debug for dyn Classifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Classifier({})", self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TriageOutcome {
    Categorized {
        bug: CategorizedBug,
        /// Name of the classifier whose answer was used
        source: String,
    },
    NeedsManualReview {
        bug: CategorizedBug,
        reason: String,
    },
}

impl TriageOutcome {
    pub fn bug(&self) -> &CategorizedBug {
        match self {
            Self::Categorized { bug, .. } | Self::NeedsManualReview { bug, .. } => bug,
        }
    }

    pub fn needs_manual_review(&self) -> bool {
        matches!(self, Self::NeedsManualReview { .. })
    }
}

#[derive(Debug, Clone)]
pub struct ClassifierChain {
    primary: Arc<dyn Classifier>,
    fallback: RuleBasedClassifier,
    manual_review_floor: f64,
}

impl ClassifierChain {
    pub fn new(primary: Arc<dyn Classifier>, manual_review_floor: f64) -> Self {
        Self {
            primary,
            fallback: RuleBasedClassifier::new(),
            manual_review_floor,
        }
    }

    /// Chain whose primary is the keyword rules themselves
    pub fn rules_only(manual_review_floor: f64) -> Self {
        Self::new(Arc::new(RuleBasedClassifier::new()), manual_review_floor)
    }

    pub fn manual_review_floor(&self) -> f64 {
        self.manual_review_floor
    }

    pub async fn triage(&self, report: &BugReport, now: DateTime<Utc>) -> TriageOutcome {
        let (classification, source) = self.classify(report).await;

        if classification.confidence < self.manual_review_floor {
            let reason = format!(
                "classification confidence {:.2} below manual review floor {:.2}",
                classification.confidence, self.manual_review_floor
            );
            return TriageOutcome::NeedsManualReview {
                bug: classification.into_categorized(report.clone(), now),
                reason,
            };
        }

        TriageOutcome::Categorized {
            bug: classification.into_categorized(report.clone(), now),
            source,
        }
    }

    async fn classify(&self, report: &BugReport) -> (Classification, String) {
        let primary = self
            .primary
            .categorize(&report.title, &report.description, &report.labels)
            .await;

        let primary = match primary {
            Ok(c) if c.confidence >= CONSULT_FALLBACK_BELOW => {
                return (c, self.primary.name().to_string());
            }
            Ok(c) => Some(c),
            Err(e) => {
                warn!(
                    bug_id = %report.id,
                    classifier = self.primary.name(),
                    error = %e,
                    "Primary classifier failed; using rules"
                );
                None
            }
        };

        let rules = self
            .fallback
            .classify(&report.title, &report.description, &report.labels);

        match primary {
            Some(p) if p.confidence >= rules.confidence => {
                debug!(bug_id = %report.id, "Primary classification kept over rules");
                (p, self.primary.name().to_string())
            }
            _ => (rules, self.fallback.name().to_string()),
        }
    }
}
