//! Keyword rules classifier.
//!
//! Category: each category owns a keyword table; the category with the most
//! distinct keyword hits wins (title hits count twice, ties go to the earlier
//! category). Confidence blends how many hits the winner has with how clearly
//! it beats the rest.
//!
//! Severity: critical, high and low keyword tables are checked in that order;
//! a stack trace next to a crash word is always critical. Without any hit the
//! bug is medium at low confidence.

use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;

use super::{Classification, Classifier, ClassifierResult};
use crate::models::{BugCategory, Severity};

const MAX_KEYWORDS: usize = 10;
const NO_MATCH_CONFIDENCE: f64 = 0.1;
const MAX_CATEGORY_CONFIDENCE: f64 = 0.95;

const CATEGORY_KEYWORDS: [(BugCategory, &[&str]); 7] = [
    (
        BugCategory::Frontend,
        &[
            "ui", "frontend", "interface", "display", "render", "css", "html", "react", "vue",
            "angular", "component", "layout", "style", "button", "modal", "dropdown", "menu",
        ],
    ),
    (
        BugCategory::Backend,
        &[
            "backend", "server", "service", "controller", "middleware", "worker", "job",
            "logic", "handler", "queue",
        ],
    ),
    (
        BugCategory::Database,
        &[
            "database", "db", "sql", "query", "table", "schema", "migration", "mysql",
            "postgresql", "postgres", "mongodb", "redis", "transaction", "index", "deadlock",
        ],
    ),
    (
        BugCategory::Api,
        &[
            "api", "endpoint", "rest", "graphql", "request", "response", "http", "status code",
            "payload", "webhook", "route",
        ],
    ),
    (
        BugCategory::Mobile,
        &[
            "mobile", "ios", "android", "app", "device", "phone", "tablet", "touch", "gesture",
            "flutter", "react-native", "orientation",
        ],
    ),
    (
        BugCategory::Security,
        &[
            "security", "vulnerability", "xss", "csrf", "injection", "permission", "token",
            "encryption", "password", "login", "session", "oauth", "exploit", "unauthorized",
        ],
    ),
    (
        BugCategory::Performance,
        &[
            "performance", "slow", "timeout", "memory", "cpu", "latency", "throughput",
            "bottleneck", "leak", "freeze", "hang", "lag",
        ],
    ),
];

const CRITICAL_KEYWORDS: &[&str] = &[
    "crash", "crashes", "crashing", "outage", "down", "data loss", "corrupt", "corrupted",
    "security breach", "vulnerability", "exploit", "production", "urgent", "emergency",
    "all users", "blocking",
];

const HIGH_KEYWORDS: &[&str] = &[
    "error", "exception", "fails", "failure", "broken", "not working", "incorrect", "wrong",
    "missing", "many users", "regression",
];

const LOW_KEYWORDS: &[&str] = &[
    "typo", "spelling", "grammar", "wording", "documentation", "docs", "cosmetic",
    "suggestion", "enhancement", "nice to have",
];

const CRASH_WORDS: &[&str] = &["crash", "down", "outage", "security"];

struct KeywordTable {
    category: BugCategory,
    patterns: Vec<(Regex, &'static str)>,
}

fn compile(keywords: &[&'static str]) -> Vec<(Regex, &'static str)> {
    keywords
        .iter()
        .filter_map(|keyword| {
            Regex::new(&format!(r"\b{}\b", regex::escape(keyword)))
                .ok()
                .map(|re| (re, *keyword))
        })
        .collect()
}

fn category_tables() -> &'static [KeywordTable] {
    static TABLES: OnceLock<Vec<KeywordTable>> = OnceLock::new();
    TABLES.get_or_init(|| {
        CATEGORY_KEYWORDS
            .iter()
            .map(|(category, keywords)| KeywordTable {
                category: *category,
                patterns: compile(keywords),
            })
            .collect()
    })
}

fn severity_tables() -> &'static [(Severity, Vec<(Regex, &'static str)>)] {
    static TABLES: OnceLock<Vec<(Severity, Vec<(Regex, &'static str)>)>> = OnceLock::new();
    TABLES.get_or_init(|| {
        vec![
            (Severity::Critical, compile(CRITICAL_KEYWORDS)),
            (Severity::High, compile(HIGH_KEYWORDS)),
            (Severity::Low, compile(LOW_KEYWORDS)),
        ]
    })
}

fn stack_trace_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"traceback|stack trace|panicked at|exception:|\bat line\b").ok())
        .as_ref()
}

/// Deterministic keyword classifier; also the fallback of [`super::ClassifierChain`]
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBasedClassifier;

impl RuleBasedClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, title: &str, body: &str, labels: &[String]) -> Classification {
        let title = title.to_lowercase();
        let rest = format!("{} {}", body, labels.join(" ")).to_lowercase();
        let full = format!("{title} {rest}");

        let mut keywords: Vec<String> = Vec::new();
        let (category, category_confidence, category_reason) =
            classify_category(&title, &rest, labels, &mut keywords);
        let (severity, severity_confidence, severity_reason) =
            classify_severity(&full, &mut keywords);
        keywords.truncate(MAX_KEYWORDS);

        Classification {
            category,
            severity,
            keywords,
            confidence: ((category_confidence + severity_confidence) / 2.0).clamp(0.0, 1.0),
            reasoning: format!("{category_reason}; {severity_reason}"),
        }
    }
}

fn classify_category(
    title: &str,
    rest: &str,
    labels: &[String],
    keywords: &mut Vec<String>,
) -> (BugCategory, f64, String) {
    let mut scores: Vec<(BugCategory, u32, Vec<&'static str>)> = Vec::new();

    for table in category_tables() {
        let mut score = 0;
        let mut hits = Vec::new();
        for (re, keyword) in &table.patterns {
            let in_title = re.is_match(title);
            if in_title || re.is_match(rest) {
                score += if in_title { 2 } else { 1 };
                hits.push(*keyword);
            }
        }
        if labels
            .iter()
            .any(|l| l.eq_ignore_ascii_case(table.category.as_str()))
        {
            score += 3;
        }
        scores.push((table.category, score, hits));
    }

    let total: u32 = scores.iter().map(|(_, s, _)| s).sum();
    // max_by_key keeps the last maximum; iterate reversed so ties favour table order
    let best = scores
        .iter()
        .rev()
        .max_by_key(|(_, score, _)| *score)
        .filter(|(_, score, _)| *score > 0);

    match best {
        Some((category, score, hits)) => {
            for hit in hits {
                push_keyword(hit, keywords);
            }
            let strength = (f64::from(*score) / 4.0).min(1.0);
            let share = f64::from(*score) / f64::from(total);
            let confidence = (0.5 * strength + 0.5 * share).min(MAX_CATEGORY_CONFIDENCE);
            (
                *category,
                confidence,
                format!("category {category} from {} keyword(s)", hits.len().max(1)),
            )
        }
        None => (
            BugCategory::Unknown,
            NO_MATCH_CONFIDENCE,
            "no category keywords".to_string(),
        ),
    }
}

fn classify_severity(text: &str, keywords: &mut Vec<String>) -> (Severity, f64, String) {
    let has_stack_trace = stack_trace_regex().is_some_and(|re| re.is_match(text));
    if has_stack_trace && CRASH_WORDS.iter().any(|w| text.contains(w)) {
        return (
            Severity::Critical,
            0.8,
            "severity critical: stack trace with crash".to_string(),
        );
    }

    for (severity, patterns) in severity_tables() {
        let hits: Vec<&'static str> = patterns
            .iter()
            .filter(|(re, _)| re.is_match(text))
            .map(|(_, keyword)| *keyword)
            .collect();
        if !hits.is_empty() {
            for hit in &hits {
                push_keyword(hit, keywords);
            }
            let confidence = if hits.len() >= 2 { 0.8 } else { 0.6 };
            return (
                *severity,
                confidence,
                format!("severity {severity} from '{}'", hits.join("', '")),
            );
        }
    }

    (
        Severity::Medium,
        0.4,
        "severity medium by default".to_string(),
    )
}

fn push_keyword(keyword: &str, keywords: &mut Vec<String>) {
    if !keywords.iter().any(|k| k == keyword) {
        keywords.push(keyword.to_string());
    }
}

#[async_trait]
impl Classifier for RuleBasedClassifier {
    fn name(&self) -> &str {
        "rules"
    }

    async fn categorize(
        &self,
        title: &str,
        body: &str,
        labels: &[String],
    ) -> ClassifierResult<Classification> {
        Ok(self.classify(title, body, labels))
    }
}
