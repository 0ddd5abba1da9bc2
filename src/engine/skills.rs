//! Required-skill extraction.
//!
//! Combines a category lookup table with technology patterns matched over the
//! bug's title, description, labels and classifier keywords. The engine itself
//! only consumes the resolved list.

use regex::Regex;
use std::sync::OnceLock;

use crate::models::{BugCategory, CategorizedBug};

const MAX_CATEGORY_SKILLS: usize = 8;
const MAX_EXTRACTED_SKILLS: usize = 4;
const MAX_REQUIRED_SKILLS: usize = 10;

pub fn category_skills(category: BugCategory) -> &'static [&'static str] {
    match category {
        BugCategory::Frontend => &[
            "JavaScript",
            "TypeScript",
            "React",
            "Vue.js",
            "Angular",
            "HTML",
            "CSS",
            "Frontend",
        ],
        BugCategory::Backend => &[
            "Python", "Java", "Go", "Node.js", "Rust", "Ruby", "PHP", "Backend",
        ],
        BugCategory::Database => &[
            "SQL",
            "PostgreSQL",
            "MySQL",
            "MongoDB",
            "Redis",
            "Elasticsearch",
            "Database",
        ],
        BugCategory::Api => &["API", "REST", "GraphQL", "Microservices", "Backend"],
        BugCategory::Mobile => &[
            "Swift",
            "Kotlin",
            "Dart",
            "React Native",
            "Flutter",
            "iOS",
            "Android",
            "Mobile",
        ],
        BugCategory::Security => &[
            "Security",
            "Authentication",
            "Authorization",
            "Encryption",
            "OAuth",
            "JWT",
        ],
        BugCategory::Performance => &[
            "Performance",
            "Optimization",
            "Caching",
            "Profiling",
            "Load Testing",
        ],
        BugCategory::Unknown => &[],
    }
}

fn technology_patterns() -> &'static [(Regex, &'static str)] {
    static PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (r"\b(python|py)\b", "Python"),
            (r"\b(javascript|js)\b", "JavaScript"),
            (r"\b(typescript|ts)\b", "TypeScript"),
            (r"\bjava\b", "Java"),
            (r"\b(react|reactjs)\b", "React"),
            (r"\b(vue|vuejs)\b", "Vue.js"),
            (r"\bangular\b", "Angular"),
            (r"\bdjango\b", "Django"),
            (r"\bflask\b", "Flask"),
            (r"\bdocker\b", "Docker"),
            (r"\b(kubernetes|k8s)\b", "Kubernetes"),
            (r"\b(postgresql|postgres)\b", "PostgreSQL"),
            (r"\b(mongodb|mongo)\b", "MongoDB"),
            (r"\bredis\b", "Redis"),
            (r"\bmysql\b", "MySQL"),
            (r"\b(api|rest|graphql)\b", "API"),
            (r"\b(frontend|front-end|ui|ux|button)\b", "Frontend"),
            (r"\b(backend|back-end|server)\b", "Backend"),
            (r"\b(database|db)\b", "Database"),
            (r"\b(mobile|ios|android)\b", "Mobile"),
        ]
        .into_iter()
        .filter_map(|(pattern, skill)| Regex::new(pattern).ok().map(|re| (re, skill)))
        .collect()
    })
}

/// Resolves the skill list a bug requires.
///
/// Order is deterministic: category skills first, then pattern matches in table
/// order, de-duplicated case-insensitively.
pub fn required_skills(bug: &CategorizedBug) -> Vec<String> {
    let report = &bug.bug_report;
    let text = format!(
        "{} {} {} {}",
        report.title,
        report.description,
        report.labels.join(" "),
        bug.keywords.join(" ")
    )
    .to_lowercase();

    let mut skills: Vec<String> = Vec::new();

    for skill in category_skills(bug.category)
        .iter()
        .take(MAX_CATEGORY_SKILLS)
    {
        push_unique(skill, &mut skills);
    }

    let extracted = technology_patterns()
        .iter()
        .filter(|(re, _)| re.is_match(&text))
        .map(|(_, skill)| *skill)
        .take(MAX_EXTRACTED_SKILLS);
    for skill in extracted {
        push_unique(skill, &mut skills);
    }

    skills.truncate(MAX_REQUIRED_SKILLS);
    skills
}

fn push_unique(skill: &str, skills: &mut Vec<String>) {
    if !skills.iter().any(|s| s.eq_ignore_ascii_case(skill)) {
        skills.push(skill.to_string());
    }
}
