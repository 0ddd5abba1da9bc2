//! # Developer Discovery
//!
//! Builds developer profiles from a repository's contributor list. Skills
//! come from the repository's languages, seniority and capacity from the
//! contribution count. Existing developers are never overwritten: a login
//! that is already stored is counted as skipped.

use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{info, instrument, warn};

use super::context::TriageContext;
use crate::error::Result;
use crate::models::{BugCategory, DeveloperProfile, DeveloperStatus, ExperienceLevel};
use crate::tracker::{Contributor, RepoRef};

const SENIOR_CONTRIBUTIONS: u32 = 200;
const MID_CONTRIBUTIONS: u32 = 50;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiscoverySummary {
    pub discovered: usize,
    pub saved: usize,
    pub skipped: usize,
    /// (login or repository, error)
    pub errors: Vec<(String, String)>,
}

impl DiscoverySummary {
    pub fn merge(&mut self, other: DiscoverySummary) {
        self.discovered += other.discovered;
        self.saved += other.saved;
        self.skipped += other.skipped;
        self.errors.extend(other.errors);
    }
}

#[derive(Debug, Clone)]
pub struct DeveloperDiscovery {
    ctx: TriageContext,
}

impl DeveloperDiscovery {
    pub fn new(ctx: TriageContext) -> Self {
        Self { ctx }
    }

    /// Scans every repository in `discovery.repositories`; a repository that
    /// fails is recorded in `errors` and the scan moves on
    pub async fn discover_all(&self, dry_run: bool) -> DiscoverySummary {
        let mut summary = DiscoverySummary::default();
        for entry in &self.ctx.config.discovery.repositories {
            let result = match entry.parse::<RepoRef>() {
                Ok(repo) => self.discover(&repo, dry_run).await,
                Err(e) => Err(e.into()),
            };
            match result {
                Ok(found) => summary.merge(found),
                Err(e) => {
                    warn!(repository = %entry, error = %e, "Discovery failed");
                    summary.errors.push((entry.clone(), e.to_string()));
                }
            }
        }
        summary
    }

    #[instrument(skip(self), fields(repo = %repo))]
    pub async fn discover(&self, repo: &RepoRef, dry_run: bool) -> Result<DiscoverySummary> {
        let contributors = self.ctx.tracker.list_contributors(repo).await?;
        let languages = match self.ctx.tracker.repository_languages(repo).await {
            Ok(languages) => languages,
            Err(e) => {
                warn!(error = %e, "Repository languages unavailable; using general skills");
                Vec::new()
            }
        };

        let min = self.ctx.config.discovery.min_contributions;
        let mut summary = DiscoverySummary::default();

        for contributor in contributors {
            if contributor.contributions < min {
                summary.skipped += 1;
                continue;
            }
            let profile = profile_for(&contributor, &languages);
            if let Err(e) = profile.validate() {
                summary.errors.push((contributor.login.clone(), e.to_string()));
                continue;
            }
            summary.discovered += 1;
            if dry_run {
                continue;
            }

            match self.save(&profile).await {
                Ok(true) => summary.saved += 1,
                Ok(false) => summary.skipped += 1,
                Err(e) => summary.errors.push((contributor.login.clone(), e.to_string())),
            }
        }

        info!(
            discovered = summary.discovered,
            saved = summary.saved,
            skipped = summary.skipped,
            errors = summary.errors.len(),
            dry_run,
            "Developer discovery complete"
        );
        Ok(summary)
    }

    async fn save(&self, profile: &DeveloperProfile) -> Result<bool> {
        let store = &self.ctx.store;
        if store
            .find_developer_by_username(&profile.github_username)
            .await?
            .is_some()
        {
            return Ok(false);
        }
        if !store.save_developer(profile).await? {
            return Ok(false);
        }
        store
            .upsert_developer_status(&DeveloperStatus::available(&profile.id, self.ctx.now()))
            .await?;
        Ok(true)
    }
}

pub fn experience_for(contributions: u32) -> ExperienceLevel {
    if contributions >= SENIOR_CONTRIBUTIONS {
        ExperienceLevel::Senior
    } else if contributions >= MID_CONTRIBUTIONS {
        ExperienceLevel::Mid
    } else {
        ExperienceLevel::Junior
    }
}

/// Language names plus the area tags they imply
pub fn skills_for(languages: &[String]) -> Vec<String> {
    let mut skills = BTreeSet::new();
    for language in languages {
        match language.as_str() {
            "Python" | "Java" | "Go" | "Rust" | "Ruby" | "PHP" | "C#" => {
                skills.insert(language.clone());
                skills.insert("Backend".to_string());
            }
            "JavaScript" | "TypeScript" | "HTML" | "CSS" | "Vue" => {
                skills.insert(language.clone());
                skills.insert("Frontend".to_string());
            }
            "Swift" | "Kotlin" | "Dart" | "Objective-C" => {
                skills.insert(language.clone());
                skills.insert("Mobile".to_string());
            }
            "PLpgSQL" | "TSQL" | "SQL" => {
                skills.insert("SQL".to_string());
                skills.insert("Database".to_string());
            }
            "Shell" | "Dockerfile" | "HCL" => {
                skills.insert("DevOps".to_string());
            }
            other => {
                skills.insert(other.to_string());
            }
        }
    }
    if skills.is_empty() {
        skills.insert("General".to_string());
    }
    skills.into_iter().collect()
}

fn categories_for(skills: &[String]) -> Vec<BugCategory> {
    let categories: BTreeSet<BugCategory> = skills
        .iter()
        .filter_map(|skill| match skill.as_str() {
            "Frontend" => Some(BugCategory::Frontend),
            "Backend" => Some(BugCategory::Backend),
            "Database" => Some(BugCategory::Database),
            "Mobile" => Some(BugCategory::Mobile),
            _ => None,
        })
        .collect();
    categories.into_iter().collect()
}

pub fn profile_for(contributor: &Contributor, languages: &[String]) -> DeveloperProfile {
    let experience = experience_for(contributor.contributions);
    let skills = skills_for(languages);
    DeveloperProfile {
        id: format!("dev_{}", contributor.id),
        name: contributor.login.clone(),
        github_username: contributor.login.clone(),
        email: format!("{}@users.noreply.github.com", contributor.login),
        preferred_categories: categories_for(&skills),
        skills,
        experience_level: experience.as_str().to_string(),
        max_capacity: experience.default_capacity(),
        timezone: "UTC".to_string(),
        contributions: contributor.contributions,
    }
}
