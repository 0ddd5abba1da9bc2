//! Per-candidate scoring factors.
//!
//! `final = 0.50·skill + 0.25·activity + 0.15·experience − 0.10·workload`
//!
//! Workload is the only negatively weighted term, and its `^1.5` exponent makes the
//! penalty grow super-linearly as a developer nears (or passes) capacity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::models::{DeveloperProfile, DeveloperStatus};

pub const SKILL_WEIGHT: f64 = 0.50;
pub const ACTIVITY_WEIGHT: f64 = 0.25;
pub const EXPERIENCE_WEIGHT: f64 = 0.15;
pub const WORKLOAD_WEIGHT: f64 = 0.10;

/// Skill score used when a bug names no required skills
pub const NEUTRAL_SKILL_SCORE: f64 = 0.5;

/// Experience score for levels outside the junior/mid/senior mapping
pub const DEFAULT_EXPERIENCE_SCORE: f64 = 0.5;

/// Window over which recency decays linearly from 1.0 to 0.0
pub const RECENCY_WINDOW_DAYS: f64 = 180.0;

/// Contribution count that saturates the activity term
pub const CONTRIBUTION_SATURATION: f64 = 100.0;

/// Fraction of `required` skills present in `developer_skills`, compared
/// case-insensitively. Duplicate required skills count once.
pub fn skill_score(required: &[String], developer_skills: &[String]) -> f64 {
    let required: HashSet<String> = required
        .iter()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect();
    if required.is_empty() {
        return NEUTRAL_SKILL_SCORE;
    }

    let owned: HashSet<String> = developer_skills
        .iter()
        .map(|s| s.trim().to_lowercase())
        .collect();
    let matched = required.iter().filter(|s| owned.contains(*s)).count();
    matched as f64 / required.len() as f64
}

/// Linear decay from 1.0 (active now) to 0.0 (inactive for 180 days or more)
pub fn recency_score(last_activity: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let elapsed_days = (now - last_activity).num_seconds() as f64 / 86_400.0;
    if elapsed_days <= 0.0 {
        return 1.0;
    }
    (1.0 - elapsed_days / RECENCY_WINDOW_DAYS).clamp(0.0, 1.0)
}

pub fn activity_score(recency: f64, contributions: u32) -> f64 {
    let volume = (1.0 + f64::from(contributions)).ln() / (1.0 + CONTRIBUTION_SATURATION).ln();
    (recency * volume).min(1.0)
}

pub fn experience_score(level: &str) -> f64 {
    match level.trim().to_ascii_lowercase().as_str() {
        "junior" => 0.3,
        "mid" | "mid-level" => 0.7,
        "senior" => 1.0,
        _ => DEFAULT_EXPERIENCE_SCORE,
    }
}

/// `(current / max)^1.5`; a zero capacity is treated as fully loaded
pub fn workload_penalty(current_workload: i32, max_capacity: u32) -> f64 {
    if max_capacity == 0 {
        return 1.0;
    }
    let utilization = f64::from(current_workload.max(0)) / f64::from(max_capacity);
    utilization.powf(1.5)
}

pub fn combine(skill: f64, activity: f64, experience: f64, workload: f64) -> f64 {
    SKILL_WEIGHT * skill + ACTIVITY_WEIGHT * activity + EXPERIENCE_WEIGHT * experience
        - WORKLOAD_WEIGHT * workload
}

/// Score breakdown for one candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateScore {
    pub developer_id: String,
    pub total_score: f64,
    pub skill_score: f64,
    pub activity_score: f64,
    pub experience_score: f64,
    pub workload_penalty: f64,
}

impl CandidateScore {
    pub fn compute(
        developer: &DeveloperProfile,
        status: &DeveloperStatus,
        required_skills: &[String],
        now: DateTime<Utc>,
    ) -> Self {
        let skill = skill_score(required_skills, &developer.skills);
        let activity = activity_score(
            recency_score(status.last_activity_timestamp, now),
            developer.contributions,
        );
        let experience = experience_score(&developer.experience_level);
        let workload = workload_penalty(status.current_workload, developer.max_capacity);

        Self {
            developer_id: developer.id.clone(),
            total_score: combine(skill, activity, experience, workload),
            skill_score: skill,
            activity_score: activity,
            experience_score: experience,
            workload_penalty: workload,
        }
    }

    /// Human-readable explanation of the factors behind this score
    pub fn reasoning(&self, developer: &DeveloperProfile) -> String {
        let skill = match self.skill_score {
            s if s >= 0.8 => "excellent skill match",
            s if s >= 0.6 => "good skill match",
            s if s >= 0.4 => "moderate skill match",
            _ => "limited skill match",
        };
        let activity = match self.activity_score {
            a if a >= 0.6 => "highly active",
            a if a >= 0.3 => "moderately active",
            _ => "low recent activity",
        };
        let workload = match self.workload_penalty {
            w if w <= 0.3 => "light workload",
            w if w <= 0.7 => "manageable workload",
            _ => "heavy workload",
        };
        format!(
            "Selected {} ({}) due to: {skill} ({:.2}), {activity} ({:.2}), {workload} ({:.2}). Overall score: {:.2}",
            developer.name,
            developer.experience_level,
            self.skill_score,
            self.activity_score,
            self.workload_penalty,
            self.total_score
        )
    }
}
