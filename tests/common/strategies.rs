//! Proptest strategies for engine inputs.

#![allow(dead_code)]

use bug_triage_core::models::{Availability, DeveloperProfile, DeveloperStatus};
use chrono::{DateTime, Duration, Utc};
use proptest::prelude::*;

use super::builders::DeveloperBuilder;

pub const SKILL_POOL: [&str; 8] = [
    "Python", "API", "SQL", "React", "JavaScript", "Security", "Kotlin", "Caching",
];

pub fn skill_set_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::sample::subsequence(SKILL_POOL.to_vec(), 0..=SKILL_POOL.len())
        .prop_map(|skills| skills.into_iter().map(String::from).collect())
}

pub fn experience_strategy() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec!["junior", "mid", "senior", "lead"])
}

pub fn availability_strategy() -> impl Strategy<Value = Availability> {
    prop::sample::select(vec![
        Availability::Available,
        Availability::Busy,
        Availability::Unavailable,
        Availability::FocusTime,
    ])
}

/// Developer with a matching status; ids are `dev_{index}`
pub fn candidate_strategy(
    index: usize,
    now: DateTime<Utc>,
) -> impl Strategy<Value = (DeveloperProfile, DeveloperStatus)> {
    (
        skill_set_strategy(),
        experience_strategy(),
        1u32..=10,
        0u32..=300,
        0i32..=12,
        0i64..=200,
        availability_strategy(),
    )
        .prop_map(
            move |(skills, level, capacity, contributions, workload, idle_days, availability)| {
                let id = format!("dev_{index}");
                let mut profile = DeveloperBuilder::new(&id)
                    .experience(level)
                    .capacity(capacity)
                    .contributions(contributions)
                    .build();
                if !skills.is_empty() {
                    profile.skills = skills;
                }
                let mut status = DeveloperStatus::available(&id, now);
                status.current_workload = workload;
                status.open_issues_count = workload;
                status.availability = availability;
                status.last_activity_timestamp = now - Duration::days(idle_days);
                (profile, status)
            },
        )
}

pub fn candidate_pool_strategy(
    now: DateTime<Utc>,
) -> impl Strategy<Value = Vec<(DeveloperProfile, DeveloperStatus)>> {
    (1usize..=6).prop_flat_map(move |n| {
        (0..n)
            .map(|i| candidate_strategy(i, now).boxed())
            .collect::<Vec<_>>()
    })
}
