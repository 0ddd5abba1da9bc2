//! Developer status upkeep.
//!
//! [`StatusRefresher`] reconciles each developer's workload counters with the
//! active assignments in the store and flips availability at capacity.
//! [`DeveloperStatusHandler`] applies status updates from the queue, ignoring
//! any that are older than what is stored.

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use super::context::TriageContext;
use crate::error::{Result, TriageError};
use crate::messaging::{HandlerError, InboundMessage, MessageHandler, TriageMessage};
use crate::models::{Availability, DeveloperProfile, DeveloperStatus};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusRefreshSummary {
    pub refreshed: usize,
    pub changed: usize,
    pub published: usize,
    /// (developer id, error) for every developer that could not be refreshed
    pub errors: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct StatusRefresher {
    ctx: TriageContext,
}

impl StatusRefresher {
    pub fn new(ctx: TriageContext) -> Self {
        Self { ctx }
    }

    #[instrument(skip(self), fields(run_id = %self.ctx.run_id))]
    pub async fn refresh_all(&self) -> Result<StatusRefreshSummary> {
        let developers = self.ctx.store.list_developers().await?;
        let mut summary = StatusRefreshSummary::default();

        for developer in &developers {
            match self.refresh(developer).await {
                Ok(Some(status)) => {
                    summary.refreshed += 1;
                    summary.changed += 1;
                    if self.ctx.publisher.publish_developer_status_update(&status).await {
                        summary.published += 1;
                    }
                }
                Ok(None) => summary.refreshed += 1,
                Err(e) => {
                    warn!(developer_id = %developer.id, error = %e, "Status refresh failed");
                    summary.errors.push((developer.id.clone(), e.to_string()));
                }
            }
        }

        info!(
            refreshed = summary.refreshed,
            changed = summary.changed,
            errors = summary.errors.len(),
            "Developer statuses refreshed"
        );
        Ok(summary)
    }

    /// Returns the new status when anything changed
    async fn refresh(&self, developer: &DeveloperProfile) -> Result<Option<DeveloperStatus>> {
        let now = self.ctx.now();
        let stored = self.ctx.store.get_developer_status(&developer.id).await?;
        let current = stored
            .clone()
            .unwrap_or_else(|| DeveloperStatus::available(&developer.id, now));

        let active = self
            .ctx
            .store
            .assignments_for_developer(&developer.id)
            .await?
            .iter()
            .filter(|a| a.is_active())
            .count();
        let active = i32::try_from(active).unwrap_or(i32::MAX);

        let mut next = current.clone();
        next.current_workload = active;
        next.open_issues_count = active;
        next.availability = availability_at(current.availability, active, developer.max_capacity);

        if stored.is_some() && next == current {
            debug!(developer_id = %developer.id, "Status unchanged");
            return Ok(None);
        }
        next.last_updated = now;
        self.ctx.store.upsert_developer_status(&next).await?;
        Ok(Some(next))
    }
}

/// Busy at or above capacity; back to Available once below it. Manual states
/// (Unavailable, FocusTime) are never overridden.
fn availability_at(current: Availability, workload: i32, max_capacity: u32) -> Availability {
    let at_capacity = i64::from(workload) >= i64::from(max_capacity);
    match current {
        Availability::Available if at_capacity => Availability::Busy,
        Availability::Busy if !at_capacity => Availability::Available,
        other => other,
    }
}

/// Consumes `developer_status_update` messages
#[derive(Debug, Clone)]
pub struct DeveloperStatusHandler {
    ctx: TriageContext,
}

impl DeveloperStatusHandler {
    pub fn new(ctx: TriageContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl MessageHandler for DeveloperStatusHandler {
    async fn handle(&self, message: &InboundMessage) -> std::result::Result<(), HandlerError> {
        let TriageMessage::DeveloperStatusUpdate(update) = &message.message else {
            return Err(HandlerError::permanent(format!(
                "status handler cannot process {}",
                message.message_type
            )));
        };

        let stored = self
            .ctx
            .store
            .get_developer_status(&update.developer_id)
            .await
            .map_err(|e| HandlerError::from(TriageError::from(e)))?;
        if stored
            .as_ref()
            .is_some_and(|s| s.last_updated > update.last_updated)
        {
            debug!(developer_id = %update.developer_id, "Stale status update ignored");
            return Ok(());
        }

        self.ctx
            .store
            .upsert_developer_status(update)
            .await
            .map_err(|e| HandlerError::from(TriageError::from(e)))
    }
}
