//! Maintenance windows scheduled ahead of predicted failures

use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a maintenance window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaintenanceStatus {
    /// Waiting for `scheduled_at`
    Scheduled,
    /// In progress
    Active,
    /// Finished
    Completed,
    /// Cancelled by an operator before it started
    Cancelled,
}

impl MaintenanceStatus {
    /// Whether the window still blocks a new one for the same provider
    #[must_use]
    pub fn is_open(self) -> bool {
        matches!(self, Self::Scheduled | Self::Active)
    }
}

/// A planned maintenance period for one provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceWindow {
    /// Window id
    pub id: String,
    /// Provider id
    pub provider: String,
    /// Lifecycle status
    pub status: MaintenanceStatus,
    /// Planned start
    pub scheduled_at: DateTime<Utc>,
    /// Expected length
    #[serde(with = "humantime_serde")]
    pub duration_estimate: Duration,
    /// Prediction that caused the window
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggering_prediction_id: Option<String>,
    /// When the window was created
    pub created_at: DateTime<Utc>,
}

impl MaintenanceWindow {
    /// A window for `provider` starting at `scheduled_at`
    #[must_use]
    pub fn scheduled(
        provider: impl Into<String>,
        scheduled_at: DateTime<Utc>,
        duration_estimate: Duration,
        triggering_prediction_id: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            provider: provider.into(),
            status: MaintenanceStatus::Scheduled,
            scheduled_at,
            duration_estimate,
            triggering_prediction_id,
            created_at: Utc::now(),
        }
    }

    /// Planned end
    #[must_use]
    pub fn ends_at(&self) -> DateTime<Utc> {
        self.scheduled_at
            + ChronoDuration::from_std(self.duration_estimate).unwrap_or_else(|_| ChronoDuration::hours(1))
    }

    /// Move along `scheduled → active → completed` as of `now`
    ///
    /// Returns the previous status if it changed.
    pub fn advance(&mut self, now: DateTime<Utc>) -> Option<MaintenanceStatus> {
        let before = self.status;
        if self.status == MaintenanceStatus::Scheduled && self.scheduled_at <= now {
            self.status = MaintenanceStatus::Active;
        }
        if self.status == MaintenanceStatus::Active && self.ends_at() <= now {
            self.status = MaintenanceStatus::Completed;
        }
        (before != self.status).then_some(before)
    }

    /// Cancel a window that has not started
    ///
    /// Returns `false` if the window is no longer scheduled.
    pub fn cancel(&mut self) -> bool {
        if self.status == MaintenanceStatus::Scheduled {
            self.status = MaintenanceStatus::Cancelled;
            true
        } else {
            false
        }
    }
}

/// Query over maintenance windows; every set field must match
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceFilter {
    /// Provider id
    pub provider: Option<String>,
    /// Lifecycle status
    pub status: Option<MaintenanceStatus>,
    /// Maximum windows to return
    pub limit: Option<usize>,
}

impl MaintenanceFilter {
    pub(super) fn matches(&self, window: &MaintenanceWindow) -> bool {
        self.provider.as_ref().is_none_or(|p| *p == window.provider)
            && self.status.is_none_or(|s| s == window.status)
    }
}
