use serde::Serialize;
use tracing::instrument;

use taskflow_core::ids::UserId;
use taskflow_store::activity::ActivityWithTitle;
use taskflow_store::analytics::{CategoryRollup, PriorityRollup, Totals, TrendPoint, UpcomingTask};

use crate::error::EngineError;
use crate::service::TaskService;

/// How many activity entries the dashboard shows.
const RECENT_ACTIVITY_LIMIT: u32 = 10;

/// One-call snapshot of everything the overview screen renders. Computed
/// fresh on each request from the live task set.
#[derive(Debug, Serialize)]
pub struct DashboardSnapshot {
    pub totals: Totals,
    pub by_priority: Vec<PriorityRollup>,
    pub by_category: Vec<CategoryRollup>,
    pub trend: Vec<TrendPoint>,
    pub recent_activity: Vec<ActivityWithTitle>,
    pub upcoming: Vec<UpcomingTask>,
}

impl TaskService {
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn dashboard(&self, user_id: &UserId) -> Result<DashboardSnapshot, EngineError> {
        Ok(DashboardSnapshot {
            totals: self.analytics.totals(user_id)?,
            by_priority: self.analytics.by_priority(user_id)?,
            by_category: self.analytics.by_category(user_id)?,
            trend: self.analytics.completion_trend(user_id)?,
            recent_activity: self.activity.recent_for(user_id, RECENT_ACTIVITY_LIMIT)?,
            upcoming: self.analytics.upcoming(user_id)?,
        })
    }
}
