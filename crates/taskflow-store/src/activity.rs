use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use taskflow_core::ids::{ActivityId, TaskId, UserId};
use taskflow_core::ActivityAction;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActivityRow {
    pub id: ActivityId,
    pub user_id: UserId,
    pub task_id: Option<TaskId>,
    pub action: ActivityAction,
    pub detail: Option<String>,
    pub created_at: String,
}

/// An activity entry joined with the referenced task's current title
/// (None once the task has been deleted).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActivityWithTitle {
    #[serde(flatten)]
    pub entry: ActivityRow,
    pub task_title: Option<String>,
}

/// Append-only audit trail. Entries are never mutated or deleted here; they
/// accumulate for the lifetime of the user.
pub struct ActivityRepo {
    db: Database,
}

impl ActivityRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, detail), fields(user_id = %user_id, action = %action))]
    pub fn append(
        &self,
        user_id: &UserId,
        task_id: Option<&TaskId>,
        action: ActivityAction,
        detail: Option<&str>,
    ) -> Result<ActivityRow, StoreError> {
        let id = ActivityId::new();
        let now = Utc::now().to_rfc3339();

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO activity_log (id, user_id, task_id, action, detail, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    id.as_str(),
                    user_id.as_str(),
                    task_id.map(|t| t.as_str()),
                    action.to_string(),
                    detail,
                    now,
                ],
            )?;

            Ok(ActivityRow {
                id: id.clone(),
                user_id: user_id.clone(),
                task_id: task_id.cloned(),
                action,
                detail: detail.map(str::to_string),
                created_at: now.clone(),
            })
        })
    }

    /// The most recent entries for a user, newest first, each joined with
    /// the referenced task's current title where the task still exists.
    #[instrument(skip(self), fields(user_id = %user_id, limit))]
    pub fn recent_for(
        &self,
        user_id: &UserId,
        limit: u32,
    ) -> Result<Vec<ActivityWithTitle>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT a.id, a.user_id, a.task_id, a.action, a.detail, a.created_at, t.title
                 FROM activity_log a
                 LEFT JOIN tasks t ON t.id = a.task_id
                 WHERE a.user_id = ?1
                 ORDER BY a.created_at DESC, a.id DESC
                 LIMIT ?2",
            )?;
            let mut rows = stmt.query(rusqlite::params![user_id.as_str(), limit])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                let action_str: String = row_helpers::get(row, 3, "activity_log", "action")?;
                results.push(ActivityWithTitle {
                    entry: ActivityRow {
                        id: ActivityId::from_raw(row_helpers::get::<String>(
                            row, 0, "activity_log", "id",
                        )?),
                        user_id: UserId::from_raw(row_helpers::get::<String>(
                            row, 1, "activity_log", "user_id",
                        )?),
                        task_id: row_helpers::get_opt::<String>(row, 2, "activity_log", "task_id")?
                            .map(TaskId::from_raw),
                        action: row_helpers::parse_enum(&action_str, "activity_log", "action")?,
                        detail: row_helpers::get_opt(row, 4, "activity_log", "detail")?,
                        created_at: row_helpers::get(row, 5, "activity_log", "created_at")?,
                    },
                    task_title: row_helpers::get_opt(row, 6, "tasks", "title")?,
                });
            }
            Ok(results)
        })
    }
}
