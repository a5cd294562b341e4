use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use taskflow_core::ids::{CategoryId, TaskId, UserId};
use taskflow_core::Priority;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Headline counters for a user's task set.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Totals {
    pub total: i64,
    pub active: i64,
    pub completed: i64,
    pub overdue: i64,
    pub due_today: i64,
    /// Percentage of tasks completed, one decimal place. 0 when there are
    /// no tasks.
    pub rate: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PriorityRollup {
    pub priority: Priority,
    pub total: i64,
    pub done: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CategoryRollup {
    pub id: CategoryId,
    pub name: String,
    pub color: String,
    pub icon: String,
    pub total: i64,
    pub done: i64,
}

/// Completed-task count for one calendar day. Days without completions are
/// omitted, not zero-filled.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub day: String,
    pub count: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpcomingTask {
    pub id: TaskId,
    pub title: String,
    pub due_date: String,
    pub priority: Priority,
}

/// Read-only rollups over the task set. Recomputed on every call; nothing
/// here is cached or materialized.
pub struct AnalyticsRepo {
    db: Database,
}

impl AnalyticsRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn totals(&self, user_id: &UserId) -> Result<Totals, StoreError> {
        let now = Utc::now();
        let now_ts = now.to_rfc3339();
        let today = now.date_naive().to_string();

        self.db.with_conn(|conn| {
            let (total, completed, active, overdue, due_today) = conn.query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(completed), 0),
                        COALESCE(SUM(CASE WHEN completed = 0 THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(CASE WHEN completed = 0 AND due_date IS NOT NULL
                                           AND due_date < ?2 THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(CASE WHEN completed = 0 AND due_date = ?3
                                          THEN 1 ELSE 0 END), 0)
                 FROM tasks WHERE user_id = ?1",
                rusqlite::params![user_id.as_str(), now_ts, today],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                },
            )?;

            let rate = if total == 0 {
                0.0
            } else {
                (1000.0 * completed as f64 / total as f64).round() / 10.0
            };

            Ok(Totals {
                total,
                active,
                completed,
                overdue,
                due_today,
                rate,
            })
        })
    }

    /// Total and completed counts per priority value, for the priorities
    /// that have at least one task.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn by_priority(&self, user_id: &UserId) -> Result<Vec<PriorityRollup>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT priority, COUNT(*), COALESCE(SUM(completed), 0)
                 FROM tasks WHERE user_id = ?1
                 GROUP BY priority",
            )?;
            let mut rows = stmt.query([user_id.as_str()])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                let raw: String = row_helpers::get(row, 0, "tasks", "priority")?;
                results.push(PriorityRollup {
                    priority: row_helpers::parse_enum(&raw, "tasks", "priority")?,
                    total: row_helpers::get(row, 1, "tasks", "total")?,
                    done: row_helpers::get(row, 2, "tasks", "done")?,
                });
            }
            Ok(results)
        })
    }

    /// Total and completed counts per category, largest first. Categories
    /// without tasks appear with zero counts; uncategorized tasks appear
    /// nowhere here.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn by_category(&self, user_id: &UserId) -> Result<Vec<CategoryRollup>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.name, c.color, c.icon,
                        COUNT(t.id), COALESCE(SUM(t.completed), 0)
                 FROM categories c
                 LEFT JOIN tasks t ON t.category_id = c.id AND t.user_id = ?1
                 WHERE c.user_id = ?1
                 GROUP BY c.id
                 ORDER BY COUNT(t.id) DESC",
            )?;
            let mut rows = stmt.query([user_id.as_str()])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(CategoryRollup {
                    id: CategoryId::from_raw(row_helpers::get::<String>(
                        row, 0, "categories", "id",
                    )?),
                    name: row_helpers::get(row, 1, "categories", "name")?,
                    color: row_helpers::get(row, 2, "categories", "color")?,
                    icon: row_helpers::get(row, 3, "categories", "icon")?,
                    total: row_helpers::get(row, 4, "categories", "total")?,
                    done: row_helpers::get(row, 5, "categories", "done")?,
                });
            }
            Ok(results)
        })
    }

    /// Per-day completion counts over the trailing 14 days, ascending by day.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn completion_trend(&self, user_id: &UserId) -> Result<Vec<TrendPoint>, StoreError> {
        let cutoff = (Utc::now() - Duration::days(14)).to_rfc3339();
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT substr(completed_at, 1, 10) AS day, COUNT(*)
                 FROM tasks
                 WHERE user_id = ?1 AND completed = 1 AND completed_at >= ?2
                 GROUP BY day
                 ORDER BY day ASC",
            )?;
            let mut rows = stmt.query(rusqlite::params![user_id.as_str(), cutoff])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(TrendPoint {
                    day: row_helpers::get(row, 0, "tasks", "completed_at")?,
                    count: row_helpers::get(row, 1, "tasks", "count")?,
                });
            }
            Ok(results)
        })
    }

    /// The five nearest not-yet-completed tasks due today or later.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn upcoming(&self, user_id: &UserId) -> Result<Vec<UpcomingTask>, StoreError> {
        let today = Utc::now().date_naive().to_string();
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, title, due_date, priority
                 FROM tasks
                 WHERE user_id = ?1 AND completed = 0 AND due_date >= ?2
                 ORDER BY due_date ASC, created_at DESC
                 LIMIT 5",
            )?;
            let mut rows = stmt.query(rusqlite::params![user_id.as_str(), today])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_upcoming(row)?);
            }
            Ok(results)
        })
    }
}

fn row_to_upcoming(row: &rusqlite::Row<'_>) -> Result<UpcomingTask, StoreError> {
    let priority_str: String = row_helpers::get(row, 3, "tasks", "priority")?;
    Ok(UpcomingTask {
        id: TaskId::from_raw(row_helpers::get::<String>(row, 0, "tasks", "id")?),
        title: row_helpers::get(row, 1, "tasks", "title")?,
        due_date: row_helpers::get(row, 2, "tasks", "due_date")?,
        priority: row_helpers::parse_enum(&priority_str, "tasks", "priority")?,
    })
}

// Used by tests to place completions on specific days.
#[cfg(test)]
fn backdate_completion(
    conn: &rusqlite::Connection,
    task_id: &TaskId,
    completed_at: &str,
) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE tasks SET completed = 1, completed_at = ?1 WHERE id = ?2",
        rusqlite::params![completed_at, task_id.as_str()],
    )?;
    Ok(())
}
