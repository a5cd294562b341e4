use chrono::{NaiveDate, Utc};
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use taskflow_core::ids::{CategoryId, TaskId, UserId};
use taskflow_core::task::{normalize_tags, Attachment, AttachmentChange, NewTask, TaskPatch,
    MAX_TITLE_LEN};
use taskflow_core::{Priority, TaskQuery};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskRow {
    pub id: TaskId,
    pub user_id: UserId,
    pub category_id: Option<CategoryId>,
    pub title: String,
    pub description: Option<String>,
    pub completed: bool,
    pub priority: Priority,
    pub due_date: Option<NaiveDate>,
    pub position: i64,
    pub tags: Vec<String>,
    pub attachment: Option<Attachment>,
    pub completed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Display fields joined from the task's category.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CategoryRef {
    pub name: String,
    pub color: String,
    pub icon: String,
}

/// A task enriched with its category's display fields (None if uncategorized).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskDetail {
    #[serde(flatten)]
    pub task: TaskRow,
    pub category: Option<CategoryRef>,
}

/// One page of a task listing plus the filter-wide total.
#[derive(Clone, Debug, Serialize)]
pub struct TaskPage {
    pub tasks: Vec<TaskDetail>,
    pub total: i64,
}

const DETAIL_COLUMNS: &str = "t.id, t.user_id, t.category_id, t.title, t.description, \
     t.completed, t.priority, t.due_date, t.position, t.tags, \
     t.file_url, t.file_name, t.file_type, t.file_size, \
     t.completed_at, t.created_at, t.updated_at, \
     c.name, c.color, c.icon";

pub struct TaskRepo {
    db: Database,
}

impl TaskRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a task. Assigns id, timestamps, and position (current per-user
    /// maximum plus one). Tags are normalized before storage.
    #[instrument(skip(self, task), fields(user_id = %user_id))]
    pub fn insert(&self, user_id: &UserId, task: &NewTask) -> Result<TaskRow, StoreError> {
        check_title(&task.title)?;

        let id = TaskId::new();
        let now = Utc::now().to_rfc3339();
        let tags = normalize_tags(&task.tags);
        let completed_at = task.completed.then(|| now.clone());

        self.db.with_conn(|conn| {
            let position: i64 = conn.query_row(
                "SELECT COALESCE(MAX(position), 0) + 1 FROM tasks WHERE user_id = ?1",
                [user_id.as_str()],
                |row| row.get(0),
            )?;

            conn.execute(
                "INSERT INTO tasks
                    (id, user_id, category_id, title, description, completed, priority,
                     due_date, position, tags, file_url, file_name, file_type, file_size,
                     completed_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                rusqlite::params![
                    id.as_str(),
                    user_id.as_str(),
                    task.category_id.as_ref().map(|c| c.as_str()),
                    task.title,
                    task.description,
                    task.completed,
                    task.priority.to_string(),
                    task.due_date.map(|d| d.to_string()),
                    position,
                    serde_json::to_string(&tags)?,
                    task.attachment.as_ref().map(|a| a.url.as_str()),
                    task.attachment.as_ref().map(|a| a.name.as_str()),
                    task.attachment.as_ref().map(|a| a.mime_type.as_str()),
                    task.attachment.as_ref().map(|a| a.size),
                    completed_at,
                    now,
                    now,
                ],
            )?;

            Ok(TaskRow {
                id: id.clone(),
                user_id: user_id.clone(),
                category_id: task.category_id.clone(),
                title: task.title.clone(),
                description: task.description.clone(),
                completed: task.completed,
                priority: task.priority,
                due_date: task.due_date,
                position,
                tags: tags.clone(),
                attachment: task.attachment.clone(),
                completed_at: completed_at.clone(),
                created_at: now.clone(),
                updated_at: now.clone(),
            })
        })
    }

    /// Get a task with its category display fields, scoped to the owner.
    #[instrument(skip(self), fields(user_id = %user_id, task_id = %id))]
    pub fn get(&self, user_id: &UserId, id: &TaskId) -> Result<TaskDetail, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {DETAIL_COLUMNS}
                 FROM tasks t LEFT JOIN categories c ON c.id = t.category_id
                 WHERE t.id = ?1 AND t.user_id = ?2",
            ))?;
            let mut rows = stmt.query([id.as_str(), user_id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_detail(row),
                None => Err(StoreError::NotFound(format!("task {id}"))),
            }
        })
    }

    /// List one page of tasks matching the query, plus the total count of
    /// matches computed independently of pagination.
    #[instrument(skip(self, query), fields(user_id = %user_id))]
    pub fn list(&self, user_id: &UserId, query: &TaskQuery) -> Result<TaskPage, StoreError> {
        let (conds, params) = build_filter(user_id, query);
        let where_clause = conds.join(" AND ");

        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {DETAIL_COLUMNS}
                 FROM tasks t LEFT JOIN categories c ON c.id = t.category_id
                 WHERE {where_clause}
                 ORDER BY t.{} {}, t.created_at DESC
                 LIMIT ? OFFSET ?",
                query.sort.column(),
                query.order.keyword(),
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut page_params = params.clone();
            page_params.push(Value::Integer(query.clamped_page_size()));
            page_params.push(Value::Integer(query.offset()));
            let mut rows = stmt.query(rusqlite::params_from_iter(page_params.iter()))?;
            let mut tasks = Vec::new();
            while let Some(row) = rows.next()? {
                tasks.push(row_to_detail(row)?);
            }

            let total: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM tasks t WHERE {where_clause}"),
                rusqlite::params_from_iter(params.iter()),
                |row| row.get(0),
            )?;

            Ok(TaskPage { tasks, total })
        })
    }

    /// Apply a partial update. Unspecified fields keep their prior values;
    /// updated_at always advances. The attachment change, if any, must have
    /// had its blob side effects resolved by the caller already.
    #[instrument(skip(self, patch), fields(user_id = %user_id, task_id = %id))]
    pub fn update(
        &self,
        user_id: &UserId,
        id: &TaskId,
        patch: &TaskPatch,
    ) -> Result<TaskRow, StoreError> {
        if let Some(title) = &patch.title {
            check_title(title)?;
        }
        let now = Utc::now().to_rfc3339();

        self.db.with_conn(|conn| {
            let old = get_row(conn, user_id, id)?;

            let completed = patch.completed.unwrap_or(old.completed);
            let completed_at = match (old.completed, completed) {
                (false, true) => Some(now.clone()),
                (_, false) => None,
                (true, true) => old.completed_at.clone(),
            };
            let title = patch.title.clone().unwrap_or(old.title);
            let description = match &patch.description {
                Some(d) => d.clone(),
                None => old.description,
            };
            let priority = patch.priority.unwrap_or(old.priority);
            let due_date = match patch.due_date {
                Some(d) => d,
                None => old.due_date,
            };
            let category_id = match &patch.category_id {
                Some(c) => c.clone(),
                None => old.category_id,
            };
            let position = patch.position.unwrap_or(old.position);
            let tags = match &patch.tags {
                Some(t) => normalize_tags(t),
                None => old.tags,
            };
            let attachment = match &patch.attachment {
                Some(AttachmentChange::Set(a)) => Some(a.clone()),
                Some(AttachmentChange::Clear) => None,
                None => old.attachment,
            };

            conn.execute(
                "UPDATE tasks SET
                    category_id = ?1, title = ?2, description = ?3, priority = ?4,
                    due_date = ?5, position = ?6, completed = ?7, completed_at = ?8,
                    tags = ?9, file_url = ?10, file_name = ?11, file_type = ?12,
                    file_size = ?13, updated_at = ?14
                 WHERE id = ?15 AND user_id = ?16",
                rusqlite::params![
                    category_id.as_ref().map(|c| c.as_str()),
                    title,
                    description,
                    priority.to_string(),
                    due_date.map(|d| d.to_string()),
                    position,
                    completed,
                    completed_at,
                    serde_json::to_string(&tags)?,
                    attachment.as_ref().map(|a| a.url.as_str()),
                    attachment.as_ref().map(|a| a.name.as_str()),
                    attachment.as_ref().map(|a| a.mime_type.as_str()),
                    attachment.as_ref().map(|a| a.size),
                    now,
                    id.as_str(),
                    user_id.as_str(),
                ],
            )?;

            Ok(TaskRow {
                id: id.clone(),
                user_id: user_id.clone(),
                category_id,
                title,
                description,
                completed,
                priority,
                due_date,
                position,
                tags,
                attachment,
                completed_at,
                created_at: old.created_at,
                updated_at: now.clone(),
            })
        })
    }

    /// Flip the completed flag. Completing stamps completed_at with the
    /// mutation time; reopening clears it.
    #[instrument(skip(self), fields(user_id = %user_id, task_id = %id))]
    pub fn toggle(&self, user_id: &UserId, id: &TaskId) -> Result<TaskRow, StoreError> {
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE tasks SET
                    completed = NOT completed,
                    completed_at = CASE WHEN NOT completed THEN ?1 ELSE NULL END,
                    updated_at = ?1
                 WHERE id = ?2 AND user_id = ?3",
                rusqlite::params![now, id.as_str(), user_id.as_str()],
            )?;
            if n == 0 {
                return Err(StoreError::NotFound(format!("task {id}")));
            }
            get_row(conn, user_id, id)
        })
    }

    /// Remove the record. Attachment blob cleanup is the caller's job and
    /// must have been attempted beforehand.
    #[instrument(skip(self), fields(user_id = %user_id, task_id = %id))]
    pub fn delete(&self, user_id: &UserId, id: &TaskId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let n = conn.execute(
                "DELETE FROM tasks WHERE id = ?1 AND user_id = ?2",
                [id.as_str(), user_id.as_str()],
            )?;
            if n == 0 {
                return Err(StoreError::NotFound(format!("task {id}")));
            }
            Ok(())
        })
    }

    /// All attachment URLs owned by a user. Used for blob cleanup ahead of a
    /// cascading user delete.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn attachment_urls(&self, user_id: &UserId) -> Result<Vec<String>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT file_url FROM tasks WHERE user_id = ?1 AND file_url IS NOT NULL",
            )?;
            let urls = stmt
                .query_map([user_id.as_str()], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(urls)
        })
    }
}

fn check_title(title: &str) -> Result<(), StoreError> {
    if title.trim().is_empty() {
        return Err(StoreError::Invalid("title must not be empty".to_string()));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(StoreError::Invalid(format!(
            "title exceeds {MAX_TITLE_LEN} characters"
        )));
    }
    Ok(())
}

/// Translate the declarative query into WHERE fragments plus bind values.
/// Column names come only from fixed strings and the sort allow-list.
fn build_filter(user_id: &UserId, query: &TaskQuery) -> (Vec<String>, Vec<Value>) {
    let mut conds = vec!["t.user_id = ?".to_string()];
    let mut params = vec![Value::Text(user_id.as_str().to_string())];

    if let Some(search) = query.search.as_deref().filter(|s| !s.is_empty()) {
        let pattern = format!("%{}%", row_helpers::escape_like(search));
        conds.push(
            "(t.title LIKE ? ESCAPE '\\' OR t.description LIKE ? ESCAPE '\\')".to_string(),
        );
        params.push(Value::Text(pattern.clone()));
        params.push(Value::Text(pattern));
    }
    if let Some(priority) = query.priority {
        conds.push("t.priority = ?".to_string());
        params.push(Value::Text(priority.to_string()));
    }
    if let Some(completed) = query.completed {
        conds.push("t.completed = ?".to_string());
        params.push(Value::Integer(completed as i64));
    }
    if let Some(category_id) = &query.category_id {
        conds.push("t.category_id = ?".to_string());
        params.push(Value::Text(category_id.as_str().to_string()));
    }
    if let Some(tag) = query.tag.as_deref().filter(|t| !t.is_empty()) {
        conds.push(
            "EXISTS (SELECT 1 FROM json_each(t.tags) WHERE json_each.value = ?)".to_string(),
        );
        params.push(Value::Text(tag.to_string()));
    }
    if query.overdue {
        // A date-only due date sorts before any same-day timestamp, so a
        // task due today counts as overdue once the day has started.
        conds.push("t.due_date IS NOT NULL AND t.due_date < ? AND t.completed = 0".to_string());
        params.push(Value::Text(Utc::now().to_rfc3339()));
    }

    (conds, params)
}

fn get_row(
    conn: &rusqlite::Connection,
    user_id: &UserId,
    id: &TaskId,
) -> Result<TaskRow, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, category_id, title, description, completed, priority,
                due_date, position, tags, file_url, file_name, file_type, file_size,
                completed_at, created_at, updated_at
         FROM tasks WHERE id = ?1 AND user_id = ?2",
    )?;
    let mut rows = stmt.query([id.as_str(), user_id.as_str()])?;
    match rows.next()? {
        Some(row) => row_to_task(row),
        None => Err(StoreError::NotFound(format!("task {id}"))),
    }
}

fn row_to_task(row: &rusqlite::Row<'_>) -> Result<TaskRow, StoreError> {
    let priority_str: String = row_helpers::get(row, 6, "tasks", "priority")?;
    let due_date_str: Option<String> = row_helpers::get_opt(row, 7, "tasks", "due_date")?;
    let tags_str: String = row_helpers::get(row, 9, "tasks", "tags")?;

    let due_date = match due_date_str {
        Some(raw) => Some(raw.parse().map_err(|_| StoreError::CorruptRow {
            table: "tasks",
            column: "due_date",
            detail: format!("invalid date: {raw}"),
        })?),
        None => None,
    };

    let file_url: Option<String> = row_helpers::get_opt(row, 10, "tasks", "file_url")?;
    let file_name: Option<String> = row_helpers::get_opt(row, 11, "tasks", "file_name")?;
    let file_type: Option<String> = row_helpers::get_opt(row, 12, "tasks", "file_type")?;
    let file_size: Option<i64> = row_helpers::get_opt(row, 13, "tasks", "file_size")?;
    let attachment = match (file_url, file_name, file_type, file_size) {
        (Some(url), Some(name), Some(mime_type), Some(size)) => Some(Attachment {
            url,
            name,
            mime_type,
            size,
        }),
        (None, None, None, None) => None,
        _ => {
            return Err(StoreError::CorruptRow {
                table: "tasks",
                column: "file_url",
                detail: "partial attachment columns".to_string(),
            })
        }
    };

    Ok(TaskRow {
        id: TaskId::from_raw(row_helpers::get::<String>(row, 0, "tasks", "id")?),
        user_id: UserId::from_raw(row_helpers::get::<String>(row, 1, "tasks", "user_id")?),
        category_id: row_helpers::get_opt::<String>(row, 2, "tasks", "category_id")?
            .map(CategoryId::from_raw),
        title: row_helpers::get(row, 3, "tasks", "title")?,
        description: row_helpers::get_opt(row, 4, "tasks", "description")?,
        completed: row_helpers::get(row, 5, "tasks", "completed")?,
        priority: row_helpers::parse_enum(&priority_str, "tasks", "priority")?,
        due_date,
        position: row_helpers::get(row, 8, "tasks", "position")?,
        tags: row_helpers::parse_string_array(&tags_str, "tasks", "tags")?,
        attachment,
        completed_at: row_helpers::get_opt(row, 14, "tasks", "completed_at")?,
        created_at: row_helpers::get(row, 15, "tasks", "created_at")?,
        updated_at: row_helpers::get(row, 16, "tasks", "updated_at")?,
    })
}

fn row_to_detail(row: &rusqlite::Row<'_>) -> Result<TaskDetail, StoreError> {
    let task = row_to_task(row)?;
    let name: Option<String> = row_helpers::get_opt(row, 17, "categories", "name")?;
    let category = match name {
        Some(name) => Some(CategoryRef {
            name,
            color: row_helpers::get(row, 18, "categories", "color")?,
            icon: row_helpers::get(row, 19, "categories", "icon")?,
        }),
        None => None,
    };
    Ok(TaskDetail { task, category })
}
