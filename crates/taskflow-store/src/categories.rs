use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use taskflow_core::ids::{CategoryId, UserId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

pub const DEFAULT_COLOR: &str = "#f472b6";
pub const DEFAULT_ICON: &str = "📁";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CategoryRow {
    pub id: CategoryId,
    pub user_id: UserId,
    pub name: String,
    pub color: String,
    pub icon: String,
    pub created_at: String,
}

/// Listing shape: category plus task counts.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CategoryWithCounts {
    #[serde(flatten)]
    pub category: CategoryRow,
    pub total: i64,
    pub active: i64,
}

pub struct CategoryRepo {
    db: Database,
}

impl CategoryRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self), fields(user_id = %user_id, name))]
    pub fn create(
        &self,
        user_id: &UserId,
        name: &str,
        color: Option<&str>,
        icon: Option<&str>,
    ) -> Result<CategoryRow, StoreError> {
        let id = CategoryId::new();
        let now = Utc::now().to_rfc3339();
        let color = color.unwrap_or(DEFAULT_COLOR);
        let icon = icon.unwrap_or(DEFAULT_ICON);

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO categories (id, user_id, name, color, icon, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![id.as_str(), user_id.as_str(), name, color, icon, now],
            )?;

            Ok(CategoryRow {
                id: id.clone(),
                user_id: user_id.clone(),
                name: name.to_string(),
                color: color.to_string(),
                icon: icon.to_string(),
                created_at: now.clone(),
            })
        })
    }

    /// Get a category scoped to its owner.
    #[instrument(skip(self), fields(user_id = %user_id, category_id = %id))]
    pub fn get(&self, user_id: &UserId, id: &CategoryId) -> Result<CategoryRow, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, name, color, icon, created_at
                 FROM categories WHERE id = ?1 AND user_id = ?2",
            )?;
            let mut rows = stmt.query([id.as_str(), user_id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_category(row),
                None => Err(StoreError::NotFound(format!("category {id}"))),
            }
        })
    }

    /// List a user's categories with total and active task counts, ordered
    /// by creation time.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn list(&self, user_id: &UserId) -> Result<Vec<CategoryWithCounts>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.user_id, c.name, c.color, c.icon, c.created_at,
                        COUNT(t.id),
                        COALESCE(SUM(CASE WHEN t.completed = 0 THEN 1 ELSE 0 END), 0)
                 FROM categories c
                 LEFT JOIN tasks t ON t.category_id = c.id
                 WHERE c.user_id = ?1
                 GROUP BY c.id
                 ORDER BY c.created_at ASC",
            )?;
            let mut rows = stmt.query([user_id.as_str()])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(CategoryWithCounts {
                    category: row_to_category(row)?,
                    total: row_helpers::get(row, 6, "categories", "total")?,
                    active: row_helpers::get(row, 7, "categories", "active")?,
                });
            }
            Ok(results)
        })
    }

    /// Partial update; absent fields keep their prior values.
    #[instrument(skip(self), fields(user_id = %user_id, category_id = %id))]
    pub fn update(
        &self,
        user_id: &UserId,
        id: &CategoryId,
        name: Option<&str>,
        color: Option<&str>,
        icon: Option<&str>,
    ) -> Result<CategoryRow, StoreError> {
        self.db.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE categories SET
                    name = COALESCE(?1, name),
                    color = COALESCE(?2, color),
                    icon = COALESCE(?3, icon)
                 WHERE id = ?4 AND user_id = ?5",
                rusqlite::params![name, color, icon, id.as_str(), user_id.as_str()],
            )?;
            if n == 0 {
                return Err(StoreError::NotFound(format!("category {id}")));
            }
            let mut stmt = conn.prepare(
                "SELECT id, user_id, name, color, icon, created_at
                 FROM categories WHERE id = ?1",
            )?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_category(row),
                None => Err(StoreError::NotFound(format!("category {id}"))),
            }
        })
    }

    /// Delete a category. The set-null foreign key clears category_id on
    /// referencing tasks without deleting them.
    #[instrument(skip(self), fields(user_id = %user_id, category_id = %id))]
    pub fn delete(&self, user_id: &UserId, id: &CategoryId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let n = conn.execute(
                "DELETE FROM categories WHERE id = ?1 AND user_id = ?2",
                [id.as_str(), user_id.as_str()],
            )?;
            if n == 0 {
                return Err(StoreError::NotFound(format!("category {id}")));
            }
            Ok(())
        })
    }
}

fn row_to_category(row: &rusqlite::Row<'_>) -> Result<CategoryRow, StoreError> {
    Ok(CategoryRow {
        id: CategoryId::from_raw(row_helpers::get::<String>(row, 0, "categories", "id")?),
        user_id: UserId::from_raw(row_helpers::get::<String>(row, 1, "categories", "user_id")?),
        name: row_helpers::get(row, 2, "categories", "name")?,
        color: row_helpers::get(row, 3, "categories", "color")?,
        icon: row_helpers::get(row, 4, "categories", "icon")?,
        created_at: row_helpers::get(row, 5, "categories", "created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::UserRepo;

    fn setup() -> (Database, UserId) {
        let db = Database::in_memory().unwrap();
        let users = UserRepo::new(db.clone());
        let user = users.create("ada", "ada@example.com", None).unwrap();
        (db, user.id)
    }

    #[test]
    fn create_with_defaults() {
        let (db, uid) = setup();
        let repo = CategoryRepo::new(db);
        let cat = repo.create(&uid, "Work", None, None).unwrap();
        assert!(cat.id.as_str().starts_with("cat_"));
        assert_eq!(cat.color, DEFAULT_COLOR);
        assert_eq!(cat.icon, DEFAULT_ICON);
    }

    #[test]
    fn list_ordered_by_creation() {
        let (db, uid) = setup();
        let repo = CategoryRepo::new(db);
        repo.create(&uid, "First", None, None).unwrap();
        repo.create(&uid, "Second", None, None).unwrap();
        let all = repo.list(&uid).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].category.name, "First");
        assert_eq!(all[0].total, 0);
        assert_eq!(all[0].active, 0);
    }

    #[test]
    fn update_keeps_absent_fields() {
        let (db, uid) = setup();
        let repo = CategoryRepo::new(db);
        let cat = repo.create(&uid, "Work", Some("#123456"), None).unwrap();
        let updated = repo.update(&uid, &cat.id, None, None, Some("🗂")).unwrap();
        assert_eq!(updated.name, "Work");
        assert_eq!(updated.color, "#123456");
        assert_eq!(updated.icon, "🗂");
    }

    #[test]
    fn scoped_to_owner() {
        let (db, uid) = setup();
        let users = UserRepo::new(db.clone());
        let other = users.create("grace", "grace@example.com", None).unwrap();
        let repo = CategoryRepo::new(db);
        let cat = repo.create(&uid, "Work", None, None).unwrap();

        assert!(matches!(
            repo.get(&other.id, &cat.id),
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            repo.delete(&other.id, &cat.id),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn delete_missing_fails() {
        let (db, uid) = setup();
        let repo = CategoryRepo::new(db);
        let result = repo.delete(&uid, &CategoryId::from_raw("cat_nope"));
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }
}
