use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use taskflow_core::ids::UserId;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserRow {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub avatar_url: Option<String>,
    pub created_at: String,
}

/// Identity is owned by an upstream collaborator; this repo only keeps the
/// ownership boundary every other table hangs off, plus the cascade on delete.
pub struct UserRepo {
    db: Database,
}

impl UserRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a user. Duplicate username or email surfaces as Conflict.
    #[instrument(skip(self), fields(username))]
    pub fn create(
        &self,
        username: &str,
        email: &str,
        avatar_url: Option<&str>,
    ) -> Result<UserRow, StoreError> {
        let id = UserId::new();
        let now = Utc::now().to_rfc3339();

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, email, avatar_url, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id.as_str(), username, email, avatar_url, now],
            )?;

            Ok(UserRow {
                id: id.clone(),
                username: username.to_string(),
                email: email.to_string(),
                avatar_url: avatar_url.map(str::to_string),
                created_at: now.clone(),
            })
        })
    }

    /// Get a user by ID.
    #[instrument(skip(self), fields(user_id = %id))]
    pub fn get(&self, id: &UserId) -> Result<UserRow, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, username, email, avatar_url, created_at FROM users WHERE id = ?1",
            )?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_user(row),
                None => Err(StoreError::NotFound(format!("user {id}"))),
            }
        })
    }

    /// Delete a user. Foreign keys cascade to categories, tasks, and
    /// activity entries.
    #[instrument(skip(self), fields(user_id = %id))]
    pub fn delete(&self, id: &UserId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let n = conn.execute("DELETE FROM users WHERE id = ?1", [id.as_str()])?;
            if n == 0 {
                return Err(StoreError::NotFound(format!("user {id}")));
            }
            Ok(())
        })
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> Result<UserRow, StoreError> {
    Ok(UserRow {
        id: UserId::from_raw(row_helpers::get::<String>(row, 0, "users", "id")?),
        username: row_helpers::get(row, 1, "users", "username")?,
        email: row_helpers::get(row, 2, "users", "email")?,
        avatar_url: row_helpers::get_opt(row, 3, "users", "avatar_url")?,
        created_at: row_helpers::get(row, 4, "users", "created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::in_memory().unwrap()
    }

    #[test]
    fn create_user() {
        let repo = UserRepo::new(test_db());
        let user = repo.create("ada", "ada@example.com", None).unwrap();
        assert!(user.id.as_str().starts_with("usr_"));
        assert_eq!(user.username, "ada");
    }

    #[test]
    fn get_user() {
        let repo = UserRepo::new(test_db());
        let user = repo.create("ada", "ada@example.com", Some("https://e/a.png")).unwrap();
        let fetched = repo.get(&user.id).unwrap();
        assert_eq!(fetched.email, "ada@example.com");
        assert_eq!(fetched.avatar_url.as_deref(), Some("https://e/a.png"));
    }

    #[test]
    fn get_nonexistent_fails() {
        let repo = UserRepo::new(test_db());
        let result = repo.get(&UserId::from_raw("usr_nonexistent"));
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[test]
    fn duplicate_username_is_conflict() {
        let repo = UserRepo::new(test_db());
        repo.create("ada", "ada@example.com", None).unwrap();
        let result = repo.create("ada", "other@example.com", None);
        assert!(matches!(result, Err(StoreError::Conflict(_))));
    }

    #[test]
    fn duplicate_email_is_conflict() {
        let repo = UserRepo::new(test_db());
        repo.create("ada", "ada@example.com", None).unwrap();
        let result = repo.create("grace", "ada@example.com", None);
        assert!(matches!(result, Err(StoreError::Conflict(_))));
    }

    #[test]
    fn delete_user() {
        let repo = UserRepo::new(test_db());
        let user = repo.create("ada", "ada@example.com", None).unwrap();
        repo.delete(&user.id).unwrap();
        assert!(repo.get(&user.id).is_err());
    }

    #[test]
    fn delete_nonexistent_fails() {
        let repo = UserRepo::new(test_db());
        let result = repo.delete(&UserId::from_raw("usr_nope"));
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }
}
