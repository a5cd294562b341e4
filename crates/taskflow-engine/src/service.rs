use std::sync::Arc;

use tracing::{instrument, warn};

use taskflow_core::ids::{CategoryId, TaskId, UserId};
use taskflow_core::task::{AttachmentChange, NewTask, TaskPatch};
use taskflow_core::{ActivityAction, BlobStore, TaskQuery};
use taskflow_store::activity::ActivityRepo;
use taskflow_store::analytics::AnalyticsRepo;
use taskflow_store::categories::{CategoryRepo, CategoryRow, CategoryWithCounts};
use taskflow_store::tasks::{TaskDetail, TaskPage, TaskRepo, TaskRow};
use taskflow_store::users::UserRepo;
use taskflow_store::Database;

use crate::error::EngineError;
use crate::validate::{validate_attachment, validate_title};

/// The lifecycle controller: the only place a task mutation, its blob-store
/// side effects, and the activity append are combined into one operation.
pub struct TaskService {
    pub(crate) users: UserRepo,
    pub(crate) categories: CategoryRepo,
    pub(crate) tasks: TaskRepo,
    pub(crate) activity: ActivityRepo,
    pub(crate) analytics: AnalyticsRepo,
    blobs: Arc<dyn BlobStore>,
}

impl TaskService {
    pub fn new(db: Database, blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            users: UserRepo::new(db.clone()),
            categories: CategoryRepo::new(db.clone()),
            tasks: TaskRepo::new(db.clone()),
            activity: ActivityRepo::new(db.clone()),
            analytics: AnalyticsRepo::new(db),
            blobs,
        }
    }

    /// Create a task. Validation runs before any store or blob state is
    /// touched; a rejected attachment descriptor never reaches storage.
    #[instrument(skip(self, task), fields(user_id = %user_id))]
    pub fn create_task(&self, user_id: &UserId, task: &NewTask) -> Result<TaskRow, EngineError> {
        validate_title(&task.title)?;
        if let Some(attachment) = &task.attachment {
            validate_attachment(attachment)?;
        }

        let created = self.tasks.insert(user_id, task)?;
        self.log_activity(
            user_id,
            Some(&created.id),
            ActivityAction::Created,
            Some(&created.title),
        );
        Ok(created)
    }

    #[instrument(skip(self), fields(user_id = %user_id, task_id = %task_id))]
    pub fn get_task(&self, user_id: &UserId, task_id: &TaskId) -> Result<TaskDetail, EngineError> {
        Ok(self.tasks.get(user_id, task_id)?)
    }

    #[instrument(skip(self, query), fields(user_id = %user_id))]
    pub fn list_tasks(&self, user_id: &UserId, query: &TaskQuery) -> Result<TaskPage, EngineError> {
        Ok(self.tasks.list(user_id, query)?)
    }

    /// Apply a partial update. If the patch replaces or clears the
    /// attachment, the prior blob is deleted first — best-effort, so a blob
    /// store outage never blocks the record mutation.
    #[instrument(skip(self, patch), fields(user_id = %user_id, task_id = %task_id))]
    pub async fn update_task(
        &self,
        user_id: &UserId,
        task_id: &TaskId,
        patch: &TaskPatch,
    ) -> Result<TaskRow, EngineError> {
        if let Some(title) = &patch.title {
            validate_title(title)?;
        }
        if let Some(AttachmentChange::Set(attachment)) = &patch.attachment {
            validate_attachment(attachment)?;
        }

        let old = self.tasks.get(user_id, task_id)?.task;
        if patch.attachment.is_some() {
            if let Some(prior) = &old.attachment {
                self.delete_blob(&prior.url).await;
            }
        }

        let updated = self.tasks.update(user_id, task_id, patch)?;
        self.log_activity(
            user_id,
            Some(task_id),
            ActivityAction::Updated,
            Some(&updated.title),
        );
        Ok(updated)
    }

    /// Flip completion. Entering the completed state stamps completed_at and
    /// logs `completed`; leaving it clears the stamp and logs `reopened`.
    #[instrument(skip(self), fields(user_id = %user_id, task_id = %task_id))]
    pub fn toggle_task(&self, user_id: &UserId, task_id: &TaskId) -> Result<TaskRow, EngineError> {
        let toggled = self.tasks.toggle(user_id, task_id)?;
        let action = if toggled.completed {
            ActivityAction::Completed
        } else {
            ActivityAction::Reopened
        };
        self.log_activity(user_id, Some(task_id), action, None);
        Ok(toggled)
    }

    /// Delete a task. The attachment blob is released first; a failure there
    /// is recorded as a warning and the record deletion proceeds anyway.
    #[instrument(skip(self), fields(user_id = %user_id, task_id = %task_id))]
    pub async fn delete_task(&self, user_id: &UserId, task_id: &TaskId) -> Result<(), EngineError> {
        let old = self.tasks.get(user_id, task_id)?.task;
        if let Some(attachment) = &old.attachment {
            self.delete_blob(&attachment.url).await;
        }

        self.tasks.delete(user_id, task_id)?;
        self.log_activity(
            user_id,
            Some(task_id),
            ActivityAction::Deleted,
            Some(&old.title),
        );
        Ok(())
    }

    /// Delete the attachment without otherwise changing the task.
    #[instrument(skip(self), fields(user_id = %user_id, task_id = %task_id))]
    pub async fn remove_attachment(
        &self,
        user_id: &UserId,
        task_id: &TaskId,
    ) -> Result<TaskRow, EngineError> {
        let old = self.tasks.get(user_id, task_id)?.task;
        if let Some(attachment) = &old.attachment {
            self.delete_blob(&attachment.url).await;
        }

        let patch = TaskPatch {
            attachment: Some(AttachmentChange::Clear),
            ..TaskPatch::default()
        };
        let updated = self.tasks.update(user_id, task_id, &patch)?;
        self.log_activity(
            user_id,
            Some(task_id),
            ActivityAction::Updated,
            Some(&updated.title),
        );
        Ok(updated)
    }

    #[instrument(skip(self), fields(user_id = %user_id, name))]
    pub fn create_category(
        &self,
        user_id: &UserId,
        name: &str,
        color: Option<&str>,
        icon: Option<&str>,
    ) -> Result<CategoryRow, EngineError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(EngineError::Validation("name required".to_string()));
        }
        Ok(self.categories.create(user_id, name, color, icon)?)
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn list_categories(&self, user_id: &UserId) -> Result<Vec<CategoryWithCounts>, EngineError> {
        Ok(self.categories.list(user_id)?)
    }

    #[instrument(skip(self), fields(user_id = %user_id, category_id = %category_id))]
    pub fn update_category(
        &self,
        user_id: &UserId,
        category_id: &CategoryId,
        name: Option<&str>,
        color: Option<&str>,
        icon: Option<&str>,
    ) -> Result<CategoryRow, EngineError> {
        Ok(self
            .categories
            .update(user_id, category_id, name, color, icon)?)
    }

    /// Delete a category. Referencing tasks survive with their category
    /// reference cleared.
    #[instrument(skip(self), fields(user_id = %user_id, category_id = %category_id))]
    pub fn delete_category(
        &self,
        user_id: &UserId,
        category_id: &CategoryId,
    ) -> Result<(), EngineError> {
        Ok(self.categories.delete(user_id, category_id)?)
    }

    /// Delete a user and everything they own. Attachment blobs are released
    /// best-effort before the cascading record delete.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn delete_user(&self, user_id: &UserId) -> Result<(), EngineError> {
        for url in self.tasks.attachment_urls(user_id)? {
            self.delete_blob(&url).await;
        }
        Ok(self.users.delete(user_id)?)
    }

    async fn delete_blob(&self, url: &str) {
        if let Err(e) = self.blobs.delete(url).await {
            warn!(error = %e, url, "blob delete skipped");
        }
    }

    /// Activity logging never fails the mutation it describes.
    fn log_activity(
        &self,
        user_id: &UserId,
        task_id: Option<&TaskId>,
        action: ActivityAction,
        detail: Option<&str>,
    ) {
        if let Err(e) = self.activity.append(user_id, task_id, action, detail) {
            warn!(error = %e, action = %action, "activity append failed");
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::service;
    use taskflow_core::task::{Attachment, AttachmentChange, NewTask, TaskPatch};
    use taskflow_core::{ActivityAction, Priority, TaskQuery};
    use taskflow_core::ids::TaskId;

    fn pdf(url: &str) -> Attachment {
        Attachment {
            url: url.to_string(),
            name: "notes.pdf".to_string(),
            mime_type: "application/pdf".to_string(),
            size: 2048,
        }
    }

    #[test]
    fn create_toggle_delete_scenario() {
        let (svc, blobs, uid) = service();

        let task = svc
            .create_task(
                &uid,
                &NewTask {
                    title: "Write report".to_string(),
                    priority: Priority::High,
                    ..NewTask::default()
                },
            )
            .unwrap();
        assert!(!task.completed);
        assert!(task.completed_at.is_none());
        assert_eq!(task.position, 1);
        assert!(task.tags.is_empty());

        let toggled = svc.toggle_task(&uid, &task.id).unwrap();
        assert!(toggled.completed);
        assert!(toggled.completed_at.is_some());

        let recent = svc.activity.recent_for(&uid, 10).unwrap();
        let completed_entries: Vec<_> = recent
            .iter()
            .filter(|e| e.entry.action == ActivityAction::Completed)
            .collect();
        assert_eq!(completed_entries.len(), 1);

        tokio_test_block_on(svc.delete_task(&uid, &task.id)).unwrap();
        assert!(svc.get_task(&uid, &task.id).is_err());
        assert!(blobs.deleted().is_empty());
    }

    // Small helper so sync tests can drive the async paths without a runtime
    // attribute on every test.
    fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(f)
    }

    #[test]
    fn create_logs_created_with_title_detail() {
        let (svc, _, uid) = service();
        svc.create_task(
            &uid,
            &NewTask {
                title: "Write report".to_string(),
                ..NewTask::default()
            },
        )
        .unwrap();

        let recent = svc.activity.recent_for(&uid, 10).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].entry.action, ActivityAction::Created);
        assert_eq!(recent[0].entry.detail.as_deref(), Some("Write report"));
    }

    #[test]
    fn rejected_attachment_never_reaches_store_or_blobs() {
        let (svc, blobs, uid) = service();

        let mut too_big = pdf("https://blobs.example/big.pdf");
        too_big.size = 11 * 1024 * 1024;
        let result = svc.create_task(
            &uid,
            &NewTask {
                title: "huge".to_string(),
                attachment: Some(too_big),
                ..NewTask::default()
            },
        );
        assert_eq!(result.unwrap_err().kind(), "validation");

        let mut bad_mime = pdf("https://blobs.example/tool.exe");
        bad_mime.mime_type = "application/x-msdownload".to_string();
        let result = svc.create_task(
            &uid,
            &NewTask {
                title: "nope".to_string(),
                attachment: Some(bad_mime),
                ..NewTask::default()
            },
        );
        assert_eq!(result.unwrap_err().kind(), "validation");

        assert!(blobs.deleted().is_empty());
        assert_eq!(svc.list_tasks(&uid, &TaskQuery::default()).unwrap().total, 0);
        assert!(svc.activity.recent_for(&uid, 10).unwrap().is_empty());
    }

    #[test]
    fn create_rejects_empty_title() {
        let (svc, _, uid) = service();
        let result = svc.create_task(
            &uid,
            &NewTask {
                title: "   ".to_string(),
                ..NewTask::default()
            },
        );
        assert_eq!(result.unwrap_err().kind(), "validation");
    }

    #[tokio::test]
    async fn update_replacing_attachment_deletes_old_blob() {
        let (svc, blobs, uid) = service();
        let task = svc
            .create_task(
                &uid,
                &NewTask {
                    title: "files".to_string(),
                    attachment: Some(pdf("https://blobs.example/v1.pdf")),
                    ..NewTask::default()
                },
            )
            .unwrap();

        let patch = TaskPatch {
            attachment: Some(AttachmentChange::Set(pdf("https://blobs.example/v2.pdf"))),
            ..TaskPatch::default()
        };
        let updated = svc.update_task(&uid, &task.id, &patch).await.unwrap();

        assert_eq!(blobs.deleted(), vec!["https://blobs.example/v1.pdf"]);
        assert_eq!(
            updated.attachment.unwrap().url,
            "https://blobs.example/v2.pdf"
        );
    }

    #[tokio::test]
    async fn update_without_attachment_change_keeps_blob() {
        let (svc, blobs, uid) = service();
        let task = svc
            .create_task(
                &uid,
                &NewTask {
                    title: "files".to_string(),
                    attachment: Some(pdf("https://blobs.example/keep.pdf")),
                    ..NewTask::default()
                },
            )
            .unwrap();

        let patch = TaskPatch {
            title: Some("renamed".to_string()),
            ..TaskPatch::default()
        };
        let updated = svc.update_task(&uid, &task.id, &patch).await.unwrap();

        assert!(blobs.deleted().is_empty());
        assert_eq!(updated.attachment.unwrap().url, "https://blobs.example/keep.pdf");
    }

    #[tokio::test]
    async fn update_completed_via_patch_logs_updated_not_completed() {
        let (svc, _, uid) = service();
        let task = svc
            .create_task(
                &uid,
                &NewTask {
                    title: "patch me".to_string(),
                    ..NewTask::default()
                },
            )
            .unwrap();

        let patch = TaskPatch {
            completed: Some(true),
            ..TaskPatch::default()
        };
        let updated = svc.update_task(&uid, &task.id, &patch).await.unwrap();
        assert!(updated.completed);
        assert!(updated.completed_at.is_some());

        let recent = svc.activity.recent_for(&uid, 10).unwrap();
        assert_eq!(recent[0].entry.action, ActivityAction::Updated);
    }

    #[tokio::test]
    async fn delete_releases_blob_then_record() {
        let (svc, blobs, uid) = service();
        let task = svc
            .create_task(
                &uid,
                &NewTask {
                    title: "attached".to_string(),
                    attachment: Some(pdf("https://blobs.example/gone.pdf")),
                    ..NewTask::default()
                },
            )
            .unwrap();

        svc.delete_task(&uid, &task.id).await.unwrap();

        assert_eq!(blobs.deleted(), vec!["https://blobs.example/gone.pdf"]);
        assert!(svc.get_task(&uid, &task.id).is_err());

        let recent = svc.activity.recent_for(&uid, 10).unwrap();
        assert_eq!(recent[0].entry.action, ActivityAction::Deleted);
        assert_eq!(recent[0].entry.detail.as_deref(), Some("attached"));
        // Entry keeps the dangling task reference.
        assert_eq!(recent[0].entry.task_id, Some(task.id));
        assert!(recent[0].task_title.is_none());
    }

    #[tokio::test]
    async fn blob_failure_never_blocks_delete() {
        let (svc, blobs, uid) = service();
        let task = svc
            .create_task(
                &uid,
                &NewTask {
                    title: "stubborn".to_string(),
                    attachment: Some(pdf("https://blobs.example/stuck.pdf")),
                    ..NewTask::default()
                },
            )
            .unwrap();

        blobs.fail_deletes();
        svc.delete_task(&uid, &task.id).await.unwrap();
        assert!(svc.get_task(&uid, &task.id).is_err());
    }

    #[tokio::test]
    async fn remove_attachment_only() {
        let (svc, blobs, uid) = service();
        let task = svc
            .create_task(
                &uid,
                &NewTask {
                    title: "attached".to_string(),
                    attachment: Some(pdf("https://blobs.example/only.pdf")),
                    ..NewTask::default()
                },
            )
            .unwrap();

        let updated = svc.remove_attachment(&uid, &task.id).await.unwrap();
        assert!(updated.attachment.is_none());
        assert!(!updated.completed);
        assert_eq!(blobs.deleted(), vec!["https://blobs.example/only.pdf"]);

        let recent = svc.activity.recent_for(&uid, 10).unwrap();
        assert_eq!(recent[0].entry.action, ActivityAction::Updated);
    }

    #[test]
    fn toggle_unknown_task_is_not_found() {
        let (svc, _, uid) = service();
        let result = svc.toggle_task(&uid, &TaskId::from_raw("task_nope"));
        assert_eq!(result.unwrap_err().kind(), "not_found");
    }

    #[test]
    fn double_toggle_restores_original_state() {
        let (svc, _, uid) = service();
        let task = svc
            .create_task(
                &uid,
                &NewTask {
                    title: "flip".to_string(),
                    ..NewTask::default()
                },
            )
            .unwrap();

        svc.toggle_task(&uid, &task.id).unwrap();
        let back = svc.toggle_task(&uid, &task.id).unwrap();
        assert_eq!(back.completed, task.completed);
        assert!(back.completed_at.is_none());

        let recent = svc.activity.recent_for(&uid, 10).unwrap();
        assert_eq!(recent[0].entry.action, ActivityAction::Reopened);
        assert_eq!(recent[1].entry.action, ActivityAction::Completed);
    }

    #[test]
    fn category_name_required() {
        let (svc, _, uid) = service();
        let result = svc.create_category(&uid, "   ", None, None);
        assert_eq!(result.unwrap_err().kind(), "validation");
    }

    #[test]
    fn category_delete_clears_task_reference() {
        let (svc, _, uid) = service();
        let cat = svc.create_category(&uid, "Work", None, None).unwrap();
        let task = svc
            .create_task(
                &uid,
                &NewTask {
                    title: "categorized".to_string(),
                    category_id: Some(cat.id.clone()),
                    ..NewTask::default()
                },
            )
            .unwrap();

        svc.delete_category(&uid, &cat.id).unwrap();

        let detail = svc.get_task(&uid, &task.id).unwrap();
        assert!(detail.task.category_id.is_none());
        assert!(detail.category.is_none());
        assert!(svc.list_categories(&uid).unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_user_releases_blobs_and_cascades() {
        let (svc, blobs, uid) = service();
        let cat = svc.create_category(&uid, "Work", None, None).unwrap();
        svc.create_task(
            &uid,
            &NewTask {
                title: "attached".to_string(),
                category_id: Some(cat.id),
                attachment: Some(pdf("https://blobs.example/owned.pdf")),
                ..NewTask::default()
            },
        )
        .unwrap();

        svc.delete_user(&uid).await.unwrap();

        assert_eq!(blobs.deleted(), vec!["https://blobs.example/owned.pdf"]);
        assert_eq!(svc.list_tasks(&uid, &TaskQuery::default()).unwrap().total, 0);
        assert!(svc.list_categories(&uid).unwrap().is_empty());
        assert!(svc.activity.recent_for(&uid, 10).unwrap().is_empty());
    }
}
