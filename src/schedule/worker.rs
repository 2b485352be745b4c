//! Polls the task queue and materializes due scheduled posts.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::queue::{QueueError, QueuedTask, Task, TaskQueue};
use super::workflow::ScheduledPostPayload;
use crate::config::SchedulerConfig;
use crate::db::models::{PostId, TagId, UserId};
use crate::media::{MediaError, MediaStore};
use crate::repository::{DynRepository, PostRepository, RepositoryError, UserRepository};

#[derive(Debug, Error)]
pub enum MaterializeError {
    #[error("creator {0} does not exist")]
    MissingCreator(UserId),

    #[error("tag {0} does not exist")]
    MissingTag(TagId),

    #[error("image payload is not valid base64: {0}")]
    Image(#[from] base64::DecodeError),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Create the post described by `payload`. Rows written before a failure
/// (the post, earlier tag edges) are kept.
pub async fn materialize<R>(
    repo: &R,
    media: &MediaStore,
    payload: &ScheduledPostPayload,
) -> Result<PostId, MaterializeError>
where
    R: UserRepository + PostRepository + ?Sized,
{
    let creator = repo
        .find_user(payload.creator_id)
        .await?
        .ok_or(MaterializeError::MissingCreator(payload.creator_id))?;

    let image = match &payload.image {
        Some(encoded) => {
            let data = encoded.decode()?;
            Some(media.save(&payload.title, &encoded.filename, &data).await?)
        }
        None => None,
    };

    let post = repo
        .insert_post(&payload.title, &payload.content, image.as_deref(), creator.id)
        .await?;

    for tag_id in &payload.tag_ids {
        match repo.attach_tag(post.id, *tag_id).await {
            Ok(()) => {}
            Err(RepositoryError::NotFound(_)) => return Err(MaterializeError::MissingTag(*tag_id)),
            Err(e) => return Err(e.into()),
        }
    }

    repo.touch_post(post.id).await?;
    Ok(post.id)
}

pub struct Worker {
    queue: Arc<dyn TaskQueue>,
    store: DynRepository,
    media: MediaStore,
    config: SchedulerConfig,
}

impl Worker {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        store: DynRepository,
        media: MediaStore,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            queue,
            store,
            media,
            config,
        }
    }

    /// Poll forever.
    pub async fn run(self) {
        tracing::info!(
            poll_interval_secs = self.config.poll_interval_secs,
            batch_size = self.config.batch_size,
            "scheduled task worker starting"
        );

        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.poll_interval_secs.max(1)));
        loop {
            interval.tick().await;
            if let Err(e) = self.run_due(Utc::now()).await {
                tracing::error!(error = %e, "failed to claim scheduled tasks");
            }
        }
    }

    /// Claim and run every task due at `now`, one batch at a time.
    /// Returns how many tasks were processed.
    pub async fn run_due(&self, now: DateTime<Utc>) -> Result<usize, QueueError> {
        let mut processed = 0;
        loop {
            let batch = self.queue.claim_due(now, self.config.batch_size.max(1)).await?;
            if batch.is_empty() {
                return Ok(processed);
            }
            tracing::debug!(count = batch.len(), "claimed scheduled tasks");
            for task in batch {
                self.process(task).await;
                processed += 1;
            }
        }
    }

    /// Run one claimed task and record its outcome. A failed status write is
    /// logged; the rest of the batch still runs.
    async fn process(&self, queued: QueuedTask) {
        let result = match &queued.task {
            Task::CreatePost(payload) => materialize(&*self.store, &self.media, payload).await,
        };

        let recorded = match result {
            Ok(post_id) => {
                tracing::info!(task_id = %queued.id, post_id, "scheduled post created");
                self.queue.complete(queued.id).await
            }
            Err(e) => {
                tracing::error!(task_id = %queued.id, error = %e, "scheduled task failed");
                self.queue.fail(queued.id, &e.to_string()).await
            }
        };
        if let Err(e) = recorded {
            tracing::error!(task_id = %queued.id, error = %e, "could not record task outcome");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::db::models::NewUser;
    use crate::db::{create_memory_pool, run_migrations};
    use crate::filters::{PageRequest, PostFilter};
    use crate::repository::{SqliteRepository, TagRepository};
    use crate::schedule::queue::{SqliteTaskQueue, TaskId, TaskScheduler, TaskStatus};
    use crate::schedule::workflow::EncodedImage;

    struct Fixture {
        repo: Arc<SqliteRepository>,
        queue: Arc<SqliteTaskQueue>,
        worker: Worker,
        _media_dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let pool = create_memory_pool().unwrap();
        run_migrations(&pool).unwrap();
        let repo = Arc::new(SqliteRepository::new(pool.clone()));
        let queue = Arc::new(SqliteTaskQueue::new(pool));
        let media_dir = tempfile::tempdir().unwrap();
        let worker = Worker::new(
            queue.clone(),
            repo.clone(),
            MediaStore::new(media_dir.path()),
            SchedulerConfig::default(),
        );
        Fixture {
            repo,
            queue,
            worker,
            _media_dir: media_dir,
        }
    }

    async fn creator(repo: &SqliteRepository) -> UserId {
        repo.create_user(NewUser {
            email: "writer@example.com".into(),
            username: "writer".into(),
            password_hash: "x".into(),
            bio: None,
            birthday: None,
            is_staff: false,
            is_superuser: false,
        })
        .await
        .unwrap()
        .id
    }

    fn payload(creator_id: UserId, tag_ids: Vec<TagId>) -> ScheduledPostPayload {
        ScheduledPostPayload {
            title: "Scheduled".into(),
            content: "later".into(),
            creator_id,
            tag_ids,
            image: None,
        }
    }

    async fn all_posts(repo: &SqliteRepository) -> Vec<crate::db::models::PostRecord> {
        repo.list_posts(
            &PostFilter::default(),
            &PageRequest {
                page: 1,
                page_size: 100,
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn due_task_creates_tagged_post() {
        let fx = fixture();
        let user = creator(&fx.repo).await;
        let tag = fx.repo.create_tag("t").await.unwrap();
        let id = fx
            .queue
            .schedule(Task::CreatePost(payload(user, vec![tag.id])), Utc::now())
            .await
            .unwrap();

        assert!(all_posts(&fx.repo).await.is_empty());
        assert_eq!(fx.worker.run_due(Utc::now()).await.unwrap(), 1);

        let posts = all_posts(&fx.repo).await;
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].post.creator_id, user);
        assert_eq!(posts[0].tags, vec![tag]);
        assert_eq!(
            fx.queue.find(id).await.unwrap().unwrap().status,
            TaskStatus::Materialized
        );
    }

    #[tokio::test]
    async fn future_task_is_left_alone() {
        let fx = fixture();
        let user = creator(&fx.repo).await;
        fx.queue
            .schedule(
                Task::CreatePost(payload(user, vec![])),
                Utc::now() + chrono::Duration::hours(1),
            )
            .await
            .unwrap();

        assert_eq!(fx.worker.run_due(Utc::now()).await.unwrap(), 0);
        assert!(all_posts(&fx.repo).await.is_empty());
    }

    #[tokio::test]
    async fn missing_tag_fails_task_but_keeps_post() {
        let fx = fixture();
        let user = creator(&fx.repo).await;
        let id = fx
            .queue
            .schedule(Task::CreatePost(payload(user, vec![404])), Utc::now())
            .await
            .unwrap();

        fx.worker.run_due(Utc::now()).await.unwrap();

        let task = fx.queue.find(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("tag 404 does not exist"));
        assert_eq!(all_posts(&fx.repo).await.len(), 1);
    }

    #[tokio::test]
    async fn missing_creator_creates_nothing() {
        let fx = fixture();
        let id = fx
            .queue
            .schedule(Task::CreatePost(payload(999, vec![])), Utc::now())
            .await
            .unwrap();

        fx.worker.run_due(Utc::now()).await.unwrap();

        assert_eq!(
            fx.queue.find(id).await.unwrap().unwrap().status,
            TaskStatus::Failed
        );
        assert!(all_posts(&fx.repo).await.is_empty());
    }

    #[tokio::test]
    async fn image_is_decoded_and_stored() {
        let fx = fixture();
        let user = creator(&fx.repo).await;
        let png = crate::media::tiny_png();
        let mut with_image = payload(user, vec![]);
        with_image.image = Some(EncodedImage {
            filename: "pic.png".into(),
            data: base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &png),
        });

        let post_id = materialize(&*fx.repo, &fx.worker.media, &with_image)
            .await
            .unwrap();

        let record = fx.repo.find_post(post_id).await.unwrap().unwrap();
        let path = record.post.image.unwrap();
        assert!(path.starts_with("uploads/users/scheduled-"));
        let stored = fx.worker.media.read(&path).await.unwrap().unwrap();
        assert_eq!(stored, png);
    }

    /// SQLite queue whose first `failures` completions error out.
    struct FlakyQueue {
        inner: Arc<SqliteTaskQueue>,
        failures: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl TaskQueue for FlakyQueue {
        async fn claim_due(
            &self,
            now: DateTime<Utc>,
            limit: u32,
        ) -> Result<Vec<QueuedTask>, QueueError> {
            self.inner.claim_due(now, limit).await
        }

        async fn complete(&self, id: TaskId) -> Result<(), QueueError> {
            let fail_now = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if fail_now {
                return Err(QueueError::UnknownStatus("write refused".into()));
            }
            self.inner.complete(id).await
        }

        async fn fail(&self, id: TaskId, error: &str) -> Result<(), QueueError> {
            self.inner.fail(id, error).await
        }

        async fn find(&self, id: TaskId) -> Result<Option<QueuedTask>, QueueError> {
            self.inner.find(id).await
        }
    }

    #[tokio::test]
    async fn failed_status_write_keeps_processing_batch() {
        let fx = fixture();
        let user = creator(&fx.repo).await;
        let mut ids = Vec::new();
        for _ in 0..3 {
            let id = fx
                .queue
                .schedule(Task::CreatePost(payload(user, vec![])), Utc::now())
                .await
                .unwrap();
            ids.push(id);
        }

        let worker = Worker::new(
            Arc::new(FlakyQueue {
                inner: fx.queue.clone(),
                failures: AtomicUsize::new(1),
            }),
            fx.repo.clone(),
            fx.worker.media.clone(),
            SchedulerConfig::default(),
        );

        assert_eq!(worker.run_due(Utc::now()).await.unwrap(), 3);
        assert_eq!(all_posts(&fx.repo).await.len(), 3);

        let mut statuses = Vec::new();
        for id in ids {
            statuses.push(fx.queue.find(id).await.unwrap().unwrap().status);
        }
        let materialized = statuses
            .iter()
            .filter(|s| **s == TaskStatus::Materialized)
            .count();
        assert_eq!(materialized, 2);
    }
}
