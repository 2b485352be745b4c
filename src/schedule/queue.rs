//! Durable deferred-task queue backed by the `scheduled_tasks` table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::workflow::ScheduledPostPayload;
use crate::db::{format_timestamp, now_timestamp, parse_timestamp};
use crate::state::DbPool;

pub type TaskId = Uuid;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Database error: {0}")]
    Database(#[from] r2d2::Error),

    #[error("SQL error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown task status: {0}")]
    UnknownStatus(String),
}

/// A unit of deferred work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum Task {
    CreatePost(ScheduledPostPayload),
}

impl Task {
    pub fn task_type(&self) -> &'static str {
        match self {
            Task::CreatePost(_) => "create_post",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Queued,
    Running,
    Materialized,
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Materialized => "materialized",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, QueueError> {
        match raw {
            "queued" => Ok(TaskStatus::Queued),
            "running" => Ok(TaskStatus::Running),
            "materialized" => Ok(TaskStatus::Materialized),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(QueueError::UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueuedTask {
    pub id: TaskId,
    pub task: Task,
    pub run_at: DateTime<Utc>,
    pub status: TaskStatus,
    pub error: Option<String>,
}

/// Submission side: hand a task over for execution at or after `not_before`.
#[async_trait]
pub trait TaskScheduler: Send + Sync {
    async fn schedule(&self, task: Task, not_before: DateTime<Utc>) -> Result<TaskId, QueueError>;
}

/// Execution side, used by the worker.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Move up to `limit` due tasks from `queued` to `running` and return them.
    async fn claim_due(&self, now: DateTime<Utc>, limit: u32)
        -> Result<Vec<QueuedTask>, QueueError>;

    async fn complete(&self, id: TaskId) -> Result<(), QueueError>;

    async fn fail(&self, id: TaskId, error: &str) -> Result<(), QueueError>;

    async fn find(&self, id: TaskId) -> Result<Option<QueuedTask>, QueueError>;
}

pub struct SqliteTaskQueue {
    pool: DbPool,
}

impl SqliteTaskQueue {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn finish(&self, id: TaskId, status: TaskStatus, error: Option<&str>) -> Result<(), QueueError> {
        let conn = self.pool.get()?;
        conn.execute(
            "UPDATE scheduled_tasks SET status = ?1, error = ?2, finished_at = ?3 WHERE id = ?4",
            params![status.as_str(), error, now_timestamp(), id.to_string()],
        )?;
        Ok(())
    }
}

#[async_trait]
impl TaskScheduler for SqliteTaskQueue {
    async fn schedule(&self, task: Task, not_before: DateTime<Utc>) -> Result<TaskId, QueueError> {
        let conn = self.pool.get()?;
        let id = Uuid::now_v7();
        let payload = serde_json::to_string(&task)?;

        conn.execute(
            "INSERT INTO scheduled_tasks (id, task_type, payload, run_at, status, created_at)
             VALUES (?1, ?2, ?3, ?4, 'queued', ?5)",
            params![
                id.to_string(),
                task.task_type(),
                payload,
                format_timestamp(&not_before),
                now_timestamp()
            ],
        )?;

        tracing::info!(task_id = %id, task_type = task.task_type(), run_at = %not_before, "task scheduled");
        Ok(id)
    }
}

#[async_trait]
impl TaskQueue for SqliteTaskQueue {
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<QueuedTask>, QueueError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let rows: Vec<(String, String, String)> = {
            let mut stmt = tx.prepare(
                "SELECT id, payload, run_at FROM scheduled_tasks
                 WHERE status = 'queued' AND run_at <= ?1
                 ORDER BY run_at, created_at
                 LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(params![format_timestamp(&now), limit], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let mut claimed = Vec::with_capacity(rows.len());
        for (raw_id, payload, run_at) in rows {
            let parsed = Uuid::parse_str(&raw_id)
                .map_err(|e| e.to_string())
                .and_then(|id| {
                    serde_json::from_str::<Task>(&payload)
                        .map(|task| (id, task))
                        .map_err(|e| e.to_string())
                });

            match parsed {
                Ok((id, task)) => {
                    tx.execute(
                        "UPDATE scheduled_tasks SET status = 'running' WHERE id = ?1",
                        params![raw_id],
                    )?;
                    claimed.push(QueuedTask {
                        id,
                        task,
                        run_at: parse_timestamp(2, &run_at)?,
                        status: TaskStatus::Running,
                        error: None,
                    });
                }
                Err(e) => {
                    tracing::error!(task_id = %raw_id, error = %e, "undecodable task payload");
                    tx.execute(
                        "UPDATE scheduled_tasks SET status = 'failed', error = ?1, finished_at = ?2
                         WHERE id = ?3",
                        params![e, now_timestamp(), raw_id],
                    )?;
                }
            }
        }

        tx.commit()?;
        Ok(claimed)
    }

    async fn complete(&self, id: TaskId) -> Result<(), QueueError> {
        self.finish(id, TaskStatus::Materialized, None)
    }

    async fn fail(&self, id: TaskId, error: &str) -> Result<(), QueueError> {
        self.finish(id, TaskStatus::Failed, Some(error))
    }

    async fn find(&self, id: TaskId) -> Result<Option<QueuedTask>, QueueError> {
        let conn = self.pool.get()?;
        let row: Option<(String, String, String, Option<String>)> = conn
            .query_row(
                "SELECT payload, run_at, status, error FROM scheduled_tasks WHERE id = ?1",
                params![id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;

        let Some((payload, run_at, status, error)) = row else {
            return Ok(None);
        };
        Ok(Some(QueuedTask {
            id,
            task: serde_json::from_str(&payload)?,
            run_at: parse_timestamp(1, &run_at)?,
            status: TaskStatus::parse(&status)?,
            error,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_memory_pool, run_migrations};
    use chrono::Duration;

    fn queue() -> SqliteTaskQueue {
        let pool = create_memory_pool().unwrap();
        run_migrations(&pool).unwrap();
        SqliteTaskQueue::new(pool)
    }

    fn task(title: &str) -> Task {
        Task::CreatePost(ScheduledPostPayload {
            title: title.into(),
            content: String::new(),
            creator_id: 1,
            tag_ids: vec![],
            image: None,
        })
    }

    #[test]
    fn task_serializes_with_type_tag() {
        let json = serde_json::to_value(task("x")).unwrap();
        assert_eq!(json["task"], "create_post");
        assert_eq!(json["title"], "x");
    }

    #[tokio::test]
    async fn only_due_tasks_are_claimed_once() {
        let queue = queue();
        let now = Utc::now();
        let due = queue.schedule(task("due"), now - Duration::minutes(1)).await.unwrap();
        let later = queue.schedule(task("later"), now + Duration::hours(1)).await.unwrap();

        let claimed = queue.claim_due(now, 10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, due);
        assert_eq!(claimed[0].task, task("due"));

        assert!(queue.claim_due(now, 10).await.unwrap().is_empty());
        let pending = queue.find(later).await.unwrap().unwrap();
        assert_eq!(pending.status, TaskStatus::Queued);
    }

    #[tokio::test]
    async fn completion_and_failure_are_recorded() {
        let queue = queue();
        let now = Utc::now();
        let ok = queue.schedule(task("ok"), now).await.unwrap();
        let bad = queue.schedule(task("bad"), now).await.unwrap();
        queue.claim_due(now, 10).await.unwrap();

        queue.complete(ok).await.unwrap();
        queue.fail(bad, "tag 9 not found").await.unwrap();

        assert_eq!(
            queue.find(ok).await.unwrap().unwrap().status,
            TaskStatus::Materialized
        );
        let failed = queue.find(bad).await.unwrap().unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("tag 9 not found"));
    }

    #[tokio::test]
    async fn claim_respects_limit_and_run_at_order() {
        let queue = queue();
        let now = Utc::now();
        let second = queue.schedule(task("b"), now - Duration::minutes(1)).await.unwrap();
        let first = queue.schedule(task("a"), now - Duration::minutes(2)).await.unwrap();
        queue.schedule(task("c"), now).await.unwrap();

        let claimed = queue.claim_due(now, 2).await.unwrap();
        let ids: Vec<_> = claimed.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![first, second]);
    }
}
