// crates/leaseq/src/jobs/repo.rs

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgArguments, Postgres};
use sqlx::query::QueryAs;
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::jobs::model::{ClaimRequest, Job, JobView, PayloadRef, PayloadRefType, QueueStats};
use crate::jobs::schema::{quote_identifier, validate_identifier};
use crate::jobs::store::JobStore;

/// Row shape shared by every statement below: the job's own columns plus the
/// referenced payload document (`NULL` if it has gone away).
#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    created_at: DateTime<Utc>,
    payload: Value,
    blocked_until: DateTime<Utc>,
    worker_id: Option<String>,
    worker_hostname: Option<String>,
    retries: i32,
    done: bool,
    error: Option<String>,
    payload_doc: Option<Value>,
}

impl JobRow {
    fn into_job(self, ref_type: PayloadRefType) -> Result<(Job, Value), QueueError> {
        let payload = ref_type.ref_from_json(&self.payload).ok_or_else(|| {
            sqlx::Error::Decode(
                format!("payload column {} is not a {ref_type} reference", self.payload).into(),
            )
        })?;

        let job = Job {
            id: self.id,
            created_at: self.created_at,
            payload,
            blocked_until: self.blocked_until,
            worker_id: self.worker_id,
            worker_hostname: self.worker_hostname,
            retries: self.retries,
            done: self.done,
            error: self.error,
        };
        Ok((job, self.payload_doc.unwrap_or(Value::Null)))
    }

    fn into_view(self, ref_type: PayloadRefType) -> Result<JobView, QueueError> {
        let (job, doc) = self.into_job(ref_type)?;
        Ok(JobView::from_job(&job, doc))
    }
}

/// SQL text for one queue table, rendered once per store.
#[derive(Debug)]
struct Statements {
    insert: String,
    claim: String,
    finish: String,
    get: String,
    delete_finished: String,
    delete_all: String,
    stats: String,
}

impl Statements {
    fn render(queue: &str, payload_table: &str) -> Self {
        let queue = quote_identifier(queue);
        let payload_table = quote_identifier(payload_table);
        let select_view = format!(
            r#"
            SELECT
                c.id, c.created_at, to_jsonb(c.payload) AS payload,
                c.blocked_until, c.worker_id, c.worker_hostname,
                c.retries, c.done, c.error,
                to_jsonb(p) AS payload_doc
            FROM {{source}} c
            LEFT JOIN {payload_table} p ON p.id = c.payload
            "#
        );
        let view_of = |source: &str| select_view.replace("{source}", source);

        Self {
            insert: format!(
                r#"
                WITH inserted AS (
                    INSERT INTO {queue} (payload)
                    VALUES ($1)
                    RETURNING *
                )
                {}
                "#,
                view_of("inserted")
            ),
            // Selection and lease in one statement. SKIP LOCKED makes a racing
            // claimer move on to the next-oldest row instead of waiting.
            claim: format!(
                r#"
                WITH candidate AS (
                    SELECT id
                    FROM {queue}
                    WHERE blocked_until < now()
                      AND retries <= $4
                      AND done = false
                    ORDER BY created_at ASC, id ASC
                    FOR UPDATE SKIP LOCKED
                    LIMIT 1
                ),
                claimed AS (
                    UPDATE {queue} q
                    SET blocked_until = now() + ($3::bigint * interval '1 millisecond'),
                        worker_id = $1,
                        worker_hostname = $2,
                        retries = q.retries + 1
                    FROM candidate
                    WHERE q.id = candidate.id
                    RETURNING q.*
                )
                {}
                "#,
                view_of("claimed")
            ),
            finish: format!(
                r#"
                WITH updated AS (
                    UPDATE {queue}
                    SET done = true,
                        error = COALESCE($2::text, error)
                    WHERE id = $1
                    RETURNING *
                )
                {}
                "#,
                view_of("updated")
            ),
            get: format!("{} WHERE c.id = $1", view_of(&queue)),
            delete_finished: format!(
                r#"
                DELETE FROM {queue}
                WHERE done = true
                   OR retries > $1
                "#
            ),
            delete_all: format!("DELETE FROM {queue}"),
            stats: format!(
                r#"
                SELECT
                    COUNT(*) AS total,
                    COUNT(*) FILTER (
                        WHERE done = false AND retries <= $1 AND blocked_until < now()
                    ) AS claimable,
                    COUNT(*) FILTER (
                        WHERE done = false AND retries <= $1 AND blocked_until >= now()
                    ) AS leased,
                    COUNT(*) FILTER (WHERE done = true AND error IS NULL) AS done,
                    COUNT(*) FILTER (WHERE done = true AND error IS NOT NULL) AS failed,
                    COUNT(*) FILTER (WHERE done = false AND retries > $1) AS exhausted
                FROM {queue}
                "#
            ),
        }
    }
}

/// PostgreSQL-backed job table.
///
/// Atomicity comes from row locks: every mutation is a single statement, and
/// the claim statement locks its candidate row with `FOR UPDATE SKIP LOCKED`
/// before updating it.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
    ref_type: PayloadRefType,
    sql: Arc<Statements>,
}

impl PgJobStore {
    pub fn new(pool: PgPool, payload_table: &str, cfg: &QueueConfig) -> Result<Self, QueueError> {
        validate_identifier(payload_table)?;
        cfg.validate()?;

        Ok(Self {
            pool,
            ref_type: cfg.payload_ref_type,
            sql: Arc::new(Statements::render(&cfg.queue_collection, payload_table)),
        })
    }
}

fn bind_payload<'q>(
    query: QueryAs<'q, Postgres, JobRow, PgArguments>,
    payload: &'q PayloadRef,
) -> QueryAs<'q, Postgres, JobRow, PgArguments> {
    match payload {
        PayloadRef::Uuid(id) => query.bind(*id),
        PayloadRef::BigInt(id) => query.bind(*id),
        PayloadRef::Text(id) => query.bind(id.as_str()),
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn insert_job(&self, payload: &PayloadRef) -> Result<Job, QueueError> {
        let row = bind_payload(sqlx::query_as::<_, JobRow>(&self.sql.insert), payload)
            .fetch_one(&self.pool)
            .await?;

        let (job, _) = row.into_job(self.ref_type)?;
        Ok(job)
    }

    async fn claim(&self, req: &ClaimRequest) -> Result<Option<JobView>, QueueError> {
        let row = sqlx::query_as::<_, JobRow>(&self.sql.claim)
            .bind(req.worker_id.as_str())
            .bind(req.worker_hostname.as_str())
            .bind(req.block_for.num_milliseconds())
            .bind(req.max_retries)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| r.into_view(self.ref_type)).transpose()
    }

    async fn finish(
        &self,
        job_id: Uuid,
        error: Option<&str>,
    ) -> Result<Option<JobView>, QueueError> {
        let row = sqlx::query_as::<_, JobRow>(&self.sql.finish)
            .bind(job_id)
            .bind(error)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| r.into_view(self.ref_type)).transpose()
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>, QueueError> {
        let row = sqlx::query_as::<_, JobRow>(&self.sql.get)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| r.into_job(self.ref_type).map(|(job, _)| job))
            .transpose()
    }

    async fn delete_finished(&self, max_retries: i32) -> Result<u64, QueueError> {
        let res = sqlx::query(&self.sql.delete_finished)
            .bind(max_retries)
            .execute(&self.pool)
            .await?;

        Ok(res.rows_affected())
    }

    async fn delete_all(&self) -> Result<u64, QueueError> {
        let res = sqlx::query(&self.sql.delete_all)
            .execute(&self.pool)
            .await?;

        Ok(res.rows_affected())
    }

    async fn stats(&self, max_retries: i32) -> Result<QueueStats, QueueError> {
        let (total, claimable, leased, done, failed, exhausted) =
            sqlx::query_as::<_, (i64, i64, i64, i64, i64, i64)>(&self.sql.stats)
                .bind(max_retries)
                .fetch_one(&self.pool)
                .await?;

        Ok(QueueStats {
            total,
            claimable,
            leased,
            done,
            failed,
            exhausted,
        })
    }
}
