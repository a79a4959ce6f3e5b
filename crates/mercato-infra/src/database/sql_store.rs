//! SQL job store on SeaORM.
//!
//! Claiming differs per backend:
//! - Postgres (and MySQL) select the next candidate inside a transaction with
//!   `FOR UPDATE SKIP LOCKED`, so concurrent pollers in any process never see
//!   the same row.
//! - SQLite has no row locks and a single writer. Claims are serialized by an
//!   in-process mutex, and a worker lease keeps a second process from
//!   polling the same file.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, LockBehavior, LockType};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DbBackend, DbConn, DbErr,
    EntityTrait, Order, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Select, Set,
    TransactionTrait,
};
use tokio::sync::{Mutex, RwLock};

use mercato_core::ports::{
    BackoffStrategy, JobList, JobListOptions, JobSortField, JobStore, QueueStats, SortOrder,
};
use mercato_core::{Job, JobId, JobRecord, JobState, StoreError};

use super::entity::job_record::{self, Entity as JobRecordEntity, mutable_columns, new_row};
use super::entity::job_worker_lease::{self, Entity as LeaseEntity};
use crate::store::{ABANDONED_JOB_ERROR, PayloadLimits, backoff_elapsed};

/// Name of the lease row guarding an embedded database.
pub const EMBEDDED_WORKER_LEASE: &str = "embedded-worker";

fn query_error(err: DbErr) -> StoreError {
    match err {
        DbErr::ConnectionAcquire(_) | DbErr::Conn(_) => StoreError::Unavailable,
        other => StoreError::Query(other.to_string()),
    }
}

fn default_limits(backend: DbBackend) -> PayloadLimits {
    match backend {
        DbBackend::MySql => PayloadLimits::mysql(),
        _ => PayloadLimits::unlimited(),
    }
}

/// Oldest claimable job of a queue, skipping `excluded` ids.
pub(crate) fn claim_candidate(
    queue_name: &str,
    excluded: &[i64],
    lock_rows: bool,
) -> Select<JobRecordEntity> {
    let mut query = JobRecordEntity::find()
        .filter(job_record::Column::QueueName.eq(queue_name))
        .filter(
            job_record::Column::State
                .is_in([JobState::Pending.as_str(), JobState::Retrying.as_str()]),
        )
        .order_by_asc(job_record::Column::CreatedAt)
        .order_by_asc(job_record::Column::Id)
        .limit(1);

    if !excluded.is_empty() {
        query = query.filter(job_record::Column::Id.is_not_in(excluded.iter().copied()));
    }
    if lock_rows {
        query = query.lock_with_behavior(LockType::Update, LockBehavior::SkipLocked);
    }
    query
}

/// Job store backed by a SQL table.
///
/// The connection can be attached after construction and detached at any
/// time; while detached every operation fails with
/// [`StoreError::Unavailable`].
pub struct SqlJobStore {
    conn: RwLock<Option<Arc<DbConn>>>,
    embedded: AtomicBool,
    claim_lock: Mutex<()>,
    backoff: Option<Arc<dyn BackoffStrategy>>,
    limits: Option<PayloadLimits>,
}

impl SqlJobStore {
    /// A store with no connection yet.
    pub fn new() -> Self {
        Self {
            conn: RwLock::new(None),
            embedded: AtomicBool::new(false),
            claim_lock: Mutex::new(()),
            backoff: None,
            limits: None,
        }
    }

    pub fn with_connection(conn: DbConn) -> Self {
        let embedded = conn.get_database_backend() == DbBackend::Sqlite;
        Self {
            conn: RwLock::new(Some(Arc::new(conn))),
            embedded: AtomicBool::new(embedded),
            ..Self::new()
        }
    }

    /// Delay re-claiming RETRYING jobs with the given strategy.
    pub fn with_backoff(mut self, backoff: Arc<dyn BackoffStrategy>) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Override the per-backend payload limits.
    pub fn with_payload_limits(mut self, limits: PayloadLimits) -> Self {
        self.limits = Some(limits);
        self
    }

    pub async fn attach(&self, conn: DbConn) {
        self.embedded.store(
            conn.get_database_backend() == DbBackend::Sqlite,
            Ordering::SeqCst,
        );
        *self.conn.write().await = Some(Arc::new(conn));
        tracing::info!("Job store connection attached");
    }

    pub async fn detach(&self) -> Option<Arc<DbConn>> {
        let conn = self.conn.write().await.take();
        if conn.is_some() {
            tracing::info!("Job store connection detached");
        }
        conn
    }

    async fn connection(&self) -> Result<Arc<DbConn>, StoreError> {
        self.conn.read().await.clone().ok_or(StoreError::Unavailable)
    }

    fn constrain(&self, backend: DbBackend, record: &mut JobRecord) {
        let limits = self.limits.unwrap_or_else(|| default_limits(backend));
        if let Some(reduced) = limits.constrain(&record.queue_name, &record.data) {
            record.data = reduced;
        }
    }

    async fn claim_on<C: ConnectionTrait>(
        &self,
        conn: &C,
        queue_name: &str,
        lock_rows: bool,
    ) -> Result<Option<Job>, StoreError> {
        let now = Utc::now();
        let backoff = self.backoff.as_deref();
        let mut excluded: Vec<i64> = Vec::new();

        loop {
            let Some(model) = claim_candidate(queue_name, &excluded, lock_rows)
                .one(conn)
                .await
                .map_err(query_error)?
            else {
                return Ok(None);
            };

            let id = model.id;
            let observed_state = model.state.clone();
            let mut job = Job::try_from(model)?;

            if !backoff_elapsed(backoff, &job, now) {
                excluded.push(id);
                continue;
            }

            job.start()
                .map_err(|e| StoreError::Query(e.to_string()))?;
            let mut record = JobRecord::from(&job);
            record.updated_at = now;

            // Conditioned on the state we read, so a row claimed behind our
            // back is skipped rather than claimed twice.
            let result = JobRecordEntity::update_many()
                .set(mutable_columns(&record))
                .filter(job_record::Column::Id.eq(id))
                .filter(job_record::Column::State.eq(observed_state))
                .exec(conn)
                .await
                .map_err(query_error)?;

            if result.rows_affected == 0 {
                excluded.push(id);
                continue;
            }
            return Ok(Some(record.into()));
        }
    }
}

impl Default for SqlJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for SqlJobStore {
    async fn is_available(&self) -> bool {
        self.conn.read().await.is_some()
    }

    fn single_writer(&self) -> bool {
        self.embedded.load(Ordering::SeqCst)
    }

    async fn create(&self, job: Job) -> Result<Job, StoreError> {
        let conn = self.connection().await?;

        let now = Utc::now();
        let mut record = JobRecord::from(job);
        record.id = None;
        record.created_at = now;
        record.updated_at = now;
        self.constrain(conn.get_database_backend(), &mut record);

        let model = new_row(&record).insert(&*conn).await.map_err(query_error)?;
        Job::try_from(model)
    }

    async fn claim_next(&self, queue_name: &str) -> Result<Option<Job>, StoreError> {
        let conn = self.connection().await?;

        if conn.get_database_backend() == DbBackend::Sqlite {
            let _guard = self.claim_lock.lock().await;
            return self.claim_on(&*conn, queue_name, false).await;
        }

        let txn = conn.begin().await.map_err(query_error)?;
        let claimed = self.claim_on(&txn, queue_name, true).await?;
        txn.commit().await.map_err(query_error)?;
        Ok(claimed)
    }

    async fn update(&self, job: &Job) -> Result<(), StoreError> {
        let id = job.id().ok_or(StoreError::NotPersisted)?;
        let conn = self.connection().await?;

        let mut record = JobRecord::from(job);
        record.updated_at = Utc::now();
        self.constrain(conn.get_database_backend(), &mut record);

        let result = JobRecordEntity::update_many()
            .set(mutable_columns(&record))
            .filter(job_record::Column::Id.eq(id.0))
            .filter(job_record::Column::IsSettled.eq(false))
            .exec(&*conn)
            .await
            .map_err(query_error)?;

        if result.rows_affected == 0 {
            let exists = JobRecordEntity::find_by_id(id.0)
                .count(&*conn)
                .await
                .map_err(query_error)?
                > 0;
            if !exists {
                return Err(StoreError::NotFound(id));
            }
            tracing::debug!(job_id = %id, "Ignoring update to settled job");
        }
        Ok(())
    }

    async fn cancel(&self, id: JobId) -> Result<bool, StoreError> {
        let conn = self.connection().await?;
        let now = Utc::now();

        let result = JobRecordEntity::update_many()
            .col_expr(job_record::Column::State, Expr::value(JobState::Cancelled.as_str()))
            .col_expr(job_record::Column::IsSettled, Expr::value(true))
            .col_expr(job_record::Column::SettledAt, Expr::value(now))
            .col_expr(job_record::Column::UpdatedAt, Expr::value(now))
            .filter(job_record::Column::Id.eq(id.0))
            .filter(job_record::Column::IsSettled.eq(false))
            .exec(&*conn)
            .await
            .map_err(query_error)?;
        if result.rows_affected > 0 {
            return Ok(true);
        }

        let exists = JobRecordEntity::find_by_id(id.0)
            .count(&*conn)
            .await
            .map_err(query_error)?
            > 0;
        if exists { Ok(false) } else { Err(StoreError::NotFound(id)) }
    }

    async fn update_progress(&self, id: JobId, progress: u8) -> Result<(), StoreError> {
        let conn = self.connection().await?;
        JobRecordEntity::update_many()
            .col_expr(
                job_record::Column::Progress,
                Expr::value(progress.min(100) as i16),
            )
            .col_expr(job_record::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(job_record::Column::Id.eq(id.0))
            .filter(job_record::Column::State.eq(JobState::Running.as_str()))
            .exec(&*conn)
            .await
            .map_err(query_error)?;
        Ok(())
    }

    async fn find_one(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        let conn = self.connection().await?;
        JobRecordEntity::find_by_id(id.0)
            .one(&*conn)
            .await
            .map_err(query_error)?
            .map(Job::try_from)
            .transpose()
    }

    async fn find_many(&self, options: &JobListOptions) -> Result<JobList, StoreError> {
        let conn = self.connection().await?;
        let filter = &options.filter;

        let mut select = JobRecordEntity::find();
        if !filter.queue_names.is_empty() {
            select = select.filter(job_record::Column::QueueName.is_in(filter.queue_names.clone()));
        }
        if !filter.states.is_empty() {
            select = select.filter(
                job_record::Column::State.is_in(filter.states.iter().map(|s| s.as_str())),
            );
        }
        if let Some(settled) = filter.is_settled {
            select = select.filter(job_record::Column::IsSettled.eq(settled));
        }

        let total_items = select.clone().count(&*conn).await.map_err(query_error)?;

        let order = match options.sort.order {
            SortOrder::Asc => Order::Asc,
            SortOrder::Desc => Order::Desc,
        };
        let column = match options.sort.field {
            JobSortField::Id => job_record::Column::Id,
            JobSortField::CreatedAt => job_record::Column::CreatedAt,
            JobSortField::UpdatedAt => job_record::Column::UpdatedAt,
            JobSortField::SettledAt => job_record::Column::SettledAt,
            JobSortField::QueueName => job_record::Column::QueueName,
        };
        select = select
            .order_by(column, order.clone())
            .order_by(job_record::Column::Id, order);
        // SQLite rejects OFFSET without LIMIT.
        match (options.skip, options.take) {
            (0, None) => {}
            (skip, take) => {
                select = select
                    .offset(skip)
                    .limit(take.unwrap_or(i64::MAX as u64));
            }
        }

        let items = select
            .all(&*conn)
            .await
            .map_err(query_error)?
            .into_iter()
            .map(Job::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(JobList { items, total_items })
    }

    async fn find_many_by_ids(&self, ids: &[JobId]) -> Result<Vec<Job>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.connection().await?;
        JobRecordEntity::find()
            .filter(job_record::Column::Id.is_in(ids.iter().map(|id| id.0)))
            .order_by_asc(job_record::Column::Id)
            .all(&*conn)
            .await
            .map_err(query_error)?
            .into_iter()
            .map(Job::try_from)
            .collect()
    }

    async fn remove_settled(
        &self,
        queue_names: &[String],
        older_than: Option<DateTime<Utc>>,
    ) -> Result<u64, StoreError> {
        let conn = self.connection().await?;
        let cutoff = older_than.unwrap_or_else(Utc::now);

        let mut delete = JobRecordEntity::delete_many()
            .filter(job_record::Column::IsSettled.eq(true))
            .filter(job_record::Column::SettledAt.lt(cutoff));
        if !queue_names.is_empty() {
            delete = delete.filter(job_record::Column::QueueName.is_in(queue_names.iter().cloned()));
        }

        let result = delete.exec(&*conn).await.map_err(query_error)?;
        Ok(result.rows_affected)
    }

    async fn requeue_stale(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError> {
        let conn = self.connection().await?;
        let now = Utc::now();
        let stale = Condition::all()
            .add(job_record::Column::State.eq(JobState::Running.as_str()))
            .add(job_record::Column::UpdatedAt.lt(older_than));

        let txn = conn.begin().await.map_err(query_error)?;

        let retried = JobRecordEntity::update_many()
            .col_expr(job_record::Column::State, Expr::value(JobState::Retrying.as_str()))
            .col_expr(job_record::Column::Error, Expr::value(ABANDONED_JOB_ERROR))
            .col_expr(job_record::Column::UpdatedAt, Expr::value(now))
            .filter(stale.clone())
            .filter(Expr::col(job_record::Column::Attempts).lte(Expr::col(job_record::Column::Retries)))
            .exec(&txn)
            .await
            .map_err(query_error)?;

        // Whatever is still RUNNING and stale has no retries left.
        let failed = JobRecordEntity::update_many()
            .col_expr(job_record::Column::State, Expr::value(JobState::Failed.as_str()))
            .col_expr(job_record::Column::Error, Expr::value(ABANDONED_JOB_ERROR))
            .col_expr(job_record::Column::IsSettled, Expr::value(true))
            .col_expr(job_record::Column::SettledAt, Expr::value(now))
            .col_expr(job_record::Column::UpdatedAt, Expr::value(now))
            .filter(stale)
            .exec(&txn)
            .await
            .map_err(query_error)?;

        txn.commit().await.map_err(query_error)?;
        Ok(retried.rows_affected + failed.rows_affected)
    }

    async fn stats(&self, queue_name: Option<&str>) -> Result<QueueStats, StoreError> {
        let conn = self.connection().await?;

        let mut query = JobRecordEntity::find()
            .select_only()
            .column(job_record::Column::State)
            .column_as(Expr::col(job_record::Column::Id).count(), "count")
            .group_by(job_record::Column::State);
        if let Some(queue_name) = queue_name {
            query = query.filter(job_record::Column::QueueName.eq(queue_name));
        }

        let rows: Vec<(String, i64)> = query
            .into_tuple()
            .all(&*conn)
            .await
            .map_err(query_error)?;

        let mut stats = QueueStats::default();
        for (state, count) in rows {
            let state: JobState = state
                .parse()
                .map_err(|e: mercato_core::error::UnknownJobState| {
                    StoreError::Serialization(e.to_string())
                })?;
            stats.record(state, count.max(0) as u64);
        }
        Ok(stats)
    }

    async fn acquire_worker_lease(&self, worker_id: &str, ttl: Duration) -> Result<(), StoreError> {
        if !self.single_writer() {
            return Ok(());
        }
        let conn = self.connection().await?;
        let now = Utc::now();
        let txn = conn.begin().await.map_err(query_error)?;

        match LeaseEntity::find_by_id(EMBEDDED_WORKER_LEASE.to_string())
            .one(&txn)
            .await
            .map_err(query_error)?
        {
            Some(lease) if lease.holder != worker_id => {
                let age = (now - lease.heartbeat_at).to_std().unwrap_or(Duration::ZERO);
                if age < ttl {
                    return Err(StoreError::LeaseHeld {
                        holder: lease.holder,
                    });
                }
                tracing::warn!(
                    previous = %lease.holder,
                    worker = %worker_id,
                    "Taking over expired embedded worker lease"
                );
                let mut active: job_worker_lease::ActiveModel = lease.into();
                active.holder = Set(worker_id.to_string());
                active.heartbeat_at = Set(now);
                active.update(&txn).await.map_err(query_error)?;
            }
            Some(lease) => {
                let mut active: job_worker_lease::ActiveModel = lease.into();
                active.heartbeat_at = Set(now);
                active.update(&txn).await.map_err(query_error)?;
            }
            None => {
                job_worker_lease::ActiveModel {
                    name: Set(EMBEDDED_WORKER_LEASE.to_string()),
                    holder: Set(worker_id.to_string()),
                    heartbeat_at: Set(now),
                }
                .insert(&txn)
                .await
                .map_err(query_error)?;
                tracing::info!(worker = %worker_id, "Acquired embedded worker lease");
            }
        }

        txn.commit().await.map_err(query_error)?;
        Ok(())
    }

    async fn release_worker_lease(&self, worker_id: &str) -> Result<(), StoreError> {
        if !self.single_writer() {
            return Ok(());
        }
        let conn = self.connection().await?;
        LeaseEntity::delete_many()
            .filter(job_worker_lease::Column::Name.eq(EMBEDDED_WORKER_LEASE))
            .filter(job_worker_lease::Column::Holder.eq(worker_id))
            .exec(&*conn)
            .await
            .map_err(query_error)?;
        tracing::info!(worker = %worker_id, "Released embedded worker lease");
        Ok(())
    }
}
