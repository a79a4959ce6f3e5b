//! Job record entity for SeaORM.

use sea_orm::entity::prelude::*;
use sea_orm::{NotSet, Set};

use mercato_core::{Job, JobId, JobRecord, JobState, StoreError};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "job_record")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub queue_name: String,
    pub data: Json,
    pub state: String,
    pub progress: i16,
    pub result: Option<Json>,
    #[sea_orm(column_type = "Text", nullable)]
    pub error: Option<String>,
    pub started_at: Option<DateTimeUtc>,
    pub settled_at: Option<DateTimeUtc>,
    pub is_settled: bool,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
    pub retries: i32,
    pub attempts: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// Conversion from SeaORM Model to domain Job.
impl TryFrom<Model> for Job {
    type Error = StoreError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        let state: JobState = model
            .state
            .parse()
            .map_err(|e: mercato_core::error::UnknownJobState| {
                StoreError::Serialization(e.to_string())
            })?;

        Ok(JobRecord {
            id: Some(JobId(model.id)),
            queue_name: model.queue_name,
            data: model.data,
            state,
            progress: model.progress.clamp(0, 100) as u8,
            result: model.result,
            error: model.error,
            created_at: model.created_at,
            started_at: model.started_at,
            settled_at: model.settled_at,
            updated_at: model.updated_at,
            retries: model.retries.max(0) as u32,
            attempts: model.attempts.max(0) as u32,
        }
        .into())
    }
}

/// Columns written whenever a job's state changes. Identity columns
/// (`id`, `queue_name`, `created_at`) are left unset.
pub fn mutable_columns(record: &JobRecord) -> ActiveModel {
    ActiveModel {
        id: NotSet,
        queue_name: NotSet,
        data: Set(record.data.clone()),
        state: Set(record.state.as_str().to_string()),
        progress: Set(record.progress as i16),
        result: Set(record.result.clone()),
        error: Set(record.error.clone()),
        started_at: Set(record.started_at),
        settled_at: Set(record.settled_at),
        is_settled: Set(record.is_settled()),
        created_at: NotSet,
        updated_at: Set(record.updated_at),
        retries: Set(record.retries as i32),
        attempts: Set(record.attempts as i32),
    }
}

/// A full insertable row for a new job.
pub fn new_row(record: &JobRecord) -> ActiveModel {
    ActiveModel {
        queue_name: Set(record.queue_name.clone()),
        created_at: Set(record.created_at),
        ..mutable_columns(record)
    }
}
