use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(JobRecord::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(JobRecord::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(JobRecord::QueueName).string_len(255).not_null())
                    .col(ColumnDef::new(JobRecord::Data).json().not_null())
                    .col(ColumnDef::new(JobRecord::State).string_len(16).not_null())
                    .col(
                        ColumnDef::new(JobRecord::Progress)
                            .small_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(JobRecord::Result).json().null())
                    .col(ColumnDef::new(JobRecord::Error).text().null())
                    .col(
                        ColumnDef::new(JobRecord::StartedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(JobRecord::SettledAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(JobRecord::IsSettled)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(JobRecord::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(JobRecord::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(JobRecord::Retries)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(JobRecord::Attempts)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .to_owned(),
            )
            .await?;

        // Claim path: WHERE queue_name = ? AND state IN (...) ORDER BY created_at
        manager
            .create_index(
                Index::create()
                    .name("idx_job_record_queue_state")
                    .table(JobRecord::Table)
                    .col(JobRecord::QueueName)
                    .col(JobRecord::State)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_job_record_settled_at")
                    .table(JobRecord::Table)
                    .col(JobRecord::IsSettled)
                    .col(JobRecord::SettledAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(JobWorkerLease::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(JobWorkerLease::Name)
                            .string_len(64)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(JobWorkerLease::Holder).string_len(255).not_null())
                    .col(
                        ColumnDef::new(JobWorkerLease::HeartbeatAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(JobWorkerLease::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(JobRecord::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum JobRecord {
    Table,
    Id,
    QueueName,
    Data,
    State,
    Progress,
    Result,
    Error,
    StartedAt,
    SettledAt,
    IsSettled,
    CreatedAt,
    UpdatedAt,
    Retries,
    Attempts,
}

#[derive(DeriveIden)]
enum JobWorkerLease {
    Table,
    Name,
    Holder,
    HeartbeatAt,
}
