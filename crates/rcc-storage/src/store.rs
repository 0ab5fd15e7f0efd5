use std::future::Future;
use std::pin::Pin;

use rcc_provider_core::trace::{AttemptRecord, RequestOutcome, TraceRecord, TraceStore};
use sea_orm::{
    ActiveModelTrait, ActiveValue, DatabaseConnection, EntityTrait, QueryOrder, Schema,
};
use time::OffsetDateTime;

use crate::db::connect_shared;
use crate::entities::trace_record;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sea_orm::DbErr),
    #[error("trace record serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Durable, append-only `TraceRecord` storage (spec §4.8, §6), backed by
/// the same SeaORM/SQLite stack the teacher uses for its traffic log.
#[derive(Clone)]
pub struct SeaOrmTraceStore {
    db: DatabaseConnection,
}

impl SeaOrmTraceStore {
    /// Reuses the process-wide connection for `dsn` if one is already open,
    /// so a reload or test harness that constructs more than one store
    /// against the same sqlite file doesn't open a second connection to it.
    pub async fn connect(dsn: &str) -> Result<Self, StoreError> {
        let db = connect_shared(dsn).await?;
        let store = Self { db };
        store.sync_schema().await?;
        Ok(store)
    }

    async fn sync_schema(&self) -> Result<(), StoreError> {
        Schema::new(self.db.get_database_backend())
            .builder()
            .register(crate::entities::TraceRecords)
            .sync(&self.db)
            .await?;
        Ok(())
    }

    pub async fn recent(&self, limit: u64) -> Result<Vec<TraceRecord>, StoreError> {
        let rows = trace_record::Entity::find()
            .order_by_desc(trace_record::Column::EndedAt)
            .limit(limit)
            .all(&self.db)
            .await?;
        rows.into_iter().map(row_to_record).collect()
    }

    pub async fn by_request_id(&self, request_id: &str) -> Result<Option<TraceRecord>, StoreError> {
        use sea_orm::{ColumnTrait, QueryFilter};
        let row = trace_record::Entity::find()
            .filter(trace_record::Column::RequestId.eq(request_id))
            .one(&self.db)
            .await?;
        row.map(row_to_record).transpose()
    }
}

fn row_to_record(row: trace_record::Model) -> Result<TraceRecord, StoreError> {
    let attempts: Vec<AttemptRecord> = serde_json::from_str(&row.attempts_json)?;
    let outcome: RequestOutcome =
        serde_json::from_value(serde_json::Value::String(row.outcome.clone()))?;
    Ok(TraceRecord {
        request_id: row.request_id,
        virtual_model_id: row.virtual_model_id,
        started_at: row.started_at.into(),
        ended_at: row.ended_at.into(),
        outcome,
        attempts,
    })
}

impl TraceStore for SeaOrmTraceStore {
    fn append<'a>(
        &'a self,
        record: TraceRecord,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let attempts_json = serde_json::to_string(&record.attempts)?;
            let outcome_json = serde_json::to_string(&record.outcome)?;
            let outcome = outcome_json.trim_matches('"').to_string();

            let model = trace_record::ActiveModel {
                id: ActiveValue::NotSet,
                request_id: ActiveValue::Set(record.request_id),
                virtual_model_id: ActiveValue::Set(record.virtual_model_id),
                started_at: ActiveValue::Set(system_time_to_offset(record.started_at)),
                ended_at: ActiveValue::Set(system_time_to_offset(record.ended_at)),
                outcome: ActiveValue::Set(outcome),
                attempts_json: ActiveValue::Set(attempts_json),
            };
            model.insert(&self.db).await?;
            Ok(())
        })
    }
}

fn system_time_to_offset(value: std::time::SystemTime) -> OffsetDateTime {
    OffsetDateTime::from(value)
}
