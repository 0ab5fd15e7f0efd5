use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

/// One closed `TraceRecord` (spec §3, §4.8), durable and append-only.
/// `attempts` is stored as a single JSON blob rather than a child table:
/// trace records are read back whole (by request id, or as a recent
/// window for inspection), never queried attempt-by-attempt.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "trace_records")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique)]
    pub request_id: String,
    pub virtual_model_id: String,
    pub started_at: OffsetDateTime,
    pub ended_at: OffsetDateTime,
    pub outcome: String,
    pub attempts_json: String,
}

impl ActiveModelBehavior for ActiveModel {}
