//! The Tracker's (C8) append-only data model (spec §3 `TraceRecord`, §4.8).
//! Defined here, rather than in `rcc-core`, so `rcc-storage` can implement
//! durable persistence against the same shape the in-process aggregator
//! uses, with no conversion layer between them.

use std::future::Future;
use std::pin::Pin;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::classification::Classification;
use crate::credential::CredentialId;

/// Final disposition of one request, recorded once its trace record closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestOutcome {
    Success,
    AllTargetsFailed,
    NoAvailableTargets,
    UnknownVirtualModel,
    AuthExhausted,
    Overloaded,
    Cancelled,
    BadRequest,
}

/// One attempt against one pipeline, nested inside a [`TraceRecord`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub pipeline_id: String,
    pub provider_id: String,
    pub credential_id: Option<CredentialId>,
    pub started_at: SystemTime,
    pub ended_at: SystemTime,
    pub outcome: Classification,
    pub error_category: Option<String>,
}

/// One request's full lifecycle, closed on final outcome. Durable storage
/// is append-only and keyed by `request_id` (spec §4.8, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceRecord {
    pub request_id: String,
    pub virtual_model_id: String,
    pub started_at: SystemTime,
    pub ended_at: SystemTime,
    pub outcome: RequestOutcome,
    pub attempts: Vec<AttemptRecord>,
}

impl TraceRecord {
    pub fn total_duration(&self) -> std::time::Duration {
        self.ended_at
            .duration_since(self.started_at)
            .unwrap_or_default()
    }
}

/// Durable persistence for closed `TraceRecord`s. Lives here (rather than
/// in `rcc-core`, which assembles records, or `rcc-storage`, which
/// persists them) so neither of those crates needs to depend on the
/// other. `rcc-storage` implements this against SeaORM/SQLite.
pub trait TraceStore: Send + Sync {
    fn append<'a>(
        &'a self,
        record: TraceRecord,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;
}
