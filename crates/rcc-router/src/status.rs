//! `GET /status` (spec §6): liveness plus a per-scheduler summary. The
//! richer trace/metrics surface a UI would want lives behind
//! `rcc-storage`'s own query methods, not here — this endpoint is the
//! minimal contract the spec actually asks the core to expose.

use axum::Json;
use axum::extract::State;
use rcc_core::{SchedulerMetrics, SchedulerSummary};
use serde::Serialize;

use crate::RouterState;

#[derive(Serialize)]
pub struct StatusResponse {
    pub virtual_models: Vec<String>,
    pub schedulers: Vec<SchedulerSummary>,
    pub metrics: Vec<SchedulerMetrics>,
}

pub async fn status(State(state): State<RouterState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        virtual_models: state.manager.list_virtual_models(),
        schedulers: state.manager.status(),
        metrics: state.manager.tracker().scheduler_metrics(),
    })
}
