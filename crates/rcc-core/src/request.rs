//! `RequestContext` (spec §3): the per-request state threaded through the
//! manager, scheduler, and pipeline for the lifetime of exactly one
//! request.

use std::time::{Duration, Instant};

use rcc_transform::normalized::NormalizedRequest;
use tokio_util::sync::CancellationToken;

/// Created per incoming request and dropped once a response (or error) is
/// returned to the caller. Never persisted; the durable record of a
/// request's lifecycle is its [`rcc_provider_core::TraceRecord`].
pub struct RequestContext {
    pub request_id: String,
    pub virtual_model_id: String,
    pub request: NormalizedRequest,
    deadline_at: Instant,
    pub cancellation: CancellationToken,
    /// Ids of pipelines already tried (and failed) for this request, so the
    /// scheduler's retry re-selection never repeats one (spec §4.4).
    pub tried_pipelines: Vec<String>,
    pub attempts_so_far: u32,
}

impl RequestContext {
    pub fn new(
        request_id: String,
        virtual_model_id: String,
        request: NormalizedRequest,
        deadline: Duration,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            request_id,
            virtual_model_id,
            request,
            deadline_at: Instant::now() + deadline,
            cancellation,
            tried_pipelines: Vec::new(),
            attempts_so_far: 0,
        }
    }

    /// Time remaining before this request's deadline. Zero if already past.
    pub fn remaining(&self) -> Duration {
        self.deadline_at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn mark_tried(&mut self, pipeline_id: &str) {
        self.tried_pipelines.push(pipeline_id.to_string());
        self.attempts_so_far += 1;
    }

    pub fn already_tried(&self, pipeline_id: &str) -> bool {
        self.tried_pipelines.iter().any(|id| id == pipeline_id)
    }
}
