use std::time::SystemTime;

use rcc_transform::normalized::NormalizedUsage;
use serde::{Deserialize, Serialize};

use crate::classification::Classification;
use crate::credential::{CredentialId, UnavailableReason};
use crate::headers::Headers;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    Downstream(DownstreamEvent),
    Upstream(UpstreamEvent),
    Operational(OperationalEvent),
}

/// One inbound request/response pair observed at the gateway's northbound
/// edge, before any routing decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownstreamEvent {
    pub trace_id: String,
    pub at: SystemTime,
    pub request_method: String,
    pub request_headers: Headers,
    pub request_path: String,
    pub response_status: Option<u16>,
    pub response_headers: Headers,
}

/// One attempt against a southbound provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamEvent {
    pub trace_id: String,
    pub at: SystemTime,
    pub virtual_model_id: String,
    pub pipeline_id: String,
    pub provider: String,
    pub credential_id: Option<CredentialId>,
    pub attempt_no: u32,
    pub model: String,
    pub response_status: Option<u16>,
    pub classification: Classification,
    pub usage: Option<NormalizedUsage>,
    pub error_message: Option<String>,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OperationalEvent {
    UnavailableStart(UnavailableStartEvent),
    UnavailableEnd(UnavailableEndEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnavailableStartEvent {
    pub at: SystemTime,
    pub credential_id: CredentialId,
    pub reason: UnavailableReason,
    pub until: SystemTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnavailableEndEvent {
    pub at: SystemTime,
    pub credential_id: CredentialId,
}
