use serde::{Deserialize, Serialize};
use tokio::time::Instant;

pub type CredentialId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnavailableReason {
    RateLimit,
    Timeout,
    Upstream5xx,
    AuthInvalid,
    ModelDisallow,
    Manual,
    Unknown,
}

/// A slot's authoritative status: one enum rather than two parallel
/// collections (an "active ids" set plus a "cooldowns" map) that would
/// need to stay in sync.
#[derive(Debug, Clone)]
pub enum SlotStatus {
    Active,
    Cooling {
        until: Instant,
        reason: UnavailableReason,
    },
    Blacklisted {
        reason: String,
    },
    Disabled,
}

impl SlotStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, SlotStatus::Active)
    }

    pub fn as_label(&self) -> &'static str {
        match self {
            SlotStatus::Active => "active",
            SlotStatus::Cooling { .. } => "cooling",
            SlotStatus::Blacklisted { .. } => "blacklisted",
            SlotStatus::Disabled => "disabled",
        }
    }
}
