use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::classification::Classification;
use crate::events::{Event, OperationalEvent, UnavailableStartEvent};
use crate::EventHub;

use super::quota::Quota;
use super::secret::Secret;
use super::state::{CredentialId, SlotStatus, UnavailableReason};
use super::unavailable_queue::UnavailableQueue;

/// How `acquire` chooses among a provider's active slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionPolicy {
    RoundRobin,
    Weighted,
    Failover,
}

/// Consecutive failures before a slot is cooled down, and the exponential
/// backoff schedule applied to the cooldown duration.
const FAILURE_THRESHOLD: u32 = 3;
const BASE_COOLDOWN: Duration = Duration::from_secs(60);
const MAX_COOLDOWN: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone)]
pub enum AcquireError {
    ProviderUnknown,
    NoActiveCredentials,
}

struct CredentialSlot {
    secret: Secret,
    name: Option<String>,
    weight: u32,
    quota: Quota,
    consecutive_failures: u32,
}

/// Holds every credential slot for every provider plus its live status and
/// quota accounting. A `ReleaseHandle` returned from `acquire` must be used
/// to report the call's outcome, which drives cooldown and blacklist
/// transitions.
pub struct CredentialPool {
    slots: RwLock<HashMap<CredentialId, CredentialSlot>>,
    by_provider: RwLock<HashMap<String, Vec<CredentialId>>>,
    fingerprints: RwLock<HashMap<(String, String), CredentialId>>,
    statuses: Arc<RwLock<HashMap<CredentialId, SlotStatus>>>,
    rr_cursor: RwLock<HashMap<String, usize>>,
    next_id: AtomicI64,
    events: EventHub,
    queue: Arc<UnavailableQueue>,
}

impl CredentialPool {
    pub fn new(events: EventHub) -> Arc<Self> {
        let statuses = Arc::new(RwLock::new(HashMap::new()));
        let queue = Arc::new(UnavailableQueue::new());
        queue.clone().spawn_recover_task(statuses.clone(), events.clone());
        Arc::new(Self {
            slots: RwLock::new(HashMap::new()),
            by_provider: RwLock::new(HashMap::new()),
            fingerprints: RwLock::new(HashMap::new()),
            statuses,
            rr_cursor: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
            events,
            queue,
        })
    }

    pub fn events(&self) -> &EventHub {
        &self.events
    }

    /// Inserts a new slot, or returns the id of an existing slot whose
    /// secret material is identical.
    pub async fn insert(
        &self,
        provider: impl Into<String>,
        secret: Secret,
        weight: u32,
        rpm_limit: Option<u32>,
        rpd_limit: Option<u32>,
    ) -> CredentialId {
        self.insert_named(provider, None, secret, weight, rpm_limit, rpd_limit)
            .await
    }

    /// Like [`insert`](Self::insert) but records an optional slot name so
    /// [`Target::credential_selector`](crate::config::Target) can pin a
    /// virtual model's target to one specific slot.
    pub async fn insert_named(
        &self,
        provider: impl Into<String>,
        name: Option<String>,
        secret: Secret,
        weight: u32,
        rpm_limit: Option<u32>,
        rpd_limit: Option<u32>,
    ) -> CredentialId {
        let provider = provider.into();
        let fingerprint = (provider.clone(), secret.fingerprint());

        if let Some(existing) = self.fingerprints.read().await.get(&fingerprint).copied() {
            return existing;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.slots.write().await.insert(
            id,
            CredentialSlot {
                secret,
                name,
                weight,
                quota: Quota::new(rpm_limit, rpd_limit),
                consecutive_failures: 0,
            },
        );
        self.fingerprints.write().await.insert(fingerprint, id);
        self.by_provider.write().await.entry(provider).or_default().push(id);
        self.statuses.write().await.insert(id, SlotStatus::Active);
        id
    }

    /// The secret material behind a slot, for the adapter's `prepare` step.
    pub async fn secret_of(&self, id: CredentialId) -> Option<Secret> {
        self.slots.read().await.get(&id).map(|s| s.secret.clone())
    }

    pub async fn status(&self, id: CredentialId) -> Option<SlotStatus> {
        self.statuses.read().await.get(&id).cloned()
    }

    pub async fn blacklist(&self, id: CredentialId, reason: impl Into<String>) {
        self.statuses
            .write()
            .await
            .insert(id, SlotStatus::Blacklisted { reason: reason.into() });
    }

    pub async fn restore(&self, id: CredentialId) {
        if let Some(slot) = self.slots.write().await.get_mut(&id) {
            slot.consecutive_failures = 0;
        }
        self.statuses.write().await.insert(id, SlotStatus::Active);
    }

    pub async fn set_disabled(&self, id: CredentialId, disabled: bool) {
        let mut statuses = self.statuses.write().await;
        if disabled {
            statuses.insert(id, SlotStatus::Disabled);
        } else if matches!(statuses.get(&id), Some(SlotStatus::Disabled)) {
            statuses.insert(id, SlotStatus::Active);
        }
    }

    async fn active_candidates(&self, provider: &str) -> Result<Vec<CredentialId>, AcquireError> {
        let ids = {
            let guard = self.by_provider.read().await;
            guard.get(provider).cloned().ok_or(AcquireError::ProviderUnknown)?
        };
        let statuses = self.statuses.read().await;
        let now = Instant::now();
        let mut slots = self.slots.write().await;
        let mut candidates = Vec::new();
        for id in ids {
            if !statuses.get(&id).is_none_or(SlotStatus::is_active) {
                continue;
            }
            if let Some(slot) = slots.get_mut(&id)
                && slot.quota.has_capacity(now)
            {
                candidates.push(id);
            }
        }
        Ok(candidates)
    }

    /// Selects a slot under `policy`, marks one unit of quota consumed, and
    /// returns a handle the caller must report the outcome through.
    pub async fn acquire(
        self: &Arc<Self>,
        provider: &str,
        policy: SelectionPolicy,
    ) -> Result<(CredentialId, ReleaseHandle), AcquireError> {
        let candidates = self.active_candidates(provider).await?;
        if candidates.is_empty() {
            return Err(AcquireError::NoActiveCredentials);
        }

        let chosen = match policy {
            SelectionPolicy::Failover => candidates[0],
            SelectionPolicy::RoundRobin => {
                let mut cursor = self.rr_cursor.write().await;
                let slot = cursor.entry(provider.to_string()).or_insert(0);
                let id = candidates[*slot % candidates.len()];
                *slot = slot.wrapping_add(1);
                id
            }
            SelectionPolicy::Weighted => {
                let slots = self.slots.read().await;
                let total: u32 = candidates
                    .iter()
                    .map(|id| slots.get(id).map(|s| s.weight.max(1)).unwrap_or(1))
                    .sum();
                let mut cursor = self.rr_cursor.write().await;
                let counter = cursor.entry(provider.to_string()).or_insert(0);
                let mut pick = (*counter as u32) % total.max(1);
                *counter = counter.wrapping_add(1);
                let mut chosen = candidates[0];
                for id in &candidates {
                    let weight = slots.get(id).map(|s| s.weight.max(1)).unwrap_or(1);
                    if pick < weight {
                        chosen = *id;
                        break;
                    }
                    pick -= weight;
                }
                chosen
            }
        };

        let now = Instant::now();
        self.slots
            .write()
            .await
            .get_mut(&chosen)
            .expect("candidate came from slots map")
            .quota
            .consume(now);

        Ok((
            chosen,
            ReleaseHandle {
                pool: self.clone(),
                id: chosen,
                reported: false,
            },
        ))
    }

    /// Selects the single slot named `name` within `provider`, failing
    /// closed (never falling back to another slot) if it is missing,
    /// cooling, blacklisted, disabled, or quota-exhausted.
    pub async fn acquire_named(
        self: &Arc<Self>,
        provider: &str,
        name: &str,
    ) -> Result<(CredentialId, ReleaseHandle), AcquireError> {
        let candidates = self.active_candidates(provider).await?;
        let now = Instant::now();
        let mut slots = self.slots.write().await;
        let chosen = candidates
            .into_iter()
            .find(|id| slots.get(id).and_then(|s| s.name.as_deref()) == Some(name))
            .ok_or(AcquireError::NoActiveCredentials)?;
        slots
            .get_mut(&chosen)
            .expect("candidate came from slots map")
            .quota
            .consume(now);
        drop(slots);

        Ok((
            chosen,
            ReleaseHandle {
                pool: self.clone(),
                id: chosen,
                reported: false,
            },
        ))
    }

    async fn report_outcome(&self, id: CredentialId, outcome: Classification) {
        if let Some(slot) = self.slots.write().await.get_mut(&id) {
            slot.quota.release();
        }

        if outcome == Classification::Success {
            if let Some(slot) = self.slots.write().await.get_mut(&id) {
                slot.consecutive_failures = 0;
            }
            return;
        }
        if outcome != Classification::AuthFailure {
            return;
        }

        let failures = {
            let mut slots = self.slots.write().await;
            let Some(slot) = slots.get_mut(&id) else {
                return;
            };
            slot.consecutive_failures += 1;
            slot.consecutive_failures
        };
        if failures < FAILURE_THRESHOLD {
            return;
        }

        let backoff_steps = failures - FAILURE_THRESHOLD;
        let cooldown = BASE_COOLDOWN
            .saturating_mul(1u32 << backoff_steps.min(6))
            .min(MAX_COOLDOWN);
        let reason = match outcome {
            Classification::AuthFailure => UnavailableReason::AuthInvalid,
            Classification::ServerError => UnavailableReason::Upstream5xx,
            Classification::Timeout | Classification::NetworkError => UnavailableReason::Timeout,
            _ => UnavailableReason::Unknown,
        };
        self.cool_down(id, cooldown, reason).await;
    }

    async fn cool_down(&self, id: CredentialId, duration: Duration, reason: UnavailableReason) {
        let until = Instant::now() + duration;
        self.statuses
            .write()
            .await
            .insert(id, SlotStatus::Cooling { until, reason });
        self.queue.push(until, id).await;

        let until_wall = SystemTime::now().checked_add(duration).unwrap_or_else(SystemTime::now);
        self.events
            .emit(Event::Operational(OperationalEvent::UnavailableStart(
                UnavailableStartEvent {
                    at: SystemTime::now(),
                    credential_id: id,
                    reason,
                    until: until_wall,
                },
            )))
            .await;
    }
}

/// Returned from [`CredentialPool::acquire`]. The caller must call
/// [`ReleaseHandle::report`] exactly once with the call's classification;
/// dropping without reporting releases the in-flight slot but leaves
/// cooldown bookkeeping untouched, which is treated as a bug in debug
/// builds via the embedded `reported` flag.
pub struct ReleaseHandle {
    pool: Arc<CredentialPool>,
    id: CredentialId,
    reported: bool,
}

impl ReleaseHandle {
    pub fn credential_id(&self) -> CredentialId {
        self.id
    }

    pub async fn report(mut self, outcome: Classification) {
        self.reported = true;
        self.pool.report_outcome(self.id, outcome).await;
    }
}

impl Drop for ReleaseHandle {
    fn drop(&mut self) {
        if !self.reported {
            let pool = self.pool.clone();
            let id = self.id;
            tokio::spawn(async move {
                pool.report_outcome(id, Classification::NetworkError).await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventHub;

    async fn pool() -> Arc<CredentialPool> {
        CredentialPool::new(EventHub::new(16))
    }

    #[tokio::test]
    async fn dedups_slots_with_identical_secret_material() {
        let pool = pool().await;
        let a = pool
            .insert("openai", Secret::ApiKey("sk-1".into()), 1, None, None)
            .await;
        let b = pool
            .insert("openai", Secret::ApiKey("sk-1".into()), 1, None, None)
            .await;
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn dedup_is_scoped_per_provider() {
        let pool = pool().await;
        let a = pool
            .insert("openai", Secret::ApiKey("shared".into()), 1, None, None)
            .await;
        let b = pool
            .insert("azure", Secret::ApiKey("shared".into()), 1, None, None)
            .await;
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn round_robin_cycles_through_candidates() {
        let pool = pool().await;
        let a = pool.insert("openai", Secret::ApiKey("a".into()), 1, None, None).await;
        let b = pool.insert("openai", Secret::ApiKey("b".into()), 1, None, None).await;

        let (first, h1) = pool.acquire("openai", SelectionPolicy::RoundRobin).await.unwrap();
        h1.report(Classification::Success).await;
        let (second, h2) = pool.acquire("openai", SelectionPolicy::RoundRobin).await.unwrap();
        h2.report(Classification::Success).await;

        assert_ne!(first, second);
        assert!([a, b].contains(&first));
        assert!([a, b].contains(&second));
    }

    #[tokio::test]
    async fn cools_down_after_consecutive_auth_failures() {
        let pool = pool().await;
        let id = pool.insert("openai", Secret::ApiKey("a".into()), 1, None, None).await;

        for _ in 0..FAILURE_THRESHOLD {
            let (acquired, handle) = pool.acquire("openai", SelectionPolicy::Failover).await.unwrap();
            assert_eq!(acquired, id);
            handle.report(Classification::AuthFailure).await;
        }

        match pool.status(id).await {
            Some(SlotStatus::Cooling { .. }) => {}
            other => panic!("expected cooling status, got {other:?}"),
        }
        assert!(matches!(
            pool.acquire("openai", SelectionPolicy::Failover).await,
            Err(AcquireError::NoActiveCredentials)
        ));
    }

    #[tokio::test]
    async fn server_errors_never_cool_down_a_credential() {
        let pool = pool().await;
        let id = pool.insert("openai", Secret::ApiKey("a".into()), 1, None, None).await;

        for _ in 0..(FAILURE_THRESHOLD * 3) {
            let (acquired, handle) = pool.acquire("openai", SelectionPolicy::Failover).await.unwrap();
            assert_eq!(acquired, id);
            handle.report(Classification::ServerError).await;
        }

        assert!(matches!(pool.status(id).await, Some(SlotStatus::Active)));
        assert!(pool.acquire("openai", SelectionPolicy::Failover).await.is_ok());
    }

    #[tokio::test]
    async fn unknown_provider_is_an_error() {
        let pool = pool().await;
        assert!(matches!(
            pool.acquire("nope", SelectionPolicy::Failover).await,
            Err(AcquireError::ProviderUnknown)
        ));
    }
}
