//! Lease-based leader election
//!
//! Only the holder of the `coordination.k8s.io/v1` Lease runs the
//! controllers. Standby replicas wait in [`LeaderElector::acquire`] until the
//! lease expires or is released. The admission and health servers run on
//! every replica regardless of leadership.

use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Api, PostParams};
use kube::Client;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const LEASE_NAME: &str = "multiarch-tuning-operator-leader";
const LEASE_DURATION_SECS: i32 = 15;
const RENEW_INTERVAL: Duration = Duration::from_secs(10);
const RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// What to do with the lease as found on the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LeaseAction {
    /// We hold it; refresh renewTime
    Renew,
    /// Expired or released; take it over
    Takeover,
    /// Another identity holds a live lease
    Wait,
}

fn lease_action(spec: Option<&LeaseSpec>, identity: &str, now: DateTime<Utc>) -> LeaseAction {
    let holder = spec.and_then(|s| s.holder_identity.as_deref());
    if holder == Some(identity) {
        return LeaseAction::Renew;
    }
    if holder.is_none() || is_expired(spec, now) {
        return LeaseAction::Takeover;
    }
    LeaseAction::Wait
}

fn is_expired(spec: Option<&LeaseSpec>, now: DateTime<Utc>) -> bool {
    let duration_secs = spec
        .and_then(|s| s.lease_duration_seconds)
        .unwrap_or(LEASE_DURATION_SECS) as i64;
    match spec.and_then(|s| s.renew_time.as_ref()) {
        Some(MicroTime(t)) => now.signed_duration_since(*t).num_seconds() > duration_secs,
        None => true,
    }
}

fn identity_from_env() -> String {
    std::env::var("POD_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| format!("multiarch-tuning-operator-{:08x}", rand::random::<u32>()))
}

pub struct LeaderElector {
    lease_api: Api<Lease>,
    identity: String,
}

impl LeaderElector {
    pub fn new(client: Client, namespace: &str) -> Self {
        let identity = identity_from_env();
        info!(identity = %identity, namespace = %namespace, lease = LEASE_NAME, "Initialized leader elector");
        Self {
            lease_api: Api::namespaced(client, namespace),
            identity,
        }
    }

    /// Blocks until the lease is acquired
    pub async fn acquire(&self) -> anyhow::Result<()> {
        info!(identity = %self.identity, "Waiting to acquire leader lease");
        loop {
            match self.try_acquire().await {
                Ok(true) => {
                    info!(identity = %self.identity, "Acquired leader lease");
                    return Ok(());
                }
                Ok(false) => debug!(retry_in = ?RETRY_INTERVAL, "Lease held by another replica"),
                Err(e) => warn!(error = %e, retry_in = ?RETRY_INTERVAL, "Lease acquisition failed"),
            }
            tokio::time::sleep(RETRY_INTERVAL).await;
        }
    }

    /// Renews the lease. `Ok(false)` means leadership was lost.
    pub async fn renew(&self) -> anyhow::Result<bool> {
        let lease = self.lease_api.get(LEASE_NAME).await?;
        match lease_action(lease.spec.as_ref(), &self.identity, Utc::now()) {
            LeaseAction::Renew => self.write(&lease, false).await,
            _ => Ok(false),
        }
    }

    /// Clears the holder so a standby replica can take over at once
    pub async fn release(&self) {
        let lease = match self.lease_api.get(LEASE_NAME).await {
            Ok(lease) => lease,
            Err(e) => {
                warn!(error = %e, "Failed to read lease for release");
                return;
            }
        };
        let holder = lease.spec.as_ref().and_then(|s| s.holder_identity.as_deref());
        if holder != Some(self.identity.as_str()) {
            debug!("Lease not held by this replica, nothing to release");
            return;
        }

        let mut released = lease.clone();
        if let Some(spec) = released.spec.as_mut() {
            spec.holder_identity = None;
        }
        match self
            .lease_api
            .replace(LEASE_NAME, &PostParams::default(), &released)
            .await
        {
            Ok(_) => info!(identity = %self.identity, "Released leader lease"),
            Err(e) => warn!(error = %e, "Failed to release leader lease"),
        }
    }

    pub fn renew_interval(&self) -> Duration {
        RENEW_INTERVAL
    }

    async fn try_acquire(&self) -> anyhow::Result<bool> {
        match self.lease_api.get_opt(LEASE_NAME).await? {
            None => self.create().await,
            Some(lease) => match lease_action(lease.spec.as_ref(), &self.identity, Utc::now()) {
                LeaseAction::Renew => self.write(&lease, false).await,
                LeaseAction::Takeover => self.write(&lease, true).await,
                LeaseAction::Wait => Ok(false),
            },
        }
    }

    async fn create(&self) -> anyhow::Result<bool> {
        let now = MicroTime(Utc::now());
        let lease = Lease {
            metadata: ObjectMeta {
                name: Some(LEASE_NAME.to_string()),
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: Some(self.identity.clone()),
                lease_duration_seconds: Some(LEASE_DURATION_SECS),
                acquire_time: Some(now.clone()),
                renew_time: Some(now),
                lease_transitions: Some(0),
                ..Default::default()
            }),
        };
        match self.lease_api.create(&PostParams::default(), &lease).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the lease; the carried resourceVersion turns a concurrent
    /// writer into a 409, reported as not acquired.
    async fn write(&self, existing: &Lease, takeover: bool) -> anyhow::Result<bool> {
        let updated = held_lease(existing, &self.identity, MicroTime(Utc::now()), takeover);
        match self
            .lease_api
            .replace(LEASE_NAME, &PostParams::default(), &updated)
            .await
        {
            Ok(_) => {
                debug!(takeover, "Wrote leader lease");
                Ok(true)
            }
            Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

fn held_lease(existing: &Lease, identity: &str, now: MicroTime, takeover: bool) -> Lease {
    let prev = existing.spec.clone().unwrap_or_default();
    let transitions = prev.lease_transitions.unwrap_or(0);
    let mut updated = existing.clone();
    updated.spec = Some(LeaseSpec {
        holder_identity: Some(identity.to_string()),
        lease_duration_seconds: Some(LEASE_DURATION_SECS),
        acquire_time: if takeover { Some(now.clone()) } else { prev.acquire_time.clone() },
        renew_time: Some(now),
        lease_transitions: Some(if takeover { transitions + 1 } else { transitions }),
        ..prev
    });
    updated
}
