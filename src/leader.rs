//! Lease based leader election.
//!
//! Only one replica of the operator may run the controllers.  Replicas race
//! for a `coordination.k8s.io/v1` Lease named after the unique process name;
//! the holder renews it and stops when a renewal fails for longer than the
//! lease duration or another identity takes it over.

use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use kube::api::{ObjectMeta, PostParams};
use kube::{Api, Client};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

pub const LEASE_DURATION: Duration = Duration::from_secs(15);
pub const RENEW_INTERVAL: Duration = Duration::from_secs(5);
pub const RETRY_INTERVAL: Duration = Duration::from_secs(2);

/// Where the lease lives and who is asking for it.
#[derive(Clone, Debug, PartialEq)]
pub struct LeaderConfig {
    pub lease_name: String,
    pub namespace: String,
    pub identity: String,
    pub lease_duration: Duration,
}

impl LeaderConfig {
    /// Lease named after the process, in `SYSTEM_NAMESPACE`, held by the
    /// pod name (or host name).
    pub fn from_env(process_name: &str) -> Self {
        let var = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());
        Self {
            lease_name: process_name.to_string(),
            namespace: var("SYSTEM_NAMESPACE").unwrap_or_else(|| "default".to_string()),
            identity: var("POD_NAME")
                .or_else(|| var("HOSTNAME"))
                .unwrap_or_else(|| format!("{process_name}-{}", std::process::id())),
            lease_duration: LEASE_DURATION,
        }
    }
}

/// What to do with the lease as last observed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LeaseAction {
    /// No lease exists yet.
    Create,
    /// We hold it; push the renew time forward.
    Renew,
    /// Nobody holds it, or the holder let it expire.
    Acquire,
    /// Someone else holds a live lease.
    Wait,
}

/// Decide how to treat `lease` at `now`.
pub fn decide(lease: Option<&Lease>, identity: &str, now: DateTime<Utc>, default_duration: Duration) -> LeaseAction {
    let Some(lease) = lease else {
        return LeaseAction::Create;
    };
    let spec = lease.spec.clone().unwrap_or_default();
    let holder = spec.holder_identity.as_deref().unwrap_or_default();
    if holder == identity {
        return LeaseAction::Renew;
    }
    if holder.is_empty() {
        return LeaseAction::Acquire;
    }

    let duration = spec
        .lease_duration_seconds
        .and_then(|s| u64::try_from(s).ok())
        .map(Duration::from_secs)
        .unwrap_or(default_duration);
    let last_seen = spec.renew_time.or(spec.acquire_time).map(|t| t.0);
    match last_seen {
        Some(renewed) => {
            let expires = renewed + chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX);
            if expires < now {
                LeaseAction::Acquire
            } else {
                LeaseAction::Wait
            }
        }
        None => LeaseAction::Acquire,
    }
}

/// Lease spec to write for `action`.
pub fn desired_spec(
    current: Option<&LeaseSpec>,
    action: LeaseAction,
    identity: &str,
    now: DateTime<Utc>,
    duration: Duration,
) -> LeaseSpec {
    let current = current.cloned().unwrap_or_default();
    let seconds = i32::try_from(duration.as_secs()).unwrap_or(i32::MAX);
    match action {
        LeaseAction::Renew => LeaseSpec {
            renew_time: Some(MicroTime(now)),
            lease_duration_seconds: Some(seconds),
            ..current
        },
        LeaseAction::Create | LeaseAction::Acquire | LeaseAction::Wait => LeaseSpec {
            holder_identity: Some(identity.to_string()),
            lease_duration_seconds: Some(seconds),
            acquire_time: Some(MicroTime(now)),
            renew_time: Some(MicroTime(now)),
            lease_transitions: Some(match action {
                LeaseAction::Create => 0,
                _ => current.lease_transitions.unwrap_or(0) + 1,
            }),
            ..current
        },
    }
}

pub struct LeaderElector {
    api: Api<Lease>,
    config: LeaderConfig,
}

impl LeaderElector {
    pub fn new(client: Client, config: LeaderConfig) -> Self {
        Self {
            api: Api::namespaced(client, &config.namespace),
            config,
        }
    }

    /// One round of the election.  Returns whether we hold the lease
    /// afterwards.  Losing a write race counts as not holding it.
    pub async fn try_acquire_or_renew(&self) -> Result<bool> {
        let name = &self.config.lease_name;
        let current = self.api.get_opt(name).await?;
        let now = Utc::now();
        let action = decide(current.as_ref(), &self.config.identity, now, self.config.lease_duration);
        if action == LeaseAction::Wait {
            return Ok(false);
        }

        let spec = desired_spec(
            current.as_ref().and_then(|l| l.spec.as_ref()),
            action,
            &self.config.identity,
            now,
            self.config.lease_duration,
        );
        let written = match current {
            None => {
                let lease = Lease {
                    metadata: ObjectMeta {
                        name: Some(name.clone()),
                        namespace: Some(self.config.namespace.clone()),
                        ..Default::default()
                    },
                    spec: Some(spec),
                };
                self.api.create(&PostParams::default(), &lease).await
            }
            Some(mut lease) => {
                // The resourceVersion from the read guards against a
                // concurrent writer.
                lease.spec = Some(spec);
                self.api.replace(name, &PostParams::default(), &lease).await
            }
        };
        match written {
            Ok(_) => {
                if action != LeaseAction::Renew {
                    info!(lease = %name, identity = %self.config.identity, "acquired leader lease");
                }
                Ok(true)
            }
            Err(e) => match Error::from_kube(e, format!("lease {name}")) {
                Error::Conflict(msg) => {
                    debug!(%msg, "lost lease write race");
                    Ok(false)
                }
                other => Err(other),
            },
        }
    }

    /// Block until this process holds the lease.
    pub async fn acquire(&self) -> Result<()> {
        info!(
            lease = %self.config.lease_name,
            namespace = %self.config.namespace,
            identity = %self.config.identity,
            "waiting for leader lease"
        );
        loop {
            match self.try_acquire_or_renew().await {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(e) => warn!(error = %e, "leader election attempt failed"),
            }
            tokio::time::sleep(RETRY_INTERVAL).await;
        }
    }

    /// Keep renewing the lease.  Returns an error once it is lost.
    pub async fn hold(&self) -> Result<()> {
        let mut last_renewed = tokio::time::Instant::now();
        let mut ticker = tokio::time::interval(RENEW_INTERVAL);
        loop {
            ticker.tick().await;
            match self.try_acquire_or_renew().await {
                Ok(true) => last_renewed = tokio::time::Instant::now(),
                Ok(false) => {
                    return Err(Error::LeaderElection(format!(
                        "lease {} taken over by another holder",
                        self.config.lease_name
                    )));
                }
                Err(e) if last_renewed.elapsed() < self.config.lease_duration => {
                    warn!(error = %e, "failed to renew leader lease, retrying");
                }
                Err(e) => {
                    return Err(Error::LeaderElection(format!(
                        "could not renew lease {}: {e}",
                        self.config.lease_name
                    )));
                }
            }
        }
    }
}
