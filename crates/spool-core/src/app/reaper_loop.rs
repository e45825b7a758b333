//! ReaperLoop - releases reservations whose worker went away.
//!
//! # Flow
//! 1. every `interval`, compute `older_than = now - recovery_age`
//! 2. `recover_dead(older_than)` on the tenant's outbox and inbox
//! 3. recovered rows are claimable again immediately

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::blocking;
use crate::config::StoreConfig;
use crate::domain::{QueueError, TenantId};
use crate::ports::Clock;
use crate::queue::{InboxTable, OutboxTable, Store};

/// Rows released by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Recovered {
    pub outbox: u64,
    pub inbox: u64,
}

impl Recovered {
    pub fn total(&self) -> u64 {
        self.outbox + self.inbox
    }
}

#[derive(Debug, Clone)]
pub struct ReaperLoop {
    outbox: OutboxTable,
    inbox: InboxTable,
    recovery_age: Duration,
    interval: Duration,
}

impl ReaperLoop {
    pub fn new(
        outbox: OutboxTable,
        inbox: InboxTable,
        recovery_age: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            outbox,
            inbox,
            recovery_age,
            interval,
        }
    }

    /// Sweep `tenant_id`'s tables with the configured age and interval.
    pub fn from_config(store: &Store, tenant_id: TenantId, config: &StoreConfig) -> Self {
        Self::new(
            store.outbox(tenant_id),
            store.inbox(tenant_id),
            config.recovery_age(),
            config.reaper_interval(),
        )
    }

    /// Reservations stamped before this instant count as dead.
    pub fn cutoff(&self) -> DateTime<Utc> {
        let now = self.outbox.clock().now();
        chrono::Duration::from_std(self.recovery_age)
            .ok()
            .and_then(|age| now.checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub async fn sweep_once(&self) -> Result<Recovered, QueueError> {
        let older_than = self.cutoff();
        let outbox = self.outbox.clone();
        let inbox = self.inbox.clone();
        blocking(move || {
            Ok(Recovered {
                outbox: outbox.recover_dead(older_than)?,
                inbox: inbox.recover_dead(older_than)?,
            })
        })
        .await
    }

    /// Sweep on every tick until `shutdown` flips to true or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let tenant = self.outbox.tenant_id();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }

            match self.sweep_once().await {
                Ok(recovered) if recovered.total() > 0 => {
                    info!(
                        tenant = %tenant,
                        outbox = recovered.outbox,
                        inbox = recovered.inbox,
                        "reaper released dead reservations"
                    );
                }
                Ok(_) => debug!(tenant = %tenant, "reaper found nothing"),
                Err(err) => warn!(tenant = %tenant, error = %err, "reaper sweep failed"),
            }
        }
        debug!(tenant = %tenant, "reaper stopped");
    }
}
