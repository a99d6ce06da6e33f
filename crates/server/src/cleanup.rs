//! Periodic removal of expired persisted grants.

use crate::error::GrantError;
use crate::grants::GrantStore;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};

/// Background task deleting expired grants on a fixed interval.
///
/// A failing cycle is logged and retried on the next tick; the loop itself never ends
/// on error.
#[derive(Clone, Debug)]
pub struct TokenCleanup {
    grants: GrantStore,
    interval: Duration,
}

impl TokenCleanup {
    pub fn new(grants: GrantStore, interval: Duration) -> Self {
        Self { grants, interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run a single cleanup cycle as of `now`.
    #[tracing::instrument(skip(self))]
    pub async fn run_once(&self, now: OffsetDateTime) -> Result<u64, GrantError> {
        let removed = self.grants.remove_expired(now).await?;
        if removed > 0 {
            tracing::info!(removed = removed, "removed expired grants");
        } else {
            tracing::trace!("no expired grants");
        }
        Ok(removed)
    }

    /// Spawn the cleanup loop on the current tokio runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if let Err(e) = self.run_once(OffsetDateTime::now_utc()).await {
                    tracing::warn!(
                        name = "cleanup.run_once.failed",
                        target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                        error = %e,
                        message = "grant cleanup failed; retrying next interval"
                    );
                }
            }
        })
    }
}
