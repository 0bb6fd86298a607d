//! Background reconciliation of lapsed subscriptions

use std::time::Duration;

use crate::error::Error;
use crate::orchestrator::ConfigOrchestrator;
use crate::traits::{ConfigCache, ManagementChannel, SubscriptionLedger};

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(12 * 60 * 60);

/// Outcome of one sweep cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    /// Expired-active users the ledger reported.
    pub swept: usize,
    /// Users revoked and marked inactive this cycle.
    pub revoked: usize,
    /// Users left for the next cycle after a failure.
    pub failed: usize,
}

/// Periodically revokes credentials of expired subscriptions.
///
/// Ordering invariant: the ledger is marked inactive only AFTER the remote
/// revoke succeeds or is confirmed a no-op. A crash mid-cycle just means the
/// same users show up again next cycle — remove is idempotent, so revisiting
/// them is safe. The interval is a tunable, not a correctness parameter.
pub struct ExpirySweeper<C, L, K> {
    orchestrator: ConfigOrchestrator<C, L, K>,
    ledger: L,
    interval: Duration,
}

impl<C, L, K> ExpirySweeper<C, L, K>
where
    C: ManagementChannel,
    L: SubscriptionLedger,
    K: ConfigCache,
{
    pub fn new(orchestrator: ConfigOrchestrator<C, L, K>, ledger: L, interval: Duration) -> Self {
        Self {
            orchestrator,
            ledger,
            interval,
        }
    }

    /// Run sweep cycles until SIGINT / SIGTERM.
    pub async fn run(self) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            server = %self.orchestrator.server().name,
            "expiry sweeper starting"
        );
        let mut tick = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = shutdown_signal() => {
                    tracing::info!("shutdown signal received, stopping sweeper");
                    break;
                }
                _ = tick.tick() => {
                    let stats = self.run_cycle().await;
                    tracing::info!(
                        swept = stats.swept,
                        revoked = stats.revoked,
                        failed = stats.failed,
                        "sweep cycle finished"
                    );
                }
            }
        }
    }

    /// One full sweep: list expired-active users, revoke each, mark inactive.
    ///
    /// A failure for one user never aborts the cycle for the rest — it is
    /// logged with enough context to diagnose ledger/remote drift and retried
    /// on the next cycle.
    pub async fn run_cycle(&self) -> CycleStats {
        let mut stats = CycleStats::default();

        let expired = match self.ledger.list_expired_active().await {
            Ok(users) => users,
            Err(e) => {
                tracing::error!(error = %e, "failed to list expired subscriptions");
                return stats;
            }
        };
        stats.swept = expired.len();

        for user_id in expired {
            match self.orchestrator.revoke(user_id).await {
                Ok(removed) => {
                    if let Err(e) = self.ledger.mark_inactive(user_id).await {
                        tracing::error!(
                            user_id,
                            error = %e,
                            "revoked remotely but failed to mark inactive; will revisit"
                        );
                        stats.failed += 1;
                        continue;
                    }
                    tracing::info!(user_id, removed, "expired subscription revoked");
                    stats.revoked += 1;
                }
                Err(e) => {
                    log_revoke_failure(user_id, &self.orchestrator.server().name, &e);
                    stats.failed += 1;
                }
            }
        }

        stats
    }
}

fn log_revoke_failure(user_id: i64, server: &str, e: &Error) {
    tracing::error!(
        user_id,
        server,
        error = %e,
        kind = e.kind(),
        "failed to revoke expired subscription; retrying next cycle"
    );
}

/// Resolves when the process receives a shutdown signal (SIGINT or SIGTERM).
///
/// Both signals are handled on Unix so container orchestrators trigger a
/// clean stop; elsewhere only Ctrl-C is available.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let sigterm = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c  => {}
        _ = sigterm => {}
    }
}
