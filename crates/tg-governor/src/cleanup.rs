// cleanup.rs — Periodic trimming of per-session state.
//
// The only long-running task in the governor. Nothing it removes is still
// meaningful: expired credentials are unusable, aged tombstones guard
// actions too old to be issued again, and an idle ACTIVE session with no
// BLOCK streak reads the same as one never seen.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tg_credentials::CredentialBroker;
use tg_risk::DerivativeEstimator;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::control::ControlState;

/// What one sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub credentials_purged: usize,
    pub sessions_evicted: usize,
}

/// The state a cleanup pass trims.
#[derive(Clone)]
pub struct Sweep {
    pub broker: Arc<CredentialBroker>,
    pub control: Arc<ControlState>,
    pub estimator: Arc<Mutex<DerivativeEstimator>>,
}

impl Sweep {
    pub fn run(&self, now: DateTime<Utc>) -> SweepStats {
        let credentials_purged = self.broker.purge_expired(now);

        let evicted = self.control.evict_idle(now);
        if !evicted.is_empty() {
            let mut estimator = self.estimator.lock().unwrap_or_else(|p| p.into_inner());
            for session_id in &evicted {
                estimator.forget(session_id);
            }
        }

        SweepStats {
            credentials_purged,
            sessions_evicted: evicted.len(),
        }
    }
}

/// Spawn a task that calls `sweep` every `period` (at least one second).
/// Abort the returned handle to stop it.
pub fn spawn_cleanup<F>(period: Duration, mut sweep: F) -> JoinHandle<()>
where
    F: FnMut() + Send + 'static,
{
    let period = period.max(Duration::from_secs(1));
    tracing::info!(period_secs = period.as_secs(), "starting cleanup task");

    tokio::spawn(async move {
        let mut tick = interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            sweep();
        }
    })
}

/// Purge expired credentials every `period`. For a broker used on its own.
pub fn spawn_credential_cleanup(broker: Arc<CredentialBroker>, period: Duration) -> JoinHandle<()> {
    spawn_cleanup(period, move || {
        let purged = broker.purge_expired(Utc::now());
        if purged > 0 {
            tracing::debug!(purged, "credential cleanup cycle");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControlConfig;
    use crate::control::Signals;
    use tg_action::{ActionType, Decision, ProposedAction};
    use tg_credentials::{CredentialConfig, CredentialState, LocalTokenExchange, OpenGate};

    fn broker(ttl_secs: u64) -> Arc<CredentialBroker> {
        Arc::new(
            CredentialBroker::new(
                CredentialConfig {
                    ttl_secs,
                    ..CredentialConfig::default()
                },
                Arc::new(LocalTokenExchange),
                Arc::new(OpenGate),
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn purges_expired_entries() {
        let broker = broker(1);
        let action = ProposedAction::new("s1", ActionType::NetworkFetch);
        // Issued in the past, so already expired by wall clock.
        broker
            .issue_at(&action, &Decision::allow(), Utc::now() - chrono::Duration::seconds(5))
            .unwrap();
        assert_eq!(broker.state_of(action.action_id), Some(CredentialState::Outstanding));

        let handle = spawn_credential_cleanup(Arc::clone(&broker), Duration::from_secs(1));
        // The first tick fires immediately.
        for _ in 0..50 {
            if broker.state_of(action.action_id).is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        handle.abort();
        assert_eq!(broker.state_of(action.action_id), None);
    }

    #[test]
    fn sweep_forgets_idle_sessions_and_their_barrier_history() {
        let control = Arc::new(ControlState::new(ControlConfig::default()));
        let estimator = Arc::new(Mutex::new(DerivativeEstimator::default()));
        let t0 = Utc::now();
        for session in ["old", "new"] {
            estimator.lock().unwrap().record(session, 10.0).unwrap();
        }
        let quiet = Signals {
            reason: "all stages passed".to_string(),
            ..Signals::default()
        };
        control.apply("old", &quiet, t0).unwrap();
        control
            .apply("new", &quiet, t0 + chrono::Duration::seconds(3_000))
            .unwrap();

        let sweep = Sweep {
            broker: broker(30),
            control: Arc::clone(&control),
            estimator: Arc::clone(&estimator),
        };
        let stats = sweep.run(t0 + chrono::Duration::seconds(4_000));

        assert_eq!(stats.sessions_evicted, 1);
        assert_eq!(control.sessions().len(), 1);
        let estimator = estimator.lock().unwrap();
        assert!(estimator.history("old").is_empty());
        assert_eq!(estimator.history("new"), vec![10.0]);
    }
}
