//! Background key health checker
//!
//! One independent task walks the pool on a staggered schedule: never-checked
//! keys first, then whichever key has gone longest without a check once it
//! is older than the check period. Probe starts are spaced out, at most
//! `max_concurrent` probes run at a time, and a key still being probed is
//! never picked again. The pool lock is never held across a probe.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};

use crate::pool::{KeyPool, ProbeTarget, now_millis};
use crate::probe::{KeyProbe, ProbeError};

/// Timing knobs for the checker.
#[derive(Debug, Clone)]
pub struct CheckerConfig {
    /// How stale a checked key may get before it is probed again.
    pub check_period: Duration,
    /// Minimum gap between two probe starts.
    pub min_spacing: Duration,
    /// Probes allowed in flight at once.
    pub max_concurrent: usize,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            check_period: Duration::from_secs(300),
            min_spacing: Duration::from_millis(3000),
            max_concurrent: 2,
        }
    }
}

/// Shared between the scheduling loop and the probe tasks it spawns.
#[derive(Default)]
struct Schedule {
    in_flight: HashSet<String>,
    /// hash -> epoch millis before which the key is not retried
    deferred_until: HashMap<String, u64>,
}

/// Pick the next key to probe, or `None` if nothing is due.
fn next_due<'a>(
    targets: &'a [ProbeTarget],
    schedule: &Schedule,
    now: u64,
    period_ms: u64,
) -> Option<&'a ProbeTarget> {
    let eligible = |t: &&ProbeTarget| {
        !schedule.in_flight.contains(&t.hash)
            && schedule
                .deferred_until
                .get(&t.hash)
                .is_none_or(|&until| until <= now)
    };

    targets
        .iter()
        .filter(eligible)
        .find(|t| t.last_checked == 0)
        .or_else(|| {
            targets
                .iter()
                .filter(eligible)
                .filter(|t| now.saturating_sub(t.last_checked) >= period_ms)
                .min_by_key(|t| t.last_checked)
        })
}

/// Spawn the checker. The task ends on its own once every key is disabled.
pub fn spawn_key_checker(
    pool: Arc<KeyPool>,
    probe: Arc<dyn KeyProbe>,
    config: CheckerConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        let schedule = Arc::new(Mutex::new(Schedule::default()));
        let period_ms = config.check_period.as_millis() as u64;
        let idle = config.min_spacing.max(Duration::from_millis(100));

        info!(
            period_secs = config.check_period.as_secs(),
            max_concurrent = config.max_concurrent,
            "key checker started"
        );

        loop {
            if !pool.any_available().await {
                info!("all keys disabled, key checker exiting");
                return;
            }

            let targets = pool.probe_targets().await;
            let picked = {
                let mut sched = schedule.lock().await;
                let now = now_millis();
                let picked = next_due(&targets, &sched, now, period_ms).map(|t| ProbeTarget {
                    hash: t.hash.clone(),
                    secret: t.secret.clone(),
                    last_checked: t.last_checked,
                });
                if let Some(target) = &picked {
                    sched.in_flight.insert(target.hash.clone());
                }
                picked
            };

            let Some(target) = picked else {
                tokio::time::sleep(idle).await;
                continue;
            };

            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                return;
            };
            let pool = pool.clone();
            let probe = probe.clone();
            let schedule = schedule.clone();
            tokio::spawn(async move {
                check_key(&pool, probe.as_ref(), &target, &schedule, period_ms).await;
                drop(permit);
            });

            tokio::time::sleep(config.min_spacing).await;
        }
    })
}

/// Probe one key and apply the result to the pool.
async fn check_key(
    pool: &KeyPool,
    probe: &dyn KeyProbe,
    target: &ProbeTarget,
    schedule: &Mutex<Schedule>,
    period_ms: u64,
) {
    let hash = target.hash.as_str();
    let initial = target.last_checked == 0;
    debug!(key = hash, initial, "probing key");

    let outcome = match probe.probe(target.secret.expose(), initial).await {
        Ok(update) => {
            if pool.apply_health_update(hash, update).await.is_ok()
                && pool.over_hard_limit(hash).await
            {
                pool.disable(hash, "quota").await;
            }
            schedule.lock().await.deferred_until.remove(hash);
            "ok"
        }
        Err(ProbeError::Revoked(msg)) => {
            warn!(key = hash, error = %msg, "probe rejected key");
            pool.disable(hash, "revoked").await;
            "revoked"
        }
        Err(ProbeError::QuotaExhausted(msg)) => {
            warn!(key = hash, error = %msg, "probe found key out of quota");
            pool.disable(hash, "quota").await;
            "quota"
        }
        Err(ProbeError::Transient(msg)) => {
            warn!(key = hash, error = %msg, "probe failed, retrying next period");
            schedule
                .lock()
                .await
                .deferred_until
                .insert(hash.to_string(), now_millis() + period_ms);
            "transient"
        }
    };

    metrics::counter!("key_checker_probes_total", "outcome" => outcome).increment(1);
    schedule.lock().await.in_flight.remove(hash);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{KeyUpdate, key_hash};
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn target(secret: &str, last_checked: u64) -> ProbeTarget {
        ProbeTarget {
            hash: key_hash(secret),
            secret: secret.into(),
            last_checked,
        }
    }

    /// Answers by secret: `sk-revoked` is revoked, `sk-flaky` fails
    /// transiently, `sk-capped` is at its hard limit, the rest are paid GPT-4
    /// keys with a little usage.
    #[derive(Default)]
    struct StubProbe {
        calls: Mutex<Vec<(String, bool)>>,
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    impl KeyProbe for StubProbe {
        fn probe<'a>(
            &'a self,
            secret: &'a str,
            initial: bool,
        ) -> Pin<Box<dyn Future<Output = Result<KeyUpdate, ProbeError>> + Send + 'a>> {
            Box::pin(async move {
                let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(running, Ordering::SeqCst);
                self.calls.lock().await.push((secret.to_string(), initial));
                tokio::time::sleep(Duration::from_millis(20)).await;
                self.running.fetch_sub(1, Ordering::SeqCst);

                match secret {
                    "sk-revoked" => Err(ProbeError::Revoked("invalid_api_key".into())),
                    "sk-flaky" => Err(ProbeError::Transient("connection reset".into())),
                    "sk-capped" => Ok(KeyUpdate {
                        hard_limit: Some(10.0),
                        usage: Some(10.0),
                        ..Default::default()
                    }),
                    _ => Ok(KeyUpdate {
                        is_trial: Some(false),
                        is_gpt4: Some(true),
                        hard_limit: Some(100.0),
                        usage: Some(1.0),
                        ..Default::default()
                    }),
                }
            })
        }
    }

    fn fast_config() -> CheckerConfig {
        CheckerConfig {
            check_period: Duration::from_secs(3600),
            min_spacing: Duration::from_millis(1),
            max_concurrent: 2,
        }
    }

    #[test]
    fn next_due_prefers_unchecked_keys_in_order() {
        let targets = vec![target("sk-a", 5), target("sk-b", 0), target("sk-c", 0)];
        let picked = next_due(&targets, &Schedule::default(), 1_000_000, 300_000).unwrap();
        assert_eq!(picked.hash, key_hash("sk-b"));
    }

    #[test]
    fn next_due_picks_oldest_stale_key() {
        let targets = vec![
            target("sk-a", 900_000),
            target("sk-b", 100_000),
            target("sk-c", 200_000),
        ];
        let picked = next_due(&targets, &Schedule::default(), 1_000_000, 300_000).unwrap();
        assert_eq!(picked.hash, key_hash("sk-b"));
    }

    #[test]
    fn next_due_waits_for_period() {
        let targets = vec![target("sk-a", 900_000)];
        assert!(next_due(&targets, &Schedule::default(), 1_000_000, 300_000).is_none());
    }

    #[test]
    fn next_due_skips_in_flight_and_deferred() {
        let targets = vec![target("sk-a", 0), target("sk-b", 0), target("sk-c", 0)];
        let mut schedule = Schedule::default();
        schedule.in_flight.insert(key_hash("sk-a"));
        schedule.deferred_until.insert(key_hash("sk-b"), 2_000);

        let picked = next_due(&targets, &schedule, 1_000, 300_000).unwrap();
        assert_eq!(picked.hash, key_hash("sk-c"));

        schedule.in_flight.insert(key_hash("sk-c"));
        assert!(next_due(&targets, &schedule, 1_000, 300_000).is_none());
        // deferral expires
        let picked = next_due(&targets, &schedule, 2_000, 300_000).unwrap();
        assert_eq!(picked.hash, key_hash("sk-b"));
    }

    #[tokio::test]
    async fn check_key_applies_update() {
        let pool = KeyPool::new(["sk-good"], true).unwrap();
        let probe = StubProbe::default();
        let schedule = Mutex::new(Schedule::default());

        check_key(&pool, &probe, &target("sk-good", 0), &schedule, 1000).await;

        let key = &pool.list_public().await[0];
        assert!(key.is_gpt4);
        assert_eq!(key.hard_limit, 100.0);
        assert!(key.last_checked > 0);
        assert!(!key.is_disabled);
        assert_eq!(probe.calls.lock().await[0], ("sk-good".to_string(), true));
    }

    #[tokio::test]
    async fn check_key_disables_revoked_and_capped_keys() {
        let pool = KeyPool::new(["sk-revoked", "sk-capped"], true).unwrap();
        let probe = StubProbe::default();
        let schedule = Mutex::new(Schedule::default());

        check_key(&pool, &probe, &target("sk-revoked", 0), &schedule, 1000).await;
        check_key(&pool, &probe, &target("sk-capped", 0), &schedule, 1000).await;

        let keys = pool.list_public().await;
        assert!(keys.iter().all(|k| k.is_disabled));
        assert_eq!(keys[0].last_checked, 0, "revoked key was never merged");
        assert!(keys[1].last_checked > 0);
    }

    #[tokio::test]
    async fn check_key_defers_transient_failure() {
        let pool = KeyPool::new(["sk-flaky"], true).unwrap();
        let probe = StubProbe::default();
        let schedule = Mutex::new(Schedule::default());
        schedule.lock().await.in_flight.insert(key_hash("sk-flaky"));

        check_key(&pool, &probe, &target("sk-flaky", 0), &schedule, 60_000).await;

        let sched = schedule.lock().await;
        assert!(sched.in_flight.is_empty());
        let until = sched.deferred_until[&key_hash("sk-flaky")];
        assert!(until > now_millis() + 50_000);
        assert!(!pool.list_public().await[0].is_disabled);
    }

    #[tokio::test]
    async fn checker_probes_every_key_once_with_bounded_concurrency() {
        let pool = Arc::new(KeyPool::new(["sk-1", "sk-2", "sk-3", "sk-4", "sk-5"], true).unwrap());
        let probe = Arc::new(StubProbe::default());
        let handle = spawn_key_checker(pool.clone(), probe.clone(), fast_config());

        for _ in 0..100 {
            if !pool.any_unchecked().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!pool.any_unchecked().await, "every key should be checked");

        // nothing is stale within the hour, so no further probes
        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.abort();

        let calls = probe.calls.lock().await;
        assert_eq!(calls.len(), 5);
        assert!(calls.iter().all(|(_, initial)| *initial));
        assert!(probe.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn checker_exits_when_every_key_is_disabled() {
        let pool = Arc::new(KeyPool::new(["sk-revoked"], true).unwrap());
        let probe = Arc::new(StubProbe::default());
        let handle = spawn_key_checker(pool.clone(), probe, fast_config());

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("checker should exit")
            .unwrap();
        assert!(!pool.any_available().await);
    }
}
