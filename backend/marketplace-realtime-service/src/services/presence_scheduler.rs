use crate::metrics;
use crate::services::presence_cache::PresenceCache;
use crate::services::recommendation_service::{RecommendationEngine, RecomputeOutcome};
use crate::websocket::ConnectionRegistry;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use uuid::Uuid;

/// What a single presence tick did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickResult {
    /// Marker gone: session treated as expired, connection closed
    Expired,
    Recomputed(RecomputeOutcome),
    /// Recompute or cache read failed; the job keeps running
    Failed,
}

impl TickResult {
    fn label(&self) -> &'static str {
        match self {
            TickResult::Expired => "expired",
            TickResult::Recomputed(_) => "recomputed",
            TickResult::Failed => "failed",
        }
    }
}

struct Job {
    id: Uuid,
    handle: JoinHandle<()>,
}

type Jobs = Mutex<HashMap<Uuid, Job>>;

struct Collaborators {
    registry: ConnectionRegistry,
    engine: Arc<RecommendationEngine>,
    presence: Arc<dyn PresenceCache>,
}

impl Collaborators {
    async fn tick(&self, user_id: Uuid) -> TickResult {
        let result = match self.presence.get(user_id).await {
            Ok(None) => TickResult::Expired,
            Ok(Some(_)) => match self.engine.recompute(user_id).await {
                Ok(outcome) => TickResult::Recomputed(outcome),
                Err(e) => {
                    tracing::warn!(user_id = %user_id, error = %e, "presence tick recompute failed");
                    TickResult::Failed
                }
            },
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "presence marker lookup failed");
                TickResult::Failed
            }
        };

        metrics::record_presence_tick(result.label());
        tracing::debug!(user_id = %user_id, result = result.label(), "presence tick");
        result
    }
}

/// One periodic presence job per active user
///
/// Each tick checks the user's presence marker: absent means the session
/// expired and the job tears itself and the user's connection down; present
/// means the recommendation set is recomputed.
#[derive(Clone)]
pub struct PresenceScheduler {
    jobs: Arc<Jobs>,
    collaborators: Arc<Collaborators>,
    interval: Duration,
}

impl PresenceScheduler {
    pub fn new(
        registry: ConnectionRegistry,
        engine: Arc<RecommendationEngine>,
        presence: Arc<dyn PresenceCache>,
        interval: Duration,
    ) -> Self {
        Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            collaborators: Arc::new(Collaborators {
                registry,
                engine,
                presence,
            }),
            interval,
        }
    }

    /// Start the user's job. Returns `false` if one is already running.
    pub async fn start(&self, user_id: Uuid) -> bool {
        let mut jobs = self.jobs.lock().await;

        if let Some(job) = jobs.get(&user_id) {
            if !job.handle.is_finished() {
                return false;
            }
        }

        let job_id = Uuid::new_v4();
        let handle = self.spawn_job(user_id, job_id);
        jobs.insert(user_id, Job { id: job_id, handle });

        tracing::info!(
            user_id = %user_id,
            interval_secs = self.interval.as_secs(),
            "presence job started"
        );
        true
    }

    /// Cancel and forget the user's job. Idempotent.
    pub async fn stop(&self, user_id: Uuid) -> bool {
        let removed = self.jobs.lock().await.remove(&user_id);
        match removed {
            Some(job) => {
                job.handle.abort();
                tracing::info!(user_id = %user_id, "presence job stopped");
                true
            }
            None => false,
        }
    }

    pub async fn stop_all(&self) {
        let drained: Vec<Job> = self.jobs.lock().await.drain().map(|(_, job)| job).collect();
        for job in &drained {
            job.handle.abort();
        }
        tracing::info!(stopped = drained.len(), "all presence jobs stopped");
    }

    pub async fn is_running(&self, user_id: Uuid) -> bool {
        self.jobs
            .lock()
            .await
            .get(&user_id)
            .map(|job| !job.handle.is_finished())
            .unwrap_or(false)
    }

    pub async fn active_jobs(&self) -> usize {
        self.jobs.lock().await.len()
    }

    /// Run one tick for `user_id` outside the schedule
    pub async fn tick(&self, user_id: Uuid) -> TickResult {
        let result = self.collaborators.tick(user_id).await;
        if result == TickResult::Expired {
            expire(&Arc::downgrade(&self.jobs), &self.collaborators, user_id, None).await;
        }
        result
    }

    fn spawn_job(&self, user_id: Uuid, job_id: Uuid) -> JoinHandle<()> {
        let jobs = Arc::downgrade(&self.jobs);
        let collaborators = self.collaborators.clone();
        let period = self.interval;

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                if collaborators.tick(user_id).await == TickResult::Expired {
                    expire(&jobs, &collaborators, user_id, Some(job_id)).await;
                    break;
                }
            }
        })
    }
}

/// Drop the user's job entry and close their connection.
///
/// A job expiring itself passes its own id and is removed without being
/// aborted; an out-of-schedule tick (`job_id == None`) aborts whatever job runs.
async fn expire(
    jobs: &Weak<Jobs>,
    collaborators: &Collaborators,
    user_id: Uuid,
    job_id: Option<Uuid>,
) {
    if let Some(jobs) = jobs.upgrade() {
        let mut guard = jobs.lock().await;
        let current = guard.get(&user_id).map(|job| job.id);
        match (current, job_id) {
            (Some(current), Some(own)) if current == own => {
                guard.remove(&user_id);
            }
            (Some(_), None) => {
                if let Some(job) = guard.remove(&user_id) {
                    job.handle.abort();
                }
            }
            _ => {}
        }
    }

    collaborators.registry.remove(user_id).await;
    tracing::info!(user_id = %user_id, "presence expired, session closed");
}
