// Trigger runtime: in-process registry of cron triggers and the dispatch clock

use crate::errors::ScheduleError;
use crate::schedule::{default_timezone, CronRule};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use futures::future::BoxFuture;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument};

/// Work started when a trigger fires. Each firing runs on its own task.
pub type TriggerCallback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Handle of a registered trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct TriggerId(u64);

impl fmt::Display for TriggerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Configuration for the trigger runtime
#[derive(Debug, Clone)]
pub struct TriggerRuntimeConfig {
    /// How often the dispatch clock looks for due triggers
    pub tick_interval: Duration,
    /// Timezone cron rules are evaluated in
    pub timezone: Tz,
}

impl Default for TriggerRuntimeConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            timezone: default_timezone(),
        }
    }
}

/// Snapshot of one registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriggerInfo {
    pub id: TriggerId,
    pub job_id: i64,
    pub expression: String,
    pub next_fire_at: Option<DateTime<Utc>>,
}

struct TriggerEntry {
    job_id: i64,
    rule: CronRule,
    next_fire_at: Option<DateTime<Utc>>,
    callback: TriggerCallback,
}

struct Registry {
    timezone: Tz,
    triggers: Mutex<BTreeMap<TriggerId, TriggerEntry>>,
}

impl Registry {
    async fn dispatch_due(&self, now: DateTime<Utc>) -> usize {
        let mut triggers = self.triggers.lock().await;
        let mut fired = 0;

        for (id, entry) in triggers.iter_mut() {
            let Some(due_at) = entry.next_fire_at else {
                continue;
            };
            if due_at > now {
                continue;
            }

            debug!(
                trigger_id = %id,
                job_id = entry.job_id,
                due_at = %due_at,
                "Trigger fired"
            );
            tokio::spawn((entry.callback)());
            fired += 1;

            // Occurrences missed while the clock was late collapse into this one firing
            entry.next_fire_at = entry.rule.next_after(now, self.timezone);
        }

        fired
    }

    async fn reschedule_from(&self, now: DateTime<Utc>) {
        let mut triggers = self.triggers.lock().await;
        for entry in triggers.values_mut() {
            entry.next_fire_at = entry.rule.next_after(now, self.timezone);
        }
    }
}

/// Registry of cron triggers with a single dispatch clock.
///
/// The clock runs between [`start`](Self::start) and [`stop`](Self::stop);
/// registrations can be changed at any time.
pub struct TriggerRuntime {
    registry: Arc<Registry>,
    tick_interval: Duration,
    next_id: AtomicU64,
    running: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl TriggerRuntime {
    pub fn new(config: TriggerRuntimeConfig) -> Self {
        let (shutdown_tx, _shutdown_rx) = broadcast::channel(1);

        Self {
            registry: Arc::new(Registry {
                timezone: config.timezone,
                triggers: Mutex::new(BTreeMap::new()),
            }),
            tick_interval: config.tick_interval,
            next_id: AtomicU64::new(1),
            running: AtomicBool::new(false),
            shutdown_tx,
            dispatcher: Mutex::new(None),
        }
    }

    pub fn timezone(&self) -> Tz {
        self.registry.timezone
    }

    /// Register a trigger for `job_id`.
    ///
    /// Fails when the job already has a trigger or the rule has no future
    /// occurrence.
    pub async fn add(
        &self,
        job_id: i64,
        rule: CronRule,
        callback: TriggerCallback,
    ) -> Result<TriggerId, ScheduleError> {
        let mut triggers = self.registry.triggers.lock().await;

        if triggers.values().any(|entry| entry.job_id == job_id) {
            return Err(ScheduleError::TriggerRegistration {
                job_id,
                reason: "a trigger is already registered for this job".to_string(),
            });
        }

        let next_fire_at = rule
            .next_after(Utc::now(), self.registry.timezone)
            .ok_or_else(|| ScheduleError::TriggerRegistration {
                job_id,
                reason: format!("'{}' has no upcoming occurrence", rule.expression()),
            })?;

        let id = TriggerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        triggers.insert(
            id,
            TriggerEntry {
                job_id,
                rule,
                next_fire_at: Some(next_fire_at),
                callback,
            },
        );

        Ok(id)
    }

    /// Remove one trigger; returns false if it was not registered
    pub async fn remove(&self, id: TriggerId) -> bool {
        self.registry.triggers.lock().await.remove(&id).is_some()
    }

    /// Remove every trigger, returning how many were registered
    pub async fn remove_all(&self) -> usize {
        let mut triggers = self.registry.triggers.lock().await;
        let removed = triggers.len();
        triggers.clear();
        removed
    }

    /// Registered triggers ordered by id
    pub async fn entries(&self) -> Vec<TriggerInfo> {
        self.registry
            .triggers
            .lock()
            .await
            .iter()
            .map(|(id, entry)| TriggerInfo {
                id: *id,
                job_id: entry.job_id,
                expression: entry.rule.expression().to_string(),
                next_fire_at: entry.next_fire_at,
            })
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.registry.triggers.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Fire every trigger due at `now`; returns how many fired
    pub async fn dispatch_due(&self, now: DateTime<Utc>) -> usize {
        self.registry.dispatch_due(now).await
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the dispatch clock. No-op when already running.
    #[instrument(skip(self))]
    pub async fn start(&self) {
        let mut dispatcher = self.dispatcher.lock().await;
        if dispatcher.is_some() {
            debug!("Trigger runtime already running");
            return;
        }

        // Occurrences that passed while stopped are not replayed
        self.registry.reschedule_from(Utc::now()).await;

        let registry = Arc::clone(&self.registry);
        let tick_interval = self.tick_interval;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        *dispatcher = Some(tokio::spawn(async move {
            let mut ticker = interval(tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let fired = registry.dispatch_due(Utc::now()).await;
                        if fired > 0 {
                            debug!(fired = fired, "Dispatched due triggers");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Shutdown signal received, stopping dispatch clock");
                        break;
                    }
                }
            }
        }));
        self.running.store(true, Ordering::SeqCst);

        info!(
            tick_interval_ms = tick_interval.as_millis() as u64,
            timezone = %self.registry.timezone,
            "Trigger runtime started"
        );
    }

    /// Stop the dispatch clock. Callbacks already running are not cancelled.
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        let Some(handle) = self.dispatcher.lock().await.take() else {
            debug!("Trigger runtime already stopped");
            return;
        };

        let _ = self.shutdown_tx.send(());
        if let Err(e) = handle.await {
            error!(error = %e, "Dispatch clock task failed");
        }
        self.running.store(false, Ordering::SeqCst);

        info!("Trigger runtime stopped");
    }
}

impl Default for TriggerRuntime {
    fn default() -> Self {
        Self::new(TriggerRuntimeConfig::default())
    }
}
