//! Bounded-concurrency background warm-up.
//!
//! Runs one task per entity with at most `concurrency` in flight. Task
//! failures are captured and counted, never propagated. Slow or metered
//! connections skip the whole batch.

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use common::{Error, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Effective connection class reported by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionClass {
    #[serde(rename = "slow-2g")]
    Slow2g,
    #[serde(rename = "2g")]
    TwoG,
    #[serde(rename = "3g")]
    ThreeG,
    #[serde(rename = "4g")]
    FourG,
    #[default]
    #[serde(rename = "unknown")]
    Unknown,
}

impl ConnectionClass {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionClass::Slow2g => "slow-2g",
            ConnectionClass::TwoG => "2g",
            ConnectionClass::ThreeG => "3g",
            ConnectionClass::FourG => "4g",
            ConnectionClass::Unknown => "unknown",
        }
    }

    pub fn is_slow(self) -> bool {
        matches!(self, ConnectionClass::Slow2g | ConnectionClass::TwoG)
    }
}

impl FromStr for ConnectionClass {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "slow-2g" => Ok(ConnectionClass::Slow2g),
            "2g" => Ok(ConnectionClass::TwoG),
            "3g" => Ok(ConnectionClass::ThreeG),
            "4g" => Ok(ConnectionClass::FourG),
            "" | "unknown" => Ok(ConnectionClass::Unknown),
            other => Err(Error::Config(format!(
                "unknown connection class {:?} (expected slow-2g, 2g, 3g, 4g or unknown)",
                other
            ))),
        }
    }
}

impl fmt::Display for ConnectionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Network-quality signal consulted before any warm-up work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkHints {
    #[serde(default)]
    pub save_data: bool,
    #[serde(default)]
    pub connection: ConnectionClass,
}

impl NetworkHints {
    pub fn allows_prefetch(&self) -> bool {
        !self.save_data && !self.connection.is_slow()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "error", rename_all = "snake_case")]
pub enum TaskState {
    Queued,
    Running,
    Succeeded,
    Failed(String),
}

impl TaskState {
    pub fn is_settled(&self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::Failed(_))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub entity: String,
    #[serde(flatten)]
    pub state: TaskState,
}

#[derive(Debug, Clone, Serialize)]
pub struct WarmupReport {
    pub tasks: Vec<TaskReport>,
    /// Highest number of tasks observed running at once.
    pub peak_running: usize,
}

impl WarmupReport {
    pub fn succeeded(&self) -> usize {
        self.tasks.iter().filter(|t| t.state == TaskState::Succeeded).count()
    }

    pub fn failed(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| matches!(t.state, TaskState::Failed(_)))
            .count()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WarmupOutcome {
    Skipped,
    Completed(WarmupReport),
}

#[derive(Debug, Clone)]
pub struct WarmupScheduler {
    concurrency: usize,
    hints: NetworkHints,
}

impl WarmupScheduler {
    pub fn new(concurrency: usize, hints: NetworkHints) -> Self {
        Self {
            concurrency: concurrency.max(1),
            hints,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run `task` for every entity and wait for all of them to settle.
    pub async fn warm<E, F, Fut>(&self, entities: Vec<E>, task: F) -> WarmupOutcome
    where
        E: fmt::Display,
        F: Fn(E) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        if !self.hints.allows_prefetch() {
            info!(
                "Skipping warm-up of {} entities (save_data={}, connection={})",
                entities.len(),
                self.hints.save_data,
                self.hints.connection
            );
            return WarmupOutcome::Skipped;
        }

        let labels: Vec<String> = entities.iter().map(|e| e.to_string()).collect();
        let states = Arc::new(Mutex::new(vec![TaskState::Queued; labels.len()]));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut set = JoinSet::new();

        for (idx, entity) in entities.into_iter().enumerate() {
            let fut = task(entity);
            let states = states.clone();
            let running = running.clone();
            let peak = peak.clone();
            let permits = permits.clone();

            set.spawn(async move {
                let _permit = match permits.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return (idx, Err(Error::Other("warm-up scheduler closed".into()))),
                };
                set_state(&states, idx, TaskState::Running);
                let now_running = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now_running, Ordering::SeqCst);

                let result = fut.await;
                running.fetch_sub(1, Ordering::SeqCst);
                (idx, result)
            });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, Ok(()))) => {
                    debug!("Warmed {}", labels[idx]);
                    set_state(&states, idx, TaskState::Succeeded);
                }
                Ok((idx, Err(e))) => {
                    warn!("Warm-up of {} failed: {}", labels[idx], e);
                    set_state(&states, idx, TaskState::Failed(e.to_string()));
                }
                Err(e) => warn!("Warm-up task aborted: {}", e),
            }
        }

        let final_states = match states.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        let tasks: Vec<TaskReport> = labels
            .into_iter()
            .zip(final_states)
            .map(|(entity, state)| TaskReport {
                state: if state.is_settled() {
                    state
                } else {
                    TaskState::Failed("task did not complete".into())
                },
                entity,
            })
            .collect();

        let report = WarmupReport {
            tasks,
            peak_running: peak.load(Ordering::SeqCst),
        };
        info!(
            "Warm-up finished: {} ok, {} failed, peak concurrency {}",
            report.succeeded(),
            report.failed(),
            report.peak_running
        );
        WarmupOutcome::Completed(report)
    }
}

fn set_state(states: &Mutex<Vec<TaskState>>, idx: usize, state: TaskState) {
    let mut guard = match states.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    if let Some(slot) = guard.get_mut(idx) {
        *slot = state;
    }
}
