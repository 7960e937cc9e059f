//! Per-rule execution statistics.
//!
//! One task owns the statistics table. Executions are reported over a channel
//! and folded in arrival order, so counters never race. Each update is then
//! written through to the store from the same task; the evaluation path does
//! not wait for the write.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use mergewise_core::{Recommendation, RuleStatistics};
use mergewise_store::RuleStore;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

enum Command {
    Record {
        rule_id: String,
        success: bool,
        recommendation: Option<Recommendation>,
        elapsed_ms: f64,
        at: DateTime<Utc>,
    },
    Seed(Vec<RuleStatistics>),
    Get {
        rule_id: String,
        reply: oneshot::Sender<Option<RuleStatistics>>,
    },
    All {
        reply: oneshot::Sender<Vec<RuleStatistics>>,
    },
    Flush {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to the statistics owner task.
pub struct StatsRecorder {
    tx: mpsc::UnboundedSender<Command>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl StatsRecorder {
    /// Spawn the owner task. Must be called inside a Tokio runtime.
    pub fn spawn(store: Arc<dyn RuleStore>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(store, rx));
        Self {
            tx,
            task: Mutex::new(Some(task)),
        }
    }

    /// Report one execution. Never blocks.
    pub fn record(
        &self,
        rule_id: &str,
        success: bool,
        recommendation: Option<Recommendation>,
        elapsed_ms: f64,
    ) {
        let cmd = Command::Record {
            rule_id: rule_id.to_string(),
            success,
            recommendation,
            elapsed_ms,
            at: Utc::now(),
        };
        if self.tx.send(cmd).is_err() {
            debug!(rule_id, "statistics task stopped; execution not recorded");
        }
    }

    /// Load persisted counters. Existing in-memory entries are replaced.
    pub fn seed(&self, stats: Vec<RuleStatistics>) {
        let _ = self.tx.send(Command::Seed(stats));
    }

    pub async fn get(&self, rule_id: &str) -> Option<RuleStatistics> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Get {
                rule_id: rule_id.to_string(),
                reply,
            })
            .ok()?;
        rx.await.ok().flatten()
    }

    /// Every rule's counters, ordered by rule id.
    pub async fn all(&self) -> Vec<RuleStatistics> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::All { reply }).is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Wait until every report sent so far is folded in and written.
    pub async fn flush(&self) {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Flush { reply }).is_ok() {
            let _ = rx.await;
        }
    }

    /// Drain pending reports and stop the task.
    pub async fn shutdown(&self) {
        self.flush().await;
        if let Some(task) = self.task.lock().await.take() {
            task.abort();
            let _ = task.await;
        }
    }
}

async fn run(store: Arc<dyn RuleStore>, mut rx: mpsc::UnboundedReceiver<Command>) {
    let mut table: HashMap<String, RuleStatistics> = HashMap::new();
    while let Some(cmd) = rx.recv().await {
        match cmd {
            Command::Record {
                rule_id,
                success,
                recommendation,
                elapsed_ms,
                at,
            } => {
                let stats = table
                    .entry(rule_id.clone())
                    .or_insert_with(|| RuleStatistics::new(&rule_id));
                stats.record(success, recommendation, elapsed_ms, at);
                let snapshot = stats.clone();
                if let Err(e) = store.update_statistics(&snapshot).await {
                    warn!(rule_id = %snapshot.rule_id, error = %e, "statistics write failed");
                }
            }
            Command::Seed(seeded) => {
                for stats in seeded {
                    table.insert(stats.rule_id.clone(), stats);
                }
            }
            Command::Get { rule_id, reply } => {
                let _ = reply.send(table.get(&rule_id).cloned());
            }
            Command::All { reply } => {
                let mut all: Vec<RuleStatistics> = table.values().cloned().collect();
                all.sort_by(|a, b| a.rule_id.cmp(&b.rule_id));
                let _ = reply.send(all);
            }
            Command::Flush { reply } => {
                let _ = reply.send(());
            }
        }
    }
}
