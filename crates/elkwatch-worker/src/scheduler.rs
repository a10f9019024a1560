use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};

use crate::cleanup::CleanupWorker;
use crate::executor::Executor;
use crate::window::clamp_interval;
use elkwatch_common::config::AppConfig;
use elkwatch_storage::{RuleRow, Store};

/// Buffered capacity of the trigger channel. A full buffer drops the
/// trigger; the periodic reconcile recovers it.
const TRIGGER_BUFFER: usize = 100;

/// Bounded wait for in-flight tasks at shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

struct RuleTask {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// State shared between the scheduler facade and its spawned tasks.
struct Core {
    store: Arc<Store>,
    executor: Executor,
    semaphore: Arc<Semaphore>,
    shutdown_tx: watch::Sender<bool>,
    /// Running per-rule tasks. The reconcile task is the sole writer.
    running: Mutex<HashMap<i64, RuleTask>>,
}

/// Owns rule lifetimes: a reconcile loop tracking the enabled rule set, a
/// retention cleanup loop, and one cooperative task per enabled rule.
pub struct Scheduler {
    core: Arc<Core>,
    check_interval: Duration,
    trigger_tx: mpsc::Sender<i64>,
    trigger_rx: Mutex<Option<mpsc::Receiver<i64>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Capability handle for external callers (API handlers) that only need to
/// poke the scheduler after a rule write.
#[derive(Clone)]
pub struct SchedulerHandle {
    trigger_tx: mpsc::Sender<i64>,
}

impl SchedulerHandle {
    /// Non-blocking notification that a rule was created/updated/enabled.
    pub fn trigger_rule(&self, rule_id: i64) {
        match self.trigger_tx.try_send(rule_id) {
            Ok(()) => tracing::info!(rule_id, "Rule trigger sent"),
            Err(_) => {
                tracing::warn!(rule_id, "Rule trigger channel full, will sync on next interval")
            }
        }
    }
}

impl Scheduler {
    pub fn new(store: Arc<Store>, config: &AppConfig) -> Self {
        let executor = Executor::new(store.clone(), &config.es, &config.worker);
        let (shutdown_tx, _) = watch::channel(false);
        let (trigger_tx, trigger_rx) = mpsc::channel(TRIGGER_BUFFER);

        Self {
            core: Arc::new(Core {
                store,
                executor,
                semaphore: Arc::new(Semaphore::new(config.worker.max_concurrency.max(1))),
                shutdown_tx,
                running: Mutex::new(HashMap::new()),
            }),
            check_interval: Duration::from_secs(config.worker.check_interval_secs),
            trigger_tx,
            trigger_rx: Mutex::new(Some(trigger_rx)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Spawns the reconcile and cleanup tasks. Idempotent per instance:
    /// the second call finds the trigger receiver already taken and does
    /// nothing.
    pub fn start(&self) {
        let Some(trigger_rx) = self.trigger_rx.lock().unwrap().take() else {
            tracing::warn!("Scheduler already started");
            return;
        };

        tracing::info!(
            check_interval_secs = self.check_interval.as_secs(),
            max_concurrency = self.core.semaphore.available_permits(),
            "Scheduler started"
        );

        let reconcile = tokio::spawn(run_reconcile(
            self.core.clone(),
            trigger_rx,
            self.check_interval,
        ));
        let cleanup = {
            let worker =
                CleanupWorker::new(self.core.store.clone(), self.core.shutdown_tx.subscribe());
            tokio::spawn(worker.run())
        };

        let mut tasks = self.tasks.lock().unwrap();
        tasks.push(reconcile);
        tasks.push(cleanup);
    }

    /// Returns the trigger capability for the API layer.
    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            trigger_tx: self.trigger_tx.clone(),
        }
    }

    /// See [`SchedulerHandle::trigger_rule`].
    pub fn trigger_rule(&self, rule_id: i64) {
        self.handle().trigger_rule(rule_id);
    }

    /// IDs of rules with a live per-rule task.
    pub fn running_rule_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.core.running.lock().unwrap().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Graceful shutdown: signal every task, then wait (bounded) for
    /// in-flight evaluations and notifications to drain.
    pub async fn stop(&self) {
        let _ = self.core.shutdown_tx.send(true);

        let rule_tasks: Vec<(i64, RuleTask)> = {
            let mut running = self.core.running.lock().unwrap();
            running.drain().collect()
        };
        for (rule_id, task) in &rule_tasks {
            tracing::info!(rule_id, "Stopping rule");
            let _ = task.stop_tx.send(true);
        }

        let deadline = Instant::now() + DRAIN_TIMEOUT;
        for (_, task) in rule_tasks {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let _ = tokio::time::timeout(remaining, task.handle).await;
        }

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().unwrap().drain(..).collect();
        for task in tasks {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let _ = tokio::time::timeout(remaining, task).await;
        }

        tracing::info!("Scheduler stopped");
    }
}

/// Reconcile loop: periodic sync of per-rule tasks with the enabled rule
/// set, plus the trigger fast-path for config edits.
async fn run_reconcile(core: Arc<Core>, mut trigger_rx: mpsc::Receiver<i64>, period: Duration) {
    let mut shutdown = core.shutdown_tx.subscribe();
    // 立即执行首次同步，之后按周期
    let mut tick = interval_at(Instant::now(), period);

    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = tick.tick() => {
                sync_rules(&core).await;
            }
            Some(rule_id) = trigger_rx.recv() => {
                tracing::info!(rule_id, "Rule trigger received, syncing immediately");
                sync_rules_and_execute(&core, rule_id).await;
            }
        }
    }
}

/// Synchronizes running per-rule tasks with the enabled rule set.
async fn sync_rules(core: &Arc<Core>) {
    let rules = match core.store.list_enabled_rules().await {
        Ok(rules) => rules,
        Err(e) => {
            tracing::error!(error = %e, "Failed to get enabled rules");
            return;
        }
    };
    let enabled_ids: HashSet<i64> = rules.iter().map(|r| r.id).collect();

    let mut running = core.running.lock().unwrap();

    let mut stopped = 0usize;
    running.retain(|rule_id, task| {
        if enabled_ids.contains(rule_id) {
            true
        } else {
            tracing::info!(rule_id, reason = "disabled", "Stopping rule");
            let _ = task.stop_tx.send(true);
            stopped += 1;
            false
        }
    });

    let mut started = 0usize;
    for rule in rules {
        if running.contains_key(&rule.id) {
            continue;
        }
        tracing::info!(
            rule_id = rule.id,
            rule_name = %rule.name,
            interval = rule.interval_secs,
            index_pattern = %rule.index_pattern,
            "Starting rule"
        );
        let rule_id = rule.id;
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run_rule(core.clone(), rule, stop_rx));
        running.insert(rule_id, RuleTask { stop_tx, handle });
        started += 1;
    }

    if started > 0 || stopped > 0 {
        tracing::info!(started, stopped, total_running = running.len(), "Rule sync completed");
    }
}

/// Trigger fast-path: sync, and when the rule is enabled but its task was
/// not just started by the sync (out-of-order edit), force one execution
/// directly under the semaphore.
async fn sync_rules_and_execute(core: &Arc<Core>, rule_id: i64) {
    sync_rules(core).await;

    let is_running = core.running.lock().unwrap().contains_key(&rule_id);
    if is_running {
        // 规则任务刚被 sync 启动，自身会立即强制执行一次
        tracing::info!(rule_id, "Rule already started by sync, will execute in its task");
        return;
    }

    let rule = match core.store.get_rule_by_id(rule_id).await {
        Ok(Some(rule)) => rule,
        Ok(None) => {
            tracing::warn!(rule_id, "Rule not found for immediate execution");
            return;
        }
        Err(e) => {
            tracing::error!(rule_id, error = %e, "Failed to get rule for immediate execution");
            return;
        }
    };

    if rule.enabled {
        tracing::info!(rule_id, rule_name = %rule.name, "Executing rule immediately after trigger");
        let mut stop_rx = core.shutdown_tx.subscribe();
        execute_slotted(core, &rule, true, &mut stop_rx).await;
    } else {
        tracing::info!(rule_id, rule_name = %rule.name, "Rule is disabled, skipping immediate execution");
    }
}

/// Per-rule cooperative loop: one immediate forced execution, then gated
/// ticks at the rule's interval, reloading the rule from storage each tick
/// so live config edits take effect without restart.
async fn run_rule(core: Arc<Core>, rule: RuleRow, mut stop_rx: watch::Receiver<bool>) {
    let rule_id = rule.id;
    let rule_name = rule.name.clone();

    let mut period = clamp_interval(rule.interval_secs);
    if rule.interval_secs < crate::window::MIN_INTERVAL_SECS {
        tracing::info!(
            rule_id,
            configured = rule.interval_secs,
            clamped_secs = period.as_secs(),
            "Rule interval below minimum, clamped"
        );
    }

    tracing::info!(
        rule_id,
        rule_name = %rule_name,
        interval_secs = period.as_secs(),
        "Rule task started, executing immediately"
    );
    execute_slotted(&core, &rule, true, &mut stop_rx).await;

    let mut tick = interval_at(Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = stop_rx.changed() => {
                tracing::info!(rule_id, rule_name = %rule_name, "Rule stopped");
                return;
            }
            _ = tick.tick() => {
                // 每跳重新加载规则，捕获在线配置修改
                let rule = match core.store.get_rule_by_id(rule_id).await {
                    Ok(Some(rule)) => rule,
                    Ok(None) => {
                        tracing::warn!(rule_id, "Rule vanished, stopping task");
                        return;
                    }
                    Err(e) => {
                        tracing::error!(rule_id, error = %e, "Failed to reload rule");
                        continue;
                    }
                };

                let new_period = clamp_interval(rule.interval_secs);
                if new_period != period {
                    period = new_period;
                    tick = interval_at(Instant::now() + period, period);
                    tracing::info!(rule_id, rule_name = %rule.name, interval_secs = period.as_secs(), "Rule interval updated");
                }

                execute_slotted(&core, &rule, false, &mut stop_rx).await;
            }
        }
    }
}

/// Runs one execution under a global semaphore slot. Waits for a free slot
/// (never drops work); cancellation while waiting exits without running.
async fn execute_slotted(
    core: &Arc<Core>,
    rule: &RuleRow,
    force: bool,
    stop_rx: &mut watch::Receiver<bool>,
) {
    let permit = tokio::select! {
        _ = stop_rx.changed() => {
            tracing::info!(rule_id = rule.id, rule_name = %rule.name, force, "Rule execution skipped due to cancellation");
            return;
        }
        permit = core.semaphore.clone().acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return,
        },
    };

    let cancel = stop_rx.clone();
    let execution = core.executor.execute(rule, force, permit, cancel);
    tokio::select! {
        _ = stop_rx.changed() => {
            tracing::info!(rule_id = rule.id, rule_name = %rule.name, "Rule execution cancelled");
        }
        result = execution => match result {
            Ok(outcome) => {
                tracing::debug!(rule_id = rule.id, rule_name = %rule.name, ?outcome, force, "Rule executed");
            }
            Err(e) => {
                tracing::error!(rule_id = rule.id, rule_name = %rule.name, error = %e, force, "Failed to execute rule");
            }
        },
    }
}
