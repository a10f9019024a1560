use anyhow::Result;
use chrono::{Local, NaiveDateTime, Timelike};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant};

use elkwatch_storage::Store;

/// Config-recheck cadence. The actual sweep runs at the configured
/// local-time minute.
const TICK: Duration = Duration::from_secs(60);

/// Daily retention sweep: deletes alerts older than the configured number
/// of days at a configured local wall-clock time, and records the outcome
/// on the retention config so the UI can show it.
pub struct CleanupWorker {
    store: Arc<Store>,
    shutdown: watch::Receiver<bool>,
}

impl CleanupWorker {
    pub fn new(store: Arc<Store>, shutdown: watch::Receiver<bool>) -> Self {
        Self { store, shutdown }
    }

    pub async fn run(mut self) {
        tracing::info!(tick_secs = TICK.as_secs(), "Cleanup worker started");

        let mut next_run: Option<NaiveDateTime> = None;
        let mut retention_days: u32 = 0;

        // 启动时先读一次配置，立刻有确定的下一次执行时间
        match self.store.get_retention_config().await {
            Ok(config) if config.enabled => {
                next_run = Some(next_run_time(config.hour, config.minute, Local::now().naive_local()));
                retention_days = config.retention_days;
                tracing::info!(
                    scheduled_time = %next_run.unwrap_or_default(),
                    retention_days,
                    "Cleanup task enabled"
                );
            }
            Ok(config) => {
                tracing::info!(
                    hour = config.hour,
                    minute = config.minute,
                    retention_days = config.retention_days,
                    "Cleanup task disabled in configuration"
                );
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to load retention config on startup");
            }
        }

        let mut tick = interval_at(Instant::now() + TICK, TICK);
        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    tracing::info!("Cleanup worker stopped");
                    return;
                }
                _ = tick.tick() => {
                    // 每分钟重读配置，修改即时生效
                    let config = match self.store.get_retention_config().await {
                        Ok(config) => config,
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to load retention config");
                            continue;
                        }
                    };

                    if !config.enabled {
                        if let Some(was) = next_run.take() {
                            tracing::info!(was_scheduled_for = %was, "Cleanup task disabled, clearing next run");
                        }
                        continue;
                    }

                    let now = Local::now().naive_local();
                    let new_next = next_run_time(config.hour, config.minute, now);
                    if next_run != Some(new_next) || retention_days != config.retention_days {
                        next_run = Some(new_next);
                        retention_days = config.retention_days;
                        tracing::info!(
                            scheduled_time = %new_next,
                            retention_days,
                            "Cleanup task rescheduled"
                        );
                    }

                    let due = next_run
                        .is_some_and(|scheduled| truncate_to_minute(now) >= truncate_to_minute(scheduled));
                    if due {
                        tracing::info!(
                            triggered_at = %now,
                            scheduled_for = %next_run.unwrap_or_default(),
                            retention_days,
                            "Cleanup task triggered"
                        );
                        if let Err(e) = run_retention_sweep(&self.store).await {
                            tracing::error!(error = %e, "Failed to cleanup old alerts");
                        }
                        // 立刻排到明天，避免同一分钟内重复执行
                        next_run = Some(next_run_time(config.hour, config.minute, Local::now().naive_local()));
                        tracing::info!(scheduled_time = %next_run.unwrap_or_default(), "Next cleanup task scheduled");
                    }
                }
            }
        }
    }
}

/// Executes one retention sweep and records the outcome on the retention
/// config. Shared by the scheduled loop and the manual trigger path.
pub async fn run_retention_sweep(store: &Store) -> Result<u64> {
    let config = store.get_retention_config().await?;

    match store.delete_alerts_older_than(config.retention_days).await {
        Ok(removed) => {
            tracing::info!(
                rows_affected = removed,
                retention_days = config.retention_days,
                "Cleanup task completed"
            );
            let result_msg = if removed > 0 {
                format!("成功删除 {removed} 条告警数据")
            } else {
                "没有需要清理的数据".to_string()
            };
            if let Err(e) = store
                .update_retention_execution_status("success", &result_msg)
                .await
            {
                tracing::error!(error = %e, "Failed to update cleanup execution status");
            }
            Ok(removed)
        }
        Err(e) => {
            let status_msg = format!("清理失败: {e}");
            if let Err(status_err) = store
                .update_retention_execution_status("failed", &status_msg)
                .await
            {
                tracing::error!(error = %status_err, "Failed to update cleanup execution status");
            }
            Err(e)
        }
    }
}

/// Next occurrence of `hour:minute` in local time: today if that minute has
/// not passed yet, otherwise tomorrow.
fn next_run_time(hour: u32, minute: u32, now: NaiveDateTime) -> NaiveDateTime {
    let today_run = now
        .date()
        .and_hms_opt(hour.min(23), minute.min(59), 0)
        .unwrap_or(now);

    if truncate_to_minute(now) > truncate_to_minute(today_run) {
        today_run + chrono::Duration::days(1)
    } else {
        today_run
    }
}

fn truncate_to_minute(t: NaiveDateTime) -> NaiveDateTime {
    t.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 11, 28)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn schedules_today_when_minute_not_passed() {
        let next = next_run_time(3, 0, at(1, 30, 0));
        assert_eq!(next, at(3, 0, 0));
    }

    #[test]
    fn schedules_tomorrow_when_minute_passed() {
        let next = next_run_time(3, 0, at(3, 1, 0));
        assert_eq!(next, at(3, 0, 0) + chrono::Duration::days(1));
    }

    #[test]
    fn same_minute_is_still_today() {
        // 同一分钟内仍算在执行窗口里
        let next = next_run_time(3, 0, at(3, 0, 45));
        assert_eq!(next, at(3, 0, 0));
        assert!(truncate_to_minute(at(3, 0, 45)) >= truncate_to_minute(next));
    }

    #[test]
    fn due_check_uses_minute_truncation() {
        let scheduled = at(3, 0, 0);
        assert!(truncate_to_minute(at(3, 0, 59)) >= truncate_to_minute(scheduled));
        assert!(truncate_to_minute(at(3, 1, 0)) >= truncate_to_minute(scheduled));
        assert!(truncate_to_minute(at(2, 59, 59)) < truncate_to_minute(scheduled));
    }
}
