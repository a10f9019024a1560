use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, OwnedSemaphorePermit};

use crate::error::{ExecError, ExecOutcome};
use crate::window::{format_time_range, resolve_window, should_skip};
use elkwatch_common::config::{ElasticsearchConfig, WorkerConfig};
use elkwatch_common::types::{AlertStatus, LogDocument};
use elkwatch_notify::WebhookNotifier;
use elkwatch_query::{EsClient, EsConnection};
use elkwatch_storage::{DataSourceRow, NewAlert, RuleRow, Store};

/// Log documents handed to the notifier per alert.
const MAX_NOTIFY_LOGS: usize = 10;

/// Log documents persisted per alert.
const MAX_ALERT_LOGS: usize = 50;

/// One-shot rule execution: window resolution, query, cursor commit, alert
/// persistence, and notification dispatch.
pub struct Executor {
    store: Arc<Store>,
    default_connection: EsConnection,
    batch_size: usize,
    retry_times: u32,
    es_query_timeout: Duration,
    send_timeout: Duration,
}

impl Executor {
    pub fn new(store: Arc<Store>, es: &ElasticsearchConfig, worker: &WorkerConfig) -> Self {
        Self {
            store,
            default_connection: EsConnection {
                url: es.url.clone(),
                username: es.username.clone(),
                password: es.password.clone(),
                use_ssl: es.use_ssl,
                skip_verify: es.skip_verify,
                ca_certificate: es.ca_certificate.clone(),
            },
            batch_size: worker.batch_size,
            retry_times: worker.retry_times,
            es_query_timeout: Duration::from_secs(es.query_timeout_secs),
            send_timeout: Duration::from_secs(worker.alert_send_timeout_secs),
        }
    }

    /// Executes one tick of `rule`.
    ///
    /// `permit` is the global concurrency slot; when the tick produces
    /// matches it travels into the detached persistence/notification task
    /// and is released only after that task finishes. `cancel` observes
    /// rule shutdown so a sleeping notification retry stops promptly.
    pub async fn execute(
        &self,
        rule: &RuleRow,
        force: bool,
        permit: OwnedSemaphorePermit,
        cancel: watch::Receiver<bool>,
    ) -> Result<ExecOutcome, ExecError> {
        let now = Utc::now();

        if should_skip(rule.last_run_time, now, rule.interval_secs, force) {
            tracing::debug!(
                rule_id = rule.id,
                rule_name = %rule.name,
                interval = rule.interval_secs,
                "Skipping execution, interval not elapsed"
            );
            return Ok(ExecOutcome::Skipped);
        }

        let (from, to) = resolve_window(rule.last_run_time, now);
        tracing::info!(
            rule_id = rule.id,
            rule_name = %rule.name,
            index_pattern = %rule.index_pattern,
            from = %from,
            to = %to,
            force,
            "Executing rule"
        );

        // 先校验配置，查询之前就失败，不消耗 ES 资源
        let webhook_url = self.resolve_webhook(rule).await?;
        let client = self.resolve_client(rule).await?;

        let logs = client
            .query_logs(&rule.index_pattern, &rule.conditions, from, to, self.batch_size)
            .await?;
        tracing::info!(rule_id = rule.id, logs_found = logs.len(), "Query completed");

        // 查询成功后立刻同步推进游标；失败只记日志，告警照常发出
        if let Err(e) = self.store.update_rule_last_run_time(rule.id, to).await {
            tracing::warn!(rule_id = rule.id, error = %e, "Failed to update last run time");
        }

        // 执行计数为非关键路径，异步自增
        {
            let store = self.store.clone();
            let rule_id = rule.id;
            tokio::spawn(async move {
                if let Err(e) = store.increment_rule_run_count(rule_id).await {
                    tracing::warn!(rule_id, error = %e, "Failed to increment run count");
                }
            });
        }

        if logs.is_empty() {
            tracing::debug!(rule_id = rule.id, "No logs matched, skipping alert");
            return Ok(ExecOutcome::Completed { matches: 0 });
        }

        let matches = logs.len();
        let time_range = format_time_range(from, to);
        tracing::info!(
            rule_id = rule.id,
            rule_name = %rule.name,
            log_count = matches,
            time_range = %time_range,
            "Found logs, triggering alert"
        );

        let task = AlertTask {
            store: self.store.clone(),
            rule_id: rule.id,
            rule_name: rule.name.clone(),
            index_name: rule.index_pattern.clone(),
            webhook_url,
            logs,
            time_range,
            retry_times: self.retry_times,
            send_timeout: self.send_timeout,
        };
        tokio::spawn(async move {
            // 并发槽位持有到通知结束，使 WORKER_MAX_CONCURRENCY 成为
            // 对外出流量的真实上限
            let _permit = permit;
            task.run(from, to, cancel).await;
        });

        Ok(ExecOutcome::Completed { matches })
    }

    /// Resolves the webhook endpoint: an enabled linked channel wins,
    /// then the rule's inline URL.
    async fn resolve_webhook(&self, rule: &RuleRow) -> Result<String, ExecError> {
        if let Some(channel_id) = rule.channel_id {
            match self.store.get_webhook_channel_by_id(channel_id).await? {
                Some(channel) if channel.enabled => {
                    tracing::debug!(
                        rule_id = rule.id,
                        channel_id,
                        "Using notification channel webhook"
                    );
                    return Ok(channel.webhook_url);
                }
                Some(_) => {
                    tracing::warn!(
                        rule_id = rule.id,
                        channel_id,
                        "Linked notification channel is disabled, falling back to inline URL"
                    );
                }
                None => {
                    tracing::warn!(
                        rule_id = rule.id,
                        channel_id,
                        "Linked notification channel not found, falling back to inline URL"
                    );
                }
            }
        }

        if !rule.webhook_url.is_empty() {
            return Ok(rule.webhook_url.clone());
        }

        Err(ExecError::Config(format!(
            "no webhook URL configured for rule: channel_id={:?}, inline_url_empty=true",
            rule.channel_id
        )))
    }

    /// Resolves the ES client: the rule's data source if referenced (must
    /// be enabled), else the storage-level default source, else the
    /// process-wide environment source.
    async fn resolve_client(&self, rule: &RuleRow) -> Result<EsClient, ExecError> {
        if let Some(source_id) = rule.data_source_id {
            let Some(source) = self.store.get_data_source_by_id(source_id).await? else {
                return Err(ExecError::Config(format!(
                    "data source {source_id} not found"
                )));
            };
            if !source.enabled {
                return Err(ExecError::Config(format!(
                    "data source {source_id} is disabled"
                )));
            }
            return Ok(EsClient::new(
                &connection_from_source(&source),
                self.es_query_timeout,
            )?);
        }

        if let Some(source) = self.store.get_default_data_source().await? {
            return Ok(EsClient::new(
                &connection_from_source(&source),
                self.es_query_timeout,
            )?);
        }

        Ok(EsClient::new(&self.default_connection, self.es_query_timeout)?)
    }
}

fn connection_from_source(source: &DataSourceRow) -> EsConnection {
    EsConnection {
        url: source.url.clone(),
        username: source.username.clone(),
        password: source.password.clone(),
        use_ssl: source.use_ssl,
        skip_verify: source.skip_verify,
        ca_certificate: source.ca_certificate.clone(),
    }
}

/// Detached persistence + notification step for one triggered alert.
struct AlertTask {
    store: Arc<Store>,
    rule_id: i64,
    rule_name: String,
    index_name: String,
    webhook_url: String,
    logs: Vec<LogDocument>,
    time_range: String,
    retry_times: u32,
    send_timeout: Duration,
}

impl AlertTask {
    async fn run(
        mut self,
        from: chrono::DateTime<Utc>,
        to: chrono::DateTime<Utc>,
        mut cancel: watch::Receiver<bool>,
    ) {
        let log_count = self.logs.len();
        self.logs.truncate(MAX_ALERT_LOGS);

        // 先落库（初始 sent），通知结果出来后再回写状态
        let alert_id = match self
            .store
            .insert_alert(&NewAlert {
                rule_id: self.rule_id,
                index_name: self.index_name.clone(),
                log_count: log_count as i64,
                logs: self.logs.clone(),
                time_range: self.time_range.clone(),
                status: AlertStatus::Sent,
                error_msg: String::new(),
            })
            .await
        {
            Ok(row) => Some(row.id),
            Err(e) => {
                tracing::error!(rule_id = self.rule_id, error = %e, "Failed to create alert record");
                None
            }
        };

        let notify_logs: Vec<LogDocument> =
            self.logs.iter().take(MAX_NOTIFY_LOGS).cloned().collect();

        let send_result = self
            .send_with_budget(&notify_logs, log_count, from, to, &mut cancel)
            .await;

        match send_result {
            Ok(()) => {
                tracing::info!(rule_id = self.rule_id, rule_name = %self.rule_name, "Alert sent successfully");
                if alert_id.is_some() {
                    if let Err(e) = self.store.increment_rule_alert_count(self.rule_id, 1).await {
                        tracing::warn!(rule_id = self.rule_id, error = %e, "Failed to increment alert count");
                    }
                }
            }
            Err(message) => {
                tracing::error!(
                    rule_id = self.rule_id,
                    rule_name = %self.rule_name,
                    error = %message,
                    "Alert send failed"
                );
                if let Some(id) = alert_id {
                    if let Err(e) = self
                        .store
                        .update_alert_status(id, AlertStatus::Failed, &message)
                        .await
                    {
                        tracing::error!(alert_id = id, error = %e, "Failed to update alert status");
                    }
                }
            }
        }
    }

    /// Runs the webhook send under the overall budget, watching for rule
    /// cancellation so backoff sleeps end early.
    async fn send_with_budget(
        &self,
        logs: &[LogDocument],
        log_count: usize,
        from: chrono::DateTime<Utc>,
        to: chrono::DateTime<Utc>,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<(), String> {
        let notifier = WebhookNotifier::new(&self.webhook_url).map_err(|e| e.to_string())?;

        let send = notifier.send_alert(
            &self.rule_name,
            &self.index_name,
            logs,
            log_count,
            from,
            to,
            self.retry_times,
        );

        tokio::select! {
            result = tokio::time::timeout(self.send_timeout, send) => match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!(
                    "alert send timeout after {}s",
                    self.send_timeout.as_secs()
                )),
            },
            _ = cancel.changed() => {
                Err("cancelled while sending notification".to_string())
            }
        }
    }
}
