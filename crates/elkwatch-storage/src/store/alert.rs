use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, Order, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect,
};
use serde::{Deserialize, Serialize};

use crate::entities::alert::{self, Column, Entity};
use crate::store::Store;
use elkwatch_common::types::{AlertStatus, LogDocument};

/// 单条告警最多落库的日志样本数。
pub const MAX_STORED_LOGS: usize = 50;

/// 详情接口最多返回的日志样本数。
const MAX_LOGS_ON_READ: usize = 10;

/// 告警记录数据行（来自 alerts 表）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRow {
    pub id: i64,
    pub rule_id: i64,
    pub index_name: String,
    /// 截断前的命中总数，可能大于 `logs.len()`。
    pub log_count: i64,
    pub logs: Vec<LogDocument>,
    pub time_range: String,
    pub status: AlertStatus,
    pub error_msg: String,
    pub created_at: DateTime<Utc>,
}

/// 新建告警请求
#[derive(Debug, Clone)]
pub struct NewAlert {
    pub rule_id: i64,
    pub index_name: String,
    pub log_count: i64,
    pub logs: Vec<LogDocument>,
    pub time_range: String,
    pub status: AlertStatus,
    pub error_msg: String,
}

/// 时间窗内的告警计数统计
#[derive(Debug, Clone, Serialize)]
pub struct AlertStats {
    pub total: u64,
    pub sent: u64,
    pub failed: u64,
}

fn to_row(m: alert::Model) -> AlertRow {
    AlertRow {
        id: m.id,
        rule_id: m.rule_id,
        index_name: m.index_name,
        log_count: m.log_count,
        logs: serde_json::from_str(&m.logs).unwrap_or_default(),
        time_range: m.time_range,
        status: m.status.parse().unwrap_or(AlertStatus::Failed),
        error_msg: m.error_msg,
        created_at: m.created_at.with_timezone(&Utc),
    }
}

impl Store {
    /// 写入告警记录。日志样本超过 [`MAX_STORED_LOGS`] 时截断存储，
    /// `log_count` 保留截断前的命中总数。
    pub async fn insert_alert(&self, new: &NewAlert) -> Result<AlertRow> {
        let now = Utc::now().fixed_offset();
        let stored_logs = if new.logs.len() > MAX_STORED_LOGS {
            &new.logs[..MAX_STORED_LOGS]
        } else {
            &new.logs[..]
        };
        let am = alert::ActiveModel {
            rule_id: Set(new.rule_id),
            index_name: Set(new.index_name.clone()),
            log_count: Set(new.log_count),
            logs: Set(serde_json::to_string(stored_logs)?),
            time_range: Set(new.time_range.clone()),
            status: Set(new.status.to_string()),
            error_msg: Set(new.error_msg.clone()),
            created_at: Set(now),
            ..Default::default()
        };
        let model = am.insert(self.db()).await?;
        Ok(to_row(model))
    }

    /// 读取单条告警，日志样本截断到前 10 条。
    pub async fn get_alert_by_id(&self, id: i64) -> Result<Option<AlertRow>> {
        let model = Entity::find_by_id(id).one(self.db()).await?;
        Ok(model.map(|m| {
            let mut row = to_row(m);
            row.logs.truncate(MAX_LOGS_ON_READ);
            row
        }))
    }

    pub async fn list_alerts(
        &self,
        rule_id: Option<i64>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<AlertRow>> {
        let mut q = Entity::find();
        if let Some(rid) = rule_id {
            q = q.filter(Column::RuleId.eq(rid));
        }
        let rows = q
            .order_by(Column::CreatedAt, Order::Desc)
            .limit(limit as u64)
            .offset(offset as u64)
            .all(self.db())
            .await?;
        Ok(rows.into_iter().map(to_row).collect())
    }

    pub async fn count_alerts(&self, rule_id: Option<i64>) -> Result<u64> {
        let mut q = Entity::find();
        if let Some(rid) = rule_id {
            q = q.filter(Column::RuleId.eq(rid));
        }
        Ok(q.count(self.db()).await?)
    }

    /// 更新告警投递状态（通知任务完成后回写）。
    pub async fn update_alert_status(
        &self,
        id: i64,
        status: AlertStatus,
        error_msg: &str,
    ) -> Result<()> {
        let model = Entity::find_by_id(id).one(self.db()).await?;
        if let Some(m) = model {
            let mut am: alert::ActiveModel = m.into();
            am.status = Set(status.to_string());
            am.error_msg = Set(error_msg.to_string());
            am.update(self.db()).await?;
        }
        Ok(())
    }

    pub async fn delete_alert(&self, id: i64) -> Result<bool> {
        let res = Entity::delete_by_id(id).exec(self.db()).await?;
        Ok(res.rows_affected > 0)
    }

    /// 硬删除早于保留期的告警，返回删除行数。
    pub async fn delete_alerts_older_than(&self, retention_days: u32) -> Result<u64> {
        let cutoff = Utc::now() - Duration::days(retention_days as i64);
        let res = Entity::delete_many()
            .filter(Column::CreatedAt.lt(cutoff.fixed_offset()))
            .exec(self.db())
            .await?;
        Ok(res.rows_affected)
    }

    /// 最近一段时间内的告警投递统计。
    pub async fn alert_stats(&self, window: Duration) -> Result<AlertStats> {
        let since = (Utc::now() - window).fixed_offset();
        let total = Entity::find()
            .filter(Column::CreatedAt.gte(since))
            .count(self.db())
            .await?;
        let sent = Entity::find()
            .filter(Column::CreatedAt.gte(since))
            .filter(Column::Status.eq(AlertStatus::Sent.to_string()))
            .count(self.db())
            .await?;
        let failed = Entity::find()
            .filter(Column::CreatedAt.gte(since))
            .filter(Column::Status.eq(AlertStatus::Failed.to_string()))
            .count(self.db())
            .await?;
        Ok(AlertStats {
            total,
            sent,
            failed,
        })
    }
}
