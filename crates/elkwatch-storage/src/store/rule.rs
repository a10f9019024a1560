use anyhow::Result;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, Order, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, TransactionTrait,
};
use serde::{Deserialize, Serialize};

use crate::entities::alert;
use crate::entities::rule::{self, Column, Entity};
use crate::store::Store;
use elkwatch_common::secrets::SecretCipher;
use elkwatch_common::types::QueryCondition;

/// 告警规则数据行（来自 rules 表，秘密字段已解密）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleRow {
    pub id: i64,
    pub name: String,
    pub index_pattern: String,
    pub conditions: Vec<QueryCondition>,
    pub enabled: bool,
    pub interval_secs: i64,
    pub data_source_id: Option<i64>,
    pub channel_id: Option<i64>,
    pub webhook_url: String,
    pub description: String,
    pub last_run_time: Option<DateTime<Utc>>,
    pub run_count: i64,
    pub alert_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 创建/更新规则请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRule {
    pub name: String,
    pub index_pattern: String,
    pub conditions: Vec<QueryCondition>,
    pub enabled: bool,
    pub interval_secs: i64,
    pub data_source_id: Option<i64>,
    pub channel_id: Option<i64>,
    pub webhook_url: String,
    pub description: String,
}

fn to_row(cipher: &SecretCipher, m: rule::Model) -> Result<RuleRow> {
    Ok(RuleRow {
        id: m.id,
        name: m.name,
        index_pattern: m.index_pattern,
        conditions: serde_json::from_str(&m.conditions).unwrap_or_default(),
        enabled: m.enabled,
        interval_secs: m.interval_secs,
        data_source_id: m.data_source_id,
        channel_id: m.channel_id,
        webhook_url: cipher.maybe_decrypt(&m.webhook_url)?,
        description: m.description,
        last_run_time: m.last_run_time.map(|t| t.with_timezone(&Utc)),
        run_count: m.run_count,
        alert_count: m.alert_count,
        created_at: m.created_at.with_timezone(&Utc),
        updated_at: m.updated_at.with_timezone(&Utc),
    })
}

impl Store {
    pub async fn insert_rule(&self, new: &NewRule) -> Result<RuleRow> {
        let now = Utc::now().fixed_offset();
        let am = rule::ActiveModel {
            name: Set(new.name.clone()),
            index_pattern: Set(new.index_pattern.clone()),
            conditions: Set(serde_json::to_string(&new.conditions)?),
            enabled: Set(new.enabled),
            interval_secs: Set(new.interval_secs),
            data_source_id: Set(new.data_source_id),
            channel_id: Set(new.channel_id),
            webhook_url: Set(self.encrypt_secret(&new.webhook_url)?),
            description: Set(new.description.clone()),
            last_run_time: Set(None),
            run_count: Set(0),
            alert_count: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };
        let model = am.insert(self.db()).await?;
        to_row(&self.cipher, model)
    }

    pub async fn get_rule_by_id(&self, id: i64) -> Result<Option<RuleRow>> {
        let model = Entity::find_by_id(id).one(self.db()).await?;
        model.map(|m| to_row(&self.cipher, m)).transpose()
    }

    pub async fn get_rule_by_name(&self, name: &str) -> Result<Option<RuleRow>> {
        let model = Entity::find()
            .filter(Column::Name.eq(name))
            .one(self.db())
            .await?;
        model.map(|m| to_row(&self.cipher, m)).transpose()
    }

    pub async fn list_rules(&self, limit: usize, offset: usize) -> Result<Vec<RuleRow>> {
        let rows = Entity::find()
            .order_by(Column::Id, Order::Desc)
            .limit(limit as u64)
            .offset(offset as u64)
            .all(self.db())
            .await?;
        rows.into_iter().map(|m| to_row(&self.cipher, m)).collect()
    }

    pub async fn count_rules(&self) -> Result<u64> {
        Ok(Entity::find().count(self.db()).await?)
    }

    pub async fn list_enabled_rules(&self) -> Result<Vec<RuleRow>> {
        let rows = Entity::find()
            .filter(Column::Enabled.eq(true))
            .order_by(Column::Id, Order::Asc)
            .all(self.db())
            .await?;
        rows.into_iter().map(|m| to_row(&self.cipher, m)).collect()
    }

    pub async fn list_enabled_rule_ids(&self) -> Result<Vec<i64>> {
        let rows = Entity::find()
            .filter(Column::Enabled.eq(true))
            .order_by(Column::Id, Order::Asc)
            .all(self.db())
            .await?;
        Ok(rows.into_iter().map(|m| m.id).collect())
    }

    pub async fn update_rule(&self, id: i64, new: &NewRule) -> Result<Option<RuleRow>> {
        let model = Entity::find_by_id(id).one(self.db()).await?;
        if let Some(m) = model {
            let now = Utc::now().fixed_offset();
            let mut am: rule::ActiveModel = m.into();
            am.name = Set(new.name.clone());
            am.index_pattern = Set(new.index_pattern.clone());
            am.conditions = Set(serde_json::to_string(&new.conditions)?);
            am.enabled = Set(new.enabled);
            am.interval_secs = Set(new.interval_secs);
            am.data_source_id = Set(new.data_source_id);
            am.channel_id = Set(new.channel_id);
            am.webhook_url = Set(self.encrypt_secret(&new.webhook_url)?);
            am.description = Set(new.description.clone());
            am.updated_at = Set(now);
            let updated = am.update(self.db()).await?;
            Ok(Some(to_row(&self.cipher, updated)?))
        } else {
            Ok(None)
        }
    }

    pub async fn set_rule_enabled(&self, id: i64, enabled: bool) -> Result<Option<RuleRow>> {
        let model = Entity::find_by_id(id).one(self.db()).await?;
        if let Some(m) = model {
            let now = Utc::now().fixed_offset();
            let mut am: rule::ActiveModel = m.into();
            am.enabled = Set(enabled);
            am.updated_at = Set(now);
            let updated = am.update(self.db()).await?;
            Ok(Some(to_row(&self.cipher, updated)?))
        } else {
            Ok(None)
        }
    }

    /// 删除规则及其全部告警记录（同一事务内级联删除）。
    pub async fn delete_rule(&self, id: i64) -> Result<bool> {
        let txn = self.db().begin().await?;
        alert::Entity::delete_many()
            .filter(alert::Column::RuleId.eq(id))
            .exec(&txn)
            .await?;
        let res = Entity::delete_by_id(id).exec(&txn).await?;
        txn.commit().await?;
        Ok(res.rows_affected > 0)
    }

    /// 以新名称复制规则，统计字段清零。
    pub async fn clone_rule(&self, id: i64, new_name: &str) -> Result<Option<RuleRow>> {
        let Some(original) = self.get_rule_by_id(id).await? else {
            return Ok(None);
        };
        let cloned = NewRule {
            name: new_name.to_string(),
            index_pattern: original.index_pattern,
            conditions: original.conditions,
            enabled: original.enabled,
            interval_secs: original.interval_secs,
            data_source_id: original.data_source_id,
            channel_id: original.channel_id,
            webhook_url: original.webhook_url,
            description: original.description,
        };
        Ok(Some(self.insert_rule(&cloned).await?))
    }

    /// 查询成功后同步推进时间游标。
    pub async fn update_rule_last_run_time(&self, id: i64, t: DateTime<Utc>) -> Result<()> {
        Entity::update_many()
            .col_expr(Column::LastRunTime, Expr::value(t.fixed_offset()))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(Column::Id.eq(id))
            .exec(self.db())
            .await?;
        Ok(())
    }

    /// 执行计数 +1（SQL 侧自增，无读-改-写竞争）。
    pub async fn increment_rule_run_count(&self, id: i64) -> Result<()> {
        Entity::update_many()
            .col_expr(Column::RunCount, Expr::col(Column::RunCount).add(1))
            .filter(Column::Id.eq(id))
            .exec(self.db())
            .await?;
        Ok(())
    }

    /// 告警计数 +n（SQL 侧自增）。
    pub async fn increment_rule_alert_count(&self, id: i64, n: i64) -> Result<()> {
        Entity::update_many()
            .col_expr(Column::AlertCount, Expr::col(Column::AlertCount).add(n))
            .filter(Column::Id.eq(id))
            .exec(self.db())
            .await?;
        Ok(())
    }
}
