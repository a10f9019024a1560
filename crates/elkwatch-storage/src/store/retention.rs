use anyhow::{bail, Result};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter};

use crate::entities::system_config::{self, Column, Entity};
use crate::store::Store;
use elkwatch_common::types::RetentionConfig;

const RETENTION_CONFIG_KEY: &str = "retention_config";

impl Store {
    /// 读取清理任务配置，不存在时返回默认值。
    pub async fn get_retention_config(&self) -> Result<RetentionConfig> {
        let model = Entity::find()
            .filter(Column::ConfigKey.eq(RETENTION_CONFIG_KEY))
            .one(self.db())
            .await?;

        let Some(m) = model else {
            return Ok(RetentionConfig::default());
        };

        let mut config: RetentionConfig = serde_json::from_str(&m.config_value)?;
        // 旧配置可能缺少执行状态字段
        if config.last_execution_status.is_empty() {
            config.last_execution_status = "never".to_string();
        }
        Ok(config)
    }

    /// 更新清理任务配置。
    ///
    /// 三个 `last_execution_*` 字段归清理任务所有：外部写入未携带时
    /// （空字符串 / None），从现有配置原样保留。
    pub async fn update_retention_config(&self, config: &RetentionConfig) -> Result<()> {
        if config.hour > 23 {
            bail!("hour must be between 0 and 23");
        }
        if config.minute > 59 {
            bail!("minute must be between 0 and 59");
        }
        if config.retention_days < 1 {
            bail!("retention_days must be at least 1");
        }

        let existing = self.get_retention_config().await?;

        let mut merged = config.clone();
        if merged.last_execution_status.is_empty() {
            merged.last_execution_status = existing.last_execution_status;
        }
        if merged.last_execution_time.is_none() {
            merged.last_execution_time = existing.last_execution_time;
        }
        if merged.last_execution_result.is_empty() {
            merged.last_execution_result = existing.last_execution_result;
        }

        let value = serde_json::to_string(&merged)?;
        let now = Utc::now().fixed_offset();

        let model = Entity::find()
            .filter(Column::ConfigKey.eq(RETENTION_CONFIG_KEY))
            .one(self.db())
            .await?;

        match model {
            Some(m) => {
                let mut am: system_config::ActiveModel = m.into();
                am.config_value = Set(value);
                am.updated_at = Set(now);
                am.update(self.db()).await?;
            }
            None => {
                let am = system_config::ActiveModel {
                    config_key: Set(RETENTION_CONFIG_KEY.to_string()),
                    config_value: Set(value),
                    description: Set("定时清理任务配置：执行时间、保留天数".to_string()),
                    created_at: Set(now),
                    updated_at: Set(now),
                    ..Default::default()
                };
                am.insert(self.db()).await?;
            }
        }

        Ok(())
    }

    /// 清理任务执行完毕后回写状态（status: success/failed）。
    pub async fn update_retention_execution_status(
        &self,
        status: &str,
        result: &str,
    ) -> Result<()> {
        let mut config = self.get_retention_config().await?;
        config.last_execution_status = status.to_string();
        config.last_execution_time = Some(Utc::now());
        config.last_execution_result = result.to_string();
        self.update_retention_config(&config).await
    }
}
