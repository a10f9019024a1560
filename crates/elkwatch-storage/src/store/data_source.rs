use anyhow::Result;
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, Order, QueryFilter, QueryOrder,
};
use serde::{Deserialize, Serialize};

use crate::entities::data_source::{self, Column, Entity};
use crate::store::Store;
use elkwatch_common::secrets::SecretCipher;

/// ES 数据源数据行（密码已解密）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSourceRow {
    pub id: i64,
    pub name: String,
    /// 分号分隔的端点列表。
    pub url: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub use_ssl: bool,
    pub skip_verify: bool,
    #[serde(skip_serializing)]
    pub ca_certificate: String,
    pub is_default: bool,
    pub enabled: bool,
    pub description: String,
    pub last_test_at: Option<DateTime<Utc>>,
    pub test_status: String,
    pub test_error: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 创建数据源请求
#[derive(Debug, Clone, Deserialize)]
pub struct NewDataSource {
    pub name: String,
    pub url: String,
    pub username: String,
    pub password: String,
    pub use_ssl: bool,
    pub skip_verify: bool,
    pub ca_certificate: String,
    pub is_default: bool,
    pub enabled: bool,
    pub description: String,
}

fn to_row(cipher: &SecretCipher, m: data_source::Model) -> Result<DataSourceRow> {
    Ok(DataSourceRow {
        id: m.id,
        name: m.name,
        url: m.url,
        username: m.username,
        password: cipher.maybe_decrypt(&m.password)?,
        use_ssl: m.use_ssl,
        skip_verify: m.skip_verify,
        ca_certificate: m.ca_certificate,
        is_default: m.is_default,
        enabled: m.enabled,
        description: m.description,
        last_test_at: m.last_test_at.map(|t| t.with_timezone(&Utc)),
        test_status: m.test_status,
        test_error: m.test_error,
        created_at: m.created_at.with_timezone(&Utc),
        updated_at: m.updated_at.with_timezone(&Utc),
    })
}

impl Store {
    pub async fn insert_data_source(&self, new: &NewDataSource) -> Result<DataSourceRow> {
        let now = Utc::now().fixed_offset();
        let am = data_source::ActiveModel {
            name: Set(new.name.clone()),
            url: Set(new.url.clone()),
            username: Set(new.username.clone()),
            password: Set(self.encrypt_secret(&new.password)?),
            use_ssl: Set(new.use_ssl),
            skip_verify: Set(new.skip_verify),
            ca_certificate: Set(new.ca_certificate.clone()),
            is_default: Set(new.is_default),
            enabled: Set(new.enabled),
            description: Set(new.description.clone()),
            last_test_at: Set(None),
            test_status: Set("unknown".to_string()),
            test_error: Set(String::new()),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };
        let model = am.insert(self.db()).await?;
        to_row(&self.cipher, model)
    }

    pub async fn get_data_source_by_id(&self, id: i64) -> Result<Option<DataSourceRow>> {
        let model = Entity::find_by_id(id).one(self.db()).await?;
        model.map(|m| to_row(&self.cipher, m)).transpose()
    }

    /// 进程级默认数据源（is_default 且启用）。
    pub async fn get_default_data_source(&self) -> Result<Option<DataSourceRow>> {
        let model = Entity::find()
            .filter(Column::IsDefault.eq(true))
            .filter(Column::Enabled.eq(true))
            .one(self.db())
            .await?;
        model.map(|m| to_row(&self.cipher, m)).transpose()
    }

    pub async fn list_data_sources(&self) -> Result<Vec<DataSourceRow>> {
        let rows = Entity::find()
            .order_by(Column::Id, Order::Asc)
            .all(self.db())
            .await?;
        rows.into_iter().map(|m| to_row(&self.cipher, m)).collect()
    }

    pub async fn set_data_source_enabled(
        &self,
        id: i64,
        enabled: bool,
    ) -> Result<Option<DataSourceRow>> {
        let model = Entity::find_by_id(id).one(self.db()).await?;
        if let Some(m) = model {
            let now = Utc::now().fixed_offset();
            let mut am: data_source::ActiveModel = m.into();
            am.enabled = Set(enabled);
            am.updated_at = Set(now);
            let updated = am.update(self.db()).await?;
            Ok(Some(to_row(&self.cipher, updated)?))
        } else {
            Ok(None)
        }
    }

    /// 连接测试结果回写（外部 API 的“测试连接”路径）。
    pub async fn update_data_source_test_status(
        &self,
        id: i64,
        success: bool,
        error: &str,
    ) -> Result<()> {
        let model = Entity::find_by_id(id).one(self.db()).await?;
        if let Some(m) = model {
            let now = Utc::now().fixed_offset();
            let mut am: data_source::ActiveModel = m.into();
            am.last_test_at = Set(Some(now));
            am.test_status = Set(if success { "success" } else { "failed" }.to_string());
            am.test_error = Set(error.to_string());
            am.updated_at = Set(now);
            am.update(self.db()).await?;
        }
        Ok(())
    }
}
