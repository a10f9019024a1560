use anyhow::Result;
use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, ActiveValue::Set, EntityTrait, Order, QueryOrder};
use serde::{Deserialize, Serialize};

use crate::entities::webhook_channel::{self, Column, Entity};
use crate::store::Store;
use elkwatch_common::secrets::SecretCipher;

/// 通知渠道数据行（webhook 地址已解密）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookChannelRow {
    pub id: i64,
    pub name: String,
    pub webhook_url: String,
    pub enabled: bool,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 创建通知渠道请求
#[derive(Debug, Clone, Deserialize)]
pub struct NewWebhookChannel {
    pub name: String,
    pub webhook_url: String,
    pub enabled: bool,
    pub description: String,
}

fn to_row(cipher: &SecretCipher, m: webhook_channel::Model) -> Result<WebhookChannelRow> {
    Ok(WebhookChannelRow {
        id: m.id,
        name: m.name,
        webhook_url: cipher.maybe_decrypt(&m.webhook_url)?,
        enabled: m.enabled,
        description: m.description,
        created_at: m.created_at.with_timezone(&Utc),
        updated_at: m.updated_at.with_timezone(&Utc),
    })
}

impl Store {
    pub async fn insert_webhook_channel(
        &self,
        new: &NewWebhookChannel,
    ) -> Result<WebhookChannelRow> {
        let now = Utc::now().fixed_offset();
        let am = webhook_channel::ActiveModel {
            name: Set(new.name.clone()),
            webhook_url: Set(self.encrypt_secret(&new.webhook_url)?),
            enabled: Set(new.enabled),
            description: Set(new.description.clone()),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };
        let model = am.insert(self.db()).await?;
        to_row(&self.cipher, model)
    }

    pub async fn get_webhook_channel_by_id(&self, id: i64) -> Result<Option<WebhookChannelRow>> {
        let model = Entity::find_by_id(id).one(self.db()).await?;
        model.map(|m| to_row(&self.cipher, m)).transpose()
    }

    pub async fn list_webhook_channels(&self) -> Result<Vec<WebhookChannelRow>> {
        let rows = Entity::find()
            .order_by(Column::Id, Order::Asc)
            .all(self.db())
            .await?;
        rows.into_iter().map(|m| to_row(&self.cipher, m)).collect()
    }

    pub async fn set_webhook_channel_enabled(
        &self,
        id: i64,
        enabled: bool,
    ) -> Result<Option<WebhookChannelRow>> {
        let model = Entity::find_by_id(id).one(self.db()).await?;
        if let Some(m) = model {
            let now = Utc::now().fixed_offset();
            let mut am: webhook_channel::ActiveModel = m.into();
            am.enabled = Set(enabled);
            am.updated_at = Set(now);
            let updated = am.update(self.db()).await?;
            Ok(Some(to_row(&self.cipher, updated)?))
        } else {
            Ok(None)
        }
    }
}
