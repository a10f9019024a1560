use anyhow::Result;
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection};
use std::path::Path;
use std::time::Duration;

use elkwatch_common::secrets::SecretCipher;

pub mod alert;
pub mod channel;
pub mod data_source;
pub mod retention;
pub mod rule;

/// 管理数据库（SQLite）的统一访问层。
///
/// 所有方法均为 `async fn`，底层使用 SeaORM。秘密字段（webhook 地址、
/// 数据源密码）在写入时加密、读取时解密，密钥未配置时原样存取。
pub struct Store {
    pub(crate) db: DatabaseConnection,
    pub(crate) cipher: SecretCipher,
}

impl Store {
    /// 连接并初始化数据库。
    ///
    /// 自动运行 `sea-orm-migration` 迁移，确保 Schema 最新。
    pub async fn connect(
        db_path: &Path,
        cipher: SecretCipher,
        query_timeout: Duration,
    ) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let url = format!(
            "sqlite://{}?mode=rwc",
            db_path
                .to_str()
                .ok_or_else(|| anyhow::anyhow!("non-UTF-8 database path"))?
        );

        let mut options = ConnectOptions::new(url);
        options
            .acquire_timeout(query_timeout)
            .connect_timeout(query_timeout)
            .sqlx_logging(false);
        let db = Database::connect(options).await?;

        // 开启 WAL 模式
        db.execute_unprepared("PRAGMA journal_mode=WAL;").await?;

        // 运行所有待执行迁移
        Migrator::up(&db, None).await?;

        tracing::info!(path = %db_path.display(), "Initialized store (SeaORM)");

        Ok(Self { db, cipher })
    }

    /// 返回底层数据库连接引用（供子模块使用）。
    pub(crate) fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    pub(crate) fn encrypt_secret(&self, value: &str) -> Result<String> {
        self.cipher.maybe_encrypt(value)
    }
}
