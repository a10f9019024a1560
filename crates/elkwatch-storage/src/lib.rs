//! Persistence layer for rules, alerts, data sources, webhook channels,
//! and system configuration.
//!
//! All access goes through [`store::Store`], a SeaORM/SQLite-backed
//! accessor that transparently encrypts secret fields at rest when an
//! encryption key is configured.

pub mod entities;
pub mod store;


pub use store::alert::{AlertRow, AlertStats, NewAlert};
pub use store::channel::{NewWebhookChannel, WebhookChannelRow};
pub use store::data_source::{DataSourceRow, NewDataSource};
pub use store::rule::{NewRule, RuleRow};
pub use store::Store;
