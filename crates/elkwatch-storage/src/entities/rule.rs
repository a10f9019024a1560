use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "rules")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique)]
    pub name: String,
    pub index_pattern: String,
    pub conditions: String,
    pub enabled: bool,
    pub interval_secs: i64,
    pub data_source_id: Option<i64>,
    pub channel_id: Option<i64>,
    pub webhook_url: String,
    pub description: String,
    pub last_run_time: Option<DateTimeWithTimeZone>,
    pub run_count: i64,
    pub alert_count: i64,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
