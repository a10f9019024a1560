use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "data_sources")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique)]
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
    pub last_test_at: Option<DateTimeWithTimeZone>,
    pub test_status: String,
    pub test_error: String,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
