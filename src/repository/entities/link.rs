use sea_orm::entity::prelude::*;

/// `links` 表：短链主数据
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "links")]
pub struct Model {
    /// Snowflake ID，由写入路径铸造，永不复用
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i64,
    #[sea_orm(unique)]
    pub short_code: String,
    pub destination_url: String,
    pub title: String,
    pub notes: Option<String>,
    pub creator_user_id: String,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
    pub expires_at: Option<DateTimeUtc>,
    pub status: String,
    pub total_clicks: i64,
    pub last_clicked_at: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
