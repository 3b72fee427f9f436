use sea_orm::entity::prelude::*;

/// `click_events` 表：分析事件（时间序列）
///
/// event_id 为主键，消费端重放同一事件时 on_conflict do_nothing，
/// 由此获得幂等插入。
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "click_events")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub event_id: Uuid,
    pub time: DateTimeUtc,
    pub url_id: i64,
    pub short_code: String,
    pub referrer: Option<String>,
    pub user_agent: String,
    pub ip_address: String,
    pub visitor_hash: String,
    pub country_code: Option<String>,
    pub country_name: Option<String>,
    pub city: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub device_type: String,
    pub browser: Option<String>,
    pub operating_system: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
