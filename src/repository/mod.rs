//! Data access layer
//!
//! One repository abstraction per aggregate, backed by sea-orm. The write
//! path goes through a transaction bracket; batch counter updates reuse a
//! single CASE WHEN statement per flush.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::{CaseStatement, Expr, PostgresQueryBuilder, Query};
use sea_orm::{
    ActiveValue::Set, ColumnTrait, ConnectOptions, ConnectionTrait, Database, DatabaseConnection,
    DbErr, EntityTrait, QueryFilter, QueryOrder, TransactionTrait,
};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::DatabaseConfig;
use crate::errors::{AppError, Result};

pub mod entities;
mod models;
pub mod retry;

pub use models::{Link, LinkStatus, NewLink};

use entities::link;

/// 链接聚合的仓储接口
#[async_trait]
pub trait LinkRepository: Send + Sync {
    /// 持久化新链接；short_code 唯一约束冲突映射为 ALIAS_TAKEN
    async fn insert(&self, link: NewLink) -> Result<Link>;

    async fn find_by_code(&self, code: &str) -> Result<Option<Link>>;

    async fn list_by_creator(&self, creator_user_id: &str) -> Result<Vec<Link>>;

    /// 状态迁移，非法迁移返回 INVALID_REQUEST；返回更新后的链接
    async fn set_status(&self, id: i64, to: LinkStatus) -> Result<Link>;

    /// 把所有已过期的 active 链接翻转为 expired，返回受影响行数
    async fn mark_expired(&self, now: DateTime<Utc>) -> Result<u64>;

    /// 批量累加点击计数并推进 last_clicked_at
    async fn record_clicks(&self, updates: &[ClickCountUpdate]) -> Result<()>;

    /// 健康检查
    async fn ping(&self) -> Result<()>;
}

/// 一次点击计数汇总（按 url_id 聚合后的增量）
#[derive(Debug, Clone)]
pub struct ClickCountUpdate {
    pub url_id: i64,
    pub count: u64,
    pub last_clicked_at: DateTime<Utc>,
}

/// Open the process-wide connection pool.
pub async fn connect(config: &DatabaseConfig) -> Result<DatabaseConnection> {
    let mut options = ConnectOptions::new(config.database_url.clone());
    options
        .max_connections(config.pool_size)
        .connect_timeout(Duration::from_secs(config.timeout))
        .sqlx_logging(false);

    let db = Database::connect(options).await?;
    info!("Database pool ready (max {} connections)", config.pool_size);
    Ok(db)
}

pub struct SeaOrmLinkRepository {
    db: DatabaseConnection,
    retry_config: retry::RetryConfig,
}

impl SeaOrmLinkRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            db,
            retry_config: retry::RetryConfig::default(),
        }
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }
}

/// Postgres 唯一约束冲突
fn is_unique_violation(err: &DbErr) -> bool {
    let msg = err.to_string();
    msg.contains("duplicate key value violates unique constraint")
        || msg.contains("UNIQUE constraint failed")
}

#[async_trait]
impl LinkRepository for SeaOrmLinkRepository {
    async fn insert(&self, new_link: NewLink) -> Result<Link> {
        let now = Utc::now();
        let active = link::ActiveModel {
            id: Set(new_link.id),
            short_code: Set(new_link.short_code.clone()),
            destination_url: Set(new_link.destination_url.clone()),
            title: Set(new_link.title.clone()),
            notes: Set(new_link.notes.clone()),
            creator_user_id: Set(new_link.creator_user_id.clone()),
            created_at: Set(now),
            updated_at: Set(now),
            expires_at: Set(new_link.expires_at),
            status: Set(LinkStatus::Active.as_str().to_string()),
            total_clicks: Set(0),
            last_clicked_at: Set(None),
        };

        let inserted = self
            .db
            .transaction::<_, link::Model, DbErr>(|txn| {
                Box::pin(async move {
                    link::Entity::insert(active).exec(txn).await?;
                    link::Entity::find_by_id(new_link.id)
                        .one(txn)
                        .await?
                        .ok_or_else(|| DbErr::Custom("inserted link vanished".into()))
                })
            })
            .await
            .map_err(|e| match e {
                sea_orm::TransactionError::Connection(db_err)
                | sea_orm::TransactionError::Transaction(db_err) => {
                    if is_unique_violation(&db_err) {
                        AppError::alias_taken(format!(
                            "short code '{}' is already in use",
                            new_link.short_code
                        ))
                    } else {
                        AppError::from(db_err)
                    }
                }
            })?;

        Ok(inserted.into())
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<Link>> {
        let found = link::Entity::find()
            .filter(link::Column::ShortCode.eq(code))
            .one(&self.db)
            .await?;
        Ok(found.map(Link::from))
    }

    async fn list_by_creator(&self, creator_user_id: &str) -> Result<Vec<Link>> {
        let rows = link::Entity::find()
            .filter(link::Column::CreatorUserId.eq(creator_user_id))
            .filter(link::Column::Status.ne(LinkStatus::Deleted.as_str()))
            .order_by_desc(link::Column::CreatedAt)
            .all(&self.db)
            .await?;
        Ok(rows.into_iter().map(Link::from).collect())
    }

    async fn set_status(&self, id: i64, to: LinkStatus) -> Result<Link> {
        let result = self
            .db
            .transaction::<_, link::Model, AppError>(|txn| {
                Box::pin(async move {
                    let current = link::Entity::find_by_id(id)
                        .one(txn)
                        .await
                        .map_err(AppError::from)?
                        .ok_or_else(|| AppError::not_found(format!("no link with id {}", id)))?;

                    let from = LinkStatus::parse(&current.status)
                        .unwrap_or(LinkStatus::Deleted);
                    if !from.can_transition(to) {
                        return Err(AppError::invalid_request(format!(
                            "illegal status transition {} -> {}",
                            from.as_str(),
                            to.as_str()
                        )));
                    }

                    let mut active: link::ActiveModel = current.into();
                    active.status = Set(to.as_str().to_string());
                    active.updated_at = Set(Utc::now());
                    let updated = link::Entity::update(active)
                        .exec(txn)
                        .await
                        .map_err(AppError::from)?;
                    Ok(updated)
                })
            })
            .await;

        result.map(Link::from).map_err(|e| match e {
            sea_orm::TransactionError::Connection(db_err) => AppError::from(db_err),
            sea_orm::TransactionError::Transaction(app_err) => app_err,
        })
    }

    async fn mark_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = link::Entity::update_many()
            .col_expr(
                link::Column::Status,
                Expr::value(LinkStatus::Expired.as_str()),
            )
            .col_expr(link::Column::UpdatedAt, Expr::value(now))
            .filter(link::Column::Status.eq(LinkStatus::Active.as_str()))
            .filter(link::Column::ExpiresAt.lte(now))
            .exec(&self.db)
            .await?;

        if result.rows_affected > 0 {
            debug!("Expired {} links", result.rows_affected);
        }
        Ok(result.rows_affected)
    }

    async fn record_clicks(&self, updates: &[ClickCountUpdate]) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }

        // 单条 UPDATE + CASE WHEN 覆盖整批，避免逐行往返
        let mut count_case = CaseStatement::new();
        let mut ts_case = CaseStatement::new();
        let mut ids: Vec<i64> = Vec::with_capacity(updates.len());

        for update in updates {
            count_case = count_case.case(
                Expr::col(link::Column::Id).eq(update.url_id),
                Expr::col(link::Column::TotalClicks).add(Expr::val(update.count as i64)),
            );
            ts_case = ts_case.case(
                Expr::col(link::Column::Id).eq(update.url_id),
                Expr::val(update.last_clicked_at),
            );
            ids.push(update.url_id);
        }
        count_case = count_case.finally(Expr::col(link::Column::TotalClicks));
        ts_case = ts_case.finally(Expr::col(link::Column::LastClickedAt));

        let stmt = Query::update()
            .table(link::Entity)
            .value(link::Column::TotalClicks, count_case)
            .value(link::Column::LastClickedAt, ts_case)
            .and_where(Expr::col(link::Column::Id).is_in(ids))
            .to_owned();

        let sql = stmt.to_string(PostgresQueryBuilder);

        let db = &self.db;
        retry::with_retry("record_clicks", self.retry_config, || async {
            db.execute_unprepared(&sql).await
        })
        .await?;

        debug!("Click counters updated for {} links", updates.len());
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.db.ping().await?;
        Ok(())
    }
}
