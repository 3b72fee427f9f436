use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::repository::entities::link;

/// Link lifecycle state.
///
/// Transitions form a partial order; anything else is rejected:
/// - active  → expired | disabled | deleted
/// - expired → disabled | deleted
/// - disabled → deleted
/// - deleted is terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    Active,
    Expired,
    Disabled,
    Deleted,
}

impl LinkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkStatus::Active => "active",
            LinkStatus::Expired => "expired",
            LinkStatus::Disabled => "disabled",
            LinkStatus::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(LinkStatus::Active),
            "expired" => Some(LinkStatus::Expired),
            "disabled" => Some(LinkStatus::Disabled),
            "deleted" => Some(LinkStatus::Deleted),
            _ => None,
        }
    }

    /// Whether the transition `self → to` is legal.
    pub fn can_transition(&self, to: LinkStatus) -> bool {
        use LinkStatus::*;
        matches!(
            (self, to),
            (Active, Expired)
                | (Active, Disabled)
                | (Active, Deleted)
                | (Expired, Disabled)
                | (Expired, Deleted)
                | (Disabled, Deleted)
        )
    }
}

/// 短链领域模型
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    pub id: i64,
    pub short_code: String,
    pub destination_url: String,
    pub title: String,
    pub notes: Option<String>,
    pub creator_user_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub status: LinkStatus,
    pub total_clicks: i64,
    pub last_clicked_at: Option<DateTime<Utc>>,
}

impl Link {
    /// 仅 active 且未过期的链接可被解析
    pub fn is_resolvable(&self, now: DateTime<Utc>) -> bool {
        if self.status != LinkStatus::Active {
            return false;
        }
        match self.expires_at {
            Some(expires_at) => expires_at > now,
            None => true,
        }
    }
}

/// 新建链接的输入（已通过校验）
#[derive(Debug, Clone)]
pub struct NewLink {
    pub id: i64,
    pub short_code: String,
    pub destination_url: String,
    pub title: String,
    pub notes: Option<String>,
    pub creator_user_id: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<link::Model> for Link {
    fn from(model: link::Model) -> Self {
        Link {
            id: model.id,
            short_code: model.short_code,
            destination_url: model.destination_url,
            title: model.title,
            notes: model.notes,
            creator_user_id: model.creator_user_id,
            created_at: model.created_at,
            updated_at: model.updated_at,
            expires_at: model.expires_at,
            // 数据库中的未知状态按 deleted 处理，宁可 404 不可误导
            status: LinkStatus::parse(&model.status).unwrap_or(LinkStatus::Deleted),
            total_clicks: model.total_clicks,
            last_clicked_at: model.last_clicked_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_transition_matrix() {
        use LinkStatus::*;

        let legal = [
            (Active, Expired),
            (Active, Disabled),
            (Active, Deleted),
            (Expired, Disabled),
            (Expired, Deleted),
            (Disabled, Deleted),
        ];
        for (from, to) in legal {
            assert!(from.can_transition(to), "{:?} -> {:?} should be legal", from, to);
        }

        let illegal = [
            (Expired, Active),
            (Disabled, Active),
            (Disabled, Expired),
            (Deleted, Active),
            (Deleted, Expired),
            (Deleted, Disabled),
            (Active, Active),
            (Deleted, Deleted),
        ];
        for (from, to) in illegal {
            assert!(
                !from.can_transition(to),
                "{:?} -> {:?} should be illegal",
                from,
                to
            );
        }
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            LinkStatus::Active,
            LinkStatus::Expired,
            LinkStatus::Disabled,
            LinkStatus::Deleted,
        ] {
            assert_eq!(LinkStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(LinkStatus::parse("bogus"), None);
    }

    fn link_with(status: LinkStatus, expires_at: Option<DateTime<Utc>>) -> Link {
        let now = Utc::now();
        Link {
            id: 1,
            short_code: "abc".into(),
            destination_url: "https://example.com".into(),
            title: "t".into(),
            notes: None,
            creator_user_id: "u1".into(),
            created_at: now,
            updated_at: now,
            expires_at,
            status,
            total_clicks: 0,
            last_clicked_at: None,
        }
    }

    #[test]
    fn test_resolvable_rules() {
        let now = Utc::now();

        assert!(link_with(LinkStatus::Active, None).is_resolvable(now));
        assert!(link_with(LinkStatus::Active, Some(now + Duration::hours(1))).is_resolvable(now));
        assert!(!link_with(LinkStatus::Active, Some(now - Duration::hours(1))).is_resolvable(now));
        assert!(!link_with(LinkStatus::Expired, None).is_resolvable(now));
        assert!(!link_with(LinkStatus::Disabled, None).is_resolvable(now));
        assert!(!link_with(LinkStatus::Deleted, None).is_resolvable(now));
    }
}
